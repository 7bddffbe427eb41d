//! Calibrator evaluation.
//!
//! Failures are reported as messages; the codec turns them into warnings and substitutes
//! zero.
use crate::model::{Calibrator, SplinePoint, Term};

/// Uncalibrated to calibrated.
pub(crate) fn calibrate(calibrator: &Calibrator, x: f64) -> Result<f64, String> {
    match calibrator {
        Calibrator::Polynomial { terms } => Ok(polynomial(terms, x)),
        Calibrator::Spline {
            order,
            extrapolate,
            points,
        } => spline(*order, *extrapolate, points, x),
        Calibrator::MathOperation => Err("MathOperationCalibrator is not supported".to_string()),
    }
}

/// Calibrated to uncalibrated.
///
/// `raw_bounds` is the inclusive range of values the raw encoding can hold, used to pick
/// between the roots of a quadratic.
pub(crate) fn uncalibrate(
    calibrator: &Calibrator,
    y: f64,
    raw_bounds: (f64, f64),
) -> Result<f64, String> {
    match calibrator {
        Calibrator::Polynomial { terms } => inverse_polynomial(terms, y, raw_bounds),
        Calibrator::Spline {
            order,
            extrapolate,
            points,
        } => inverse_spline(*order, *extrapolate, points, y),
        Calibrator::MathOperation => Err("MathOperationCalibrator is not supported".to_string()),
    }
}

fn polynomial(terms: &[Term], x: f64) -> f64 {
    terms
        .iter()
        .map(|t| t.coefficient * x.powi(t.exponent as i32))
        .sum()
}

fn coefficient(terms: &[Term], exponent: u32) -> f64 {
    terms
        .iter()
        .filter(|t| t.exponent == exponent)
        .map(|t| t.coefficient)
        .sum()
}

fn inverse_polynomial(terms: &[Term], y: f64, (low, high): (f64, f64)) -> Result<f64, String> {
    let degree = terms
        .iter()
        .filter(|t| t.coefficient != 0.0)
        .map(|t| t.exponent)
        .max()
        .unwrap_or(0);
    match degree {
        0 => Err("constant polynomial calibrator cannot be inverted".to_string()),
        1 => Ok((y - coefficient(terms, 0)) / coefficient(terms, 1)),
        2 => {
            let a = coefficient(terms, 2);
            let b = coefficient(terms, 1);
            let c = coefficient(terms, 0) - y;
            let discriminant = b * b - 4.0 * a * c;
            if discriminant < 0.0 {
                return Err(format!(
                    "no real root for calibrated value {y}, discriminant {discriminant}"
                ));
            }
            let root1 = (-b + discriminant.sqrt()) / (2.0 * a);
            let root2 = (-b - discriminant.sqrt()) / (2.0 * a);
            let fits = |r: f64| r >= low && r <= high;
            if fits(root1) {
                Ok(root1)
            } else if fits(root2) {
                Ok(root2)
            } else {
                Err(format!(
                    "neither root {root1} nor {root2} is within the raw range [{low}, {high}]"
                ))
            }
        }
        d => Err(format!(
            "polynomial calibrator of degree {d} cannot be inverted"
        )),
    }
}

fn interpolate(x: f64, x0: f64, y0: f64, x1: f64, y1: f64) -> f64 {
    if x1 == x0 {
        y0
    } else {
        y0 + (x - x0) * (y1 - y0) / (x1 - x0)
    }
}

fn spline(order: u32, extrapolate: bool, points: &[SplinePoint], x: f64) -> Result<f64, String> {
    if order > 1 {
        return Err(format!("spline calibrator of order {order} is not supported"));
    }
    if points.len() < 2 {
        return Err("spline calibrator requires at least 2 points".to_string());
    }
    let last = points.len() - 2;
    for (idx, pair) in points.windows(2).enumerate() {
        let (lo, hi) = (&pair[0], &pair[1]);
        // the final segment includes its upper bound
        if x >= lo.raw && (x < hi.raw || (idx == last && x <= hi.raw)) {
            return Ok(match order {
                0 => lo.calibrated,
                _ => interpolate(x, lo.raw, lo.calibrated, hi.raw, hi.calibrated),
            });
        }
    }
    if order == 1 && extrapolate {
        let pair = if x < points[0].raw {
            &points[..2]
        } else {
            &points[points.len() - 2..]
        };
        return Ok(interpolate(
            x,
            pair[0].raw,
            pair[0].calibrated,
            pair[1].raw,
            pair[1].calibrated,
        ));
    }
    Ok(x)
}

fn inverse_spline(
    order: u32,
    extrapolate: bool,
    points: &[SplinePoint],
    y: f64,
) -> Result<f64, String> {
    if order > 1 {
        return Err(format!("spline calibrator of order {order} is not supported"));
    }
    if points.len() < 2 {
        return Err("spline calibrator requires at least 2 points".to_string());
    }
    for pair in points.windows(2) {
        let (lo, hi) = (&pair[0], &pair[1]);
        let (min, max) = if lo.calibrated <= hi.calibrated {
            (lo.calibrated, hi.calibrated)
        } else {
            (hi.calibrated, lo.calibrated)
        };
        if y < min || y > max {
            continue;
        }
        match order {
            0 if y == lo.calibrated => return Ok(lo.raw),
            0 if y == hi.calibrated => return Ok(hi.raw),
            0 => continue,
            _ => return Ok(interpolate(y, lo.calibrated, lo.raw, hi.calibrated, hi.raw)),
        }
    }
    if !extrapolate || order == 0 {
        return Err(format!(
            "calibrated value {y} is outside the spline calibrator range"
        ));
    }
    let first = &points[..2];
    let tail = &points[points.len() - 2..];
    let pair = if (y - first[0].calibrated).abs() <= (y - tail[1].calibrated).abs() {
        first
    } else {
        tail
    };
    if pair[0].calibrated == pair[1].calibrated {
        return Err(format!(
            "calibrated value {y} cannot be extrapolated from a flat spline segment"
        ));
    }
    Ok(interpolate(
        y,
        pair[0].calibrated,
        pair[0].raw,
        pair[1].calibrated,
        pair[1].raw,
    ))
}
