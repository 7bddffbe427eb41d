use std::fmt::Display;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

/// Engineering (calibrated) representation of an item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineeringType {
    Unsigned,
    Signed,
    Float32,
    Float64,
    Float128,
    Boolean,
    Enumerated,
    String,
    Binary,
    Time,
    Duration,
    Structure,
    Array,
}

impl EngineeringType {
    #[must_use]
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            Self::Unsigned | Self::Signed | Self::Float32 | Self::Float64 | Self::Float128
        )
    }

    #[must_use]
    pub fn is_integer(self) -> bool {
        matches!(self, Self::Unsigned | Self::Signed)
    }
}

/// On-the-wire encoding of an item.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RawType {
    #[default]
    Unsigned,
    SignMagnitude,
    OnesComplement,
    TwosComplement,
    Binary,
    #[serde(rename = "IEEE754_1985")]
    Ieee754,
    #[serde(rename = "MILSTD_1750A")]
    MilStd1750A,
    #[serde(rename = "BCD")]
    Bcd,
    #[serde(rename = "packedBCD")]
    PackedBcd,
    #[serde(rename = "UTF8")]
    Utf8,
    #[serde(rename = "UTF16")]
    Utf16,
}

impl RawType {
    /// True for the integer encodings this crate can pack and unpack.
    #[must_use]
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Self::Unsigned | Self::SignMagnitude | Self::OnesComplement | Self::TwosComplement
        )
    }
}

impl Display for RawType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unsigned => "unsigned",
            Self::SignMagnitude => "signMagnitude",
            Self::OnesComplement => "onesComplement",
            Self::TwosComplement => "twosComplement",
            Self::Binary => "binary",
            Self::Ieee754 => "IEEE754_1985",
            Self::MilStd1750A => "MILSTD_1750A",
            Self::Bcd => "BCD",
            Self::PackedBcd => "packedBCD",
            Self::Utf8 => "UTF8",
            Self::Utf16 => "UTF16",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BitOrder {
    #[default]
    MostSignificantBitFirst,
    LeastSignificantBitFirst,
}

/// One row of an enumeration table. A row with `max_value` covers the inclusive range
/// `value..=max_value`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct Enumeration {
    pub value: i128,
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    pub max_value: Option<i128>,
    #[builder(setter(into))]
    pub label: String,
}

impl Enumeration {
    #[must_use]
    pub fn contains(&self, value: i128) -> bool {
        match self.max_value {
            Some(max) => (self.value..=max).contains(&value),
            None => self.value == value,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Term {
    pub coefficient: f64,
    pub exponent: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplinePoint {
    pub raw: f64,
    pub calibrated: f64,
}

/// Calibration curve between uncalibrated and calibrated values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Calibrator {
    /// `y = sum(coefficient * x^exponent)`
    Polynomial { terms: Vec<Term> },
    /// Piecewise curve over `points`, ordered by raw value.
    Spline {
        #[serde(default = "default_spline_order")]
        order: u32,
        #[serde(default)]
        extrapolate: bool,
        points: Vec<SplinePoint>,
    },
    /// Algebraic calibrators are not evaluated.
    MathOperation,
}

fn default_spline_order() -> u32 {
    1
}

impl Calibrator {
    /// Polynomial from `(coefficient, exponent)` pairs.
    #[must_use]
    pub fn polynomial(terms: &[(f64, u32)]) -> Self {
        Self::Polynomial {
            terms: terms
                .iter()
                .map(|(coefficient, exponent)| Term {
                    coefficient: *coefficient,
                    exponent: *exponent,
                })
                .collect(),
        }
    }

    /// Spline from `(raw, calibrated)` pairs.
    #[must_use]
    pub fn spline(order: u32, extrapolate: bool, points: &[(f64, f64)]) -> Self {
        Self::Spline {
            order,
            extrapolate,
            points: points
                .iter()
                .map(|(raw, calibrated)| SplinePoint {
                    raw: *raw,
                    calibrated: *calibrated,
                })
                .collect(),
        }
    }
}

/// Valid range constraint on either the calibrated or the raw form of a value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct ValidRange {
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    pub low: Option<f64>,
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    pub high: Option<f64>,
    #[builder(default = true)]
    #[serde(default = "default_true")]
    pub low_inclusive: bool,
    #[builder(default = true)]
    #[serde(default = "default_true")]
    pub high_inclusive: bool,
    /// When false the range applies to the raw value.
    #[builder(default = true)]
    #[serde(default = "default_true")]
    pub applies_to_calibrated: bool,
}

fn default_true() -> bool {
    true
}

impl ValidRange {
    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        let above_low = match self.low {
            Some(low) if self.low_inclusive => value >= low,
            Some(low) => value > low,
            None => true,
        };
        let below_high = match self.high {
            Some(high) if self.high_inclusive => value <= high,
            Some(high) => value < high,
            None => true,
        };
        above_low && below_high
    }
}

/// Reference to the type of one member of an aggregate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    #[builder(setter(into))]
    pub name: String,
    #[builder(setter(into))]
    pub type_ref: String,
}

/// Encoding descriptor for a parameter, argument, or aggregate member.
///
/// # Example
/// ```
/// use xtce::model::{EngineeringType, ItemType, RawType};
///
/// let ty = ItemType::builder()
///     .name("S8")
///     .engineering_type(EngineeringType::Signed)
///     .raw_type(RawType::TwosComplement)
///     .size_in_bits(8)
///     .build();
/// assert_eq!(ty.size_in_bits, Some(8));
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct ItemType {
    #[builder(setter(into))]
    pub name: String,
    pub engineering_type: EngineeringType,
    #[builder(default)]
    #[serde(default)]
    pub raw_type: RawType,
    /// `None` indicates a dynamically sized item.
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    pub size_in_bits: Option<u64>,
    #[builder(default)]
    #[serde(default)]
    pub bit_order: BitOrder,
    #[builder(default)]
    #[serde(default)]
    pub enumerations: Vec<Enumeration>,
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    pub calibrator: Option<Calibrator>,
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    pub valid_range: Option<ValidRange>,
    #[builder(default, setter(strip_option, into))]
    #[serde(default)]
    pub zero_label: Option<String>,
    #[builder(default, setter(strip_option, into))]
    #[serde(default)]
    pub one_label: Option<String>,
    /// Epoch of an absolute time, e.g., `TAI` or `1970-01-01`.
    #[builder(default, setter(strip_option, into))]
    #[serde(default)]
    pub epoch: Option<String>,
    /// Members of a `Structure`, in wire order.
    #[builder(default)]
    #[serde(default)]
    pub members: Vec<Member>,
}

impl ItemType {
    pub const DEFAULT_ZERO_LABEL: &'static str = "False";
    pub const DEFAULT_ONE_LABEL: &'static str = "True";

    #[must_use]
    pub fn zero_label(&self) -> &str {
        self.zero_label.as_deref().unwrap_or(Self::DEFAULT_ZERO_LABEL)
    }

    #[must_use]
    pub fn one_label(&self) -> &str {
        self.one_label.as_deref().unwrap_or(Self::DEFAULT_ONE_LABEL)
    }

    #[must_use]
    pub fn is_aggregate(&self) -> bool {
        self.engineering_type == EngineeringType::Structure
    }
}
