//! Conversion of single item values between raw bits, uncalibrated, and calibrated form.
//!
//! Conversions never fail outright. Each returns a [Converted] carrying the best effort
//! value and any warnings; a converted value with warnings is a placeholder (empty or
//! zero) and should not be trusted.
mod calibrator;

use tracing::trace;

use crate::bits::{strip_hex_prefix, RawBits};
use crate::model::{EngineeringType, Item, ItemType, RawType};
use crate::time::{self, AbsoluteTimeHandler, TimeHandlers};

/// A conversion result with the warnings collected while producing it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Converted<T> {
    pub value: T,
    pub warnings: Vec<String>,
}

impl<T> Converted<T> {
    #[must_use]
    pub fn ok(value: T) -> Self {
        Self {
            value,
            warnings: Vec::default(),
        }
    }

    #[must_use]
    pub fn warn(value: T, warning: impl Into<String>) -> Self {
        Self {
            value,
            warnings: vec![warning.into()],
        }
    }

    /// True if the conversion produced no warnings.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Converted<U> {
        Converted {
            value: f(self.value),
            warnings: self.warnings,
        }
    }

    /// Move warnings into `warnings` and return the value.
    pub fn collect_into(self, warnings: &mut Vec<String>) -> T {
        warnings.extend(self.warnings);
        self.value
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Number {
    Int(i128),
    Float(f64),
}

impl Number {
    fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if let Some(hex) = strip_hex_prefix(s) {
            return u128::from_str_radix(hex, 16)
                .ok()
                .and_then(|v| i128::try_from(v).ok())
                .map(Self::Int);
        }
        if let Ok(v) = s.parse::<i128>() {
            return Some(Self::Int(v));
        }
        s.parse::<f64>().ok().map(Self::Float)
    }

    fn as_f64(self) -> f64 {
        match self {
            Self::Int(v) => v as f64,
            Self::Float(v) => v,
        }
    }

    /// The integral value, truncating any fraction.
    fn truncated(self) -> Option<i128> {
        match self {
            Self::Int(v) => Some(v),
            Self::Float(v) if v.is_finite() && v.abs() < i128::MAX as f64 => {
                Some(v.trunc() as i128)
            }
            Self::Float(_) => None,
        }
    }

    /// The integral value if there is no fraction.
    fn exact(self) -> Option<i128> {
        match self {
            Self::Float(v) if v.fract() != 0.0 => None,
            _ => self.truncated(),
        }
    }
}

/// Inclusive integer range an encoding of `size` bits can hold.
fn integer_bounds(raw_type: RawType, size: u64) -> Option<(i128, i128)> {
    let n = size.min(128) as u32;
    if n == 0 {
        return Some((0, 0));
    }
    let half = if n >= 128 { i128::MAX } else { (1i128 << (n - 1)) - 1 };
    match raw_type {
        RawType::Unsigned if n >= 127 => Some((0, i128::MAX)),
        RawType::Unsigned => Some((0, (1i128 << n) - 1)),
        RawType::TwosComplement => Some((-half - 1, half)),
        RawType::OnesComplement | RawType::SignMagnitude => Some((-half, half)),
        _ => None,
    }
}

fn signed_from_raw(raw: &RawBits, raw_type: RawType) -> Option<i128> {
    let n = raw.len();
    if n > 128 {
        return None;
    }
    let v = raw.to_u128()?;
    if n == 0 || !raw.msb() {
        return i128::try_from(v).ok();
    }
    if raw_type == RawType::TwosComplement {
        // sign extend
        return Some(if n == 128 { v as i128 } else { (v | (u128::MAX << n)) as i128 });
    }
    let mask = if n == 128 { u128::MAX } else { (1u128 << n) - 1 };
    let magnitude = match raw_type {
        RawType::OnesComplement => !v & mask,
        _ => v & (mask >> 1),
    };
    i128::try_from(magnitude).ok().map(|m| -m)
}

/// Rust float formatting: integral values print without a fraction.
fn format_float(v: f64) -> String {
    format!("{v}")
}

fn decode_utf16(bytes: &[u8]) -> Option<String> {
    let mut units: Vec<u16> = bytes
        .chunks(2)
        .map(|c| u16::from_be_bytes([c[0], *c.get(1).unwrap_or(&0)]))
        .collect();
    match units.first() {
        Some(0xFEFF) => {
            units.remove(0);
        }
        Some(0xFFFE) => {
            units.remove(0);
            units.iter_mut().for_each(|u| *u = u.swap_bytes());
        }
        _ => {}
    }
    String::from_utf16(&units).ok()
}

/// Codec for a single item.
///
/// # Example
/// ```
/// use xtce::bits::RawBits;
/// use xtce::codec::ItemCodec;
/// use xtce::model::{Database, EngineeringType, ItemType, Parameter, RawType, SpaceSystem};
///
/// let root = SpaceSystem::builder()
///     .name("Sat")
///     .parameter_types(vec![ItemType::builder()
///         .name("S8")
///         .engineering_type(EngineeringType::Signed)
///         .raw_type(RawType::TwosComplement)
///         .size_in_bits(8)
///         .build()])
///     .parameters(vec![Parameter::builder().name("Temp").type_ref("S8").build()])
///     .build();
/// let db = Database::new(root).unwrap();
/// let codec = ItemCodec::new(db.parameter("/Sat/Temp").unwrap(), db.time_handlers());
///
/// assert_eq!(codec.decode(&RawBits::from_u128(0xff, 8)).value, "-1");
/// assert_eq!(codec.encode("-128").value, RawBits::from_u128(0x80, 8));
/// ```
#[derive(Clone, Copy, Debug)]
pub struct ItemCodec<'a> {
    item: &'a Item,
    time: Option<&'a dyn AbsoluteTimeHandler>,
}

impl<'a> ItemCodec<'a> {
    #[must_use]
    pub fn new(item: &'a Item, handlers: &'a TimeHandlers) -> Self {
        let ty = item.item_type();
        let time = match ty.engineering_type {
            EngineeringType::Time => handlers.find(ty),
            _ => None,
        };
        Self { item, time }
    }

    #[must_use]
    pub fn item(&self) -> &'a Item {
        self.item
    }

    fn ty(&self) -> &'a ItemType {
        self.item.item_type()
    }

    fn name(&self) -> &'a str {
        self.item.name()
    }

    fn zero(&self) -> RawBits {
        RawBits::zeros(self.ty().size_in_bits.unwrap_or(0) as usize)
    }

    fn with_time<T>(
        &self,
        fallback: T,
        f: impl FnOnce(&dyn AbsoluteTimeHandler) -> time::Result<T>,
    ) -> Converted<T> {
        let Some(handler) = self.time else {
            return Converted::warn(
                fallback,
                format!("{}: no absolute time handler for this time encoding", self.name()),
            );
        };
        match f(handler) {
            Ok(v) => Converted::ok(v),
            Err(e) => Converted::warn(fallback, format!("{}: {e}", self.name())),
        }
    }

    /// Raw bits to calibrated value. Empty on failure.
    #[must_use]
    pub fn decode(&self, raw: &RawBits) -> Converted<String> {
        let mut warnings = Vec::new();
        let uncal = self.uncalibrated_from_raw(raw).collect_into(&mut warnings);
        if !warnings.is_empty() {
            return Converted {
                value: String::new(),
                warnings,
            };
        }
        let cal = self.calibrated_from_uncalibrated(&uncal);
        if cal.is_clean() {
            cal
        } else {
            cal.map(|_| String::new())
        }
    }

    /// Calibrated value to raw bits. All zero bits on failure.
    #[must_use]
    pub fn encode(&self, calibrated: &str) -> Converted<RawBits> {
        let mut warnings = Vec::new();
        let uncal = self
            .uncalibrated_from_calibrated(calibrated)
            .collect_into(&mut warnings);
        if !warnings.is_empty() {
            return Converted {
                value: self.zero(),
                warnings,
            };
        }
        self.raw_from_uncalibrated(&uncal)
    }

    /// Interpret raw bits according to the item's raw encoding.
    ///
    /// Integers become decimal strings, floats use Rust float formatting, binary becomes
    /// `0x` prefixed hex, and strings have trailing NULs removed.
    #[must_use]
    pub fn uncalibrated_from_raw(&self, raw: &RawBits) -> Converted<String> {
        let ty = self.ty();
        if ty.engineering_type == EngineeringType::Time {
            return self.with_time(String::new(), |h| h.uncalibrated_from_raw(raw));
        }
        let unsupported =
            |what: String| Converted::warn(String::new(), format!("{}: {what}", self.name()));
        match ty.raw_type {
            RawType::Unsigned => match raw.to_u128() {
                Some(v) => Converted::ok(v.to_string()),
                None => unsupported(format!("{} bit unsigned value exceeds 128 bits", raw.len())),
            },
            RawType::TwosComplement | RawType::OnesComplement | RawType::SignMagnitude => {
                match signed_from_raw(raw, ty.raw_type) {
                    Some(v) => Converted::ok(v.to_string()),
                    None => unsupported(format!("{} bit signed value exceeds 128 bits", raw.len())),
                }
            }
            RawType::Ieee754 => match (raw.len(), raw.to_u128()) {
                (32, Some(v)) => Converted::ok(format!("{}", f32::from_bits(v as u32))),
                (64, Some(v)) => Converted::ok(format_float(f64::from_bits(v as u64))),
                (n, _) => unsupported(format!("unsupported encoding size {n} for {}", ty.raw_type)),
            },
            RawType::Binary => Converted::ok(raw.to_hex()),
            RawType::Utf8 => match String::from_utf8(raw.to_bytes()) {
                Ok(s) => Converted::ok(s.trim_end_matches('\0').to_string()),
                Err(e) => unsupported(format!("invalid UTF8: {e}")),
            },
            RawType::Utf16 => match decode_utf16(&raw.to_bytes()) {
                Some(s) => Converted::ok(s.trim_end_matches('\0').to_string()),
                None => unsupported("invalid UTF16".to_string()),
            },
            RawType::MilStd1750A | RawType::Bcd | RawType::PackedBcd => {
                unsupported(format!("unsupported raw encoding {}", ty.raw_type))
            }
        }
    }

    /// Apply the item's calibration, labels, or time formatting.
    #[must_use]
    pub fn calibrated_from_uncalibrated(&self, uncalibrated: &str) -> Converted<String> {
        let ty = self.ty();
        let fail =
            |what: String| Converted::warn(String::new(), format!("{}: {what}", self.name()));
        match ty.engineering_type {
            EngineeringType::Time => {
                return self.with_time(String::new(), |h| {
                    h.calibrated_from_uncalibrated(uncalibrated)
                });
            }
            EngineeringType::String => return Converted::ok(uncalibrated.to_string()),
            EngineeringType::Binary => {
                return match self.normalize_binary(uncalibrated) {
                    Some(hex) => Converted::ok(hex),
                    None => fail(format!("'{uncalibrated}' is not a binary value")),
                }
            }
            EngineeringType::Duration | EngineeringType::Structure | EngineeringType::Array => {
                return fail(format!("unsupported engineering type {:?}", ty.engineering_type))
            }
            _ => {}
        }

        let Some(mut number) = Number::parse(uncalibrated) else {
            return fail(format!("cannot interpret uncalibrated value '{uncalibrated}'"));
        };
        if let Some(cal) = &ty.calibrator {
            match calibrator::calibrate(cal, number.as_f64()) {
                Ok(v) => number = Number::Float(v),
                Err(e) => return fail(e),
            }
        }

        match ty.engineering_type {
            EngineeringType::Unsigned | EngineeringType::Signed => match number.truncated() {
                Some(v) if v < 0 && ty.engineering_type == EngineeringType::Unsigned => {
                    fail(format!("negative value {v} for an unsigned item"))
                }
                Some(v) => Converted::ok(v.to_string()),
                None => fail(format!("calibrated value {} is not an integer", number.as_f64())),
            },
            EngineeringType::Float32 => Converted::ok(format!("{}", number.as_f64() as f32)),
            EngineeringType::Boolean => match number.exact() {
                Some(0) => Converted::ok(ty.zero_label().to_string()),
                Some(1) => Converted::ok(ty.one_label().to_string()),
                _ => fail(format!("no boolean label for value {uncalibrated}")),
            },
            EngineeringType::Enumerated => {
                let label = number
                    .exact()
                    .and_then(|v| ty.enumerations.iter().find(|e| e.contains(v)));
                match label {
                    Some(e) => Converted::ok(e.label.clone()),
                    None => fail(format!("no enumeration label for value {uncalibrated}")),
                }
            }
            _ => Converted::ok(format_float(number.as_f64())),
        }
    }

    /// Reverse [Self::calibrated_from_uncalibrated]: labels become their values and
    /// calibrators are inverted.
    #[must_use]
    pub fn uncalibrated_from_calibrated(&self, calibrated: &str) -> Converted<String> {
        let ty = self.ty();
        let fail =
            |what: String| Converted::warn(String::new(), format!("{}: {what}", self.name()));
        let number = match ty.engineering_type {
            EngineeringType::Time => {
                return self.with_time(String::new(), |h| h.uncalibrated_from_calibrated(calibrated))
            }
            EngineeringType::String => return Converted::ok(calibrated.to_string()),
            EngineeringType::Binary => {
                return match self.normalize_binary(calibrated) {
                    Some(hex) => Converted::ok(hex),
                    None => fail(format!("'{calibrated}' is not a binary value")),
                }
            }
            EngineeringType::Boolean => {
                let calibrated = calibrated.trim();
                if calibrated == ty.zero_label() {
                    Number::Int(0)
                } else if calibrated == ty.one_label() {
                    Number::Int(1)
                } else {
                    return fail(format!("'{calibrated}' is not a boolean label"));
                }
            }
            EngineeringType::Enumerated => {
                let calibrated = calibrated.trim();
                match ty.enumerations.iter().find(|e| e.label == calibrated) {
                    Some(e) => Number::Int(e.value),
                    None => return fail(format!("'{calibrated}' is not an enumeration label")),
                }
            }
            EngineeringType::Duration | EngineeringType::Structure | EngineeringType::Array => {
                return fail(format!("unsupported engineering type {:?}", ty.engineering_type))
            }
            _ => match Number::parse(calibrated) {
                Some(n) => n,
                None => return fail(format!("cannot interpret calibrated value '{calibrated}'")),
            },
        };

        if let Some(range) = ty.valid_range.as_ref().filter(|r| r.applies_to_calibrated) {
            if ty.engineering_type.is_numeric() && !range.contains(number.as_f64()) {
                return fail(format!("calibrated value {calibrated} outside the valid range"));
            }
        }

        let number = match &ty.calibrator {
            Some(cal) => match calibrator::uncalibrate(cal, number.as_f64(), self.raw_bounds()) {
                Ok(v) => Number::Float(v),
                Err(e) => return fail(e),
            },
            None => number,
        };

        match ty.raw_type {
            RawType::Ieee754 => Converted::ok(format_float(number.as_f64())),
            _ => match number {
                Number::Int(v) => Converted::ok(v.to_string()),
                Number::Float(v) if v.is_finite() && v.abs() < i128::MAX as f64 => {
                    Converted::ok((v.round() as i128).to_string())
                }
                Number::Float(v) => fail(format!("{v} cannot be encoded as an integer")),
            },
        }
    }

    /// Pack an uncalibrated value into the item's raw encoding.
    ///
    /// Values that do not fit the encoding are replaced by zero bits with a warning.
    #[must_use]
    pub fn raw_from_uncalibrated(&self, uncalibrated: &str) -> Converted<RawBits> {
        let ty = self.ty();
        let Some(size) = ty.size_in_bits else {
            return Converted::warn(
                RawBits::default(),
                format!("{}: dynamically sized encodings are not supported", self.name()),
            );
        };
        if ty.engineering_type == EngineeringType::Time {
            return self.with_time(self.zero(), |h| h.raw_from_uncalibrated(uncalibrated));
        }
        let fail = |what: String| Converted::warn(self.zero(), format!("{}: {what}", self.name()));
        let size = size as usize;

        match ty.raw_type {
            RawType::Unsigned
            | RawType::TwosComplement
            | RawType::OnesComplement
            | RawType::SignMagnitude => match Number::parse(uncalibrated) {
                Some(Number::Int(v)) => self.raw_from_integer(v),
                Some(Number::Float(v)) => self.raw_from_float(v),
                None => fail(format!("cannot interpret uncalibrated value '{uncalibrated}'")),
            },
            RawType::Ieee754 => match uncalibrated.trim().parse::<f64>() {
                Ok(v) => self.raw_from_float(v),
                Err(_) => fail(format!("cannot interpret uncalibrated value '{uncalibrated}'")),
            },
            RawType::Binary => {
                let bits = match strip_hex_prefix(uncalibrated.trim()) {
                    Some(_) => RawBits::from_hex(uncalibrated.trim(), size),
                    None => uncalibrated
                        .trim()
                        .parse::<u128>()
                        .ok()
                        .filter(|v| size >= 128 || v >> size == 0)
                        .map(|v| RawBits::from_u128(v, size)),
                };
                match bits {
                    Some(bits) => Converted::ok(bits),
                    None => fail(format!("'{uncalibrated}' does not fit in {size} bits")),
                }
            }
            RawType::Utf8 => self.raw_from_string(uncalibrated.as_bytes().to_vec()),
            RawType::Utf16 => self.raw_from_string(
                uncalibrated
                    .encode_utf16()
                    .flat_map(u16::to_be_bytes)
                    .collect(),
            ),
            RawType::MilStd1750A | RawType::Bcd | RawType::PackedBcd => {
                fail(format!("unsupported raw encoding {}", ty.raw_type))
            }
        }
    }

    fn raw_from_string(&self, mut bytes: Vec<u8>) -> Converted<RawBits> {
        let size = self.ty().size_in_bits.unwrap_or(0) as usize;
        if size % 8 != 0 || bytes.len() * 8 > size {
            return Converted::warn(
                self.zero(),
                format!(
                    "{}: {} byte string does not fit in {size} bits",
                    self.name(),
                    bytes.len()
                ),
            );
        }
        bytes.resize(size / 8, 0);
        Converted::ok(RawBits::from_bytes(&bytes))
    }

    /// Pack an integer into the item's integer encoding.
    #[must_use]
    pub fn raw_from_integer(&self, value: i128) -> Converted<RawBits> {
        let ty = self.ty();
        if ty.raw_type == RawType::Ieee754 {
            return self.raw_from_float(value as f64);
        }
        if !self.is_integer_raw_value_reasonable(value) {
            return Converted::warn(
                self.zero(),
                format!(
                    "{}: value {value} is out of range for {} bit {}",
                    self.name(),
                    ty.size_in_bits.unwrap_or(0),
                    ty.raw_type
                ),
            );
        }
        let size = ty.size_in_bits.unwrap_or(0) as usize;
        let bits = match ty.raw_type {
            RawType::OnesComplement if value < 0 => RawBits::from_u128(!value.unsigned_abs(), size),
            RawType::SignMagnitude if value < 0 => {
                let mut bits = RawBits::from_u128(value.unsigned_abs(), size);
                bits.set(size.saturating_sub(1), true);
                bits
            }
            // two's complement wraps naturally
            _ => RawBits::from_u128(value as u128, size),
        };
        trace!(item = self.name(), value = %value, raw = %bits, "packed integer");
        Converted::ok(bits)
    }

    /// Pack a float into the item's encoding. Integer encodings accept integral values only.
    #[must_use]
    pub fn raw_from_float(&self, value: f64) -> Converted<RawBits> {
        let ty = self.ty();
        if ty.raw_type.is_integer() {
            return match Number::Float(value).exact() {
                Some(v) => self.raw_from_integer(v),
                None => Converted::warn(
                    self.zero(),
                    format!("{}: {value} is not an integer", self.name()),
                ),
            };
        }
        if ty.raw_type != RawType::Ieee754 {
            return Converted::warn(
                self.zero(),
                format!("{}: cannot encode {value} as {}", self.name(), ty.raw_type),
            );
        }
        if !self.is_float_raw_value_reasonable(value) {
            return Converted::warn(
                self.zero(),
                format!("{}: value {value} is out of range", self.name()),
            );
        }
        match ty.size_in_bits {
            Some(32) => Converted::ok(RawBits::from_u128(
                u128::from((value as f32).to_bits()),
                32,
            )),
            Some(64) => Converted::ok(RawBits::from_u128(u128::from(value.to_bits()), 64)),
            size => Converted::warn(
                self.zero(),
                format!(
                    "{}: unsupported encoding size {} for {}",
                    self.name(),
                    size.unwrap_or(0),
                    ty.raw_type
                ),
            ),
        }
    }

    /// True if `value` fits the integer encoding and any raw valid range.
    #[must_use]
    pub fn is_integer_raw_value_reasonable(&self, value: i128) -> bool {
        let ty = self.ty();
        let Some((low, high)) = ty
            .size_in_bits
            .and_then(|size| integer_bounds(ty.raw_type, size))
        else {
            return false;
        };
        (low..=high).contains(&value) && self.in_raw_range(value as f64)
    }

    /// True if `value` fits the float encoding and any raw valid range.
    #[must_use]
    pub fn is_float_raw_value_reasonable(&self, value: f64) -> bool {
        let limit = match self.ty().size_in_bits {
            Some(32) => f64::from(f32::MAX),
            Some(64) => f64::MAX,
            _ => return false,
        };
        (value.is_nan() || value.is_infinite() || value.abs() <= limit) && self.in_raw_range(value)
    }

    fn in_raw_range(&self, value: f64) -> bool {
        match &self.ty().valid_range {
            Some(range) if !range.applies_to_calibrated => range.contains(value),
            _ => true,
        }
    }

    /// Inclusive range of uncalibrated values the encoding can hold.
    fn raw_bounds(&self) -> (f64, f64) {
        let ty = self.ty();
        let (mut low, mut high) = match ty.raw_type {
            RawType::Ieee754 => match ty.size_in_bits {
                Some(32) => (-f64::from(f32::MAX), f64::from(f32::MAX)),
                _ => (f64::MIN, f64::MAX),
            },
            raw_type => match ty.size_in_bits.and_then(|s| integer_bounds(raw_type, s)) {
                Some((low, high)) => (low as f64, high as f64),
                None => (f64::MIN, f64::MAX),
            },
        };
        if let Some(range) = ty.valid_range.as_ref().filter(|r| !r.applies_to_calibrated) {
            low = range.low.map_or(low, |l| l.max(low));
            high = range.high.map_or(high, |h| h.min(high));
        }
        (low, high)
    }

    /// Binary values as `0x` prefixed hex, padded to the item size when it is known.
    fn normalize_binary(&self, value: &str) -> Option<String> {
        let value = value.trim();
        let digits = strip_hex_prefix(value).unwrap_or(value);
        let len = self
            .ty()
            .size_in_bits
            .map_or(digits.len() * 4, |s| s as usize);
        RawBits::from_hex(digits, len).map(|bits| bits.to_hex())
    }
}
