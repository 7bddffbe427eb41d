use super::{
    epoch_matches, parse_epoch, parse_micros, AbsoluteTimeHandler, Error, Result, TimeDisplay,
    MICROS_PER_MILLI, MICROS_PER_SECOND, TAI_EPOCH_DELTA,
};
use crate::bits::RawBits;
use crate::model::{EngineeringType, ItemType, RawType};

/// CCSDS Unsegmented Timecode, T-field only.
///
/// A big-endian count of whole seconds followed by a big-endian binary fraction of a
/// second, each a configurable number of bytes.
///
/// # Example
/// ```
/// use xtce::bits::RawBits;
/// use xtce::time::{AbsoluteTimeHandler, CucTimeHandler};
///
/// let cuc = CucTimeHandler::default();
/// let raw = RawBits::from_bytes(&[0, 0, 0, 1, 0x80, 0, 0]);
/// // 1.5s after the 1958 epoch
/// assert_eq!(cuc.uncalibrated_from_raw(&raw).unwrap(), "-378691198500000");
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct CucTimeHandler {
    epoch: i64,
    seconds_bytes: usize,
    fraction_bytes: usize,
    display: TimeDisplay,
}

impl Default for CucTimeHandler {
    /// 4 bytes of seconds and 3 bytes of fraction since the TAI epoch.
    fn default() -> Self {
        Self {
            epoch: -TAI_EPOCH_DELTA * MICROS_PER_SECOND,
            seconds_bytes: Self::DEFAULT_SECONDS_BYTES,
            fraction_bytes: Self::DEFAULT_FRACTION_BYTES,
            display: TimeDisplay::default(),
        }
    }
}

impl CucTimeHandler {
    pub const DEFAULT_SECONDS_BYTES: usize = 4;
    pub const DEFAULT_FRACTION_BYTES: usize = 3;

    /// # Errors
    /// [Error::InvalidEpoch] for an unrecognized epoch, [Error::InvalidLayout] unless
    /// there are 1 to 8 bytes of seconds and at most 8 bytes of fraction.
    pub fn new(epoch: &str, seconds_bytes: usize, fraction_bytes: usize) -> Result<Self> {
        if !(1..=8).contains(&seconds_bytes) || fraction_bytes > 8 {
            return Err(Error::InvalidLayout(format!(
                "CUC with {seconds_bytes} seconds bytes and {fraction_bytes} fraction bytes"
            )));
        }
        Ok(Self {
            epoch: parse_epoch(epoch)?,
            seconds_bytes,
            fraction_bytes,
            display: TimeDisplay::default(),
        })
    }

    #[must_use]
    pub fn with_display(mut self, display: TimeDisplay) -> Self {
        self.display = display;
        self
    }

    #[must_use]
    pub fn size_in_bits(&self) -> u64 {
        ((self.seconds_bytes + self.fraction_bytes) * 8) as u64
    }

    fn fraction_bits(&self) -> u32 {
        (self.fraction_bytes * 8) as u32
    }
}

fn be_value(bytes: &[u8]) -> u128 {
    bytes.iter().fold(0u128, |acc, b| (acc << 8) | u128::from(*b))
}

fn be_bytes(value: u128, len: usize) -> Vec<u8> {
    value.to_be_bytes()[16 - len..].to_vec()
}

impl AbsoluteTimeHandler for CucTimeHandler {
    fn is_applicable(&self, ty: &ItemType) -> bool {
        ty.engineering_type == EngineeringType::Time
            && ty.raw_type == RawType::Unsigned
            && ty.size_in_bits == Some(self.size_in_bits())
            && epoch_matches(ty, self.epoch)
    }

    fn uncalibrated_from_raw(&self, raw: &RawBits) -> Result<String> {
        if raw.len() as u64 != self.size_in_bits() {
            return Err(Error::InvalidLayout(format!(
                "CUC expects {} bits, got {}",
                self.size_in_bits(),
                raw.len()
            )));
        }
        let bytes = raw.to_bytes();
        let (seconds, fraction) = bytes.split_at(self.seconds_bytes);
        let seconds = i64::try_from(be_value(seconds))
            .map_err(|_| Error::OutOfRange(format!("{} seconds", be_value(seconds))))?;
        let millis = (be_value(fraction) * 1000) >> self.fraction_bits();

        seconds
            .checked_mul(MICROS_PER_SECOND)
            .and_then(|v| v.checked_add(millis as i64 * MICROS_PER_MILLI))
            .and_then(|v| v.checked_add(self.epoch))
            .map(|v| v.to_string())
            .ok_or_else(|| Error::OutOfRange(format!("{seconds} seconds after epoch")))
    }

    fn raw_from_uncalibrated(&self, uncalibrated: &str) -> Result<RawBits> {
        let micros = parse_micros(uncalibrated)?;
        let delta = micros
            .checked_sub(self.epoch)
            .filter(|d| *d >= 0)
            .ok_or_else(|| Error::OutOfRange(format!("{micros}us precedes the epoch")))?;
        let seconds = (delta / MICROS_PER_SECOND) as u128;
        let millis = ((delta % MICROS_PER_SECOND) / MICROS_PER_MILLI) as u128;
        if seconds >> (self.seconds_bytes * 8) != 0 {
            return Err(Error::OutOfRange(format!(
                "{seconds} seconds do not fit in {} bytes",
                self.seconds_bytes
            )));
        }
        // round up so decoding truncates back to the same millisecond
        let scale = 1u128 << self.fraction_bits();
        let fraction = ((millis * scale).div_ceil(1000)).min(scale - 1);

        let mut bytes = be_bytes(seconds, self.seconds_bytes);
        bytes.extend(be_bytes(fraction, self.fraction_bytes));
        Ok(RawBits::from_bytes(&bytes))
    }

    fn display(&self) -> &TimeDisplay {
        &self.display
    }
}
