use super::{
    epoch_matches, parse_micros, AbsoluteTimeHandler, Error, Result, TimeDisplay,
    MICROS_PER_MILLI, MICROS_PER_SECOND,
};
use crate::bits::RawBits;
use crate::model::{EngineeringType, ItemType, RawType};

/// POSIX `struct timeval` layout: 32-bit unsigned seconds and 32-bit unsigned
/// microseconds since 1970-01-01, big-endian.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PosixTimeHandler {
    display: TimeDisplay,
}

impl PosixTimeHandler {
    pub const SIZE_IN_BITS: u64 = 64;

    #[must_use]
    pub fn with_display(mut self, display: TimeDisplay) -> Self {
        self.display = display;
        self
    }
}

impl AbsoluteTimeHandler for PosixTimeHandler {
    fn is_applicable(&self, ty: &ItemType) -> bool {
        ty.engineering_type == EngineeringType::Time
            && ty.raw_type == RawType::Unsigned
            && ty.size_in_bits == Some(Self::SIZE_IN_BITS)
            && epoch_matches(ty, 0)
    }

    fn uncalibrated_from_raw(&self, raw: &RawBits) -> Result<String> {
        let value = match raw.to_u128() {
            Some(v) if raw.len() as u64 == Self::SIZE_IN_BITS => v,
            _ => {
                return Err(Error::InvalidLayout(format!(
                    "POSIX time expects {} bits, got {}",
                    Self::SIZE_IN_BITS,
                    raw.len()
                )))
            }
        };
        let seconds = (value >> 32) as i64;
        let usec = (value & 0xffff_ffff) as i64;
        let millis = usec / MICROS_PER_MILLI;
        Ok((seconds * MICROS_PER_SECOND + millis * MICROS_PER_MILLI).to_string())
    }

    fn raw_from_uncalibrated(&self, uncalibrated: &str) -> Result<RawBits> {
        let micros = parse_micros(uncalibrated)?;
        if micros < 0 {
            return Err(Error::OutOfRange(format!("{micros}us precedes 1970")));
        }
        let seconds = micros / MICROS_PER_SECOND;
        let seconds = u32::try_from(seconds)
            .map_err(|_| Error::OutOfRange(format!("{seconds} seconds exceed 32 bits")))?;
        let usec = (micros % MICROS_PER_SECOND) / MICROS_PER_MILLI * MICROS_PER_MILLI;
        let value = (u128::from(seconds) << 32) | usec as u128;
        Ok(RawBits::from_u128(value, Self::SIZE_IN_BITS as usize))
    }

    fn display(&self) -> &TimeDisplay {
        &self.display
    }
}
