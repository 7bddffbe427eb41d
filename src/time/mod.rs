//! Absolute time handling for `Time` items.
//!
//! Uncalibrated time values are microseconds since the Unix epoch, truncated to whole
//! milliseconds. Calibrated values are formatted date strings, see [TimeDisplay].
//!
//! Handlers are looked up per item type from a [TimeHandlers] registry; the first handler
//! that reports itself applicable wins.
mod cuc;
mod error;
mod posix;

use std::fmt::{self, Debug, Write};

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

pub use cuc::CucTimeHandler;
pub use error::{Error, Result};
pub use posix::PosixTimeHandler;

use crate::bits::RawBits;
use crate::model::ItemType;

pub(crate) const MICROS_PER_SECOND: i64 = 1_000_000;
pub(crate) const MICROS_PER_MILLI: i64 = 1_000;

/// Seconds from the Unix epoch back to 1958-01-01, the TAI epoch.
pub const TAI_EPOCH_DELTA: i64 = 378_691_200;
/// Seconds from the Unix epoch to 1980-01-06, the GPS epoch.
pub const GPS_EPOCH_DELTA: i64 = 315_964_800;

/// Converts between raw bits, uncalibrated microseconds, and calibrated date strings.
pub trait AbsoluteTimeHandler: Send + Sync + Debug {
    /// True if this handler can encode and decode items of type `ty`.
    fn is_applicable(&self, ty: &ItemType) -> bool;

    /// Raw bits to microseconds since the Unix epoch.
    ///
    /// # Errors
    /// [Error::InvalidLayout] if `raw` does not have the handler's size.
    fn uncalibrated_from_raw(&self, raw: &RawBits) -> Result<String>;

    /// Microseconds since the Unix epoch to raw bits.
    ///
    /// # Errors
    /// [Error::Unparsable] for non-numeric input, [Error::OutOfRange] if the time precedes
    /// the epoch or does not fit the layout.
    fn raw_from_uncalibrated(&self, uncalibrated: &str) -> Result<RawBits>;

    fn display(&self) -> &TimeDisplay;

    /// Microseconds since the Unix epoch to a date string.
    ///
    /// # Errors
    /// See [TimeDisplay::format_micros].
    fn calibrated_from_uncalibrated(&self, uncalibrated: &str) -> Result<String> {
        self.display().format_micros(parse_micros(uncalibrated)?)
    }

    /// Date string to microseconds since the Unix epoch.
    ///
    /// # Errors
    /// See [TimeDisplay::parse_micros].
    fn uncalibrated_from_calibrated(&self, calibrated: &str) -> Result<String> {
        Ok(self.display().parse_micros(calibrated)?.to_string())
    }
}

/// Calibrated time presentation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeDisplay {
    /// chrono strftime format
    #[serde(default = "default_format")]
    pub format: String,
    /// Offset from UTC applied when formatting and parsing.
    #[serde(default)]
    pub utc_offset_seconds: i32,
}

fn default_format() -> String {
    TimeDisplay::DEFAULT_FORMAT.to_string()
}

impl Default for TimeDisplay {
    fn default() -> Self {
        Self {
            format: default_format(),
            utc_offset_seconds: 0,
        }
    }
}

impl TimeDisplay {
    pub const DEFAULT_FORMAT: &'static str = "%Y-%m-%dT%H:%M:%S%.3f";

    /// # Errors
    /// [Error::InvalidFormat] if `format` is not a valid strftime format, or
    /// [Error::OutOfRange] for an offset of a day or more.
    pub fn new(format: impl Into<String>, utc_offset_seconds: i32) -> Result<Self> {
        let display = Self {
            format: format.into(),
            utc_offset_seconds,
        };
        if StrftimeItems::new(&display.format).any(|i| matches!(i, Item::Error)) {
            return Err(Error::InvalidFormat(display.format));
        }
        display.offset()?;
        Ok(display)
    }

    fn offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_seconds).ok_or_else(|| {
            Error::OutOfRange(format!("UTC offset of {}s", self.utc_offset_seconds))
        })
    }

    /// # Errors
    /// [Error::OutOfRange] if chrono cannot represent the time, [Error::InvalidFormat]
    /// if the format cannot be rendered.
    pub fn format_micros(&self, micros: i64) -> Result<String> {
        let dt = DateTime::<Utc>::from_timestamp_micros(micros)
            .ok_or_else(|| Error::OutOfRange(format!("{micros}us")))?
            .with_timezone(&self.offset()?);
        let mut s = String::new();
        write!(s, "{}", dt.format(&self.format))
            .map_err(|_| Error::InvalidFormat(self.format.clone()))?;
        Ok(s)
    }

    /// Parse a date string in this format, falling back to RFC 3339, and return whole
    /// milliseconds as microseconds since the Unix epoch.
    ///
    /// # Errors
    /// [Error::Unparsable] if neither format matches.
    pub fn parse_micros(&self, s: &str) -> Result<i64> {
        let s = s.trim();
        let offset = self.offset()?;
        let dt = NaiveDateTime::parse_from_str(s, &self.format)
            .ok()
            .and_then(|naive| offset.from_local_datetime(&naive).single())
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|| {
                DateTime::parse_from_rfc3339(s)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc))
            })
            .ok_or_else(|| Error::Unparsable(s.to_string()))?;
        Ok(truncate_millis(dt.timestamp_micros()))
    }
}

/// Drop sub-millisecond precision.
pub(crate) fn truncate_millis(micros: i64) -> i64 {
    micros - micros.rem_euclid(MICROS_PER_MILLI)
}

/// Parse an uncalibrated time, tolerating a fractional part.
pub(crate) fn parse_micros(s: &str) -> Result<i64> {
    let s = s.trim();
    if let Ok(v) = s.parse::<i64>() {
        return Ok(v);
    }
    match s.parse::<f64>() {
        Ok(v) if v.is_finite() && v.abs() < i64::MAX as f64 => Ok(v.trunc() as i64),
        _ => Err(Error::Unparsable(s.to_string())),
    }
}

/// Microseconds since the Unix epoch for an epoch name or date.
///
/// Accepts `TAI`, `UNIX`, `POSIX`, `GPS`, `J2000`, a date such as `1958-01-01`, a naive
/// date time, or an RFC 3339 timestamp. Naive values are taken as UTC.
///
/// # Errors
/// [Error::InvalidEpoch] if `epoch` is none of these.
pub fn parse_epoch(epoch: &str) -> Result<i64> {
    let epoch = epoch.trim();
    match epoch.to_ascii_uppercase().as_str() {
        "TAI" => return Ok(-TAI_EPOCH_DELTA * MICROS_PER_SECOND),
        "UNIX" | "POSIX" => return Ok(0),
        "GPS" => return Ok(GPS_EPOCH_DELTA * MICROS_PER_SECOND),
        // 2000-01-01T11:58:55.816 UTC
        "J2000" => return Ok(946_727_935_816_000),
        _ => {}
    }
    if let Ok(date) = NaiveDate::parse_from_str(epoch, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(dt.and_utc().timestamp_micros());
        }
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(epoch, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(dt.and_utc().timestamp_micros());
    }
    DateTime::parse_from_rfc3339(epoch)
        .map(|dt| dt.timestamp_micros())
        .map_err(|_| Error::InvalidEpoch(epoch.to_string()))
}

/// True if `ty` declares an epoch equal to `epoch_micros`.
pub(crate) fn epoch_matches(ty: &ItemType, epoch_micros: i64) -> bool {
    ty.epoch
        .as_deref()
        .and_then(|e| parse_epoch(e).ok())
        .is_some_and(|e| e == epoch_micros)
}

/// Ordered registry of absolute time handlers.
///
/// The default registry holds a [CucTimeHandler] with its default layout followed by a
/// [PosixTimeHandler].
pub struct TimeHandlers {
    handlers: Vec<Box<dyn AbsoluteTimeHandler>>,
}

impl Default for TimeHandlers {
    fn default() -> Self {
        Self::with_display(&TimeDisplay::default())
    }
}

impl Debug for TimeHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.handlers.iter()).finish()
    }
}

impl TimeHandlers {
    /// A registry without handlers; every `Time` item is reported as unsupported.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            handlers: Vec::default(),
        }
    }

    /// The default handlers, formatting calibrated values with `display`.
    #[must_use]
    pub fn with_display(display: &TimeDisplay) -> Self {
        let mut handlers = Self::empty();
        handlers.register(CucTimeHandler::default().with_display(display.clone()));
        handlers.register(PosixTimeHandler::default().with_display(display.clone()));
        handlers
    }

    /// Add a handler after those already registered.
    pub fn register(&mut self, handler: impl AbsoluteTimeHandler + 'static) {
        self.handlers.push(Box::new(handler));
    }

    /// First handler applicable to `ty`.
    #[must_use]
    pub fn find(&self, ty: &ItemType) -> Option<&dyn AbsoluteTimeHandler> {
        self.handlers
            .iter()
            .find(|h| h.is_applicable(ty))
            .map(|h| h.as_ref())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
