//! XTCE telemetry and telecommand content resolution.
//!
//! Given the definitions of a space system, this crate computes the bit level layout of
//! a sequence container or telecommand (inheritance flattened, include conditions
//! evaluated, repeats expanded), and converts item values between their raw,
//! uncalibrated, and calibrated forms to decode captured buffers or build new ones.
//!
//! * [model] holds the definitions and the [Database](model::Database) indexing them.
//! * [codec] converts a single item's values.
//! * [time] provides absolute time encodings (CCSDS CUC and POSIX).
//! * [content] resolves containers and telecommands.
//!
//! References:
//! * XML Telemetric and Command Exchange (XTCE) 660.1-G-2
//!     - <https://public.ccsds.org/Pubs/660x1g2.pdf>
//! * CCSDS Time Code Formats 301.0-B-4
//!     - <https://public.ccsds.org/Pubs/301x0b4e1.pdf>
pub mod bits;
pub mod codec;
pub mod content;
pub mod entry_value;
pub mod error;
pub mod model;
pub mod time;

pub use error::{Error, Result};
