/// Failures converting absolute times.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    #[error("unrecognized epoch '{0}'")]
    InvalidEpoch(String),

    /// The binary layout of a time handler does not match the data or the type.
    #[error("invalid time layout: {0}")]
    InvalidLayout(String),

    #[error("invalid time display format '{0}'")]
    InvalidFormat(String),

    #[error("time out of range: {0}")]
    OutOfRange(String),

    #[error("cannot interpret '{0}' as a time")]
    Unparsable(String),
}

pub type Result<T> = std::result::Result<T, Error>;
