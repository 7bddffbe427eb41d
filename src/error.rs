/// Structural failures that abort a resolution.
///
/// Value anomalies (unsupported encodings, calibration failures, out of range values,
/// overlapping fields, conflicting restrictions) are never reported through this type,
/// see [crate::codec::Converted] and [crate::content::ContentModel::warnings].
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// A named reference could not be resolved against the document model.
    #[error("unresolved {kind} reference '{reference}' from {context}")]
    UnresolvedReference {
        kind: &'static str,
        reference: String,
        /// Path of the space system or definition the reference was made from
        context: String,
    },

    #[error("duplicate definition: {0}")]
    DuplicateDefinition(String),

    /// The document model is malformed, e.g., an inheritance cycle or a recursive aggregate.
    #[error("invalid definition: {0}")]
    InvalidDefinition(String),

    /// The binary buffer does not cover the bits computed for an item.
    #[error("not enough data for {item}: bits {start_bit}+{size} exceed {available}")]
    NotEnoughData {
        item: String,
        start_bit: u64,
        size: u64,
        available: u64,
    },

    #[error(transparent)]
    Time(#[from] crate::time::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
