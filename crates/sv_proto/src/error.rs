use thiserror::Error;

/// Stored text does not have the shape we expect.
///
/// `path` points at the offending field in JSONPath-like notation
/// (`$.noiseKey.private`, `$.preKeys.12`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cannot decode {path}: {reason}")]
pub struct DecodeError {
    pub path: String,
    pub reason: String,
}

impl DecodeError {
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("Unknown key category: {0}")]
    UnknownCategory(String),

    #[error("Cannot reconstruct key {id}: {reason}")]
    Reconstruct { id: String, reason: String },

    #[error(transparent)]
    Decode(#[from] DecodeError),
}
