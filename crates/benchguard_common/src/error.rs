use thiserror::Error;

/// Errors surfaced by an instrument driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EquipmentError {
    /// The driver has no live session with the instrument.
    #[error("equipment is not connected")]
    NotConnected,

    /// The instrument did not answer in time.
    #[error("command timed out after {0} ms")]
    Timeout(u64),

    /// Transport-level failure on the instrument bus.
    #[error("bus I/O error: {0}")]
    Io(String),

    /// The instrument answered with something unexpected.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The instrument has no support for the requested operation.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
}

impl EquipmentError {
    /// Returns true for failures that count as timeouts in communication statistics
    pub fn is_timeout(&self) -> bool {
        matches!(self, EquipmentError::Timeout(_))
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A setting held a value that could not be parsed or is out of range.
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        /// Variable name, or dotted path inside a JSON document
        key: String,
        /// Raw value as found
        value: String,
        /// Parser message
        reason: String,
    },

    /// A JSON configuration document was malformed.
    #[error("malformed configuration document: {0}")]
    Json(#[from] serde_json::Error),
}
