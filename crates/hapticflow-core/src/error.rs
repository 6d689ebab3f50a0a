/*!
 * Error types for the HapticFlow core crate.
 */
use thiserror::Error;

/// Error raised when a message cannot be constructed from the given fields.
///
/// Validation happens once, when a message value is built. A message that
/// exists has legal fields, so devices never see out-of-range input.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// A bounded field received a value outside its legal range
    #[error("{message} field {field} is out of range: {value} (allowed {range})")]
    OutOfRange {
        /// The message variant being built
        message: &'static str,
        /// The offending field
        field: &'static str,
        /// The rejected value, rendered for display
        value: String,
        /// The legal range, rendered for display
        range: &'static str,
    },

    /// A field holds a value that is not legal for other reasons
    #[error("{message} field {field} is invalid: {reason}")]
    Invalid {
        /// The message variant being built
        message: &'static str,
        /// The offending field
        field: &'static str,
        /// Why the value was rejected
        reason: String,
    },

    /// A client request used the id reserved for server-originated messages
    #[error("{0} cannot use the reserved system message id")]
    ReservedId(&'static str),

    /// A list field that needs at least one entry was empty
    #[error("{message} field {field} must not be empty")]
    Empty {
        /// The message variant being built
        message: &'static str,
        /// The offending field
        field: &'static str,
    },

    /// The message has no equivalent in the requested schema version
    #[error("{message} cannot be expressed in schema version {version}")]
    NoDowngrade {
        /// The message variant being translated
        message: &'static str,
        /// The peer schema version
        version: u32,
    },
}

/// Error type for HapticFlow core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Runtime error
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Event delivery error
    #[error("Event error: {0}")]
    Event(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Message validation error
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Other error
    #[error("Other error: {0}")]
    Other(String),
}

/// Result type for HapticFlow core operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a new configuration error
    pub fn config<S: AsRef<str>>(msg: S) -> Self {
        Error::Config(msg.as_ref().to_string())
    }

    /// Create a new runtime error
    pub fn runtime<S: AsRef<str>>(msg: S) -> Self {
        Error::Runtime(msg.as_ref().to_string())
    }

    /// Create a new event error
    pub fn event<S: AsRef<str>>(msg: S) -> Self {
        Error::Event(msg.as_ref().to_string())
    }

    /// Create a new timeout error
    pub fn timeout<S: AsRef<str>>(msg: S) -> Self {
        Error::Timeout(msg.as_ref().to_string())
    }

    /// Create a new error of another kind
    pub fn other<S: AsRef<str>>(msg: S) -> Self {
        Error::Other(msg.as_ref().to_string())
    }
}
