use std::fmt;

/// Crate-wide `Result` type using [`CursorError`] as the error.
///
/// This alias is re-exported by the parent `error` module and is intended
/// to be used throughout the crate for fallible operations.
pub type Result<T> = std::result::Result<T, CursorError>;

/// Server message prefix that marks a failed node rather than a failed query.
const NOT_MASTER_PREFIX: &str = "not master";

/// Server message returned when a command targets a collection that does not exist.
pub const NS_MISSING: &str = "ns missing";

/// Top-level error type for cursor operations.
///
/// The type is `Clone` so that a failure stored on a cursor can be delivered
/// again on every later drive step.
#[derive(Debug, Clone)]
pub enum CursorError {
    /// Invalid argument passed to a configuration method.
    Argument(ArgumentError),

    /// Operation is not legal in the cursor's current state.
    InvalidOperation(String),

    /// Reply contradicts the cursor's own bookkeeping.
    Protocol(ProtocolError),

    /// Connectivity failures.
    Connection(ConnectionError),

    /// Failure reported by the server.
    Operation(OperationFailure),

    /// A document could not be decoded into the cursor's target type.
    Decode(String),

    /// Configuration errors.
    Config(ConfigError),

    /// MongoDB driver errors the adapter could not classify.
    MongoDb(mongodb::error::Error),
}

/// Argument validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentError {
    /// Argument has the wrong shape.
    InvalidType { field: String, expected: String },

    /// Argument is out of range.
    InvalidValue { field: String, reason: String },
}

/// Protocol-integrity errors. These are fatal and never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The server-reported starting offset does not match the documents retrieved so far.
    OffsetMismatch { expected: i32, actual: i32 },

    /// The reply could not be interpreted.
    MalformedReply(String),
}

/// Connectivity errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The connection is stale or the node stepped down; the caller may reconnect and retry.
    AutoReconnect(String),

    /// No connection is available.
    NotConnected,

    /// A request was abandoned before its reply arrived.
    ReplyLost,
}

/// Failure reported by the server for a query or command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationFailure {
    /// Server error message.
    pub message: String,

    /// Server error code, when one was reported.
    pub code: Option<i32>,
}

/// Configuration-specific errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Config file not found.
    FileNotFound(String),

    /// Invalid config format.
    InvalidFormat(String),

    /// Invalid field value.
    InvalidValue { field: String, value: String },
}

impl CursorError {
    /// Build a sequencing error.
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        CursorError::InvalidOperation(msg.into())
    }

    /// Build an out-of-range argument error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        CursorError::Argument(ArgumentError::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        })
    }

    /// Build a wrong-shape argument error.
    pub fn invalid_type(field: impl Into<String>, expected: impl Into<String>) -> Self {
        CursorError::Argument(ArgumentError::InvalidType {
            field: field.into(),
            expected: expected.into(),
        })
    }

    /// Build a server failure, promoting "not master" messages to reconnect errors.
    pub fn from_server(message: impl Into<String>, code: Option<i32>) -> Self {
        let message = message.into();
        if message.starts_with(NOT_MASTER_PREFIX) {
            return CursorError::Connection(ConnectionError::AutoReconnect(message));
        }
        CursorError::Operation(OperationFailure { message, code })
    }

    /// Whether the failure means the connection should be dropped and re-established.
    pub fn is_reconnect(&self) -> bool {
        matches!(
            self,
            CursorError::Connection(ConnectionError::AutoReconnect(_))
        )
    }

    /// Whether the server reported that the target namespace does not exist.
    pub fn is_namespace_missing(&self) -> bool {
        match self {
            CursorError::Operation(failure) => failure.message == NS_MISSING || failure.code == Some(26),
            _ => false,
        }
    }
}

/* ========================= Display & Error impls ========================= */

impl fmt::Display for CursorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CursorError::Argument(e) => write!(f, "Invalid argument: {e}"),
            CursorError::InvalidOperation(msg) => write!(f, "Invalid operation: {msg}"),
            CursorError::Protocol(e) => write!(f, "Protocol error: {e}"),
            CursorError::Connection(e) => write!(f, "Connection error: {e}"),
            CursorError::Operation(e) => write!(f, "Operation failure: {e}"),
            CursorError::Decode(msg) => write!(f, "Decode error: {msg}"),
            CursorError::Config(e) => write!(f, "Configuration error: {e}"),
            CursorError::MongoDb(e) => write!(f, "MongoDB error: {e}"),
        }
    }
}

impl fmt::Display for ArgumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgumentError::InvalidType { field, expected } => {
                write!(f, "{field} must be {expected}")
            }
            ArgumentError::InvalidValue { field, reason } => write!(f, "{field} {reason}"),
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::OffsetMismatch { expected, actual } => write!(
                f,
                "reply starts at offset {actual} but {expected} documents were retrieved"
            ),
            ProtocolError::MalformedReply(msg) => write!(f, "malformed reply: {msg}"),
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::AutoReconnect(msg) => write!(f, "{msg}"),
            ConnectionError::NotConnected => write!(f, "Not connected to MongoDB"),
            ConnectionError::ReplyLost => write!(f, "Request abandoned before its reply arrived"),
        }
    }
}

impl fmt::Display for OperationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code {code})", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {path}"),
            ConfigError::InvalidFormat(msg) => write!(f, "Invalid config format: {msg}"),
            ConfigError::InvalidValue { field, value } => {
                write!(f, "Invalid value '{value}' for field '{field}'")
            }
        }
    }
}

impl std::error::Error for CursorError {}
impl std::error::Error for ArgumentError {}
impl std::error::Error for ProtocolError {}
impl std::error::Error for ConnectionError {}
impl std::error::Error for OperationFailure {}
impl std::error::Error for ConfigError {}

/* ========================= Conversions to CursorError ========================= */

impl From<ArgumentError> for CursorError {
    fn from(err: ArgumentError) -> Self {
        CursorError::Argument(err)
    }
}

impl From<ProtocolError> for CursorError {
    fn from(err: ProtocolError) -> Self {
        CursorError::Protocol(err)
    }
}

impl From<ConnectionError> for CursorError {
    fn from(err: ConnectionError) -> Self {
        CursorError::Connection(err)
    }
}

impl From<OperationFailure> for CursorError {
    fn from(err: OperationFailure) -> Self {
        CursorError::Operation(err)
    }
}

impl From<ConfigError> for CursorError {
    fn from(err: ConfigError) -> Self {
        CursorError::Config(err)
    }
}

impl From<mongodb::error::Error> for CursorError {
    fn from(err: mongodb::error::Error) -> Self {
        super::mongo::classify_mongodb_error(err)
    }
}

impl From<bson::de::Error> for CursorError {
    fn from(err: bson::de::Error) -> Self {
        CursorError::Decode(err.to_string())
    }
}

impl From<bson::document::ValueAccessError> for CursorError {
    fn from(err: bson::document::ValueAccessError) -> Self {
        CursorError::Protocol(ProtocolError::MalformedReply(err.to_string()))
    }
}
