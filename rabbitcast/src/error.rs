use thiserror::Error;

/// Result type alias for rabbitcast operations
pub type Result<T> = std::result::Result<T, RabbitCastError>;

/// Error types for the rabbitcast runtime
#[derive(Error, Debug)]
pub enum RabbitCastError {
    /// AMQP client errors
    #[error("AMQP connection error: {0}")]
    Connection(#[from] lapin::Error),

    /// Broker-level failures reported by a non-AMQP backend
    #[error("Broker error: {0}")]
    Broker(String),

    /// Payload serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Connection open or channel creation did not finish in time
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    /// Malformed compact type signature
    #[error("Malformed signature '{signature}' at position {position}: {reason}")]
    Signature {
        signature: String,
        position: usize,
        reason: String,
    },

    /// Generated handler name clashes with a declared member
    #[error("Cannot rename '{operation}' on {owner}: member '{member}' already exists")]
    NameCollision {
        owner: String,
        operation: String,
        member: String,
    },

    /// Declaration cannot become a remote operation
    #[error("'{operation}' is not a remote operation: {reason}")]
    Ineligible { operation: String, reason: String },

    /// Two remote operations claim the same logical channel
    #[error("Channel '{channel}' of {owner} is already installed by {installed_by}")]
    DuplicateOperation {
        channel: String,
        owner: String,
        installed_by: String,
    },

    /// A stub was invoked before its declaration was transformed
    #[error("Remote operation '{operation}' has not been transformed")]
    NotTransformed { operation: String },

    /// Logical channel name registered twice without deregistering
    #[error("Channel '{channel}' is already registered")]
    AlreadyRegistered { channel: String },

    /// Arguments do not match the declared parameter schema
    #[error("Schema mismatch for '{operation}': {reason}")]
    SchemaMismatch { operation: String, reason: String },

    /// Invalid message format
    #[error("Invalid message format: {reason}")]
    InvalidMessage { reason: String },

    /// The listening receiver is not of the declaring type
    #[error("Receiver for '{operation}' is not a {expected}")]
    ReceiverMismatch {
        operation: String,
        expected: &'static str,
    },

    /// Publishing to an exchange failed
    #[error("Could not send message to exchange '{exchange}': {source}")]
    Send {
        exchange: String,
        #[source]
        source: Box<RabbitCastError>,
    },

    /// Network or file I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors from anyhow
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RabbitCastError {
    /// Create a new broker error
    pub fn broker_error<T: ToString>(message: T) -> Self {
        Self::Broker(message.to_string())
    }

    /// Create a new invalid message error
    pub fn invalid_message<T: ToString>(reason: T) -> Self {
        Self::InvalidMessage {
            reason: reason.to_string(),
        }
    }

    /// Create a schema mismatch error
    pub fn schema_mismatch(operation: impl Into<String>, reason: impl ToString) -> Self {
        Self::SchemaMismatch {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// Wrap a transport failure as a send failure for `exchange`
    pub fn send_failure(exchange: impl Into<String>, source: RabbitCastError) -> Self {
        Self::Send {
            exchange: exchange.into(),
            source: Box::new(source),
        }
    }

    /// Check if the error is transient, i.e. the next call may succeed after a reconnect
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Connection(_) => true,
            Self::Broker(_) => true,
            Self::Timeout { .. } => true,
            Self::Io(_) => true,
            Self::Send { source, .. } => source.is_recoverable(),
            _ => false,
        }
    }
}
