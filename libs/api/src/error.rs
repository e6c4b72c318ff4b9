use crate::types::ConnectionState;

/// Category of a telemetry error. Lets the publisher loop decide between
/// retry, drop and fail-fast without matching on every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid configuration: permanent, fail at startup.
    Config,
    /// Network or broker error: transient, reconnect and retry.
    Io,
    /// Sample could not be encoded or decoded: skip the record.
    Format,
    /// Logical error (full queue, shutdown, illegal state change).
    Logic,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Config => f.write_str("config"),
            ErrorKind::Io => f.write_str("io"),
            ErrorKind::Format => f.write_str("format"),
            ErrorKind::Logic => f.write_str("logic"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TelemetryError {
    #[error("serialization: {0}")]
    Serialization(String),

    #[error("outbound queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("not connected")]
    NotConnected,

    #[error("transport: {0}")]
    Transport(String),

    #[error("protocol: {0}")]
    Protocol(String),

    #[error("shutdown in progress")]
    ShutdownInProgress,

    #[error("config: {0}")]
    Config(String),

    #[error("invalid state transition {from} -> {to}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },
}

impl TelemetryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TelemetryError::Serialization(_) => ErrorKind::Format,
            TelemetryError::NotConnected
            | TelemetryError::Transport(_)
            | TelemetryError::Protocol(_) => ErrorKind::Io,
            TelemetryError::Config(_) => ErrorKind::Config,
            TelemetryError::QueueFull { .. }
            | TelemetryError::ShutdownInProgress
            | TelemetryError::InvalidTransition { .. } => ErrorKind::Logic,
        }
    }

    /// Ошибка временная: запись можно повторить после переподключения.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Io
    }
}

impl From<std::io::Error> for TelemetryError {
    fn from(e: std::io::Error) -> Self {
        TelemetryError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for TelemetryError {
    fn from(e: serde_json::Error) -> Self {
        TelemetryError::Serialization(e.to_string())
    }
}
