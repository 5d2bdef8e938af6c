use thiserror::Error;

/// Remote session errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConnectionError {
    #[error("Could not resolve device: {0}")]
    Resolution(String),

    #[error("Timed out resolving device {0}")]
    ResolutionTimeout(String),

    #[error("Device not connected")]
    NotConnected,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ConnectionError {
    fn from(e: std::io::Error) -> Self {
        ConnectionError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for ConnectionError {
    fn from(e: serde_json::Error) -> Self {
        ConnectionError::Transport(e.to_string())
    }
}
