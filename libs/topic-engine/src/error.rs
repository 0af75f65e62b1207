use sensorgate_api::ConnectorError;

/// Errors of the in-process broker and the partitioned log.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid log configuration: {0}")]
    Config(String),

    #[error("invalid log topic name '{0}'")]
    InvalidTopic(String),

    #[error("log storage: {0}")]
    Storage(String),

    #[error("broker is not connected")]
    NotConnected,

    #[error("invalid subscription filter '{0}'")]
    InvalidFilter(String),
}

impl EngineError {
    /// Convert to ConnectorError with a matching ErrorKind.
    ///
    /// `NotConnected` and `Storage` → Io (transient), the rest → Config.
    pub fn into_connector_error(self) -> ConnectorError {
        match self {
            EngineError::NotConnected | EngineError::Storage(_) => ConnectorError::io(self.to_string()),
            other => ConnectorError::config(other.to_string()),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Storage(e.to_string())
    }
}
