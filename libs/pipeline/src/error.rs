use sensorgate_api::{ConnectorError, ErrorKind};

#[derive(Debug, Clone, thiserror::Error)]
pub enum PipelineError {
    #[error("configuration: {0}")]
    Configuration(String),

    #[error("malformed topic '{topic}': {reason}")]
    MalformedTopic { topic: String, reason: String },

    #[error("decode: {0}")]
    Decode(String),

    #[error("encode: {0}")]
    Encode(String),

    #[error("publish ({topic}): {source}")]
    Publish { topic: String, source: ConnectorError },

    #[error("publish ({topic}) failed after {attempts} attempts: {source}")]
    PublishRetriesExhausted { topic: String, attempts: u32, source: ConnectorError },

    #[error("store: {0}")]
    Store(ConnectorError),

    #[error("store failed after {attempts} attempts: {source}")]
    StoreRetriesExhausted { attempts: u32, source: ConnectorError },

    #[error("subscription ({topic}): {source}")]
    Subscription { topic: String, source: ConnectorError },

    #[error("broker: {0}")]
    Broker(ConnectorError),
}

impl PipelineError {
    /// Convert to ConnectorError, keeping the collaborator's kind where
    /// there is one.
    pub fn into_connector_error(self) -> ConnectorError {
        let kind = match &self {
            PipelineError::Configuration(_) => ErrorKind::Config,
            PipelineError::MalformedTopic { .. }
            | PipelineError::Decode(_)
            | PipelineError::Encode(_) => ErrorKind::Format,
            PipelineError::Publish { source, .. }
            | PipelineError::PublishRetriesExhausted { source, .. }
            | PipelineError::StoreRetriesExhausted { source, .. }
            | PipelineError::Subscription { source, .. } => source.kind(),
            PipelineError::Store(source) | PipelineError::Broker(source) => source.kind(),
        };
        let message = self.to_string();
        match kind {
            ErrorKind::Config => ConnectorError::config(message),
            ErrorKind::Io => ConnectorError::io(message),
            ErrorKind::Format => ConnectorError::format_err(message),
            ErrorKind::Logic => ConnectorError::new(message),
        }
    }
}
