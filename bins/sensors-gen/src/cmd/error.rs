use sensorgate_api::ConnectorError;
use sensorgate_pipeline::PipelineError;

#[derive(Debug, thiserror::Error)]
pub enum GenError {
    #[error("{0}")]
    Config(String),

    #[error("{0}")]
    Pipeline(#[from] PipelineError),

    #[error("publish: {0}")]
    Publish(#[from] ConnectorError),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}
