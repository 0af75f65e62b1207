#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("{0}")]
    Pipeline(#[from] sensorgate_pipeline::PipelineError),

    #[error("log: {0}")]
    Engine(#[from] sensorgate_topic_engine::EngineError),

    #[error("storage: {0}")]
    Storage(#[from] sensorgate_api::ConnectorError),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}
