pub mod codec;
pub mod config;
pub mod error;
pub mod metrics;
pub mod retry;
pub mod topic_namer;
mod bridge;
mod connection;
mod writer;

pub use bridge::{IngestBridge, SubscriptionState};
pub use connection::ConnectionManager;
pub use error::PipelineError;
pub use metrics::{CountersSnapshot, PipelineCounters};
pub use retry::RetryPolicy;
pub use topic_namer::{build_topic_names, topic_names_from_config};
pub use writer::{BatchResult, BatchWriter};
