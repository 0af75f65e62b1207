pub mod error;

mod broker;
mod log;
mod segment;
mod subscribers;

pub use broker::LocalBroker;
pub use error::EngineError;
pub use log::PartitionedLog;
pub use subscribers::{ChannelSubscription, SubscriberSet};
