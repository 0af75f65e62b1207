mod broker;
mod error;
mod log;
mod measurement;
mod store;
mod types;
pub mod util;

pub use broker::{InboundMessage, MessageSubscription, PubSubBroker};
pub use error::{ConnectorError, ErrorKind};
pub use log::{LogAck, LogProducer, LogRecord, RecordHandler};
pub use measurement::Measurement;
pub use store::TimeSeriesStore;
pub use types::{ConnectionState, OverflowPolicy, Qos};
