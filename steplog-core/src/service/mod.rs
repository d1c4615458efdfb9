pub mod aggregator;
pub mod log_stream;
pub mod subscriber_hub;

pub use aggregator::{AggregatorStats, LogAggregator, StreamStats};
pub use log_stream::LogStream;
pub use subscriber_hub::{BroadcastResult, SubscriberHub, SubscriberId};
