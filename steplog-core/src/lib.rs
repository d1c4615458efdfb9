pub mod models;
pub mod service;
pub mod sink;
pub mod config;
pub mod error;
pub mod logging;
pub mod bootstrap;

pub use config::Config;
pub use error::{Error, Result};
pub use models::{LogEntry, LogOrigin, SourceId};
pub use service::{AggregatorStats, LogAggregator};
pub use sink::{LogSink, SinkError};
