//! Service initialization and dependency injection

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use super::sink::init_sink;
use crate::service::LogAggregator;
use crate::sink::LogSink;
use crate::Config;

/// Container for the initialized log pipeline
#[derive(Clone)]
pub struct Services {
    /// Durable storage behind the aggregator
    pub sink: Arc<dyn LogSink>,
    pub aggregator: LogAggregator,
}

/// Build the sink and the aggregator on top of it
pub async fn init_services(config: &Config) -> Result<Services> {
    let sink = init_sink(&config.sink).await?;
    let aggregator = LogAggregator::new(Arc::clone(&sink), config.aggregator.clone());

    info!(sink = sink.name(), "Services initialized");
    Ok(Services { sink, aggregator })
}
