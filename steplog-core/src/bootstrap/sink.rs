//! Persistence sink construction

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::{SinkConfig, SinkKind};
use crate::sink::{ClickHouseLogSink, LogSink, MemoryLogSink};

/// Build the configured persistence sink
///
/// For ClickHouse the log table is created when `create_table` is set; a
/// failure there is only logged so the server can start while the store
/// is still coming up.
pub async fn init_sink(config: &SinkConfig) -> Result<Arc<dyn LogSink>> {
    match config.kind {
        SinkKind::Memory => {
            warn!("Using in-memory log sink, persisted logs are lost on restart");
            Ok(Arc::new(MemoryLogSink::new()))
        }
        SinkKind::Clickhouse => {
            let sink = ClickHouseLogSink::new(&config.clickhouse)
                .context("Failed to create ClickHouse log sink")?;

            if config.clickhouse.create_table {
                if let Err(e) = sink.ensure_table().await {
                    warn!(
                        table = %sink.table_name(),
                        error = %e,
                        "Failed to create ClickHouse log table"
                    );
                }
            }

            info!(url = %config.clickhouse.url, table = %sink.table_name(), "ClickHouse log sink ready");
            Ok(Arc::new(sink))
        }
    }
}
