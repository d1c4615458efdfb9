//! ClickHouse sink over the HTTP interface
//!
//! Rows travel as `JSONEachRow`, which matches the serde shape of
//! [`LogEntry`] column for column. One flush batch is one INSERT request,
//! and ClickHouse applies a single insert block atomically.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use tracing::{debug, info, warn};

use super::{LogSink, SinkError};
use crate::config::ClickHouseConfig;
use crate::models::{LogEntry, SourceId};

const COLUMNS: &str = "source_id, timestamp, line_number, level, content, stream, plugin_name, agent_id";

/// Longest error body kept from a failed response
const MAX_ERROR_BODY: usize = 512;

pub struct ClickHouseLogSink {
    client: Client,
    url: String,
    database: String,
    table: String,
    user: Option<String>,
    password: Option<String>,
}

impl ClickHouseLogSink {
    pub fn new(config: &ClickHouseConfig) -> Result<Self, SinkError> {
        if config.url.is_empty() {
            return Err(SinkError::InvalidConfig("ClickHouse URL is empty".to_string()));
        }
        validate_identifier(&config.database)?;
        validate_identifier(&config.table)?;

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_seconds.min(10)))
            .timeout(Duration::from_secs(config.timeout_seconds))
            .pool_max_idle_per_host(10)
            .build()?;

        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            database: config.database.clone(),
            table: config.table.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
        })
    }

    /// Fully qualified table name
    #[must_use]
    pub fn table_name(&self) -> String {
        format!("{}.{}", self.database, self.table)
    }

    /// Create the log table if it does not exist yet
    pub async fn ensure_table(&self) -> Result<(), SinkError> {
        let sql = create_table_sql(&self.table_name());
        let response = self.request(&[("query", sql)]).send().await?;
        check_response(response).await?;
        info!(table = %self.table_name(), "ClickHouse log table ready");
        Ok(())
    }

    fn request(&self, params: &[(&str, String)]) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(&self.url).query(params);
        if let Some(user) = &self.user {
            builder = builder.header("X-ClickHouse-User", user);
        }
        if let Some(password) = &self.password {
            builder = builder.header("X-ClickHouse-Key", password);
        }
        builder
    }
}

#[async_trait]
impl LogSink for ClickHouseLogSink {
    async fn batch_insert(&self, entries: &[LogEntry]) -> Result<(), SinkError> {
        if entries.is_empty() {
            return Ok(());
        }

        let body = encode_rows(entries)?;
        let sql = format!("INSERT INTO {} ({COLUMNS}) FORMAT JSONEachRow", self.table_name());

        let response = self.request(&[("query", sql)]).body(body).send().await?;
        check_response(response).await?;

        debug!(rows = entries.len(), table = %self.table_name(), "Inserted log batch");
        Ok(())
    }

    async fn query(
        &self,
        source_id: &SourceId,
        from_line: u32,
        limit: usize,
    ) -> Result<Vec<LogEntry>, SinkError> {
        let mut params = vec![
            ("query", select_sql(&self.table_name(), limit)),
            ("param_source_id", source_id.as_str().to_string()),
            ("param_from_line", from_line.to_string()),
            ("output_format_json_quote_64bit_integers", "0".to_string()),
        ];
        if limit > 0 {
            params.push(("param_limit", limit.to_string()));
        }

        let response = self.request(&params).send().await?;
        let body = check_response(response).await?;
        Ok(decode_rows(&body))
    }

    fn name(&self) -> &'static str {
        "clickhouse"
    }
}

fn validate_identifier(name: &str) -> Result<(), SinkError> {
    let valid = !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(SinkError::InvalidConfig(format!("invalid ClickHouse identifier '{name}'")))
    }
}

fn create_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (\
            source_id String, \
            timestamp Int64, \
            line_number UInt32, \
            level LowCardinality(String), \
            content String, \
            stream LowCardinality(String), \
            plugin_name String, \
            agent_id String\
        ) ENGINE = MergeTree() \
        ORDER BY (source_id, line_number, timestamp) \
        PRIMARY KEY (source_id, line_number)"
    )
}

fn select_sql(table: &str, limit: usize) -> String {
    let mut sql = format!(
        "SELECT {COLUMNS} FROM {table} \
         WHERE source_id = {{source_id:String}} AND line_number >= {{from_line:UInt32}} \
         ORDER BY line_number ASC"
    );
    if limit > 0 {
        sql.push_str(" LIMIT {limit:UInt64}");
    }
    sql.push_str(" FORMAT JSONEachRow");
    sql
}

fn encode_rows(entries: &[LogEntry]) -> Result<String, SinkError> {
    let mut body = String::with_capacity(entries.len() * 128);
    for entry in entries {
        let row = serde_json::to_string(entry).map_err(|e| SinkError::Decode(e.to_string()))?;
        body.push_str(&row);
        body.push('\n');
    }
    Ok(body)
}

/// Parse `JSONEachRow` output; rows that fail to decode are skipped
fn decode_rows(body: &str) -> Vec<LogEntry> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<LogEntry>(line) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "Failed to decode log row, skipping");
                None
            }
        })
        .collect()
}

async fn check_response(response: Response) -> Result<String, SinkError> {
    let status = response.status();
    let body = response.text().await?;
    if status.is_success() {
        return Ok(body);
    }

    let mut body = body;
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    Err(SinkError::Http {
        status: status.as_u16(),
        body,
    })
}
