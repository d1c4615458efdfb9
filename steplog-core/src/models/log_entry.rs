use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};

use super::SourceId;

/// Output stream a log line was captured from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOrigin {
    #[default]
    Stdout,
    Stderr,
}

impl LogOrigin {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }

    /// Lenient parse: anything other than "stderr" is treated as stdout
    #[must_use]
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("stderr") {
            Self::Stderr
        } else {
            Self::Stdout
        }
    }
}

impl std::fmt::Display for LogOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// Agents are not strict about the stream label, so accept any string.
impl<'de> Deserialize<'de> for LogOrigin {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(Self::parse(&value))
    }
}

/// One log line produced by a step run
///
/// Entries are immutable once built; the aggregator clones them for
/// every live subscriber and for the persistence batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub source_id: SourceId,
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    pub line_number: u32,
    #[serde(default)]
    pub level: String,
    pub content: String,
    #[serde(rename = "stream", default)]
    pub origin: LogOrigin,
    #[serde(default)]
    pub plugin_name: String,
    #[serde(default)]
    pub agent_id: String,
}

impl LogEntry {
    /// Create an entry stamped with the current time
    #[must_use]
    pub fn new(source_id: impl Into<SourceId>, line_number: u32, content: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            timestamp: Utc::now().timestamp_millis(),
            line_number,
            level: "INFO".to_string(),
            content: content.into(),
            origin: LogOrigin::Stdout,
            plugin_name: String::new(),
            agent_id: String::new(),
        }
    }

    #[must_use]
    pub const fn with_origin(mut self, origin: LogOrigin) -> Self {
        self.origin = origin;
        self
    }

    #[must_use]
    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = agent_id.into();
        self
    }
}
