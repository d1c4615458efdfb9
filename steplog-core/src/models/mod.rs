pub mod id;
pub mod log_entry;

pub use id::SourceId;
pub use log_entry::{LogEntry, LogOrigin};
