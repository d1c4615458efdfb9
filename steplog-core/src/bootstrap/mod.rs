//! Bootstrap helpers for the `steplog` server
//!
//! - Configuration loading
//! - Persistence sink construction
//! - Aggregator wiring

pub mod config;
pub mod services;
pub mod sink;

pub use config::load_config;
pub use services::{init_services, Services};
pub use sink::init_sink;
