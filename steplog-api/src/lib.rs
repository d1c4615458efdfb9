// Steplog API Library
//
// Provides the log ingestion and tail façade and its HTTP/WebSocket transport

pub mod http;
pub mod impls;

// Re-export commonly used types
pub use http::{create_router, AppState};
pub use impls::LogApiImpl;
