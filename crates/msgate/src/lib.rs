//! msgate Gateway Library
//!
//! This library contains the HTTP layer types and handlers and the wiring
//! from configuration to a running gateway.
//! The actual server binary is in main.rs.

pub mod api;
pub mod app;
pub mod http;

// Re-export commonly used types
pub use api::*;
pub use app::App;
pub use http::{router, ApiError, AppState};
