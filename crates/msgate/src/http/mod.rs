//! HTTP Layer
//!
//! This module exposes the gateway operations as a JSON-over-HTTP API
//! built on axum.

pub mod error;
pub mod server;

pub use error::ApiError;
pub use server::{router, AppState};
