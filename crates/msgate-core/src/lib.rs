//! # msgate-core
//!
//! Core types for msgate, the multi-tenant messaging session supervisor.
//!
//! This crate contains all fundamental types with **no internal dependencies**
//! on other msgate crates. It provides:
//!
//! - Session types (SessionId, SessionStatus)
//! - Transport vocabulary (Credentials, TransportEvent, CloseReason)
//! - Configuration loaded from YAML
//! - Error types
//!
//! ## Architecture
//!
//! This is Layer 0 in the architecture - all other crates depend on this one,
//! but this crate has no dependencies on other msgate crates.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod session;
pub mod transport;

// Re-export commonly used types
pub use config::{
    BootstrapSettings, GatewayConfig, PairingSettings, ReconnectSettings, ServerSettings,
    StorageSettings, TransportSettings,
};
pub use error::{Error, Result};
pub use session::{SessionId, SessionStatus};
pub use transport::{CloseClass, CloseReason, Credentials, MessageId, TransportEvent};
