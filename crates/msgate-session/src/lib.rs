//! # msgate-session
//!
//! Session supervision for the msgate gateway.
//!
//! This crate provides:
//! - The session registry and per-session records
//! - The supervisor driving connect, pairing, reconnection and clearing
//! - Credential stores (filesystem, in-memory, mirrored)
//! - The transport contract and an in-process simulated transport
//! - Startup resumption of persisted sessions
//! - The caller-facing gateway facade
//!
//! ## Architecture
//!
//! This is Layer 1 in the architecture - it depends on msgate-core and is
//! consumed by the HTTP adapter in the msgate crate.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bootstrap;
pub mod gateway;
pub mod policy;
pub mod record;
pub mod registry;
pub mod simulated;
pub mod store;
pub mod supervisor;
pub mod transport;

// Re-export commonly used types
pub use bootstrap::{BootstrapReport, BootstrapScanner};
pub use gateway::{Gateway, MessageReceipt, StatusReport};
pub use policy::{ReconnectDecision, ReconnectPolicy};
pub use record::{SessionRecord, SessionSnapshot};
pub use registry::{SessionEntry, SessionRegistry};
pub use simulated::{SentMessage, SimulatedTransport};
pub use store::{
    CredentialStore, FileCredentialStore, MemoryCredentialStore, MirroredCredentialStore,
};
pub use supervisor::Supervisor;
pub use transport::{TransportClient, TransportFactory, TransportLink};
