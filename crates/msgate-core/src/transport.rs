//! Types exchanged with the messaging-network transport layer.
//!
//! The transport itself lives outside this workspace; these are the values it
//! hands to the supervisor (lifecycle events, close reasons) and receives from
//! it (credential material).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Opaque per-session key material.
///
/// The transport produces and consumes it; stores persist it verbatim. An
/// empty set means the session has never been paired.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(BTreeMap<String, String>);

impl Credentials {
    /// Empty material for a first-time pairing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether no material has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get one entry.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Set one entry, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate over the entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for Credentials {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Why the transport closed a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "detail")]
pub enum CloseReason {
    /// The account logged this device out
    LoggedOut,
    /// Credential material was rejected as permanently invalid
    CredentialsRejected,
    /// The network asked the client to restart the connection
    RestartRequired,
    /// Another client took over the session
    Conflict,
    /// The network reported a corrupted session
    BadSession,
    /// The socket dropped
    ConnectionLost,
    /// The connection or a query timed out
    TimedOut,
    /// Anything the transport could not map
    Other(String),
}

/// How the reconnection policy treats a close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseClass {
    /// Purge credentials and stop
    Terminal,
    /// Retry after the short delay
    Transient,
    /// Retry after the long delay
    Backoff,
}

impl CloseReason {
    /// Classify the reason for the reconnection policy.
    pub fn classify(&self) -> CloseClass {
        match self {
            Self::LoggedOut | Self::CredentialsRejected => CloseClass::Terminal,
            Self::RestartRequired | Self::Conflict | Self::BadSession => CloseClass::Backoff,
            Self::ConnectionLost | Self::TimedOut | Self::Other(_) => CloseClass::Transient,
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LoggedOut => f.write_str("logged out"),
            Self::CredentialsRejected => f.write_str("credentials rejected"),
            Self::RestartRequired => f.write_str("restart required"),
            Self::Conflict => f.write_str("conflict"),
            Self::BadSession => f.write_str("bad session"),
            Self::ConnectionLost => f.write_str("connection lost"),
            Self::TimedOut => f.write_str("timed out"),
            Self::Other(detail) => write!(f, "other: {detail}"),
        }
    }
}

/// Lifecycle event emitted by a live transport connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A new pairing code, superseding any earlier one
    PairingCode(String),
    /// The link is (re)establishing, e.g. right after a code was scanned
    Connecting,
    /// Authenticated as `identity`
    Connected {
        /// Resolved remote account id
        identity: String,
    },
    /// Key material changed and should be persisted
    CredentialsUpdated(Credentials),
    /// The connection is gone
    Closed(CloseReason),
}

/// Identifier the network assigned to a sent message.
pub type MessageId = String;
