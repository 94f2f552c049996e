//! Session identity and lifecycle status.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

lazy_static! {
    static ref SESSION_ID_PATTERN: Regex = Regex::new(r"^[A-Za-z0-9_.\-]{1,128}$").unwrap();
}

/// Prefix of the credential-store key derived from a session id.
const CREDENTIAL_KEY_PREFIX: &str = "auth_info_";

/// Caller-chosen identifier of a messaging session.
///
/// Stable across process restarts and safe to embed in a file name, since the
/// credential store derives its key from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Validate and wrap a raw session id.
    pub fn parse(raw: impl AsRef<str>) -> Result<Self> {
        let raw = raw.as_ref();
        if raw == "." || raw == ".." || !SESSION_ID_PATTERN.is_match(raw) {
            return Err(Error::InvalidSessionId(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key under which the credential store keeps this session's material.
    pub fn credential_key(&self) -> String {
        format!("{CREDENTIAL_KEY_PREFIX}{}", self.0)
    }

    /// Recover a session id from a credential-store key.
    ///
    /// Returns `None` for keys that were not produced by [`credential_key`](Self::credential_key).
    pub fn from_credential_key(key: &str) -> Option<Self> {
        key.strip_prefix(CREDENTIAL_KEY_PREFIX)
            .and_then(|raw| Self::parse(raw).ok())
    }
}

impl std::str::FromStr for SessionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl<'de> Deserialize<'de> for SessionId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lifecycle status of a supervised session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No live connection (initial state, and after any drop)
    Disconnected,
    /// A connection attempt is in flight
    Connecting,
    /// The transport issued a pairing code and waits for it to be scanned
    AwaitingPairing,
    /// Authenticated and usable for sending
    Connected,
    /// Cleared by an operator; no further transitions
    Terminated,
}

impl SessionStatus {
    /// Wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AwaitingPairing => "awaiting_pairing",
            Self::Connected => "connected",
            Self::Terminated => "terminated",
        }
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// `AwaitingPairing -> AwaitingPairing` is legal: a fresh pairing code
    /// re-arms the state.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;

        match (self, next) {
            (Terminated, _) => false,
            (_, Terminated) => true,
            (Disconnected, Connecting) => true,
            (Connecting, AwaitingPairing | Connected | Disconnected) => true,
            (AwaitingPairing, AwaitingPairing | Connecting | Connected | Disconnected) => true,
            (Connected, Disconnected) => true,
            _ => false,
        }
    }

    /// Whether the status is final.
    pub fn is_terminal(self) -> bool {
        self == Self::Terminated
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
