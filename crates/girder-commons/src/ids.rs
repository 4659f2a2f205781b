//! Identifier newtypes shared across Girder crates.
//!
//! Broadcasting names and stream keys are validated at construction so that
//! every downstream consumer (registry keys, history log directories) can
//! rely on a safe character set.

use crate::errors::{CommonError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length in bytes for a broadcasting name or stream key.
const MAX_NAME_LENGTH: usize = 255;

fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CommonError::invalid_input(format!("{} cannot be empty", kind)));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(CommonError::invalid_input(format!(
            "{} exceeds maximum length of {} bytes",
            kind, MAX_NAME_LENGTH
        )));
    }
    for ch in name.chars() {
        if !ch.is_ascii_alphanumeric() && ch != '_' && ch != '-' && ch != '.' {
            return Err(CommonError::invalid_input(format!(
                "{} contains invalid character '{}' (allowed: alphanumeric, '_', '-', '.')",
                kind, ch
            )));
        }
    }
    Ok(())
}

/// A named logical pub/sub topic that connections subscribe to and that
/// messages are published against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BroadcastingName(String);

impl BroadcastingName {
    /// Create a new broadcasting name.
    ///
    /// Names must be non-empty and contain only alphanumeric characters,
    /// underscores, hyphens, and dots.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_name("broadcasting name", &name)?;
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BroadcastingName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for BroadcastingName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifies a history log. Usually equal to the broadcasting name, but a
/// subscription may point several broadcastings at one shared key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamKey(String);

impl StreamKey {
    /// Create a new stream key. Same character rules as broadcasting names;
    /// the key doubles as a directory name in the file-backed history store.
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        validate_name("stream key", &key)?;
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for StreamKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&BroadcastingName> for StreamKey {
    fn from(name: &BroadcastingName) -> Self {
        // Broadcasting names pass the same validation, so this cannot fail.
        Self(name.as_str().to_string())
    }
}

/// Opaque handle for a live connection, assigned by the broadcast hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}
