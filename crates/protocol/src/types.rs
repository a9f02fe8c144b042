use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Length of a hex-encoded MD5 digest.
pub const CONTENT_HASH_LEN: usize = 32;

/// Content-addressed file identity: the lowercase hex MD5 of the file bytes.
///
/// Parsing rejects anything that is not exactly 32 hex characters, so a
/// `ContentHash` is always safe to embed in a storage path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Validates and normalizes (lowercases) a hex digest.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let trimmed = raw.trim();
        if trimmed.len() != CONTENT_HASH_LEN || !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ProtocolError::InvalidHash(raw.to_string()));
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    /// Wraps raw digest bytes.
    pub fn from_digest(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut hex = String::with_capacity(bytes.len() * 2);
        for b in bytes {
            hex.push_str(&format!("{b:02x}"));
        }
        Self::parse(&hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ContentHash {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ContentHash::parse(&value)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

impl AsRef<str> for ContentHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
