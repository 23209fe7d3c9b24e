//! Wrapped secret strings.
//!
//! Tokens, client secrets, and webhook tokens live inside [`Secret`], whose
//! only way out is [`Secret::expose`]. `Debug` and `Display` redact, so a
//! stray log line cannot leak credential material. Serialization emits the
//! raw opaque string because token files must round-trip.

use serde::{Deserialize, Serialize};

/// A secret string with redacting `Debug`/`Display`.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The wrapped value. Call sites should pass it straight to the wire
    /// or a storage backend, never into log fields.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Overwrite the secret with an empty value.
    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("***")
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl Serialize for Secret {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_and_display_redact() {
        let secret = Secret::new("hunter2");
        assert_eq!(format!("{secret:?}"), "Secret(***)");
        assert_eq!(format!("{secret}"), "***");
        assert_eq!(secret.expose(), "hunter2");
    }

    #[test]
    fn serde_round_trips_the_raw_string() {
        let secret = Secret::new("tok-123");
        let json = serde_json::to_string(&secret).unwrap();
        assert_eq!(json, "\"tok-123\"");
        let back: Secret = serde_json::from_str(&json).unwrap();
        assert_eq!(back, secret);
    }

    #[test]
    fn clear_wipes_value() {
        let mut secret = Secret::new("x");
        secret.clear();
        assert!(secret.is_empty());
    }
}
