//! Identifiers shared across the crate.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a conversation thread
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadId(pub String);

impl ThreadId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_ids_are_unique_uuids() {
        let a = ThreadId::new();
        let b = ThreadId::new();

        assert_ne!(a, b);
        assert!(Uuid::parse_str(&a.0).is_ok());
    }

    #[test]
    fn test_display_and_serde_are_transparent_strings() -> anyhow::Result<()> {
        let id = ThreadId::from_string("user-42/main");

        assert_eq!(id.to_string(), "user-42/main");
        assert_eq!(serde_json::to_string(&id)?, r#""user-42/main""#);
        Ok(())
    }
}
