use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identity token for one process lifetime.
///
/// Totally ordered by plain lexicographic byte order. The order carries no
/// meaning beyond producing a deterministic tie-break during elections: the
/// live peer with the smallest id is the leader.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh id. Called exactly once per process lifetime.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 characters, for log lines.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        let a = PeerId::generate();
        let b = PeerId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_ordering_is_lexicographic() {
        let a = PeerId::new("aaaa");
        let b = PeerId::new("bbbb");
        assert!(a < b);
        assert_eq!(a.clone().min(b), a);
    }

    #[test]
    fn test_short_truncates_to_eight_chars() {
        let id = PeerId::new("0123456789abcdef");
        assert_eq!(id.short(), "01234567");
        assert_eq!(PeerId::new("abc").short(), "abc");
    }
}
