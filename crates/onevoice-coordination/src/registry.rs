//! Last-seen tracking for every peer announcing on the channel.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use onevoice_protocol::PeerId;

/// Mapping of peer id to the last time it announced itself.
///
/// Records are created on first announcement, refreshed on every subsequent
/// one, and removed once silent for longer than the peer timeout. The
/// registry never decides anything on its own; election is a pure function
/// of its contents.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    last_seen: HashMap<PeerId, Instant>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert the last-seen time for `id`.
    pub fn touch(&mut self, id: PeerId, now: Instant) {
        self.last_seen.insert(id, now);
    }

    /// Remove every record silent for longer than `timeout`. Returns the
    /// removed ids so the caller can log them.
    pub fn prune_expired(&mut self, now: Instant, timeout: Duration) -> Vec<PeerId> {
        let expired: Vec<PeerId> = self
            .last_seen
            .iter()
            .filter(|(_, seen)| now.duration_since(**seen) > timeout)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            self.last_seen.remove(id);
        }
        expired
    }

    /// The lexicographically smallest live id, if any.
    pub fn smallest_id(&self) -> Option<&PeerId> {
        self.last_seen.keys().min()
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.last_seen.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }

    pub fn clear(&mut self) {
        self.last_seen.clear();
    }
}
