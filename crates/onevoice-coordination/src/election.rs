//! Leader election over the peer registry.
//!
//! The policy is deterministic and stateless: the leader is always whichever
//! live peer currently has the lexicographically smallest id, recomputed from
//! scratch on every evaluation. There are no terms, epochs, or fencing
//! tokens; convergence is eventual, as soon as all peers observe the same
//! registry contents. What makes this safe against split-brain on startup is
//! the listening phase: a freshly started process announces itself and then
//! must not finalize any leader decision until it has had a chance to observe
//! an existing incumbent's heartbeat.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Mutex;

use onevoice_protocol::PeerId;

use crate::registry::PeerRegistry;

/// This process's view of who leads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeadershipState {
    pub self_id: PeerId,
    pub current_leader: Option<PeerId>,
    pub is_leader: bool,
}

impl LeadershipState {
    fn new(self_id: PeerId) -> Self {
        Self {
            self_id,
            current_leader: None,
            is_leader: false,
        }
    }
}

/// What one evaluation changed, for observability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    /// This instance just became the leader.
    pub promoted: bool,
    /// This instance just stopped being the leader.
    pub demoted: bool,
    /// Whether this instance leads after the evaluation.
    pub is_leader: bool,
    pub leader: Option<PeerId>,
    /// Peers pruned during this evaluation.
    pub pruned: Vec<PeerId>,
}

/// Registry and leadership state behind one mutual-exclusion domain.
///
/// Every read an election depends on and every write happens inside the same
/// critical section; the two are never locked separately because the leader
/// is a function of the registry.
#[derive(Debug)]
pub struct CoordinationContext {
    self_id: PeerId,
    peer_timeout: Duration,
    /// No election may be finalized before this deadline.
    listen_until: Instant,
    registry: PeerRegistry,
    leadership: LeadershipState,
}

impl CoordinationContext {
    pub fn new(self_id: PeerId, peer_timeout: Duration, listen_until: Instant) -> Self {
        Self {
            leadership: LeadershipState::new(self_id.clone()),
            self_id,
            peer_timeout,
            listen_until,
            registry: PeerRegistry::new(),
        }
    }

    pub fn self_id(&self) -> &PeerId {
        &self.self_id
    }

    /// Record a presence announcement from `peer`.
    pub fn touch(&mut self, peer: PeerId, now: Instant) {
        self.registry.touch(peer, now);
    }

    /// Run one election: prune expired peers, refresh our own record (a peer
    /// is only correctly considered live including itself), then elect the
    /// smallest live id.
    ///
    /// Returns `None` without touching leadership while the listening phase
    /// is still in effect.
    pub fn evaluate(&mut self, now: Instant) -> Option<Transition> {
        if now < self.listen_until {
            return None;
        }

        let pruned = self.registry.prune_expired(now, self.peer_timeout);
        self.registry.touch(self.self_id.clone(), now);

        let leader = self.registry.smallest_id().cloned();
        let was_leader = self.leadership.is_leader;
        let is_leader = leader.as_ref() == Some(&self.self_id);

        self.leadership.current_leader = leader.clone();
        self.leadership.is_leader = is_leader;

        Some(Transition {
            promoted: is_leader && !was_leader,
            demoted: !is_leader && was_leader,
            is_leader,
            leader,
            pruned,
        })
    }

    pub fn is_leader(&self) -> bool {
        self.leadership.is_leader
    }

    pub fn leadership(&self) -> &LeadershipState {
        &self.leadership
    }

    pub fn peer_count(&self) -> usize {
        self.registry.len()
    }
}

/// Cloneable handle to the single coordination lock domain.
///
/// All tasks that need registry or leadership state go through this handle;
/// the critical sections are short and never await while held.
#[derive(Debug, Clone)]
pub struct CoordinationHandle {
    inner: Arc<Mutex<CoordinationContext>>,
}

impl CoordinationHandle {
    pub fn new(ctx: CoordinationContext) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ctx)),
        }
    }

    pub async fn touch(&self, peer: PeerId, now: Instant) {
        self.inner.lock().await.touch(peer, now);
    }

    /// Touch `peer` and immediately re-evaluate, logging any transition.
    /// This is the inbound-presence path: re-election is triggered on every
    /// presence event, not on a fixed schedule alone.
    pub async fn observe_presence(&self, peer: PeerId, now: Instant) -> Option<Transition> {
        let mut ctx = self.inner.lock().await;
        ctx.touch(peer, now);
        ctx.evaluate(now)
    }

    pub async fn evaluate(&self, now: Instant) -> Option<Transition> {
        self.inner.lock().await.evaluate(now)
    }

    pub async fn is_leader(&self) -> bool {
        self.inner.lock().await.is_leader()
    }

    pub async fn leadership(&self) -> LeadershipState {
        self.inner.lock().await.leadership().clone()
    }

    pub async fn peer_count(&self) -> usize {
        self.inner.lock().await.peer_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(self_id: &str, start: Instant) -> CoordinationContext {
        // listen_until == start: the gate is already open for unit tests.
        CoordinationContext::new(PeerId::new(self_id), Duration::from_secs(35), start)
    }

    #[test]
    fn test_alone_in_registry_is_own_leader() {
        let start = Instant::now();
        let mut c = ctx("b-self", start);
        let t = c.evaluate(start).expect("gate open");
        assert!(t.promoted);
        assert!(!t.demoted);
        assert_eq!(t.leader, Some(PeerId::new("b-self")));
        assert!(c.is_leader());
    }

    #[test]
    fn test_smaller_peer_wins_regardless_of_arrival_order() {
        let start = Instant::now();

        // Self announces first, peer second.
        let mut c1 = ctx("b-self", start);
        c1.touch(PeerId::new("a-peer"), start);
        let t1 = c1.evaluate(start).expect("gate open");

        // Peer announces first, self second (registry updates commute).
        let mut c2 = ctx("b-self", start);
        c2.evaluate(start).expect("gate open");
        c2.touch(PeerId::new("a-peer"), start + Duration::from_secs(1));
        let t2 = c2
            .evaluate(start + Duration::from_secs(1))
            .expect("gate open");

        assert_eq!(t1.leader, Some(PeerId::new("a-peer")));
        assert_eq!(t2.leader, Some(PeerId::new("a-peer")));
        assert!(!c1.is_leader());
        assert!(t2.demoted);
    }

    #[test]
    fn test_incumbent_timeout_promotes_survivor() {
        let start = Instant::now();
        let mut c = ctx("b-self", start);
        c.touch(PeerId::new("a-leader"), start);
        let t = c.evaluate(start).expect("gate open");
        assert!(!t.promoted);

        // Incumbent goes silent past the timeout; next evaluation prunes it
        // and promotes us.
        let later = start + Duration::from_secs(40);
        let t = c.evaluate(later).expect("gate open");
        assert_eq!(t.pruned, vec![PeerId::new("a-leader")]);
        assert!(t.promoted);
        assert_eq!(t.leader, Some(PeerId::new("b-self")));
    }

    #[test]
    fn test_reannouncement_restores_eligibility() {
        let start = Instant::now();
        let mut c = ctx("b-self", start);
        c.touch(PeerId::new("a-peer"), start);
        c.evaluate(start).expect("gate open");

        // Peer expires.
        let t = c.evaluate(start + Duration::from_secs(40)).expect("gate open");
        assert!(t.promoted);

        // Peer comes back and retakes leadership.
        let back = start + Duration::from_secs(50);
        c.touch(PeerId::new("a-peer"), back);
        let t = c.evaluate(back).expect("gate open");
        assert!(t.demoted);
        assert_eq!(t.leader, Some(PeerId::new("a-peer")));
    }

    #[test]
    fn test_no_election_during_listening_phase() {
        let start = Instant::now();
        let listen = Duration::from_secs(5);
        let mut c = CoordinationContext::new(
            PeerId::new("b-self"),
            Duration::from_secs(35),
            start + listen,
        );

        // Presence is collected, but no decision is finalized.
        c.touch(PeerId::new("a-incumbent"), start);
        assert!(c.evaluate(start).is_none());
        assert!(c.evaluate(start + Duration::from_secs(4)).is_none());
        assert!(!c.is_leader());
        assert_eq!(c.leadership().current_leader, None);

        // Once the window elapses the first election sees the incumbent.
        let t = c.evaluate(start + listen).expect("gate open");
        assert!(!t.promoted);
        assert_eq!(t.leader, Some(PeerId::new("a-incumbent")));
    }

    #[test]
    fn test_leadership_invariant() {
        let start = Instant::now();
        let mut c = ctx("b-self", start);
        c.touch(PeerId::new("a-peer"), start);
        c.evaluate(start).expect("gate open");
        let ls = c.leadership();
        assert_eq!(ls.is_leader, ls.current_leader.as_ref() == Some(&ls.self_id));
    }
}
