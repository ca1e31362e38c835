//! Per-issuer cooldown and spam-strike filtering.
//!
//! Every peer runs this filter on every candidate command, leader or not, so
//! that whichever instance currently holds leadership applies the exact same
//! throttling history. Every branch is a silent accept or drop; admission
//! never produces a process-level error.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;

use onevoice_protocol::constants::{
    ADMISSION_IDLE_EVICT, ADMISSION_SWEEP_EVERY, SPAM_PENALTY, SPAM_RESET_WINDOW,
    SPAM_STRIKE_LIMIT, USER_COOLDOWN,
};

/// Tuning knobs for the admission filter.
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// Minimum gap after an issuer's last accepted command.
    pub cooldown: Duration,
    /// Same-verb repeats arriving faster than this accumulate strikes.
    pub spam_reset: Duration,
    /// Strikes that trigger a penalty.
    pub strike_limit: u32,
    /// How long a penalized issuer is rejected.
    pub penalty: Duration,
    /// Entries idle this long are evicted.
    pub idle_evict: Duration,
    /// Eviction sweep runs once every this many processed events.
    pub sweep_every: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            cooldown: USER_COOLDOWN,
            spam_reset: SPAM_RESET_WINDOW,
            strike_limit: SPAM_STRIKE_LIMIT,
            penalty: SPAM_PENALTY,
            idle_evict: ADMISSION_IDLE_EVICT,
            sweep_every: ADMISSION_SWEEP_EVERY,
        }
    }
}

/// Outcome of admitting one candidate command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AdmissionOutcome {
    /// Execute the command.
    Accepted,
    /// Arrived sooner than the cooldown after the issuer's last accepted
    /// command. Dropped silently.
    DroppedCooldown,
    /// Issuer is inside a penalty window. Dropped silently, strikes untouched.
    DroppedPenalty,
    /// This command just pushed the issuer over the strike limit. Dropped,
    /// and the one moment a "throttled" observability event should be
    /// emitted; subsequent rejections are [`AdmissionOutcome::DroppedPenalty`].
    Throttled,
}

impl AdmissionOutcome {
    pub fn is_accepted(self) -> bool {
        matches!(self, AdmissionOutcome::Accepted)
    }
}

#[derive(Debug)]
struct IssuerEntry {
    strikes: u32,
    last_verb: String,
    /// Time of the last *accepted* command.
    last_accepted_at: Instant,
    /// Time this entry was last touched at all, for idle eviction.
    last_activity_at: Instant,
    penalty_until: Option<Instant>,
}

/// One entry per distinct issuer, created lazily, evicted when idle.
#[derive(Debug)]
pub struct AdmissionControl {
    config: AdmissionConfig,
    entries: HashMap<String, IssuerEntry>,
    processed: u64,
}

impl AdmissionControl {
    pub fn new(config: AdmissionConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            processed: 0,
        }
    }

    /// Admit or drop one candidate command from `issuer`.
    pub fn check(&mut self, issuer: &str, verb: &str, now: Instant) -> AdmissionOutcome {
        self.processed += 1;
        if self.config.sweep_every > 0 && self.processed % self.config.sweep_every == 0 {
            self.evict_idle(now);
        }

        let entry = match self.entries.entry(issuer.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(IssuerEntry {
                    strikes: 1,
                    last_verb: verb.to_string(),
                    last_accepted_at: now,
                    last_activity_at: now,
                    penalty_until: None,
                });
                return AdmissionOutcome::Accepted;
            }
            Entry::Occupied(occupied) => occupied.into_mut(),
        };

        entry.last_activity_at = now;

        if let Some(until) = entry.penalty_until {
            if now < until {
                return AdmissionOutcome::DroppedPenalty;
            }
            entry.penalty_until = None;
        }

        if now.duration_since(entry.last_accepted_at) < self.config.cooldown {
            return AdmissionOutcome::DroppedCooldown;
        }

        // Strike accounting: same verb inside the reset window accumulates;
        // a distinct verb or a large enough gap starts over at 1.
        if verb == entry.last_verb
            && now.duration_since(entry.last_accepted_at) < self.config.spam_reset
        {
            entry.strikes += 1;
        } else {
            entry.strikes = 1;
        }
        entry.last_verb = verb.to_string();

        if entry.strikes >= self.config.strike_limit {
            entry.strikes = 0;
            entry.penalty_until = Some(now + self.config.penalty);
            tracing::info!(issuer, verb, "issuer throttled for spamming");
            return AdmissionOutcome::Throttled;
        }

        entry.last_accepted_at = now;
        AdmissionOutcome::Accepted
    }

    /// Number of issuers currently tracked.
    pub fn tracked_issuers(&self) -> usize {
        self.entries.len()
    }

    fn evict_idle(&mut self, now: Instant) {
        let idle = self.config.idle_evict;
        let before = self.entries.len();
        self.entries
            .retain(|_, e| now.duration_since(e.last_activity_at) < idle);
        let evicted = before - self.entries.len();
        if evicted > 0 {
            tracing::debug!(evicted, "evicted idle admission entries");
        }
    }
}

impl Default for AdmissionControl {
    fn default() -> Self {
        Self::new(AdmissionConfig::default())
    }
}
