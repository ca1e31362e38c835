//! Shared tunables for coordination and dispatch.

use std::time::Duration;

/// How often each peer announces itself on the channel.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// A peer silent for longer than this is removed from the registry.
/// Must stay at or above 3x the heartbeat interval so one missed beat plus
/// channel jitter never demotes a healthy incumbent.
pub const PEER_TIMEOUT: Duration = Duration::from_secs(35);

/// Post-startup window during which no election may run. Long enough to
/// observe at least one heartbeat interval from any incumbent.
pub const STARTUP_LISTEN: Duration = Duration::from_secs(5);

/// Invisible marker prefixed to every self-authored protocol line.
/// Normal readers never see it; every peer filters on it.
pub const PROTOCOL_MARKER: char = '\u{200B}';

/// Presence announcement sent once on joining the channel.
pub const ROLLCALL_PREFIX: &str = "[ROLLCALL:";

/// Periodic liveness announcement.
pub const HEARTBEAT_PREFIX: &str = "[HBEAT:";

/// Sigil that starts a candidate command in ordinary chat.
pub const COMMAND_SIGIL: char = '!';

/// Hard cap the channel imposes on a single chat line.
pub const MAX_LINE_LEN: usize = 199;

/// Minimum delay between two outbound sends.
pub const SEND_DELAY: Duration = Duration::from_millis(200);

/// Outbound queue capacity, counted in chunks.
pub const OUTBOUND_CAPACITY: usize = 100;

/// How long a producer may wait on a full outbound queue before dropping.
pub const ENQUEUE_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on concurrently executing command workers.
pub const MAX_COMMAND_WORKERS: usize = 10;

/// Per-issuer gap required after an accepted command.
pub const USER_COOLDOWN: Duration = Duration::from_secs(2);

/// Same-verb repeats arriving faster than this accumulate strikes.
pub const SPAM_RESET_WINDOW: Duration = Duration::from_secs(5);

/// Strikes that trigger a penalty.
pub const SPAM_STRIKE_LIMIT: u32 = 3;

/// Rejection window applied once the strike limit is reached.
pub const SPAM_PENALTY: Duration = Duration::from_secs(30);

/// Admission entries idle this long are evicted.
pub const ADMISSION_IDLE_EVICT: Duration = Duration::from_secs(30 * 60);

/// Eviction sweep runs once every this many processed events.
pub const ADMISSION_SWEEP_EVERY: u64 = 256;

/// Channel silence that triggers a soft rejoin attempt.
pub const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(120);

/// Restarts tolerated, each within this window of the previous, before
/// thrash protection kicks in.
pub const RESTART_WINDOW: Duration = Duration::from_secs(3600);

/// Restart count above which the next attempt waits out a long cooldown.
pub const RESTART_CEILING: u32 = 10;

/// Cooldown inserted once the restart ceiling is exceeded.
pub const THRASH_PAUSE: Duration = Duration::from_secs(300);

/// Pause between ordinary restart attempts.
pub const RESTART_DELAY: Duration = Duration::from_secs(5);

/// Timeout for one command execution call to the service.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(15);

/// Timeout for an allow-list fetch from the service.
pub const COMMAND_LIST_TIMEOUT: Duration = Duration::from_secs(10);
