//! Classification of decoded channel entries.
//!
//! The external channel collaborator scrapes the chat log and hands the core
//! a stream of [`ChatLine`]s. Each line is decoded exactly once, at this
//! boundary, into one of three event kinds: a peer presence announcement, a
//! candidate command, or ignorable noise.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{COMMAND_SIGIL, HEARTBEAT_PREFIX, PROTOCOL_MARKER, ROLLCALL_PREFIX};
use crate::identity::PeerId;

/// One decoded entry from the chat log.
///
/// `author` is absent for lines the channel renders without an attributed
/// sender (system notices, protocol traffic from peers).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatLine {
    pub author: Option<String>,
    pub text: String,
}

impl ChatLine {
    pub fn new(author: Option<String>, text: impl Into<String>) -> Self {
        Self {
            author,
            text: text.into(),
        }
    }
}

/// Which kind of presence announcement a peer emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresenceKind {
    /// One-shot announcement on joining the channel.
    Rollcall,
    /// Periodic liveness beat.
    Heartbeat,
}

/// A channel entry after classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelEvent {
    /// Another process (or this one, echoed back) announcing liveness.
    PeerPresence { peer: PeerId, kind: PresenceKind },
    /// A user message starting with the command sigil. Not yet admitted.
    CandidateCommand {
        issuer: String,
        verb: String,
        args: Vec<String>,
        observed_at: DateTime<Utc>,
    },
    /// Everything else, including malformed or self-authored protocol lines.
    Ignorable,
}

/// Encode a rollcall announcement for `id`. The outbound sender prepends the
/// protocol marker to every line, so encoders do not.
pub fn rollcall_line(id: &PeerId) -> String {
    format!("{ROLLCALL_PREFIX}{id}]")
}

/// Encode a heartbeat announcement for `id`.
pub fn heartbeat_line(id: &PeerId) -> String {
    format!("{HEARTBEAT_PREFIX}{id}]")
}

/// Classify one decoded chat line.
///
/// Marker-prefixed lines are protocol traffic: valid presence announcements
/// route to the registry, anything else marker-prefixed is dropped and must
/// never reach admission control. Ordinary chat becomes a candidate command
/// only when it has an attributed author and starts with the sigil.
pub fn classify(line: &ChatLine) -> ChannelEvent {
    if let Some(body) = line.text.strip_prefix(PROTOCOL_MARKER) {
        if let Some(id) = parse_announcement(body, ROLLCALL_PREFIX) {
            return ChannelEvent::PeerPresence {
                peer: id,
                kind: PresenceKind::Rollcall,
            };
        }
        if let Some(id) = parse_announcement(body, HEARTBEAT_PREFIX) {
            return ChannelEvent::PeerPresence {
                peer: id,
                kind: PresenceKind::Heartbeat,
            };
        }
        return ChannelEvent::Ignorable;
    }

    let issuer = match line.author.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name,
        _ => return ChannelEvent::Ignorable,
    };

    let Some(rest) = line.text.trim().strip_prefix(COMMAND_SIGIL) else {
        return ChannelEvent::Ignorable;
    };

    let mut parts = rest.trim().split_whitespace();
    let verb = match parts.next() {
        Some(v) => v.to_lowercase(),
        None => return ChannelEvent::Ignorable,
    };

    ChannelEvent::CandidateCommand {
        issuer: issuer.to_string(),
        verb,
        args: parts.map(str::to_string).collect(),
        observed_at: Utc::now(),
    }
}

fn parse_announcement(body: &str, prefix: &str) -> Option<PeerId> {
    let id = body.strip_prefix(prefix)?.strip_suffix(']')?;
    if id.is_empty() {
        return None;
    }
    Some(PeerId::new(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker(text: &str) -> String {
        format!("{PROTOCOL_MARKER}{text}")
    }

    #[test]
    fn test_classify_rollcall() {
        let line = ChatLine::new(None, marker("[ROLLCALL:abc-123]"));
        assert_eq!(
            classify(&line),
            ChannelEvent::PeerPresence {
                peer: PeerId::new("abc-123"),
                kind: PresenceKind::Rollcall,
            }
        );
    }

    #[test]
    fn test_classify_heartbeat() {
        let line = ChatLine::new(None, marker("[HBEAT:abc-123]"));
        assert_eq!(
            classify(&line),
            ChannelEvent::PeerPresence {
                peer: PeerId::new("abc-123"),
                kind: PresenceKind::Heartbeat,
            }
        );
    }

    #[test]
    fn test_classify_command_lowercases_verb_and_splits_args() {
        let line = ChatLine::new(Some("Alice".into()), "!Roll 2  d20");
        match classify(&line) {
            ChannelEvent::CandidateCommand {
                issuer,
                verb,
                args,
                ..
            } => {
                assert_eq!(issuer, "Alice");
                assert_eq!(verb, "roll");
                assert_eq!(args, vec!["2", "d20"]);
            }
            other => panic!("expected candidate command, got {other:?}"),
        }
    }

    #[test]
    fn test_marker_prefixed_command_is_never_a_command() {
        // Self-authored protocol traffic must not reach admission control,
        // even when it looks like a command.
        let line = ChatLine::new(Some("bot".into()), marker("!roll d20"));
        assert_eq!(classify(&line), ChannelEvent::Ignorable);
    }

    #[test]
    fn test_malformed_announcement_is_ignorable() {
        for text in [
            marker("[ROLLCALL:]"),
            marker("[ROLLCALL:abc"),
            marker("[UNKNOWN:abc]"),
            marker("plain marked text"),
        ] {
            assert_eq!(classify(&ChatLine::new(None, text)), ChannelEvent::Ignorable);
        }
    }

    #[test]
    fn test_command_requires_author() {
        let line = ChatLine::new(None, "!roll d20");
        assert_eq!(classify(&line), ChannelEvent::Ignorable);
    }

    #[test]
    fn test_bare_sigil_is_ignorable() {
        let line = ChatLine::new(Some("alice".into()), "!   ");
        assert_eq!(classify(&line), ChannelEvent::Ignorable);
    }

    #[test]
    fn test_plain_chat_is_ignorable() {
        let line = ChatLine::new(Some("alice".into()), "hello everyone");
        assert_eq!(classify(&line), ChannelEvent::Ignorable);
    }

    #[test]
    fn test_announcement_roundtrip() {
        let id = PeerId::generate();
        let sent = format!("{PROTOCOL_MARKER}{}", rollcall_line(&id));
        match classify(&ChatLine::new(None, sent)) {
            ChannelEvent::PeerPresence { peer, kind } => {
                assert_eq!(peer, id);
                assert_eq!(kind, PresenceKind::Rollcall);
            }
            other => panic!("expected presence, got {other:?}"),
        }
    }
}
