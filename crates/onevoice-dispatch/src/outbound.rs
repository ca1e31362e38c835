//! Bounded, rate-limited, single-consumer outbound path.
//!
//! Every write to the channel goes through one queue and one sender task.
//! Producers chunk and enqueue; the sender enforces the minimum inter-send
//! delay and prepends the protocol marker. The queue drops when full rather
//! than blocking producers: a backed-up channel must never stall the
//! coordination loop. "Sent" means handed to the channel; the channel gives
//! no delivery acknowledgement.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::watch;

use onevoice_protocol::constants::{
    ENQUEUE_TIMEOUT, MAX_LINE_LEN, OUTBOUND_CAPACITY, PROTOCOL_MARKER,
};

/// One queued chunk, already cut to the channel's line cap.
#[derive(Debug)]
pub struct OutboundMessage {
    pub text: String,
    pub enqueued_at: Instant,
}

/// Producer side of the outbound path.
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    tx: mpsc::Sender<OutboundMessage>,
    max_line_len: usize,
    enqueue_timeout: Duration,
}

impl OutboundQueue {
    /// Create a queue with the default capacity and line cap.
    pub fn channel() -> (Self, mpsc::Receiver<OutboundMessage>) {
        Self::bounded(OUTBOUND_CAPACITY, MAX_LINE_LEN, ENQUEUE_TIMEOUT)
    }

    pub fn bounded(
        capacity: usize,
        max_line_len: usize,
        enqueue_timeout: Duration,
    ) -> (Self, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                max_line_len,
                enqueue_timeout,
            },
            rx,
        )
    }

    /// Chunk `text` and enqueue the chunks in order.
    ///
    /// Embedded newlines delimit logical lines; each logical line is chunked
    /// on its own and lines are never merged into one boundary decision. If
    /// the queue stays full past the enqueue timeout, the remainder of the
    /// message is dropped with a log line.
    pub async fn enqueue(&self, text: &str) {
        for line in text.lines() {
            for chunk in chunk_line(line, self.max_line_len) {
                let msg = OutboundMessage {
                    text: chunk,
                    enqueued_at: Instant::now(),
                };
                match self.tx.send_timeout(msg, self.enqueue_timeout).await {
                    Ok(()) => {}
                    Err(SendTimeoutError::Timeout(dropped)) => {
                        tracing::warn!(
                            dropped = %dropped.text,
                            "outbound queue full; dropping message"
                        );
                        return;
                    }
                    Err(SendTimeoutError::Closed(_)) => {
                        tracing::debug!("outbound queue closed; dropping message");
                        return;
                    }
                }
            }
        }
    }
}

/// Split one logical line into chunks of at most `max_len` bytes, cutting at
/// the nearest preceding whitespace boundary when one exists and falling back
/// to a hard cut otherwise. Chunks carry no leading or trailing whitespace.
pub fn chunk_line(text: &str, max_len: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut rest = text.trim();
    while !rest.is_empty() {
        if rest.len() <= max_len {
            chunks.push(rest.to_string());
            break;
        }
        // The window never collapses to zero even when the cap is smaller
        // than the first character.
        let first_char = rest.chars().next().map(char::len_utf8).unwrap_or(rest.len());
        let window = floor_char_boundary(rest, max_len).max(first_char);
        let cut = match rest[..window].rfind(' ') {
            Some(i) if i > 0 => i,
            _ => window,
        };
        let chunk = rest[..cut].trim_end();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }
        rest = rest[cut..].trim_start();
    }
    chunks
}

/// Largest char boundary at or below `index`.
fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Where the sender hands lines to the channel. The single sender task is
/// the only caller, which serializes all writes to the underlying transport.
pub trait ChannelWriter: Send + Sync + 'static {
    fn send_line(
        &self,
        line: &str,
    ) -> impl Future<Output = Result<(), crate::DispatchError>> + Send;
}

/// Drain the queue one message at a time, marker-prefix each line, and keep
/// the minimum inter-send delay between writes. A failed write is logged and
/// dropped; the next natural cycle retries nothing (the channel keeps no
/// order we could restore). Publishes each successfully handed-off text on
/// `last_sent` for observability.
pub async fn run_sender<W: ChannelWriter>(
    mut rx: mpsc::Receiver<OutboundMessage>,
    writer: W,
    send_delay: Duration,
    last_sent: watch::Sender<String>,
) {
    while let Some(msg) = rx.recv().await {
        let line = format!("{PROTOCOL_MARKER}{}", msg.text);
        match writer.send_line(&line).await {
            Ok(()) => {
                tracing::info!(text = %msg.text, "sent");
                let _ = last_sent.send(msg.text.clone());
            }
            Err(e) => {
                tracing::warn!(error = %e, "channel write failed; message lost");
            }
        }
        tokio::time::sleep(send_delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_line_is_one_chunk() {
        assert_eq!(chunk_line("hello world", 199), vec!["hello world"]);
    }

    #[test]
    fn test_empty_and_whitespace_lines_produce_nothing() {
        assert!(chunk_line("", 199).is_empty());
        assert!(chunk_line("   ", 199).is_empty());
    }

    #[test]
    fn test_splits_at_whitespace_boundary() {
        // 250 chars with the only space near position 150.
        let text = format!("{} {}", "a".repeat(150), "b".repeat(99));
        let chunks = chunk_line(&text, 199);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "a".repeat(150));
        assert_eq!(chunks[1], "b".repeat(99));
        for chunk in &chunks {
            assert!(chunk.len() <= 199);
            assert_eq!(chunk.trim(), chunk, "chunks carry no edge whitespace");
        }
        // Rejoining with single spaces reconstructs the original text.
        assert_eq!(chunks.join(" "), text);
    }

    #[test]
    fn test_hard_cut_without_whitespace() {
        let text = "x".repeat(450);
        let chunks = chunk_line(&text, 199);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 199);
        assert_eq!(chunks[1].len(), 199);
        assert_eq!(chunks[2].len(), 52);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_hard_cut_respects_char_boundaries() {
        // Multi-byte chars straddling the cap must not be split mid-char.
        let text = "é".repeat(120); // 240 bytes
        let chunks = chunk_line(&text, 199);
        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(chunk.len() <= 199);
        }
        assert_eq!(chunks.concat(), text);
    }

    #[tokio::test]
    async fn test_lines_are_never_merged() {
        let (queue, mut rx) = OutboundQueue::bounded(16, 199, Duration::from_secs(1));
        queue.enqueue("first line\nsecond line").await;
        let a = rx.recv().await.expect("first chunk");
        let b = rx.recv().await.expect("second chunk");
        assert_eq!(a.text, "first line");
        assert_eq!(b.text, "second line");
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        let (queue, mut rx) = OutboundQueue::bounded(1, 199, Duration::from_millis(50));
        queue.enqueue("kept").await;
        // Queue is full and nobody is draining: this must return promptly
        // and drop rather than block the producer.
        let start = Instant::now();
        queue.enqueue("dropped").await;
        assert!(start.elapsed() < Duration::from_secs(2));

        let first = rx.recv().await.expect("first message kept");
        assert_eq!(first.text, "kept");
        assert!(rx.try_recv().is_err(), "second message was dropped");
    }
}
