//! Console relay: an in-process log buffer that the scheduler periodically
//! drains into a Discord channel.
//!
//! The buffer is a `tracing_subscriber` writer, so whatever the fmt layer
//! prints also lands here. Draining hides local paths, cuts the text into
//! message-sized chunks and fences each chunk as an `ansi` code block.

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use pgbot_core::{ChannelId, ChatTransport, MentionPolicy};
use tracing::warn;
use tracing_subscriber::fmt::MakeWriter;

use crate::config::Redaction;

/// Shared, bounded text buffer. Cloning shares the same buffer.
#[derive(Clone)]
pub struct ConsoleBuffer {
    inner: Arc<Mutex<ConsoleInner>>,
}

struct ConsoleInner {
    text: String,
    capacity: usize,
    total_written: u64,
    total_discarded: u64,
}

/// Statistics about the console buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsoleStats {
    /// Bytes currently buffered.
    pub buffered: usize,
    /// Bytes ever written.
    pub total_written: u64,
    /// Bytes dropped because the buffer was full.
    pub total_discarded: u64,
}

impl std::fmt::Debug for ConsoleBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleBuffer").field("stats", &self.stats()).finish()
    }
}

impl ConsoleBuffer {
    /// Create a buffer keeping at most `capacity` bytes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ConsoleInner {
                text: String::new(),
                capacity: capacity.max(1),
                total_written: 0,
                total_discarded: 0,
            })),
        }
    }

    /// Append `text`, discarding the oldest output if over capacity.
    pub fn push(&self, text: &str) {
        let mut inner = self.inner.lock();
        inner.text.push_str(text);
        inner.total_written += text.len() as u64;

        let len = inner.text.len();
        if len > inner.capacity {
            let mut cut = len - inner.capacity;
            while !inner.text.is_char_boundary(cut) {
                cut += 1;
            }
            inner.text.drain(..cut);
            inner.total_discarded += cut as u64;
        }
    }

    /// Take everything buffered, leaving the buffer empty.
    #[must_use]
    pub fn drain(&self) -> String {
        std::mem::take(&mut self.inner.lock().text)
    }

    /// Whether nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().text.is_empty()
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> ConsoleStats {
        let inner = self.inner.lock();
        ConsoleStats {
            buffered: inner.text.len(),
            total_written: inner.total_written,
            total_discarded: inner.total_discarded,
        }
    }
}

/// `io::Write` handle into a [`ConsoleBuffer`].
#[derive(Debug)]
pub struct ConsoleWriter {
    buffer: ConsoleBuffer,
}

impl io::Write for ConsoleWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.push(&String::from_utf8_lossy(buf));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for ConsoleBuffer {
    type Writer = ConsoleWriter;

    fn make_writer(&'a self) -> Self::Writer {
        ConsoleWriter { buffer: self.clone() }
    }
}

/// Apply every redaction in order.
#[must_use]
pub fn redact(text: &str, redactions: &[Redaction]) -> String {
    redactions
        .iter()
        .fold(text.to_owned(), |acc, r| acc.replace(&r.from, &r.to))
}

/// Split `text` into chunks of at most `max_chars` characters, breaking at
/// line ends where possible. Lines longer than a chunk are hard-split.
#[must_use]
pub fn split_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0;

    for line in text.split_inclusive('\n') {
        let line_chars = line.chars().count();

        if current_chars + line_chars > max_chars && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_chars = 0;
        }

        if line_chars <= max_chars {
            current.push_str(line);
            current_chars += line_chars;
            continue;
        }

        let mut chars = line.chars().peekable();
        while chars.peek().is_some() {
            let piece: String = chars.by_ref().take(max_chars).collect();
            let piece_chars = piece.chars().count();
            if piece_chars == max_chars {
                chunks.push(piece);
            } else {
                current = piece;
                current_chars = piece_chars;
            }
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Fence `text` as an `ansi` code block.
#[must_use]
pub fn code_block(text: &str) -> String {
    format!("```ansi\n{text}\n```")
}

/// One relay pass: drain `buffer`, redact, chunk and send to `channel`.
/// Returns the number of chunks sent.
///
/// The buffer is drained even when there is no channel so it cannot grow
/// without bound. Failed sends are logged and skipped.
pub async fn relay(
    buffer: &ConsoleBuffer,
    redactions: &[Redaction],
    channel: Option<ChannelId>,
    chunk_size: usize,
    transport: &dyn ChatTransport,
) -> usize {
    let contents = buffer.drain();
    let Some(channel) = channel else {
        return 0;
    };
    if contents.is_empty() {
        return 0;
    }

    let mut sent = 0;
    for chunk in split_chunks(&redact(&contents, redactions), chunk_size) {
        let chunk = chunk.trim();
        if chunk.is_empty() {
            continue;
        }
        match transport
            .send_message(channel, &code_block(chunk), &MentionPolicy::none())
            .await
        {
            Ok(_) => sent += 1,
            Err(e) => warn!(%channel, error = %e, "console relay send failed"),
        }
    }
    sent
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgbot_core::testing::RecordingTransport;
    use std::io::Write;

    #[test]
    fn buffer_drops_oldest_output_past_capacity() {
        let buffer = ConsoleBuffer::new(10);
        buffer.push("0123456789");
        buffer.push("abc");
        let stats = buffer.stats();
        assert_eq!(stats.buffered, 10);
        assert_eq!(stats.total_written, 13);
        assert_eq!(stats.total_discarded, 3);
        assert_eq!(buffer.drain(), "3456789abc");
        assert!(buffer.is_empty());
    }

    #[test]
    fn capacity_cut_respects_char_boundaries() {
        let buffer = ConsoleBuffer::new(4);
        buffer.push("ééé");
        let text = buffer.drain();
        assert!(text.len() <= 4);
        assert!(text.chars().all(|c| c == 'é'));
    }

    #[test]
    fn writer_appends_to_shared_buffer() {
        let buffer = ConsoleBuffer::new(1024);
        let mut writer = buffer.make_writer();
        writer.write_all(b"INFO hello\n").expect("write");
        assert_eq!(buffer.drain(), "INFO hello\n");
    }

    #[test]
    fn redact_replaces_every_occurrence() {
        let redactions = vec![Redaction {
            from: "/srv/pgbot".into(),
            to: "PgBot".into(),
        }];
        assert_eq!(
            redact("at /srv/pgbot/src/main.rs and /srv/pgbot/x", &redactions),
            "at PgBot/src/main.rs and PgBot/x"
        );
    }

    #[test]
    fn chunks_prefer_line_boundaries() {
        let text = "aaaa\nbbbb\ncccc\n";
        assert_eq!(split_chunks(text, 10), vec!["aaaa\nbbbb\n", "cccc\n"]);
    }

    #[test]
    fn long_lines_are_hard_split() {
        let chunks = split_chunks(&"x".repeat(25), 10);
        assert_eq!(chunks.iter().map(String::len).collect::<Vec<_>>(), vec![10, 10, 5]);
        assert!(split_chunks("", 10).is_empty());
    }

    #[test]
    fn no_chunk_exceeds_limit() {
        let text = "short\n".to_string() + &"é".repeat(33) + "\nend";
        for chunk in split_chunks(&text, 8) {
            assert!(chunk.chars().count() <= 8, "{chunk:?}");
        }
    }

    #[tokio::test]
    async fn relay_sends_fenced_redacted_chunks() {
        let buffer = ConsoleBuffer::new(1024);
        buffer.push("loaded /home/bot/pgbot.db\n");
        let transport = RecordingTransport::new();
        let redactions = vec![Redaction {
            from: "/home/bot".into(),
            to: "PgBot".into(),
        }];

        let sent = relay(&buffer, &redactions, Some(ChannelId(9)), 1980, &transport).await;

        assert_eq!(sent, 1);
        assert_eq!(transport.sent_contents(), vec!["```ansi\nloaded PgBot/pgbot.db\n```"]);
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn relay_without_channel_still_drains() {
        let buffer = ConsoleBuffer::new(1024);
        buffer.push("something\n");
        let transport = RecordingTransport::new();
        assert_eq!(relay(&buffer, &[], None, 1980, &transport).await, 0);
        assert!(buffer.is_empty());
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn relay_skips_blank_chunks_and_survives_failures() {
        let buffer = ConsoleBuffer::new(1024);
        buffer.push("   \n");
        let transport = RecordingTransport::new().failing_sends();
        assert_eq!(relay(&buffer, &[], Some(ChannelId(9)), 1980, &transport).await, 0);
        assert!(transport.calls().is_empty());

        buffer.push("boom\n");
        assert_eq!(relay(&buffer, &[], Some(ChannelId(9)), 1980, &transport).await, 0);
        assert_eq!(transport.channel_sends(), 1);
    }
}
