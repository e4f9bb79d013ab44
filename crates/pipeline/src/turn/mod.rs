//! Turn buffering
//!
//! The recognizer emits several final transcripts for one human utterance
//! when the caller pauses mid-sentence. The turn buffer coalesces them:
//! finals arriving within the continuation window append to the pending
//! turn; a quiescence timer decides when the turn is complete. The buffer
//! owns no timer itself — it exposes a deadline and the session task's
//! select loop does the sleeping, which keeps timer cancellation in one
//! place.

use std::time::Duration;

use tokio::time::Instant;

/// Buffering windows.
#[derive(Debug, Clone)]
pub struct TurnBufferConfig {
    /// Idle period after the last final before the turn flushes.
    pub quiescence: Duration,
    /// Window within which a new final appends instead of replacing.
    pub continuation_window: Duration,
}

impl Default for TurnBufferConfig {
    fn default() -> Self {
        Self {
            quiescence: Duration::from_millis(1500),
            continuation_window: Duration::from_millis(2000),
        }
    }
}

/// Coalesces final transcripts into user turns.
#[derive(Debug)]
pub struct TurnBuffer {
    config: TurnBufferConfig,
    buf: String,
    last_final: Option<Instant>,
    deadline: Option<Instant>,
}

impl TurnBuffer {
    pub fn new(config: TurnBufferConfig) -> Self {
        Self {
            config,
            buf: String::new(),
            last_final: None,
            deadline: None,
        }
    }

    /// Feed one final transcript. Empty and whitespace-only finals are
    /// ignored and do not reset the quiescence deadline.
    pub fn push_final(&mut self, text: &str, now: Instant) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }

        let within_continuation = self
            .last_final
            .is_some_and(|t| now.duration_since(t) < self.config.continuation_window);

        if within_continuation && !self.buf.is_empty() {
            self.buf.push(' ');
            self.buf.push_str(text);
        } else {
            self.buf = text.to_string();
        }

        self.last_final = Some(now);
        self.deadline = Some(now + self.config.quiescence);
    }

    /// When the buffered turn should flush, if anything is pending.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Emit the coalesced turn and clear the buffer.
    pub fn take(&mut self) -> Option<String> {
        self.deadline = None;
        if self.buf.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.buf))
    }

    /// Drop everything pending (barge-in, session end).
    pub fn discard(&mut self) {
        self.buf.clear();
        self.deadline = None;
        self.last_final = None;
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer() -> TurnBuffer {
        TurnBuffer::new(TurnBufferConfig::default())
    }

    #[test]
    fn test_single_final_flushes_whole() {
        let mut buf = buffer();
        let t0 = Instant::now();
        buf.push_final("I'd like to book a haircut.", t0);

        assert_eq!(buf.deadline(), Some(t0 + Duration::from_millis(1500)));
        assert_eq!(buf.take().as_deref(), Some("I'd like to book a haircut."));
        assert!(buf.deadline().is_none());
    }

    #[test]
    fn test_fragmented_utterance_coalesces() {
        // "I need" [pause 800ms] "a consultation" -> one turn
        let mut buf = buffer();
        let t0 = Instant::now();
        buf.push_final("I need", t0);
        buf.push_final("a consultation", t0 + Duration::from_millis(800));

        assert_eq!(buf.take().as_deref(), Some("I need a consultation"));
    }

    #[test]
    fn test_final_outside_window_replaces() {
        let mut buf = buffer();
        let t0 = Instant::now();
        buf.push_final("stale fragment", t0);
        buf.push_final("fresh start", t0 + Duration::from_millis(2500));

        assert_eq!(buf.take().as_deref(), Some("fresh start"));
    }

    #[test]
    fn test_each_final_resets_deadline() {
        let mut buf = buffer();
        let t0 = Instant::now();
        buf.push_final("one", t0);
        let t1 = t0 + Duration::from_millis(1000);
        buf.push_final("two", t1);

        assert_eq!(buf.deadline(), Some(t1 + Duration::from_millis(1500)));
    }

    #[test]
    fn test_empty_finals_ignored() {
        let mut buf = buffer();
        let t0 = Instant::now();
        buf.push_final("", t0);
        buf.push_final("   ", t0);

        assert!(buf.is_empty());
        assert!(buf.deadline().is_none());
        assert!(buf.take().is_none());
    }

    #[test]
    fn test_discard_clears_pending() {
        let mut buf = buffer();
        buf.push_final("half a sentence", Instant::now());
        buf.discard();

        assert!(buf.is_empty());
        assert!(buf.deadline().is_none());
        assert!(buf.take().is_none());
    }

    #[test]
    fn test_take_then_new_final_starts_fresh() {
        let mut buf = buffer();
        let t0 = Instant::now();
        buf.push_final("first turn", t0);
        assert!(buf.take().is_some());

        // Within the continuation window of the previous final, but the
        // buffer was flushed, so this starts a new turn rather than
        // appending to history.
        buf.push_final("second turn", t0 + Duration::from_millis(500));
        assert_eq!(buf.take().as_deref(), Some("second turn"));
    }
}
