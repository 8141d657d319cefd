//! Rate limiting of streamed text into progress updates.

use std::time::{Duration, Instant};

/// One display frame at ~60 Hz.
pub const FRAME: Duration = Duration::from_millis(16);

/// Buffers text deltas and releases them at most once per frame.
///
/// The first chunk of a stream is released immediately.
#[derive(Debug)]
pub struct ProgressCoalescer {
    buffer: String,
    last_flush: Option<Instant>,
    interval: Duration,
}

impl Default for ProgressCoalescer {
    fn default() -> Self {
        Self::new(FRAME)
    }
}

impl ProgressCoalescer {
    pub fn new(interval: Duration) -> Self {
        Self {
            buffer: String::new(),
            last_flush: None,
            interval,
        }
    }

    pub fn push(&mut self, chunk: &str) -> Option<String> {
        self.push_at(chunk, Instant::now())
    }

    pub fn push_at(&mut self, chunk: &str, now: Instant) -> Option<String> {
        self.buffer.push_str(chunk);
        let due = match self.last_flush {
            None => true,
            Some(last) => now.duration_since(last) >= self.interval,
        };
        if !due || self.buffer.is_empty() {
            return None;
        }
        self.last_flush = Some(now);
        Some(std::mem::take(&mut self.buffer))
    }

    /// Time left until buffered text is due. `None` when nothing is buffered.
    pub fn due_in(&self, now: Instant) -> Option<Duration> {
        if self.buffer.is_empty() {
            return None;
        }
        Some(match self.last_flush {
            None => Duration::ZERO,
            Some(last) => (last + self.interval).saturating_duration_since(now),
        })
    }

    /// Release buffered text now, mid-stream.
    pub fn flush(&mut self) -> Option<String> {
        self.flush_at(Instant::now())
    }

    pub fn flush_at(&mut self, now: Instant) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        self.last_flush = Some(now);
        Some(std::mem::take(&mut self.buffer))
    }

    /// Release whatever is buffered at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        self.last_flush = None;
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_chunk_is_immediate_then_one_per_frame() {
        let start = Instant::now();
        let mut c = ProgressCoalescer::default();
        assert_eq!(c.push_at("Hel", start).as_deref(), Some("Hel"));
        assert_eq!(c.push_at("lo", start + Duration::from_millis(5)), None);
        assert_eq!(c.push_at(", ", start + Duration::from_millis(10)), None);
        assert_eq!(
            c.push_at("world", start + Duration::from_millis(17)).as_deref(),
            Some("lo, world")
        );
        assert_eq!(c.push_at("!", start + Duration::from_millis(20)), None);
        assert_eq!(c.finish().as_deref(), Some("!"));
        assert_eq!(c.finish(), None);
    }

    #[test]
    fn test_finish_resets_for_next_stream() {
        let start = Instant::now();
        let mut c = ProgressCoalescer::default();
        c.push_at("a", start);
        c.finish();
        assert_eq!(c.push_at("b", start + Duration::from_millis(1)).as_deref(), Some("b"));
    }

    #[test]
    fn test_due_in_tracks_buffered_text() {
        let start = Instant::now();
        let mut c = ProgressCoalescer::default();
        assert_eq!(c.due_in(start), None);
        c.push_at("a", start);
        assert_eq!(c.due_in(start), None);
        c.push_at("b", start + Duration::from_millis(4));
        assert_eq!(c.due_in(start + Duration::from_millis(6)), Some(Duration::from_millis(10)));
        assert_eq!(c.due_in(start + Duration::from_millis(40)), Some(Duration::ZERO));
    }

    #[test]
    fn test_flush_releases_mid_stream() {
        let start = Instant::now();
        let mut c = ProgressCoalescer::default();
        c.push_at("a", start);
        c.push_at("b", start + Duration::from_millis(2));
        assert_eq!(c.flush_at(start + Duration::from_millis(3)).as_deref(), Some("b"));
        assert_eq!(c.flush_at(start + Duration::from_millis(4)), None);
        // the flush starts a new frame
        assert_eq!(c.push_at("c", start + Duration::from_millis(10)), None);
        assert_eq!(c.finish().as_deref(), Some("c"));
    }
}
