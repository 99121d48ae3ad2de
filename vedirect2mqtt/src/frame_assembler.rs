use crate::frame::{decode_line, is_frame_terminator, parse_kv, Frame};

use log::{debug, warn};
use serde_derive::Deserialize;
use std::time::{Duration, Instant};

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FrameConfig {
    /// Discard a partial frame if no line arrived for this many seconds.
    pub idle_timeout_s: u64,
    /// Discard a frame that grew beyond this many lines.
    pub max_lines: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            idle_timeout_s: 8,
            max_lines: 128,
        }
    }
}

/// Collects `LABEL\tVALUE` lines into frames.
///
/// The assembler is clock-agnostic: callers pass the instant at which a read
/// returned, which keeps the watchdogs testable.
pub struct FrameAssembler {
    frame: Frame,
    line_count: usize,
    last_line_at: Instant,
    idle_timeout: Duration,
    max_lines: usize,
}

impl FrameAssembler {
    pub fn new(config: &FrameConfig, now: Instant) -> Self {
        Self {
            frame: Frame::new(),
            line_count: 0,
            last_line_at: now,
            idle_timeout: Duration::from_secs(config.idle_timeout_s),
            max_lines: config.max_lines,
        }
    }

    pub fn reset(&mut self) {
        self.frame.clear();
        self.line_count = 0;
    }

    /// Feed the result of one read. `None` means the read timed out without a
    /// complete line. Returns the frame once a terminating label is seen.
    pub fn process(&mut self, line: Option<&[u8]>, now: Instant) -> Option<Frame> {
        if now.saturating_duration_since(self.last_line_at) > self.idle_timeout
            && !self.frame.is_empty()
        {
            debug!(
                "no data for more than {}s, dropping partial frame of {} fields",
                self.idle_timeout.as_secs(),
                self.frame.len()
            );
            self.reset();
        }

        let raw = line?;
        self.last_line_at = now;

        let line = decode_line(raw);
        if line.is_empty() {
            return None;
        }
        let (label, value) = parse_kv(&line)?;
        let terminator = is_frame_terminator(&label);

        self.frame.insert(label, value);
        self.line_count += 1;

        if self.line_count > self.max_lines {
            warn!(
                "frame exceeded {} lines without a terminator, dropping it",
                self.max_lines
            );
            self.reset();
            return None;
        }

        if terminator {
            self.line_count = 0;
            return Some(std::mem::take(&mut self.frame));
        }
        None
    }
}
