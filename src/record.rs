use crate::rate::RepeatTracker;
use std::time::Instant;

/// One of the two independent log streams.
///
/// Each channel owns its own in-memory buffer, output file, and write cursor.
/// No ordering is guaranteed between channels; they target independent files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// The regular application log.
    Normal,
    /// The error log. Lines emitted here are typically force-flushed.
    Error,
}

impl Channel {
    /// Both channels, in a fixed order.
    pub const ALL: [Channel; 2] = [Channel::Normal, Channel::Error];

    pub(crate) fn index(self) -> usize {
        match self {
            Channel::Normal => 0,
            Channel::Error => 1,
        }
    }

    pub(crate) fn file_suffix(self) -> &'static str {
        match self {
            Channel::Normal => "log",
            Channel::Error => "error_log",
        }
    }
}

/// Per-channel in-memory state for the current file generation.
///
/// Line indices start at 0 for each generation and increase monotonically
/// until rotation truncates the buffer and rebases them. The cursor invariant
/// holds at all times: lines below `enqueued` have been handed to the writer
/// queue (or dropped, see `gaps`), lines at or above it are pending.
pub(crate) struct ChannelBuffer {
    pub lines: Vec<String>,
    /// Highest buffer index handed to the writer queue, exclusive.
    pub enqueued: usize,
    pub generation: u64,
    /// Time of the previous producer call on this channel.
    pub last_emit: Option<Instant>,
    /// Half-open ranges abandoned under non-forced overload. Lines inside a
    /// gap are accounted as dropped and must never reach the file.
    pub gaps: Vec<(usize, usize)>,
    pub repeats: RepeatTracker,
}

impl ChannelBuffer {
    pub fn new() -> Self {
        ChannelBuffer {
            lines: Vec::new(),
            enqueued: 0,
            generation: 0,
            last_emit: None,
            gaps: Vec::new(),
            repeats: RepeatTracker::new(),
        }
    }

    /// Lines appended but not yet handed to the writer queue.
    pub fn pending(&self) -> usize {
        self.lines.len() - self.enqueued
    }

    /// Record a range abandoned under non-forced overload.
    pub fn record_drop(&mut self, start: usize, end: usize) {
        if end <= start {
            return;
        }
        // Ranges are cut in index order, so only the last gap can be adjacent.
        if let Some(last) = self.gaps.last_mut() {
            if last.1 == start {
                last.1 = end;
                return;
            }
        }
        self.gaps.push((start, end));
    }

    /// Clone lines in `[from, to)` excluding dropped gaps, clamped to the
    /// buffer length, as `(index, line)` pairs.
    pub fn slice(&self, from: usize, to: usize) -> Vec<(usize, String)> {
        let to = to.min(self.lines.len());
        if to <= from {
            return Vec::new();
        }
        let mut out = Vec::with_capacity(to - from);
        for idx in from..to {
            if self.in_gap(idx) {
                continue;
            }
            out.push((idx, self.lines[idx].clone()));
        }
        out
    }

    fn in_gap(&self, idx: usize) -> bool {
        self.gaps.iter().any(|&(s, e)| idx >= s && idx < e)
    }

    /// Reset for a fresh file generation after rotation.
    pub fn reset_for_generation(&mut self, generation: u64) {
        self.lines.clear();
        self.enqueued = 0;
        self.gaps.clear();
        self.generation = generation;
    }
}
