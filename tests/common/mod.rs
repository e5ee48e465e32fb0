#![allow(dead_code)]

use linesink::{Channel, FlushPolicy, LineSink};
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

/// Read a file's lines, treating a missing file as empty.
pub fn read_lines(path: &Path) -> Vec<String> {
    match fs::read_to_string(path) {
        Ok(content) => content.lines().map(str::to_string).collect(),
        Err(_) => Vec::new(),
    }
}

/// Concatenate every generation file of a channel, oldest first, including
/// archived generations when present.
pub fn read_all_generations(sink: &LineSink, channel: Channel) -> Vec<String> {
    let mut lines = sink.archived_lines(channel).unwrap();
    for generation in 0..=sink.current_generation(channel) {
        let path = sink.generation_path(channel, generation);
        if path.exists() {
            lines.extend(read_lines(&path));
        }
    }
    lines
}

/// A policy that only flushes on forced triggers (errors, shutdown,
/// rotation), which keeps tests deterministic.
pub fn quiet_policy() -> FlushPolicy {
    FlushPolicy {
        idle: Duration::from_secs(3600),
        buffer_line_threshold: usize::MAX,
        error_immediate: true,
    }
}

/// Poll `predicate` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, predicate: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if predicate() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}
