use std::time::Duration;

/// Why a flush was triggered.
///
/// `Forced` flushes carry a stronger delivery obligation: the resulting write
/// task must never be dropped under queue pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// Shutdown, rotation, or an error record under `error_immediate`.
    Forced,
    /// The channel sat idle longer than the configured idle window.
    Idle,
    /// Pending lines reached the buffer threshold.
    Threshold,
}

impl FlushTrigger {
    /// Whether the resulting write task must not be dropped.
    pub fn is_forced(self) -> bool {
        matches!(self, FlushTrigger::Forced)
    }
}

/// When to hand buffered lines to the background writer.
///
/// Process-wide and runtime-mutable: the engine stores the current policy as
/// an atomically swappable snapshot, so a reconfiguration never produces a
/// torn read in a concurrent evaluation.
#[derive(Debug, Clone)]
pub struct FlushPolicy {
    /// Flush when the time since the previous producer call on a channel
    /// exceeds this.
    pub idle: Duration,
    /// Flush when at least this many lines are pending (appended but not yet
    /// handed to the writer queue).
    pub buffer_line_threshold: usize,
    /// Force-flush every error record immediately.
    pub error_immediate: bool,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        FlushPolicy {
            idle: Duration::from_secs(10),
            buffer_line_threshold: 100,
            error_immediate: true,
        }
    }
}

impl FlushPolicy {
    /// Decide whether a producer call should flush, first match wins:
    ///
    /// 1. shutdown or rotation in progress (forced)
    /// 2. error record with `error_immediate` (forced)
    /// 3. idle time since the previous call exceeded `idle`
    /// 4. pending line count reached `buffer_line_threshold`
    /// 5. otherwise the line stays buffered
    ///
    /// Idle time is only observable when a call happens; a burst below the
    /// threshold that is never followed by another call stays buffered until
    /// an idle tick or shutdown picks it up.
    ///
    /// # Examples
    ///
    /// ```
    /// use linesink::{FlushPolicy, FlushTrigger};
    /// use std::time::Duration;
    ///
    /// let policy = FlushPolicy {
    ///     idle: Duration::from_secs(1),
    ///     buffer_line_threshold: 10,
    ///     error_immediate: true,
    /// };
    ///
    /// // An error record flushes immediately.
    /// assert_eq!(
    ///     policy.evaluate(None, 1, true, false),
    ///     Some(FlushTrigger::Forced)
    /// );
    /// // A quiet channel below the threshold stays buffered.
    /// assert_eq!(policy.evaluate(Some(Duration::ZERO), 3, false, false), None);
    /// // Crossing the threshold flushes, not forced.
    /// assert_eq!(
    ///     policy.evaluate(Some(Duration::ZERO), 10, false, false),
    ///     Some(FlushTrigger::Threshold)
    /// );
    /// ```
    pub fn evaluate(
        &self,
        idle_for: Option<Duration>,
        pending_lines: usize,
        is_error: bool,
        draining: bool,
    ) -> Option<FlushTrigger> {
        if draining {
            return Some(FlushTrigger::Forced);
        }
        if is_error && self.error_immediate {
            return Some(FlushTrigger::Forced);
        }
        if let Some(idle_for) = idle_for {
            if idle_for > self.idle {
                return Some(FlushTrigger::Idle);
            }
        }
        if pending_lines >= self.buffer_line_threshold {
            return Some(FlushTrigger::Threshold);
        }
        None
    }
}

/// Duplicate-message suppression, layered above the enqueue path.
///
/// When enabled, a line repeated more than `max_repeats` times within
/// `window` is counted as suppressed and never buffered. Forced error
/// records are exempt.
#[derive(Debug, Clone)]
pub struct RateControl {
    pub enabled: bool,
    pub window: Duration,
    pub max_repeats: u32,
}

impl Default for RateControl {
    fn default() -> Self {
        RateControl {
            enabled: false,
            window: Duration::from_secs(10),
            max_repeats: 5,
        }
    }
}
