use crate::record::Channel;

/// A half-open range of buffer lines not yet durable, bound to the file
/// generation it was cut from.
///
/// `force` marks tasks originating from error-immediate policy, shutdown, or
/// rotation; they must never be dropped under queue pressure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WriteTask {
    pub channel: Channel,
    pub generation: u64,
    pub start: usize,
    pub end: usize,
    pub force: bool,
}

/// Messages on the writer queue.
pub(crate) enum QueueMessage {
    Task(WriteTask),
    /// Ends the writer loop after the current batch.
    Stop,
}

/// Merge adjacent or overlapping ranges that target the same channel and
/// file generation, keeping the minimum start and maximum end of each group.
///
/// Per-channel pop order is preserved: ranges for one channel arrive in
/// non-decreasing start order, so merging against the last kept task of the
/// same key is sufficient. Rewriting an already-written sub-range is harmless
/// (writes are idempotent over a range), so merging never changes durability
/// semantics, it only reduces write syscalls.
pub(crate) fn coalesce(tasks: Vec<WriteTask>) -> Vec<WriteTask> {
    let mut out: Vec<WriteTask> = Vec::with_capacity(tasks.len());
    for task in tasks {
        let merged = out
            .iter_mut()
            .rev()
            .find(|kept| kept.channel == task.channel && kept.generation == task.generation)
            .filter(|kept| task.start <= kept.end && kept.start <= task.end)
            .map(|kept| {
                kept.start = kept.start.min(task.start);
                kept.end = kept.end.max(task.end);
                kept.force |= task.force;
            })
            .is_some();
        if !merged {
            out.push(task);
        }
    }
    out
}
