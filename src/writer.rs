use crate::engine::Shared;
use crate::queue::{QueueMessage, coalesce};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

pub(crate) struct WriterHandle {
    pub thread: JoinHandle<()>,
    /// Signalled once when the loop has drained its final batch.
    pub done_rx: Receiver<()>,
}

/// Spawn the dedicated writer worker for the engine's lifetime.
pub(crate) fn spawn(
    shared: Arc<Shared>,
    rx: Receiver<QueueMessage>,
    batch_max: usize,
) -> io::Result<WriterHandle> {
    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    let thread = thread::Builder::new()
        .name("linesink-writer".to_string())
        .spawn(move || run(shared, rx, batch_max, done_tx))?;
    Ok(WriterHandle { thread, done_rx })
}

/// The writer loop: block for work, drain up to `batch_max` tasks, coalesce
/// adjacent ranges per channel, and execute each durable write in pop order.
///
/// An I/O failure is counted and logged, never propagated: the loop advances
/// over the failed range and keeps processing (a single bad write must not
/// stall the queue).
fn run(shared: Arc<Shared>, rx: Receiver<QueueMessage>, batch_max: usize, done_tx: Sender<()>) {
    loop {
        let first = match rx.recv() {
            Ok(msg) => msg,
            Err(_) => break,
        };

        let mut stop = false;
        let mut tasks = Vec::with_capacity(batch_max);
        match first {
            QueueMessage::Task(task) => {
                shared.telemetry.task_dequeued();
                tasks.push(task);
            }
            QueueMessage::Stop => stop = true,
        }
        while !stop && tasks.len() < batch_max {
            match rx.try_recv() {
                Ok(QueueMessage::Task(task)) => {
                    shared.telemetry.task_dequeued();
                    tasks.push(task);
                }
                Ok(QueueMessage::Stop) => stop = true,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => stop = true,
            }
        }

        for task in coalesce(tasks) {
            shared.run_task(&task);
        }

        if stop {
            break;
        }
    }
    let _ = done_tx.send(());
}
