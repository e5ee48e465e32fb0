use crate::archive;
use crate::error::SinkError;
use crate::policy::{FlushPolicy, RateControl};
use crate::queue::{QueueMessage, WriteTask};
use crate::record::{Channel, ChannelBuffer};
use crate::sink::{ChannelSink, SinkMode};
use crate::telemetry::{TelemetrySnapshot, WriterTelemetry};
use crate::writer::{self, WriterHandle};
use arc_swap::ArcSwap;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Timeout used when an engine is dropped without an explicit shutdown.
const DROP_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// How an engine guards its data directory against a second instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Advisory exclusive flock on a lock file in the directory. The default.
    Flock,
    /// No locking; callers coordinate exclusivity themselves.
    None,
}

pub(crate) struct ChannelState {
    pub buffer: Mutex<ChannelBuffer>,
    pub sink: ChannelSink,
}

/// State shared between producers, the writer loop, and the idle tick.
pub(crate) struct Shared {
    pub channels: [ChannelState; 2],
    pub telemetry: WriterTelemetry,
    pub flush_policy: ArcSwap<FlushPolicy>,
    pub rate_control: ArcSwap<RateControl>,
    pub draining: AtomicBool,
    force_wait: Duration,
    rotate_at_lines: usize,
    archive_rotated: bool,
}

impl Shared {
    /// Cut the unsaved range `(enqueued, len]` into a task and hand it to the
    /// writer. The range is consumed for accounting whether or not the push
    /// lands: a non-forced task that finds the queue full is abandoned and
    /// counted, a forced one gets a bounded second chance and then falls back
    /// to a synchronous write on the calling thread.
    pub(crate) fn flush_locked(
        &self,
        tx: &Sender<QueueMessage>,
        channel: Channel,
        buf: &mut ChannelBuffer,
        force: bool,
    ) {
        let start = buf.enqueued;
        let end = buf.lines.len();
        if end <= start {
            return;
        }
        let task = WriteTask {
            channel,
            generation: buf.generation,
            start,
            end,
            force,
        };
        buf.enqueued = end;

        match tx.try_send(QueueMessage::Task(task.clone())) {
            Ok(()) => self.telemetry.task_enqueued(),
            Err(TrySendError::Full(msg)) => {
                if force {
                    match tx.send_timeout(msg, self.force_wait) {
                        Ok(()) => self.telemetry.task_enqueued(),
                        Err(_) => self.direct_write_locked(channel, buf, &task),
                    }
                } else {
                    buf.record_drop(start, end);
                    self.telemetry.record_dropped((end - start) as u64);
                }
            }
            Err(TrySendError::Disconnected(_)) => {
                if force {
                    self.direct_write_locked(channel, buf, &task);
                } else {
                    buf.record_drop(start, end);
                    self.telemetry.record_dropped((end - start) as u64);
                }
            }
        }
    }

    /// Forced write on the producer thread, bypassing the queue. Couples this
    /// one call to disk latency but guarantees the range is never dropped.
    fn direct_write_locked(&self, channel: Channel, buf: &ChannelBuffer, task: &WriteTask) {
        self.telemetry.record_fallback();
        let st = &self.channels[channel.index()];
        let started = Instant::now();
        match st.sink.execute_locked(buf, task) {
            Ok(0) => {}
            Ok(lines) => self.telemetry.record_write(lines as u64, started.elapsed()),
            Err(err) => {
                self.telemetry.record_write_failure();
                log::error!("linesink: fallback write failed on {channel:?} channel: {err}");
            }
        }
    }

    /// Execute one queued task. Used by the writer loop and the shutdown
    /// drain; failures are counted and logged, never propagated.
    pub(crate) fn run_task(&self, task: &WriteTask) {
        let st = &self.channels[task.channel.index()];
        let started = Instant::now();
        match st.sink.execute(&st.buffer, task) {
            Ok(0) => {}
            Ok(lines) => self.telemetry.record_write(lines as u64, started.elapsed()),
            Err(err) => {
                self.telemetry.record_write_failure();
                log::error!(
                    "linesink: write failed on {:?} channel: {err}",
                    task.channel
                );
            }
        }
    }

    /// Close out the current generation: persist everything still pending
    /// synchronously, optionally archive the completed file, then rebase the
    /// buffer and cursor to zero for the next generation.
    fn rotate_locked(&self, channel: Channel, buf: &mut ChannelBuffer) {
        let st = &self.channels[channel.index()];
        let end = buf.lines.len();
        let task = WriteTask {
            channel,
            generation: buf.generation,
            start: buf.enqueued,
            end,
            force: true,
        };
        buf.enqueued = end;
        let started = Instant::now();
        match st.sink.execute_locked(buf, &task) {
            Ok(0) => {}
            Ok(lines) => self.telemetry.record_write(lines as u64, started.elapsed()),
            Err(err) => {
                self.telemetry.record_write_failure();
                log::error!("linesink: pre-rotation flush failed on {channel:?} channel: {err}");
            }
        }

        let next_generation = buf.generation + 1;
        match st.sink.rotate_to(next_generation) {
            Ok(completed) => {
                if self.archive_rotated {
                    if let Err(err) = archive::archive_generation(&st.sink.archive_path(), &completed)
                    {
                        log::warn!(
                            "linesink: archiving {} failed: {err}",
                            completed.display()
                        );
                    }
                }
                buf.reset_for_generation(next_generation);
            }
            // Keep writing to the old generation; the next cap hit retries.
            Err(err) => log::error!("linesink: rotation failed on {channel:?} channel: {err}"),
        }
    }
}

struct TickHandle {
    stop_tx: Sender<()>,
    thread: JoinHandle<()>,
}

/// Low-frequency timer that re-evaluates the idle rule for every channel
/// independently of producer calls, bounding worst-case undurable latency to
/// `idle + tick_interval`.
fn spawn_tick(
    shared: Arc<Shared>,
    tx: Sender<QueueMessage>,
    interval: Duration,
) -> std::io::Result<TickHandle> {
    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
    let thread = thread::Builder::new()
        .name("linesink-tick".to_string())
        .spawn(move || {
            loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let policy = shared.flush_policy.load();
                        for channel in Channel::ALL {
                            let st = &shared.channels[channel.index()];
                            let mut buf = st.buffer.lock();
                            let idle = buf
                                .last_emit
                                .is_some_and(|at| at.elapsed() > policy.idle);
                            if idle && buf.pending() > 0 {
                                shared.flush_locked(&tx, channel, &mut buf, false);
                            }
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        })?;
    Ok(TickHandle { stop_tx, thread })
}

/// Configuration for a [`LineSink`]. Created via [`LineSink::builder`].
pub struct LineSinkBuilder {
    dir: PathBuf,
    queue_capacity: usize,
    flush_policy: FlushPolicy,
    rate_control: RateControl,
    rotate_at_lines: usize,
    force_wait: Duration,
    batch_max: usize,
    idle_tick: Option<Duration>,
    error_sink_mode: SinkMode,
    archive_rotated: bool,
    lock_mode: LockMode,
    file_stem: String,
    spawn_writer: bool,
}

impl LineSinkBuilder {
    fn new(dir: impl AsRef<Path>) -> Self {
        LineSinkBuilder {
            dir: dir.as_ref().to_path_buf(),
            queue_capacity: 512,
            flush_policy: FlushPolicy::default(),
            rate_control: RateControl::default(),
            rotate_at_lines: 20_000,
            force_wait: Duration::from_millis(25),
            batch_max: 32,
            idle_tick: Some(Duration::from_millis(500)),
            error_sink_mode: SinkMode::AppendDelta,
            archive_rotated: false,
            lock_mode: LockMode::Flock,
            file_stem: "app".to_string(),
            spawn_writer: true,
        }
    }

    /// Capacity of the bounded writer queue.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn flush_policy(mut self, policy: FlushPolicy) -> Self {
        self.flush_policy = policy;
        self
    }

    pub fn rate_control(mut self, control: RateControl) -> Self {
        self.rate_control = control;
        self
    }

    /// Rotate a channel to a new file generation once its buffer holds this
    /// many lines.
    pub fn rotate_at_lines(mut self, cap: usize) -> Self {
        self.rotate_at_lines = cap;
        self
    }

    /// How long a forced enqueue waits for queue space before falling back to
    /// a synchronous write on the calling thread.
    pub fn force_wait(mut self, wait: Duration) -> Self {
        self.force_wait = wait;
        self
    }

    /// Maximum tasks the writer drains per wake-up before coalescing.
    pub fn batch_max(mut self, batch: usize) -> Self {
        self.batch_max = batch;
        self
    }

    /// Interval of the idle flush tick; `None` disables it, restoring the
    /// call-driven-only idle evaluation (buffered bursts then wait for the
    /// next producer call or shutdown).
    pub fn idle_tick(mut self, interval: Option<Duration>) -> Self {
        self.idle_tick = interval;
        self
    }

    /// Durability mode of the error channel. [`SinkMode::FullRewrite`]
    /// selects the wrapped JSON report output.
    pub fn error_sink_mode(mut self, mode: SinkMode) -> Self {
        self.error_sink_mode = mode;
        self
    }

    /// Compress completed file generations into a per-channel zstd archive
    /// on rotation.
    pub fn archive_rotated(mut self, archive: bool) -> Self {
        self.archive_rotated = archive;
        self
    }

    pub fn lock_mode(mut self, mode: LockMode) -> Self {
        self.lock_mode = mode;
        self
    }

    /// Stem used for every file this engine creates.
    pub fn file_stem(mut self, stem: impl Into<String>) -> Self {
        self.file_stem = stem.into();
        self
    }

    /// Leave the writer thread unspawned so tests can drive the queue and the
    /// fallback path deterministically.
    #[cfg(test)]
    pub(crate) fn no_writer(mut self) -> Self {
        self.spawn_writer = false;
        self
    }

    /// Create the directory, acquire the lock, open generation-0 files, and
    /// start the writer (and idle tick, if enabled).
    pub fn open(self) -> Result<LineSink, SinkError> {
        fs::create_dir_all(&self.dir)?;

        let lock = match self.lock_mode {
            LockMode::Flock => {
                let path = self.dir.join(format!("{}.lock", self.file_stem));
                let file = OpenOptions::new().create(true).write(true).open(&path)?;
                if file.try_lock_exclusive().is_err() {
                    return Err(SinkError::Locked { path });
                }
                Some(file)
            }
            LockMode::None => None,
        };

        let channels = [
            ChannelState {
                buffer: Mutex::new(ChannelBuffer::new()),
                sink: ChannelSink::open(
                    &self.dir,
                    &self.file_stem,
                    Channel::Normal,
                    SinkMode::AppendDelta,
                )?,
            },
            ChannelState {
                buffer: Mutex::new(ChannelBuffer::new()),
                sink: ChannelSink::open(
                    &self.dir,
                    &self.file_stem,
                    Channel::Error,
                    self.error_sink_mode,
                )?,
            },
        ];

        let shared = Arc::new(Shared {
            channels,
            telemetry: WriterTelemetry::new(),
            flush_policy: ArcSwap::from_pointee(self.flush_policy),
            rate_control: ArcSwap::from_pointee(self.rate_control),
            draining: AtomicBool::new(false),
            force_wait: self.force_wait,
            rotate_at_lines: self.rotate_at_lines.max(1),
            archive_rotated: self.archive_rotated,
        });

        let (tx, rx) = crossbeam_channel::bounded(self.queue_capacity.max(1));
        let writer = if self.spawn_writer {
            Some(writer::spawn(
                shared.clone(),
                rx.clone(),
                self.batch_max.max(1),
            )?)
        } else {
            None
        };
        let tick = match self.idle_tick {
            Some(interval) => Some(spawn_tick(shared.clone(), tx.clone(), interval)?),
            None => None,
        };

        Ok(LineSink {
            shared,
            tx,
            drain_rx: rx,
            writer: Mutex::new(writer),
            tick: Mutex::new(tick),
            closed: AtomicBool::new(false),
            dir: self.dir,
            _lock: lock,
        })
    }
}

/// An in-process, append-only log persistence engine.
///
/// Producers call [`emit`](Self::emit), a short critical section that
/// appends one line in memory and, when the flush policy says so, hands the
/// unsaved range to a single background writer. Producer latency stays
/// bounded and independent of disk latency and file size, except in the rare,
/// explicitly bounded forced-fallback path.
///
/// # Examples
///
/// ```no_run
/// use linesink::{Channel, LineSink};
/// use std::time::Duration;
///
/// let sink = LineSink::builder("/tmp/myapp-logs").open()?;
/// sink.emit(Channel::Normal, "service started", false);
/// sink.emit(Channel::Error, "backend unreachable", true);
/// sink.shutdown(Duration::from_secs(5));
/// # Ok::<(), linesink::SinkError>(())
/// ```
pub struct LineSink {
    shared: Arc<Shared>,
    tx: Sender<QueueMessage>,
    /// Receiver clone retained for the synchronous shutdown drain.
    drain_rx: Receiver<QueueMessage>,
    writer: Mutex<Option<WriterHandle>>,
    tick: Mutex<Option<TickHandle>>,
    closed: AtomicBool,
    dir: PathBuf,
    _lock: Option<File>,
}

impl LineSink {
    pub fn builder(dir: impl AsRef<Path>) -> LineSinkBuilder {
        LineSinkBuilder::new(dir)
    }

    /// Append one line to a channel and evaluate the flush policy.
    ///
    /// Never blocks beyond the bounded force window and never returns an
    /// error: non-forced overload drops the range into `dropped_lines`,
    /// forced overload falls back to a synchronous write, and I/O failures
    /// are visible only in telemetry. Calls after shutdown are ignored.
    pub fn emit(&self, channel: Channel, line: impl Into<String>, is_error: bool) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let policy = self.shared.flush_policy.load();
        let rate = self.shared.rate_control.load();
        let st = &self.shared.channels[channel.index()];
        let now = Instant::now();
        let line = line.into();

        let mut buf = st.buffer.lock();

        // Forced error records are exempt from suppression.
        let exempt = is_error && policy.error_immediate;
        if !exempt && buf.repeats.observe(&rate, &line, now) {
            self.shared.telemetry.record_suppressed();
            return;
        }

        let idle_for = buf.last_emit.map(|at| now.duration_since(at));
        buf.last_emit = Some(now);
        buf.lines.push(line);

        if buf.lines.len() >= self.shared.rotate_at_lines {
            self.shared.rotate_locked(channel, &mut buf);
            return;
        }

        let draining = self.shared.draining.load(Ordering::Relaxed);
        if let Some(trigger) = policy.evaluate(idle_for, buf.pending(), is_error, draining) {
            self.shared
                .flush_locked(&self.tx, channel, &mut buf, trigger.is_forced());
        }
    }

    /// Swap the flush policy; effective for subsequent evaluations.
    pub fn configure_flush_policy(&self, policy: FlushPolicy) {
        self.shared.flush_policy.store(Arc::new(policy));
    }

    /// Swap the duplicate-suppression policy; effective immediately.
    pub fn configure_rate_control(&self, control: RateControl) {
        self.shared.rate_control.store(Arc::new(control));
    }

    /// Read-only snapshot of all counters and gauges.
    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.shared.telemetry.snapshot()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a channel's current-generation output file.
    pub fn channel_path(&self, channel: Channel) -> PathBuf {
        self.shared.channels[channel.index()].sink.current_path()
    }

    /// Path of a specific generation's output file for a channel.
    pub fn generation_path(&self, channel: Channel, generation: u64) -> PathBuf {
        self.shared.channels[channel.index()]
            .sink
            .generation_path(generation)
    }

    /// A channel's current file generation. Starts at 0, advances on rotation.
    pub fn current_generation(&self, channel: Channel) -> u64 {
        self.shared.channels[channel.index()].sink.generation()
    }

    /// Path of a channel's zstd archive.
    pub fn archive_path(&self, channel: Channel) -> PathBuf {
        self.shared.channels[channel.index()].sink.archive_path()
    }

    /// Decompress and return every archived line for a channel, oldest first.
    pub fn archived_lines(&self, channel: Channel) -> Result<Vec<String>, SinkError> {
        Ok(archive::read_archived_lines(&self.archive_path(channel))?)
    }

    /// Flush every channel, stop the writer, and wait for the queue to drain.
    ///
    /// Pending ranges are force-enqueued (with the usual bounded-wait and
    /// direct-write fallback), then the writer is signalled to stop. If it
    /// has not finished within `timeout`, the remaining queued tasks are
    /// executed synchronously on this thread: shutdown never returns while
    /// provably unwritten forced data remains, within the timeout budget.
    /// Idempotent; later calls and later `emit`s are no-ops.
    pub fn shutdown(&self, timeout: Duration) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.draining.store(true, Ordering::Release);

        if let Some(tick) = self.tick.lock().take() {
            let _ = tick.stop_tx.try_send(());
            let _ = tick.thread.join();
        }

        for channel in Channel::ALL {
            let st = &self.shared.channels[channel.index()];
            let mut buf = st.buffer.lock();
            self.shared.flush_locked(&self.tx, channel, &mut buf, true);
        }

        // Deliver the stop sentinel, draining in place while the queue is full.
        loop {
            match self.tx.try_send(QueueMessage::Stop) {
                Ok(()) => break,
                Err(TrySendError::Full(_)) => match self.drain_rx.try_recv() {
                    Ok(msg) => self.consume(msg),
                    Err(_) => thread::sleep(Duration::from_millis(1)),
                },
                Err(TrySendError::Disconnected(_)) => break,
            }
        }

        let writer = self.writer.lock().take();
        match writer {
            Some(handle) => match handle.done_rx.recv_timeout(timeout) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    let _ = handle.thread.join();
                }
                Err(RecvTimeoutError::Timeout) => {
                    log::warn!(
                        "linesink: writer did not drain within {timeout:?}, draining synchronously"
                    );
                    while let Ok(msg) = self.drain_rx.try_recv() {
                        self.consume(msg);
                    }
                }
            },
            None => {
                while let Ok(msg) = self.drain_rx.try_recv() {
                    self.consume(msg);
                }
            }
        }

        // Catch-all: a task the writer popped but has not finished is in
        // neither the queue nor the file. Writing the whole enqueued prefix
        // here is a no-op when the writer already got there and closes the
        // gap when it did not.
        for channel in Channel::ALL {
            let st = &self.shared.channels[channel.index()];
            let buf = st.buffer.lock();
            let task = WriteTask {
                channel,
                generation: buf.generation,
                start: 0,
                end: buf.enqueued,
                force: true,
            };
            if task.end == 0 {
                continue;
            }
            let started = Instant::now();
            match st.sink.execute_locked(&buf, &task) {
                Ok(0) => {}
                Ok(lines) => self
                    .shared
                    .telemetry
                    .record_write(lines as u64, started.elapsed()),
                Err(err) => {
                    self.shared.telemetry.record_write_failure();
                    log::error!("linesink: final flush failed on {channel:?} channel: {err}");
                }
            }
        }
    }

    fn consume(&self, msg: QueueMessage) {
        if let QueueMessage::Task(task) = msg {
            self.shared.telemetry.task_dequeued();
            self.shared.run_task(&task);
        }
    }
}

impl Drop for LineSink {
    fn drop(&mut self) {
        self.shutdown(DROP_SHUTDOWN_TIMEOUT);
    }
}
