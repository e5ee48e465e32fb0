use crate::queue::WriteTask;
use crate::record::{Channel, ChannelBuffer};
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// How a destination is kept durable.
///
/// A closed variant selected once per output destination at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkMode {
    /// Open the file in append mode and write only the unsaved delta.
    /// Never re-reads or rewrites prior content. The default.
    AppendDelta,
    /// Rewrite the whole file from the full current buffer on every write.
    /// Retained for the wrapped JSON report output, whose document structure
    /// cannot be append-extended. Strictly less efficient.
    FullRewrite,
}

struct SinkState {
    /// Append handle for the current generation; `None` in full-rewrite mode.
    file: Option<File>,
    generation: u64,
    /// Line index cursor: everything below it is durable (or deliberately
    /// dropped) for the current generation.
    written: usize,
}

/// Durable write target for one channel.
///
/// All writes go through a single mutex so that the writer loop, a forced
/// producer fallback, and the shutdown drain can never interleave on one
/// file. Every append-delta write starts at the current cursor and covers the
/// whole unwritten, non-dropped prefix up to its task's end; a task whose end
/// is at or below the cursor degrades to a no-op. This keeps per-channel file
/// content prefix-consistent no matter which thread executes a task first.
pub(crate) struct ChannelSink {
    dir: PathBuf,
    stem: String,
    suffix: &'static str,
    mode: SinkMode,
    state: Mutex<SinkState>,
    /// Mirror of the cursor, published after each commit so executors can cut
    /// a superset slice from the buffer without taking the write lock.
    written_hint: AtomicUsize,
}

enum Cut {
    /// `(index, line)` pairs covering at least `[written, end)`, gaps excluded.
    Delta(Vec<(usize, String)>),
    /// Every non-dropped line of the current buffer.
    Whole(Vec<String>),
}

#[derive(Serialize)]
struct ReportDocument<'a> {
    generation: u64,
    lines: Vec<&'a str>,
}

impl ChannelSink {
    /// Open the generation-0 destination for a channel.
    pub fn open(dir: &Path, stem: &str, channel: Channel, mode: SinkMode) -> io::Result<Self> {
        let sink = ChannelSink {
            dir: dir.to_path_buf(),
            stem: stem.to_string(),
            suffix: channel.file_suffix(),
            mode,
            state: Mutex::new(SinkState {
                file: None,
                generation: 0,
                written: 0,
            }),
            written_hint: AtomicUsize::new(0),
        };
        if mode == SinkMode::AppendDelta {
            let file = sink.open_append(0)?;
            sink.state.lock().file = Some(file);
        }
        Ok(sink)
    }

    fn open_append(&self, generation: u64) -> io::Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.generation_path(generation))
    }

    /// Path of the given generation's output file.
    pub fn generation_path(&self, generation: u64) -> PathBuf {
        let ext = match self.mode {
            SinkMode::AppendDelta => "txt",
            SinkMode::FullRewrite => "json",
        };
        let name = if generation == 0 {
            format!("{}_{}.{ext}", self.stem, self.suffix)
        } else {
            format!("{}_{}.{generation}.{ext}", self.stem, self.suffix)
        };
        self.dir.join(name)
    }

    /// Path of the current generation's output file.
    pub fn current_path(&self) -> PathBuf {
        self.generation_path(self.state.lock().generation)
    }

    /// The current file generation.
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    pub fn archive_path(&self) -> PathBuf {
        self.dir
            .join(format!("{}_{}.archive.zst", self.stem, self.suffix))
    }

    /// Execute a write task, pulling line content from `buffer` under a short
    /// lock. Returns the number of lines made durable (0 for a stale task).
    pub fn execute(&self, buffer: &Mutex<ChannelBuffer>, task: &WriteTask) -> io::Result<usize> {
        let cut = {
            let buf = buffer.lock();
            if buf.generation != task.generation {
                return Ok(0);
            }
            self.cut(&buf, task)
        };
        self.commit(cut, task)
    }

    /// Like [`execute`](Self::execute) for callers already holding the buffer
    /// lock (forced fallback, rotation, shutdown flush).
    pub fn execute_locked(&self, buf: &ChannelBuffer, task: &WriteTask) -> io::Result<usize> {
        if buf.generation != task.generation {
            return Ok(0);
        }
        self.commit(self.cut(buf, task), task)
    }

    fn cut(&self, buf: &ChannelBuffer, task: &WriteTask) -> Cut {
        match self.mode {
            SinkMode::AppendDelta => {
                // The hint can lag the true cursor, never lead it, so this
                // slice is a superset of what commit will actually write.
                let from = self.written_hint.load(Ordering::Acquire).min(task.start);
                Cut::Delta(buf.slice(from, task.end))
            }
            SinkMode::FullRewrite => {
                let whole = buf
                    .slice(0, buf.lines.len())
                    .into_iter()
                    .map(|(_, line)| line)
                    .collect();
                Cut::Whole(whole)
            }
        }
    }

    fn commit(&self, cut: Cut, task: &WriteTask) -> io::Result<usize> {
        let mut st = self.state.lock();
        if st.generation != task.generation || task.end <= st.written {
            return Ok(0);
        }

        let result = match cut {
            Cut::Delta(pairs) => Self::append_delta(&mut st, &pairs),
            Cut::Whole(lines) => self.rewrite_report(&st, &lines).map(|()| lines.len()),
        };

        // The cursor advances even when the write failed: one bad write must
        // not stall every later task for this channel.
        st.written = task.end;
        self.written_hint.store(task.end, Ordering::Release);
        result
    }

    fn append_delta(st: &mut SinkState, pairs: &[(usize, String)]) -> io::Result<usize> {
        let file = st
            .file
            .as_mut()
            .ok_or_else(|| io::Error::other("append sink has no open file"))?;
        let mut written = 0usize;
        for (idx, line) in pairs {
            if *idx < st.written {
                continue;
            }
            writeln!(file, "{line}")?;
            written += 1;
        }
        file.sync_data()?;
        Ok(written)
    }

    /// Rewrite the wrapped report atomically: tmp file, sync, rename. A crash
    /// mid-write leaves the previous document intact.
    fn rewrite_report(&self, st: &SinkState, lines: &[String]) -> io::Result<()> {
        let path = self.generation_path(st.generation);
        let tmp_path = path.with_extension("json.tmp");

        let doc = ReportDocument {
            generation: st.generation,
            lines: lines.iter().map(String::as_str).collect(),
        };
        let json = serde_json::to_string_pretty(&doc)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let mut file = File::create(&tmp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_data()?;
        drop(file);

        fs::rename(&tmp_path, path)
    }

    /// Roll to a new file generation: open the new destination, reset the
    /// cursor, and return the path of the completed generation for archival.
    pub fn rotate_to(&self, new_generation: u64) -> io::Result<PathBuf> {
        let next_file = match self.mode {
            SinkMode::AppendDelta => Some(self.open_append(new_generation)?),
            SinkMode::FullRewrite => None,
        };
        let mut st = self.state.lock();
        let completed = self.generation_path(st.generation);
        st.file = next_file;
        st.generation = new_generation;
        st.written = 0;
        self.written_hint.store(0, Ordering::Release);
        Ok(completed)
    }
}
