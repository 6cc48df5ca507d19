//! Buffered recovery-log writer with a background flusher.

use crate::metrics;
use crate::recovery::record::{LogOp, encode_entry};
use crossbeam_channel::{Sender, bounded};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct LogSettings {
    /// Buffered bytes that force a flush.
    pub buffer_size: usize,
    /// Background flush interval.
    pub flush_timeout: Duration,
    /// Flush and sync on every append ("strong consistency" mode).
    pub strong_sync: bool,
}

impl Default for LogSettings {
    fn default() -> LogSettings {
        LogSettings {
            buffer_size: 4 << 20,
            flush_timeout: Duration::from_secs(5),
            strong_sync: false,
        }
    }
}

/// Write position of the log: `(file_id, log_id, offset)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogCursor {
    pub file_id: u64,
    pub log_id: u64,
    pub offset: u64,
}

struct State {
    file: File,
    buf: Vec<u8>,
    seq: u64,
    /// Bytes durably written to the file so far.
    flushed_offset: u64,
}

impl State {
    fn flush(&mut self) -> std::io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        self.file.write_all(&self.buf)?;
        self.file.sync_data()?;
        self.flushed_offset += self.buf.len() as u64;
        self.buf.clear();
        metrics::LOG_FLUSHES.inc();
        Ok(())
    }
}

/// Appends framed head-version mutations to the log file.
///
/// Records are buffered and flushed when the buffer fills, on the flush
/// timeout, on shutdown, or on every append in strong-sync mode.
pub struct LogWriter {
    state: Arc<Mutex<State>>,
    settings: LogSettings,
    shutdown: Sender<()>,
    flusher: Option<std::thread::JoinHandle<()>>,
}

impl LogWriter {
    /// Opens the log for appending. `valid_bytes` is the replay high-water
    /// mark; anything beyond it (a torn tail) is truncated away.
    pub fn open(
        path: &Path,
        settings: LogSettings,
        valid_bytes: u64,
    ) -> std::io::Result<LogWriter> {
        let mut file = OpenOptions::new().read(true).write(true).create(true).open(path)?;
        if file.metadata()?.len() > valid_bytes {
            tracing::warn!(
                target: "recovery",
                path = %path.display(),
                valid_bytes,
                "truncating torn tail of recovery log"
            );
            file.set_len(valid_bytes)?;
        }
        file.seek(SeekFrom::Start(valid_bytes))?;
        let state = Arc::new(Mutex::new(State {
            file,
            buf: Vec::with_capacity(settings.buffer_size),
            seq: 0,
            flushed_offset: valid_bytes,
        }));

        let (shutdown, shutdown_rx) = bounded::<()>(1);
        let flusher_state = state.clone();
        let timeout = settings.flush_timeout;
        let flusher = std::thread::Builder::new()
            .name("recovery-log-flush".to_string())
            .spawn(move || {
                loop {
                    // Both an explicit shutdown and a dropped sender end
                    // the loop after one final flush.
                    let stop = !matches!(
                        shutdown_rx.recv_timeout(timeout),
                        Err(crossbeam_channel::RecvTimeoutError::Timeout)
                    );
                    if let Err(err) = flusher_state.lock().flush() {
                        tracing::error!(target: "recovery", %err, "log flush failed");
                    }
                    if stop {
                        break;
                    }
                }
            })?;
        Ok(LogWriter { state, settings, shutdown, flusher: Some(flusher) })
    }

    /// Appends one record, returning its sequence number.
    pub fn append(&self, op: &LogOp) -> std::io::Result<u64> {
        let mut state = self.state.lock();
        state.seq += 1;
        let seq = state.seq;
        let record = encode_entry(seq, op);
        state.buf.extend_from_slice(&record);
        metrics::LOG_RECORDS.inc();
        if self.settings.strong_sync || state.buf.len() >= self.settings.buffer_size {
            state.flush()?;
        }
        Ok(seq)
    }

    pub fn flush(&self) -> std::io::Result<()> {
        self.state.lock().flush()
    }

    pub fn cursor(&self) -> LogCursor {
        let state = self.state.lock();
        LogCursor { file_id: 0, log_id: state.seq, offset: state.flushed_offset }
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        // Wake the flusher for a final flush and wait for it.
        let _ = self.shutdown.send(());
        if let Some(handle) = self.flusher.take() {
            let _ = handle.join();
        }
    }
}
