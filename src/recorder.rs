use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("a recording is already in progress")]
    AlreadyRecording,
    #[error("recording filename is empty")]
    EmptyFilename,
    #[error("no recording in progress")]
    NotRecording,
    #[error("failed to open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write row: {0}")]
    Write(#[from] io::Error),
}

/// What a finished recording produced.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordingSummary {
    pub path: PathBuf,
    pub rows: u64,
    pub duration: Duration,
}

struct ActiveRecording {
    writer: BufWriter<File>,
    path: PathBuf,
    channel_names: Vec<String>,
    rows: u64,
    started_at: Instant,
}

/// Thread-safe CSV mirror of accepted samples.
///
/// One lock covers start, stop and row writes so a row can never land in a
/// half-opened or half-closed file.
pub struct CsvRecorder {
    state: Mutex<Option<ActiveRecording>>,
}

impl Default for CsvRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl CsvRecorder {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<ActiveRecording>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Opens `path` and writes the `Timestamp,<names...>` header.
    pub fn start_recording(
        &self,
        path: impl AsRef<Path>,
        channel_names: &[String],
    ) -> Result<(), RecordError> {
        let path = path.as_ref();
        let mut state = self.lock();
        if state.is_some() {
            log::warn!("recording already in progress; stop it first");
            return Err(RecordError::AlreadyRecording);
        }
        if path.as_os_str().is_empty() {
            return Err(RecordError::EmptyFilename);
        }
        let writer = create_with_header(path, channel_names, BufWriter::new)?;
        log::info!("recording started: {}", path.display());
        *state = Some(ActiveRecording {
            writer,
            path: path.to_path_buf(),
            channel_names: channel_names.to_vec(),
            rows: 0,
            started_at: Instant::now(),
        });
        Ok(())
    }

    /// Appends one row; every field gets six fractional digits.
    pub fn write_row(&self, elapsed_secs: f64, values: &[f64]) -> Result<(), RecordError> {
        let mut state = self.lock();
        let active = state.as_mut().ok_or(RecordError::NotRecording)?;
        let mut line = format!("{elapsed_secs:.6}");
        for value in values {
            line.push_str(&format!(",{value:.6}"));
        }
        line.push('\n');
        active.writer.write_all(line.as_bytes())?;
        // 每行都 flush，崩溃时最多丢失正在写的一行
        active.writer.flush()?;
        active.rows += 1;
        Ok(())
    }

    /// Closes the file. Calling this while idle does nothing.
    pub fn stop_recording(&self) -> Option<RecordingSummary> {
        let mut active = self.lock().take()?;
        if let Err(e) = active.writer.flush() {
            log::warn!("failed to flush {}: {e}", active.path.display());
        }
        let summary = RecordingSummary {
            path: active.path,
            rows: active.rows,
            duration: active.started_at.elapsed(),
        };
        log::info!(
            "recording saved: {} ({} rows)",
            summary.path.display(),
            summary.rows
        );
        Some(summary)
    }

    pub fn is_recording(&self) -> bool {
        self.lock().is_some()
    }

    pub fn current_filename(&self) -> Option<PathBuf> {
        self.lock().as_ref().map(|a| a.path.clone())
    }

    pub fn channel_names(&self) -> Option<Vec<String>> {
        self.lock().as_ref().map(|a| a.channel_names.clone())
    }

    /// Rows written in the current session (0 when idle).
    pub fn rows_written(&self) -> u64 {
        self.lock().as_ref().map_or(0, |a| a.rows)
    }

    pub fn recording_duration(&self) -> Option<Duration> {
        self.lock().as_ref().map(|a| a.started_at.elapsed())
    }
}

impl Drop for CsvRecorder {
    fn drop(&mut self) {
        self.stop_recording();
    }
}

/// Creates `path` and writes the header through `wrap`. A file whose header
/// could not be written is removed again.
fn create_with_header<W, F>(
    path: &Path,
    channel_names: &[String],
    wrap: F,
) -> Result<W, RecordError>
where
    W: Write,
    F: FnOnce(File) -> W,
{
    let open_err = |source| RecordError::Open {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).map_err(open_err)?;
    let mut writer = wrap(file);
    let header = std::iter::once("Timestamp")
        .chain(channel_names.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(",");
    match writeln!(writer, "{header}").and_then(|()| writer.flush()) {
        Ok(()) => Ok(writer),
        Err(e) => {
            drop(writer);
            // 删除只写了一半的文件
            if let Err(rm) = std::fs::remove_file(path) {
                log::warn!("could not remove {}: {rm}", path.display());
            }
            Err(open_err(e))
        }
    }
}

/// `<base>_<YYYYMMDD_HHMMSS>.csv`, local time.
pub fn timestamped_filename(base: &str) -> String {
    format!("{base}_{}.csv", chrono::Local::now().format("%Y%m%d_%H%M%S"))
}

/// `Channel_1 .. Channel_n`
pub fn default_channel_names(count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("Channel_{i}")).collect()
}
