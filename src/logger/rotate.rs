//! Log output sinks and file rotation.
//!
//! Rotation renames the active file `base` to `base.k`, where `k` cycles
//! through 1..keep-1, then reopens a fresh `base`. On startup the next
//! generation index is chosen by the modification times of the existing
//! generations, approximating "overwrite the oldest".

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{Local, NaiveDate};
use tracing::warn;

use super::LogError;

/// Active rotation policy.
#[derive(Debug, Clone, Copy)]
pub(crate) enum RotatePolicy {
    /// No rotation (the default, and the only option for stream sinks).
    None,
    /// Roll when the local calendar date changes.
    Daily { keep: usize },
    /// Roll when the accumulated written bytes reach `max_bytes`.
    Size { keep: usize, max_bytes: u64 },
}

/// Where records go: an arbitrary byte sink, or a named file that can
/// rotate. The file is `None` between a failed reopen and the next roll.
pub(crate) enum Sink {
    Stream(Box<dyn Write + Send>),
    File { path: PathBuf, file: Option<File> },
}

/// File state and rotation counters, protected by a single mutex in the
/// logger. Write errors are swallowed: logging must not itself raise.
pub(crate) struct Output {
    sink: Sink,
    policy: RotatePolicy,
    /// Bytes written to the active file since it was opened.
    written: u64,
    /// Local calendar date recorded when rotation was configured or the
    /// file last rolled.
    day: NaiveDate,
    /// Generation index the next roll renames onto.
    next_gen: usize,
}

impl Output {
    /// Wrap an arbitrary byte sink. Rotation is not possible.
    pub(crate) fn stream(sink: Box<dyn Write + Send>) -> Self {
        Self {
            sink: Sink::Stream(sink),
            policy: RotatePolicy::None,
            written: 0,
            day: Local::now().date_naive(),
            next_gen: 1,
        }
    }

    /// Open `path` with append+create semantics at mode 0644.
    pub(crate) fn file(path: &Path) -> io::Result<Self> {
        let file = open_append(path)?;
        let written = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            sink: Sink::File {
                path: path.to_path_buf(),
                file: Some(file),
            },
            policy: RotatePolicy::None,
            written,
            day: Local::now().date_naive(),
            next_gen: 1,
        })
    }

    /// Enable daily rotation keeping up to `keep` generations.
    pub(crate) fn configure_daily(&mut self, keep: usize) -> Result<(), LogError> {
        let Sink::File { path, .. } = &self.sink else {
            return Err(LogError::RotationUnsupported);
        };
        if keep < 2 {
            return Err(LogError::InvalidConfig("keep must be at least 2".into()));
        }
        self.next_gen = initial_generation(path, keep)?;
        self.day = Local::now().date_naive();
        self.policy = RotatePolicy::Daily { keep };
        Ok(())
    }

    /// Enable size rotation keeping up to `keep` generations, rolling
    /// whenever the active file exceeds `max_bytes`.
    pub(crate) fn configure_size(&mut self, keep: usize, max_bytes: u64) -> Result<(), LogError> {
        let Sink::File { path, .. } = &self.sink else {
            return Err(LogError::RotationUnsupported);
        };
        if keep < 2 {
            return Err(LogError::InvalidConfig("keep must be at least 2".into()));
        }
        if max_bytes == 0 {
            return Err(LogError::InvalidConfig("max_bytes must be positive".into()));
        }
        self.next_gen = initial_generation(path, keep)?;
        self.policy = RotatePolicy::Size { keep, max_bytes };
        Ok(())
    }

    /// Write one fully formatted record. The size trigger is checked here
    /// so the roll happens between records, never mid-record.
    pub(crate) fn write_line(&mut self, line: &str) {
        let result = match &mut self.sink {
            Sink::Stream(sink) => sink.write_all(line.as_bytes()),
            Sink::File { file: Some(file), .. } => file.write_all(line.as_bytes()),
            Sink::File { file: None, .. } => Ok(()),
        };
        if let Err(err) = result {
            warn!(error = %err, "log write failed");
            return;
        }
        self.written += line.len() as u64;
        if let RotatePolicy::Size { keep, max_bytes } = self.policy {
            if self.written >= max_bytes {
                self.roll(keep);
            }
        }
    }

    /// Ticker-driven trigger check, run once a second by the writer task.
    pub(crate) fn check_rotate(&mut self) {
        match self.policy {
            RotatePolicy::Daily { keep } => {
                if Local::now().date_naive() != self.day {
                    self.roll(keep);
                }
            }
            RotatePolicy::Size { keep, max_bytes } => {
                if self.written >= max_bytes {
                    self.roll(keep);
                }
            }
            RotatePolicy::None => {}
        }
    }

    /// Flush and release the active file or sink.
    pub(crate) fn close(&mut self) {
        match &mut self.sink {
            Sink::Stream(sink) => {
                let _ = sink.flush();
            }
            Sink::File { file, .. } => {
                if let Some(mut f) = file.take() {
                    let _ = f.flush();
                }
            }
        }
    }

    /// Close the active file, rename it onto the next generation, and
    /// open a fresh one. Rename failures are logged and skipped; the next
    /// write continues on a reopened file either way.
    fn roll(&mut self, keep: usize) {
        let Sink::File { path, file } = &mut self.sink else {
            return;
        };
        drop(file.take());
        let target = generation_path(path, self.next_gen);
        if let Err(err) = fs::rename(&*path, &target) {
            warn!(error = %err, target = %target.display(), "log rotation rename failed");
        }
        self.next_gen = if self.next_gen >= keep - 1 {
            1
        } else {
            self.next_gen + 1
        };
        match open_append(path) {
            Ok(f) => *file = Some(f),
            Err(err) => warn!(error = %err, "log rotation reopen failed"),
        }
        self.written = 0;
        self.day = Local::now().date_naive();
    }
}

/// `base` -> `base.k`.
fn generation_path(base: &Path, k: usize) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(format!(".{k}"));
    PathBuf::from(name)
}

/// Open with append+create semantics at mode 0644; rotated files inherit
/// the same mode.
fn open_append(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o644);
    }
    options.open(path)
}

/// Choose the generation index the next roll should overwrite: list the
/// existing `base.k` files, sort by modification time, and pick the
/// oldest. With no generations on disk, start at 1.
fn initial_generation(base: &Path, keep: usize) -> io::Result<usize> {
    let mut generations: Vec<(usize, SystemTime)> = Vec::new();
    for k in 1..keep {
        let candidate = generation_path(base, k);
        match fs::metadata(&candidate) {
            Ok(meta) => generations.push((k, meta.modified()?)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
    }
    if generations.is_empty() {
        return Ok(1);
    }
    generations.sort_by_key(|(_, mtime)| *mtime);
    Ok(generations[0].0)
}
