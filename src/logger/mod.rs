//! Leveled, asynchronous logger with daily or size-based file rotation.
//!
//! Records are formatted on the caller's thread, then handed to a single
//! writer thread over a bounded channel, so callers never contend on file
//! I/O. The writer also runs a one-second ticker that checks the rotation
//! trigger, keeping date changes observed even when nothing is logged.
//!
//! Levels order `Debug < Info < Warn < Error < Fatal`; a record is emitted
//! when its level is at or above the logger's threshold (default
//! [`Level::Info`]). [`Logger::close`] drains everything already queued
//! before releasing the sink; a fatal record additionally terminates the
//! process with exit code 1.
//!
//! The `xlog_*` macros capture the call site via `file!()`/`line!()`:
//!
//! ```rust,no_run
//! use xkit::{xlog_info, xlog_warn_once, Flags, Level, Logger};
//!
//! let log = Logger::open("/tmp/app.log").unwrap();
//! log.set_level(Level::Debug);
//! log.set_flags(Flags::STANDARD | Flags::SHORT_FILE);
//! xlog_info!(log, "listening on {}", 8080);
//! xlog_warn_once!(log, "deprecated option"); // repeats suppressed for 1h
//! log.close();
//! ```

mod rotate;

use rotate::Output;

use std::fmt;
use std::io::{self, Write};
use std::ops::BitOr;
use std::path::Path;
use std::process;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{Local, Utc};
use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;

use crate::cache::Cache;
use crate::util::hash::sha1_hex;

/// Errors raised while configuring a logger. Writes themselves never
/// raise; I/O failures on the write path are swallowed.
#[derive(Debug, Error)]
pub enum LogError {
    /// Rotation was requested on a logger built over an arbitrary byte
    /// sink rather than a named file.
    #[error("rotation requires a file-backed logger")]
    RotationUnsupported,
    /// A rotation parameter is out of range.
    #[error("invalid rotation config: {0}")]
    InvalidConfig(String),
    /// The log file could not be opened.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Record severity, ordered from most to least verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    /// Diagnostic detail, suppressed by default.
    Debug,
    /// Routine operational records, the default threshold.
    Info,
    /// Something unexpected that the process can continue past.
    Warn,
    /// An operation failed.
    Error,
    /// Unrecoverable; emitting a fatal record exits the process.
    Fatal,
}

impl Level {
    fn as_str(self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bitflags controlling the record prefix. Combine with `|`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flags(u32);

impl Flags {
    /// No prefix beyond the level tag.
    pub const NONE: Flags = Flags(0);
    /// Calendar date, `YYYY-MM-DD`.
    pub const DATE: Flags = Flags(1);
    /// Wall-clock time, `HH:MM:SS`.
    pub const TIME: Flags = Flags(1 << 1);
    /// Six fractional digits appended to the time.
    pub const MICROSECONDS: Flags = Flags(1 << 2);
    /// Full source path and line of the call site.
    pub const LONG_FILE: Flags = Flags(1 << 3);
    /// Final path component and line of the call site.
    pub const SHORT_FILE: Flags = Flags(1 << 4);
    /// Render timestamps in UTC instead of local time.
    pub const UTC: Flags = Flags(1 << 5);
    /// Date and time, the default.
    pub const STANDARD: Flags = Flags(Self::DATE.0 | Self::TIME.0);

    /// Whether every flag in `other` is set.
    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl Default for Flags {
    fn default() -> Self {
        Flags::STANDARD
    }
}

enum WriterMsg {
    Record(String),
    Close(Sender<()>),
}

const STATE_OPEN: u8 = 0;
const STATE_CLOSING: u8 = 1;
const STATE_CLOSED: u8 = 2;

const QUEUE_CAPACITY: usize = 10_000;
const DEDUP_WINDOW_SECS: i64 = 3600;

/// A leveled logger writing to a file or an arbitrary byte sink through a
/// dedicated writer thread. Cheap to share behind an `Arc`; all methods
/// take `&self`.
pub struct Logger {
    level: RwLock<Level>,
    flags: RwLock<Flags>,
    state: AtomicU8,
    tx: Sender<WriterMsg>,
    writer: Mutex<Option<JoinHandle<()>>>,
    output: Arc<Mutex<Output>>,
    dedup: Cache<()>,
}

impl Logger {
    /// Open (append, create, mode 0644) `path` and log into it.
    ///
    /// # Errors
    ///
    /// [`LogError::Io`] when the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let output = Output::file(path.as_ref())?;
        Ok(Self::start(output))
    }

    /// Log into an arbitrary byte sink. Rotation is unavailable on such a
    /// logger.
    pub fn writer(sink: Box<dyn Write + Send>) -> Self {
        Self::start(Output::stream(sink))
    }

    fn start(output: Output) -> Self {
        let output = Arc::new(Mutex::new(output));
        let (tx, rx) = bounded(QUEUE_CAPACITY);
        let writer_output = Arc::clone(&output);
        let writer = thread::Builder::new()
            .name("log-writer".into())
            .spawn(move || writer_loop(rx, writer_output))
            .expect("failed to spawn log writer thread");
        Self {
            level: RwLock::new(Level::Info),
            flags: RwLock::new(Flags::STANDARD),
            state: AtomicU8::new(STATE_OPEN),
            tx,
            writer: Mutex::new(Some(writer)),
            output,
            dedup: Cache::new(),
        }
    }

    /// Set the minimum level a record needs to be emitted.
    pub fn set_level(&self, level: Level) {
        *self.level.write() = level;
    }

    /// Current minimum level.
    pub fn level(&self) -> Level {
        *self.level.read()
    }

    /// Replace the prefix flags.
    pub fn set_flags(&self, flags: Flags) {
        *self.flags.write() = flags;
    }

    /// Current prefix flags.
    pub fn flags(&self) -> Flags {
        *self.flags.read()
    }

    /// Rotate the file when the local calendar date changes, keeping up to
    /// `keep` generations (the active file plus `keep - 1` archives).
    ///
    /// # Errors
    ///
    /// [`LogError::RotationUnsupported`] on a sink-backed logger,
    /// [`LogError::InvalidConfig`] when `keep < 2`.
    pub fn set_daily_rotate(&self, keep: usize) -> Result<(), LogError> {
        self.output.lock().configure_daily(keep)
    }

    /// Rotate the file whenever it reaches `max_bytes`, keeping up to
    /// `keep` generations. The file may exceed `max_bytes` by at most one
    /// record, since records are never split across generations.
    ///
    /// # Errors
    ///
    /// As [`set_daily_rotate`](Self::set_daily_rotate), plus
    /// [`LogError::InvalidConfig`] when `max_bytes == 0` and
    /// [`LogError::Io`] when the existing generations cannot be inspected.
    pub fn set_size_rotate(&self, keep: usize, max_bytes: u64) -> Result<(), LogError> {
        self.output.lock().configure_size(keep, max_bytes)
    }

    /// Whether a record at `level` would currently be emitted. The macros
    /// check this before formatting their arguments.
    pub fn enabled(&self, level: Level) -> bool {
        self.state.load(Ordering::Acquire) == STATE_OPEN && level >= *self.level.read()
    }

    /// Format and enqueue one record. Filtered or post-close records are
    /// silently dropped. Blocks while the writer queue is full.
    pub fn log(&self, level: Level, file: &str, line: u32, msg: &str) {
        if !self.enabled(level) {
            return;
        }
        let record = self.format_record(level, file, line, msg);
        let _ = self.tx.send(WriterMsg::Record(record));
    }

    /// As [`log`](Self::log), but each distinct `(level, msg)` pair is
    /// emitted at most once per hour.
    pub fn log_once(&self, level: Level, file: &str, line: u32, msg: &str) {
        if !self.enabled(level) {
            return;
        }
        let key = sha1_hex(&[level.as_str().as_bytes(), msg.as_bytes()]);
        if self.dedup.has(&key) {
            return;
        }
        self.dedup.set(&key, (), DEDUP_WINDOW_SECS);
        self.log(level, file, line, msg);
    }

    /// Emit a fatal record, drain the queue, and exit the process with
    /// code 1. Never returns, even when the logger is already closed.
    pub fn fatal(&self, file: &str, line: u32, msg: &str) -> ! {
        if self.state.load(Ordering::Acquire) == STATE_OPEN {
            let record = self.format_record(Level::Fatal, file, line, msg);
            let _ = self.tx.send(WriterMsg::Record(record));
            self.close();
        }
        process::exit(1);
    }

    /// Drain every queued record, flush, and release the sink. Records
    /// submitted after this call are dropped. Idempotent; concurrent
    /// callers race on a single shutdown.
    pub fn close(&self) {
        if self
            .state
            .compare_exchange(STATE_OPEN, STATE_CLOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let (ack_tx, ack_rx) = bounded::<()>(0);
        if self.tx.send(WriterMsg::Close(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
        if let Some(handle) = self.writer.lock().take() {
            let _ = handle.join();
        }
        self.dedup.close();
        self.state.store(STATE_CLOSED, Ordering::Release);
    }

    fn format_record(&self, level: Level, file: &str, line: u32, msg: &str) -> String {
        let flags = *self.flags.read();
        let mut out = String::with_capacity(msg.len() + 64);
        let (date, time) = if flags.contains(Flags::UTC) {
            let now = Utc::now();
            (
                now.format("%Y-%m-%d").to_string(),
                format_time(&now.naive_utc().time(), flags),
            )
        } else {
            let now = Local::now();
            (
                now.format("%Y-%m-%d").to_string(),
                format_time(&now.time(), flags),
            )
        };
        if flags.contains(Flags::DATE) {
            out.push_str(&date);
            out.push(' ');
        }
        if flags.contains(Flags::TIME) {
            out.push_str(&time);
            out.push(' ');
        }
        if flags.contains(Flags::LONG_FILE) {
            out.push_str(&format!("{file}:{line} "));
        } else if flags.contains(Flags::SHORT_FILE) {
            let short = file.rsplit('/').next().unwrap_or(file);
            out.push_str(&format!("{short}:{line} "));
        }
        out.push('[');
        out.push_str(level.as_str());
        out.push_str("] ");
        out.push_str(msg);
        out.push('\n');
        out
    }
}

fn format_time(time: &chrono::NaiveTime, flags: Flags) -> String {
    if flags.contains(Flags::MICROSECONDS) {
        time.format("%H:%M:%S%.6f").to_string()
    } else {
        time.format("%H:%M:%S").to_string()
    }
}

fn writer_loop(rx: Receiver<WriterMsg>, output: Arc<Mutex<Output>>) {
    let ticker = tick(Duration::from_secs(1));
    loop {
        select! {
            recv(rx) -> msg => match msg {
                Ok(WriterMsg::Record(line)) => output.lock().write_line(&line),
                Ok(WriterMsg::Close(ack)) => {
                    // Drain whatever was queued ahead of the close.
                    while let Ok(WriterMsg::Record(line)) = rx.try_recv() {
                        output.lock().write_line(&line);
                    }
                    output.lock().close();
                    let _ = ack.send(());
                    break;
                }
                Err(_) => {
                    output.lock().close();
                    break;
                }
            },
            recv(ticker) -> _ => output.lock().check_rotate(),
        }
    }
}

/// Log at [`Level::Debug`] with `format!`-style arguments.
#[macro_export]
macro_rules! xlog_debug {
    ($logger:expr, $($arg:tt)+) => {
        if $logger.enabled($crate::logger::Level::Debug) {
            $logger.log($crate::logger::Level::Debug, file!(), line!(), &format!($($arg)+));
        }
    };
}

/// Log at [`Level::Info`] with `format!`-style arguments.
#[macro_export]
macro_rules! xlog_info {
    ($logger:expr, $($arg:tt)+) => {
        if $logger.enabled($crate::logger::Level::Info) {
            $logger.log($crate::logger::Level::Info, file!(), line!(), &format!($($arg)+));
        }
    };
}

/// Log at [`Level::Warn`] with `format!`-style arguments.
#[macro_export]
macro_rules! xlog_warn {
    ($logger:expr, $($arg:tt)+) => {
        if $logger.enabled($crate::logger::Level::Warn) {
            $logger.log($crate::logger::Level::Warn, file!(), line!(), &format!($($arg)+));
        }
    };
}

/// Log at [`Level::Error`] with `format!`-style arguments.
#[macro_export]
macro_rules! xlog_error {
    ($logger:expr, $($arg:tt)+) => {
        if $logger.enabled($crate::logger::Level::Error) {
            $logger.log($crate::logger::Level::Error, file!(), line!(), &format!($($arg)+));
        }
    };
}

/// Log at [`Level::Fatal`] and exit the process with code 1.
#[macro_export]
macro_rules! xlog_fatal {
    ($logger:expr, $($arg:tt)+) => {
        $logger.fatal(file!(), line!(), &format!($($arg)+))
    };
}

/// As [`xlog_debug!`], suppressing repeats of the same message for 1h.
#[macro_export]
macro_rules! xlog_debug_once {
    ($logger:expr, $($arg:tt)+) => {
        if $logger.enabled($crate::logger::Level::Debug) {
            $logger.log_once($crate::logger::Level::Debug, file!(), line!(), &format!($($arg)+));
        }
    };
}

/// As [`xlog_info!`], suppressing repeats of the same message for 1h.
#[macro_export]
macro_rules! xlog_info_once {
    ($logger:expr, $($arg:tt)+) => {
        if $logger.enabled($crate::logger::Level::Info) {
            $logger.log_once($crate::logger::Level::Info, file!(), line!(), &format!($($arg)+));
        }
    };
}

/// As [`xlog_warn!`], suppressing repeats of the same message for 1h.
#[macro_export]
macro_rules! xlog_warn_once {
    ($logger:expr, $($arg:tt)+) => {
        if $logger.enabled($crate::logger::Level::Warn) {
            $logger.log_once($crate::logger::Level::Warn, file!(), line!(), &format!($($arg)+));
        }
    };
}

/// As [`xlog_error!`], suppressing repeats of the same message for 1h.
#[macro_export]
macro_rules! xlog_error_once {
    ($logger:expr, $($arg:tt)+) => {
        if $logger.enabled($crate::logger::Level::Error) {
            $logger.log_once($crate::logger::Level::Error, file!(), line!(), &format!($($arg)+));
        }
    };
}
