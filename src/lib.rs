//! # xkit
//!
//! A small library of concurrency primitives and I/O building blocks that
//! compose into services. Five subsystems, sharing no state but a common
//! vocabulary of cancellation, back-pressure, and synchronous shutdown:
//!
//! - **[`cache`]**: in-memory key/value map with per-entry TTL and a
//!   background sweeper that removes expired entries in bounded batches.
//! - **[`logger`]**: asynchronous, level-filtered log sink with date/size
//!   rotation and once-per-hour deduplication, backed by a single dedicated
//!   writer thread.
//! - **[`queue`]**: fan-out/fan-in pipeline where producers feed N workers
//!   and a single merger folds every result into one accumulator.
//! - **[`cron`]**: extended cron rules (seconds field, macros) dispatched
//!   on one-second ticks, with dynamic job add/remove and joined shutdown.
//! - **[`http`]**: request builder with retry policy, idempotent response
//!   caching, request signing, and transparent dump/trace metadata.
//!
//! ## Example: summing through the work queue
//!
//! ```rust
//! use xkit::queue::WorkQueue;
//!
//! let mut q = WorkQueue::new(64);
//! q.set_worker(|x: u64| x + 1, 4);
//! q.set_merger(|acc: u64, item: u64| acc + item, 0u64);
//! for i in 0..100u64 {
//!     q.add(i);
//! }
//! assert_eq!(q.wait(), 5050);
//! ```
//!
//! ## Shutdown contract
//!
//! Every component that spawns background work exposes a synchronous
//! shutdown: the cache's `close()` joins its sweeper, the logger's `close()`
//! drains the queue before releasing the file, the scheduler's `wait()`
//! joins every job, and the work queue's `wait()` is its single
//! synchronization point. No background task outlives the call.

#![deny(warnings)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// In-memory TTL cache with background sweep.
pub mod cache;
/// Cron-style scheduler and the extended rule grammar.
pub mod cron;
/// HTTP client with retry, response caching, signing, and dump/trace.
pub mod http;
/// Rotating, asynchronous, level-filtered logger.
pub mod logger;
/// Fan-out/fan-in work queue.
pub mod queue;
/// Shared utilities: hashing, clocks, telemetry bootstrap.
pub mod util;

pub use cache::{Cache, CacheError, Counted, Value};
pub use cron::{CronError, Rule, Scheduler};
pub use http::{CancelHandle, HttpClient, HttpError, Response};
pub use logger::{Flags, Level, LogError, Logger};
pub use queue::WorkQueue;
