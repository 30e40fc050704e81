//! Cron-style scheduler: parses extended rules and dispatches jobs on
//! one-second ticks.
//!
//! Each job runs on its own dedicated thread with a 1 s ticker. On a due
//! tick the job's loop function is called synchronously, so overruns delay
//! the next tick and a single job never runs concurrently with itself.
//! A job terminates on its private stop signal ([`Scheduler::del`]) or on
//! scheduler-wide cancellation ([`Scheduler::empty`]); its optional tidy
//! function runs exactly once on the way out.
//!
//! # Example
//!
//! ```rust,no_run
//! use xkit::cron::Scheduler;
//!
//! let scheduler = Scheduler::new();
//! let id = scheduler
//!     .add("@every 5 second", || println!("tick"), None)
//!     .unwrap();
//! assert!(scheduler.has(&id));
//! scheduler.del(&id);
//! scheduler.empty();
//! scheduler.wait();
//! ```

mod rule;

pub use rule::{CronError, Rule};

use std::collections::HashMap;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Local;
use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::util::clock::now_ns;
use crate::util::hash::sha1_hex;

/// Cleanup callback run exactly once when a job is removed.
pub type TidyFn = Box<dyn FnOnce() + Send + 'static>;

struct JobHandle {
    stop_tx: Sender<()>,
    thread: JoinHandle<()>,
}

/// A scheduler that owns the lifecycle of its jobs; the caller owns the
/// job functions. All jobs observe a shared cancellation broadcast, and
/// [`wait`](Scheduler::wait) joins every job thread.
pub struct Scheduler {
    jobs: RwLock<HashMap<String, JobHandle>>,
    cancel_tx: Mutex<Option<Sender<()>>>,
    cancel_rx: Receiver<()>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Create a scheduler bound to a fresh cancellation context.
    pub fn new() -> Self {
        let (cancel_tx, cancel_rx) = bounded::<()>(0);
        Self {
            jobs: RwLock::new(HashMap::new()),
            cancel_tx: Mutex::new(Some(cancel_tx)),
            cancel_rx,
        }
    }

    /// Parse `rule_text`, register a job running `loop_fn` on every match,
    /// and return its generated ID.
    ///
    /// # Errors
    ///
    /// [`CronError::Parse`] if the rule does not parse;
    /// [`CronError::Stopped`] after [`empty`](Self::empty).
    pub fn add<F>(
        &self,
        rule_text: &str,
        loop_fn: F,
        tidy: Option<TidyFn>,
    ) -> Result<String, CronError>
    where
        F: FnMut() + Send + 'static,
    {
        let rule = Rule::parse(rule_text)?;
        let id = sha1_hex(&[
            b"xcron",
            rule_text.as_bytes(),
            now_ns().to_string().as_bytes(),
        ]);
        self.install(id.clone(), rule, Box::new(loop_fn), tidy)?;
        Ok(id)
    }

    /// Atomic replace: if `id` exists it is removed (its tidy runs) before
    /// the new job is installed under the same ID.
    ///
    /// # Errors
    ///
    /// As [`add`](Self::add). The existing job is only removed after the
    /// new rule parses.
    pub fn set<F>(
        &self,
        id: &str,
        rule_text: &str,
        loop_fn: F,
        tidy: Option<TidyFn>,
    ) -> Result<(), CronError>
    where
        F: FnMut() + Send + 'static,
    {
        let rule = Rule::parse(rule_text)?;
        self.del(id);
        self.install(id.to_string(), rule, Box::new(loop_fn), tidy)
    }

    /// Stop and remove the job. Synchronous: when this returns the job
    /// thread has exited and its tidy has run exactly once. Absent IDs
    /// silently succeed.
    pub fn del(&self, id: &str) {
        let handle = self.jobs.write().remove(id);
        if let Some(handle) = handle {
            drop(handle.stop_tx);
            let _ = handle.thread.join();
            debug!(job = id, "cron job removed");
        }
    }

    /// Whether a job with this ID is registered.
    pub fn has(&self, id: &str) -> bool {
        self.jobs.read().contains_key(id)
    }

    /// Number of registered jobs.
    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    /// Whether no jobs are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel the scheduler context: every job observes the cancellation
    /// and terminates. The scheduler accepts no further jobs afterwards;
    /// use [`wait`](Self::wait) to join the exiting jobs.
    pub fn empty(&self) {
        self.cancel_tx.lock().take();
        debug!("cron scheduler cancelled");
    }

    /// Block until every job has exited, joining each job thread.
    pub fn wait(&self) {
        let handles: Vec<JobHandle> = {
            let mut jobs = self.jobs.write();
            jobs.drain().map(|(_, handle)| handle).collect()
        };
        for handle in handles {
            let _ = handle.thread.join();
        }
    }

    fn install(
        &self,
        id: String,
        rule: Rule,
        mut loop_fn: Box<dyn FnMut() + Send + 'static>,
        mut tidy: Option<TidyFn>,
    ) -> Result<(), CronError> {
        if self.cancel_tx.lock().is_none() {
            return Err(CronError::Stopped);
        }
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let cancel_rx = self.cancel_rx.clone();
        let thread_id = id.clone();
        let thread = thread::Builder::new()
            .name(format!("cron-{}", &id[..8.min(id.len())]))
            .spawn(move || {
                let ticker = tick(Duration::from_secs(1));
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            if rule.is_due(&Local::now()) {
                                loop_fn();
                            }
                        }
                        recv(stop_rx) -> _ => break,
                        recv(cancel_rx) -> _ => break,
                    }
                }
                if let Some(tidy) = tidy.take() {
                    tidy();
                }
                debug!(job = %thread_id, "cron job exited");
            })
            .expect("failed to spawn cron job thread");
        self.jobs.write().insert(id, JobHandle { stop_tx, thread });
        Ok(())
    }
}
