//! Fan-out/fan-in work queue: producers feed N workers, one merger folds
//! every result into a single accumulator.
//!
//! Three channels carry the pipeline: `in` (producers to workers), `out`
//! (workers to the merger), and `sum` (merger to the caller). Every value
//! pushed onto `in` produces exactly one value on `out`; the final
//! reduction is emitted exactly once, after `out` is drained.
//!
//! There is no guaranteed correspondence between producer order and the
//! order in which results reach the merger, so the merge function must be
//! associative for a deterministic result (commutativity is only avoidable
//! with a single worker). Errors from the worker function must be encoded
//! in the task value type; the queue has no error channel, and panics in
//! user functions are not recovered.
//!
//! # Example
//!
//! ```rust
//! use xkit::queue::WorkQueue;
//!
//! let mut q = WorkQueue::new(16);
//! q.set_worker(|x: u64| x * 2, 0); // 0 workers means one per CPU
//! q.set_merger(|acc: u64, item: u64| acc + item, 0u64);
//! for i in 1..=10u64 {
//!     q.add(i);
//! }
//! assert_eq!(q.wait(), 110);
//! ```

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::debug;

/// A fan-out/fan-in pipeline over caller-chosen task (`T`), result (`R`),
/// and accumulator (`S`) types.
///
/// Exactly N workers run between [`set_worker`](Self::set_worker) and
/// [`wait`](Self::wait); exactly one merger runs between
/// [`set_merger`](Self::set_merger) and `wait`. `wait` consumes the queue,
/// so it is callable at most once.
pub struct WorkQueue<T, R, S> {
    in_tx: Sender<T>,
    in_rx: Receiver<T>,
    out_tx: Sender<R>,
    out_rx: Receiver<R>,
    sum_rx: Receiver<S>,
    sum_tx: Sender<S>,
    workers: Vec<JoinHandle<()>>,
    merger: Option<JoinHandle<()>>,
}

impl<T, R, S> WorkQueue<T, R, S>
where
    T: Send + 'static,
    R: Send + 'static,
    S: Send + 'static,
{
    /// Create a queue whose `in` and `out` channels hold up to `buffer`
    /// values. A buffer of 0 makes them rendezvous (unbuffered) channels.
    pub fn new(buffer: usize) -> Self {
        let (in_tx, in_rx) = bounded::<T>(buffer);
        let (out_tx, out_rx) = bounded::<R>(buffer);
        let (sum_tx, sum_rx) = bounded::<S>(1);
        Self {
            in_tx,
            in_rx,
            out_tx,
            out_rx,
            sum_rx,
            sum_tx,
            workers: Vec::new(),
            merger: None,
        }
    }

    /// Spawn `n` worker threads running `work`. `n == 0` means one worker
    /// per CPU. Each worker drains `in`, applies `work`, and pushes the
    /// result onto `out`.
    pub fn set_worker<F>(&mut self, work: F, n: usize)
    where
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        let n = if n == 0 { num_cpus::get() } else { n };
        let work = Arc::new(work);
        debug!(workers = n, "spawning queue workers");
        for i in 0..n {
            let in_rx = self.in_rx.clone();
            let out_tx = self.out_tx.clone();
            let work = Arc::clone(&work);
            let handle = thread::Builder::new()
                .name(format!("queue-worker-{i}"))
                .spawn(move || {
                    while let Ok(task) = in_rx.recv() {
                        let _ = out_tx.send(work(task));
                    }
                })
                .expect("failed to spawn queue worker thread");
            self.workers.push(handle);
        }
    }

    /// Spawn the single merger thread. It folds every value on `out` into
    /// an accumulator initialised to `seed`, and emits the accumulator
    /// once `out` is drained and closed.
    pub fn set_merger<F>(&mut self, mut merge: F, seed: S)
    where
        F: FnMut(S, R) -> S + Send + 'static,
    {
        let out_rx = self.out_rx.clone();
        let sum_tx = self.sum_tx.clone();
        let handle = thread::Builder::new()
            .name("queue-merger".into())
            .spawn(move || {
                let mut acc = seed;
                while let Ok(item) = out_rx.recv() {
                    acc = merge(acc, item);
                }
                let _ = sum_tx.send(acc);
            })
            .expect("failed to spawn queue merger thread");
        self.merger = Some(handle);
    }

    /// Push a task onto `in`. Blocks while the buffer is full.
    pub fn add(&self, task: T) {
        // The queue holds its own receiver, so the channel cannot be
        // disconnected while `self` is alive.
        let _ = self.in_tx.send(task);
    }

    /// Close `in`, wait for all workers to drain and exit, close `out`,
    /// and return the final accumulator from the merger.
    ///
    /// # Panics
    ///
    /// Panics if [`set_merger`](Self::set_merger) was never called, or if
    /// a worker or the merger panicked (user panics are not recovered).
    pub fn wait(mut self) -> S {
        let merger = self
            .merger
            .take()
            .expect("set_merger must be called before wait");
        // Close `in`: drop the producer side so workers drain and exit.
        drop(self.in_tx);
        drop(self.in_rx);
        for handle in self.workers.drain(..) {
            handle.join().expect("queue worker panicked");
        }
        // Close `out`: the workers' clones are gone, this is the last one.
        drop(self.out_tx);
        drop(self.out_rx);
        // Drop our `sum` sender so a merger that dies without sending
        // disconnects the channel instead of leaving `recv` blocked.
        drop(self.sum_tx);
        let result = self.sum_rx.recv();
        merger.join().expect("queue merger panicked");
        result.expect("queue merger exited without a result")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_worker_identity() {
        let mut q = WorkQueue::new(4);
        q.set_worker(|x: i32| x, 1);
        q.set_merger(|acc: i32, item: i32| acc + item, 0);
        for i in 1..=4 {
            q.add(i);
        }
        assert_eq!(q.wait(), 10);
    }

    #[test]
    fn test_unbuffered_channels() {
        let mut q = WorkQueue::new(0);
        q.set_worker(|x: u32| x + 1, 2);
        q.set_merger(|acc: u32, item: u32| acc + item, 0);
        for _ in 0..8 {
            q.add(0);
        }
        assert_eq!(q.wait(), 8);
    }

    #[test]
    fn test_zero_workers_means_per_cpu() {
        let mut q = WorkQueue::new(8);
        q.set_worker(|x: usize| x, 0);
        q.set_merger(|acc: usize, item: usize| acc + item, 0);
        q.add(21);
        q.add(21);
        assert_eq!(q.wait(), 42);
    }

    #[test]
    fn test_every_input_produces_one_output() {
        let mut q = WorkQueue::new(2);
        q.set_worker(|_x: u8| 1u64, 3);
        q.set_merger(|acc: u64, item: u64| acc + item, 0);
        for _ in 0..100 {
            q.add(0);
        }
        assert_eq!(q.wait(), 100);
    }

    #[test]
    #[should_panic(expected = "queue merger panicked")]
    fn test_merger_panic_propagates_from_wait() {
        let mut q = WorkQueue::new(4);
        q.set_worker(|x: i32| x, 1);
        q.set_merger(|_acc: i32, _item: i32| panic!("merge failed"), 0);
        q.add(1);
        q.wait();
    }

    #[test]
    #[should_panic(expected = "set_merger must be called before wait")]
    fn test_wait_without_merger_panics() {
        let mut q: WorkQueue<i32, i32, i32> = WorkQueue::new(1);
        q.set_worker(|x| x, 1);
        q.wait();
    }
}
