//! Completion queue: the per-session cooperative scheduler.
//!
//! Asynchronous producers (the socket pump, teardown) `schedule` jobs from
//! any thread; exactly one consumer thread blocks in `await_work` and runs
//! them with `drain`, passing in the context it owns. Every job for a
//! session therefore runs on that session's thread, in FIFO order, with
//! exclusive `&mut` access to the context.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

type Job<C> = Box<dyn FnOnce(&mut C) + Send>;

pub struct CompletionQueue<C> {
    state: Mutex<QueueState<C>>,
    available: Condvar,
}

struct QueueState<C> {
    jobs: VecDeque<Job<C>>,
    completed: bool,
}

impl<C> CompletionQueue<C> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                completed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Enqueue a job. Never blocks beyond the queue lock; ignored once completed.
    pub fn schedule<F>(&self, job: F)
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        let mut state = self.state.lock();
        if state.completed {
            return;
        }
        state.jobs.push_back(Box::new(job));
        drop(state);
        self.available.notify_one();
    }

    /// Run every job queued at the time of the call, in order, on this thread.
    ///
    /// Jobs scheduled while draining are left for the next round. Returns the
    /// number of jobs run.
    pub fn drain(&self, ctx: &mut C) -> usize {
        let batch = std::mem::take(&mut self.state.lock().jobs);
        let count = batch.len();
        for job in batch {
            job(ctx);
        }
        count
    }

    /// Block until work is queued (`true`) or the queue is completed and
    /// empty (`false`).
    pub fn await_work(&self) -> bool {
        let mut state = self.state.lock();
        loop {
            if !state.jobs.is_empty() {
                return true;
            }
            if state.completed {
                return false;
            }
            self.available.wait(&mut state);
        }
    }

    /// Signal that no further work will be scheduled and wake the consumer.
    pub fn complete(&self) {
        self.state.lock().completed = true;
        self.available.notify_all();
    }

    pub fn is_completed(&self) -> bool {
        self.state.lock().completed
    }

    /// Number of jobs waiting to be drained.
    pub fn len(&self) -> usize {
        self.state.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<C> Default for CompletionQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}
