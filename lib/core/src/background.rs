// Background writer pool modeled on Redis's BIO (Background I/O):
// a job queue drained by dedicated worker threads, so store writes never
// run on the frame-processing path.

use crate::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, warn};

/// Background job types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundJobType {
    PersistFace = 0,
    LogDetection = 1,
}

const JOB_TYPES: usize = 2;

/// Background job trait
pub trait BackgroundJob: Send + 'static {
    fn execute(self: Box<Self>) -> Result<()>;
    fn job_type(&self) -> BackgroundJobType;
}

/// Per-type job counters
#[derive(Default)]
struct JobCounters {
    submitted: [AtomicU64; JOB_TYPES],
    completed: [AtomicU64; JOB_TYPES],
    failed: [AtomicU64; JOB_TYPES],
    dropped: [AtomicU64; JOB_TYPES],
}

/// Point-in-time counter values for one job type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub dropped: u64,
}

struct JobQueue {
    jobs: Mutex<VecDeque<Box<dyn BackgroundJob>>>,
    condvar: Condvar,
    /// Signalled when the queue is empty and no job is executing
    idle: Condvar,
    /// Jobs taken by a worker and not yet finished. Only changed under `jobs`.
    active: AtomicUsize,
    running: AtomicBool,
    capacity: usize,
}

/// Bounded job queue shared by a fixed set of worker threads.
///
/// Submission never blocks: a full queue drops the job. Failures and panics
/// inside a job are logged and counted, never propagated to the submitter.
pub struct BackgroundJobSystem {
    queue: Arc<JobQueue>,
    counters: Arc<JobCounters>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl BackgroundJobSystem {
    pub fn new(workers: usize, capacity: usize) -> Result<Self> {
        if workers == 0 || capacity == 0 {
            return Err(Error::InvalidConfig(
                "background pool needs at least one worker and one queue slot".to_string(),
            ));
        }

        let queue = Arc::new(JobQueue {
            jobs: Mutex::new(VecDeque::with_capacity(capacity)),
            condvar: Condvar::new(),
            idle: Condvar::new(),
            active: AtomicUsize::new(0),
            running: AtomicBool::new(true),
            capacity,
        });
        let counters = Arc::new(JobCounters::default());

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let queue = queue.clone();
            let counters = counters.clone();
            let handle = thread::Builder::new()
                .name(format!("bg-writer-{}", worker_id))
                .spawn(move || worker_loop(&queue, &counters))?;
            handles.push(handle);
        }

        Ok(Self {
            queue,
            counters,
            handles: Mutex::new(handles),
        })
    }

    /// Queue a job. Returns false if it was dropped.
    pub fn submit(&self, job: Box<dyn BackgroundJob>) -> bool {
        let job_type = job.job_type() as usize;

        // Checked under the queue lock so a draining worker cannot miss the job.
        let mut jobs = self.queue.jobs.lock();
        if !self.queue.running.load(Ordering::Acquire) {
            drop(jobs);
            self.counters.dropped[job_type].fetch_add(1, Ordering::Relaxed);
            warn!(job_type = ?job.job_type(), "background pool stopped, dropping job");
            return false;
        }
        if jobs.len() >= self.queue.capacity {
            drop(jobs);
            self.counters.dropped[job_type].fetch_add(1, Ordering::Relaxed);
            warn!(job_type = ?job.job_type(), "background queue full, dropping job");
            return false;
        }

        jobs.push_back(job);
        self.counters.submitted[job_type].fetch_add(1, Ordering::Relaxed);
        drop(jobs);
        self.queue.condvar.notify_one();
        true
    }

    /// Jobs waiting for a worker
    pub fn pending_jobs(&self) -> usize {
        self.queue.jobs.lock().len()
    }

    /// Block until every job submitted so far has finished executing.
    ///
    /// The pool keeps accepting jobs meanwhile; jobs submitted while waiting
    /// are waited for as well.
    pub fn wait_idle(&self) {
        let mut jobs = self.queue.jobs.lock();
        while !jobs.is_empty() || self.queue.active.load(Ordering::Acquire) > 0 {
            if self.handles.lock().is_empty() {
                // Workers are gone; nothing will drain what is left.
                break;
            }
            self.queue.idle.wait(&mut jobs);
        }
    }

    pub fn stats(&self, job_type: BackgroundJobType) -> JobStats {
        let idx = job_type as usize;
        JobStats {
            submitted: self.counters.submitted[idx].load(Ordering::Relaxed),
            completed: self.counters.completed[idx].load(Ordering::Relaxed),
            failed: self.counters.failed[idx].load(Ordering::Relaxed),
            dropped: self.counters.dropped[idx].load(Ordering::Relaxed),
        }
    }

    /// Stop accepting jobs, drain the queue and join the workers.
    pub fn shutdown(&self) {
        self.queue.running.store(false, Ordering::Release);
        self.queue.condvar.notify_all();

        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                error!("background worker exited abnormally");
            }
        }
    }
}

impl Drop for BackgroundJobSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(queue: &JobQueue, counters: &JobCounters) {
    loop {
        let job = {
            let mut jobs = queue.jobs.lock();
            while jobs.is_empty() && queue.running.load(Ordering::Acquire) {
                queue.condvar.wait(&mut jobs);
            }
            // Empty here means shutdown with nothing left to drain.
            match jobs.pop_front() {
                Some(job) => {
                    queue.active.fetch_add(1, Ordering::AcqRel);
                    job
                }
                None => break,
            }
        };

        let job_type = job.job_type();
        let idx = job_type as usize;
        match catch_unwind(AssertUnwindSafe(|| job.execute())) {
            Ok(Ok(())) => {
                counters.completed[idx].fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                counters.failed[idx].fetch_add(1, Ordering::Relaxed);
                error!(job_type = ?job_type, error = %e, "background job failed");
            }
            Err(_) => {
                counters.failed[idx].fetch_add(1, Ordering::Relaxed);
                error!(job_type = ?job_type, "background job panicked");
            }
        }

        let jobs = queue.jobs.lock();
        if queue.active.fetch_sub(1, Ordering::AcqRel) == 1 && jobs.is_empty() {
            queue.idle.notify_all();
        }
    }
}
