//! Named serial work queues
//!
//! Each [`JobQueue`] owns one worker thread fed by a flume channel, so jobs
//! submitted to the same queue run one at a time in submission order.
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use crate::atomic_cell::AtomicCell;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Queue priority requested by the owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobPriority {
    /// Regular work
    #[default]
    Default,
    /// Latency-sensitive work (capture, encode)
    High,
    /// Background work (housekeeping, statistics)
    Low,
}

/// Scheduling class the worker runs under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingClass {
    Default,
    UserInitiated,
    Utility,
}

impl From<JobPriority> for SchedulingClass {
    fn from(priority: JobPriority) -> Self {
        match priority {
            JobPriority::Default => SchedulingClass::Default,
            JobPriority::High => SchedulingClass::UserInitiated,
            JobPriority::Low => SchedulingClass::Utility,
        }
    }
}

/// A deferred unit of work, executed at most once
pub struct Job {
    work: Box<dyn FnOnce() + Send + 'static>,
    synchronous: bool,
    done: Arc<AtomicCell<bool>>,
    completion: Option<flume::Sender<()>>,
    created_at: Instant,
}

impl Job {
    /// Wrap `work` into a job
    pub fn new(work: impl FnOnce() + Send + 'static) -> Self {
        Job {
            work: Box::new(work),
            synchronous: false,
            done: Arc::new(AtomicCell::new(false)),
            completion: None,
            created_at: Instant::now(),
        }
    }

    /// Whether a caller is blocked waiting for this job
    pub fn is_synchronous(&self) -> bool {
        self.synchronous
    }

    /// Flag that flips to `true` once the job has run
    pub fn done_flag(&self) -> Arc<AtomicCell<bool>> {
        self.done.clone()
    }

    fn exec(self) {
        (self.work)();
        self.done.set(true);
        if let Some(completion) = self.completion {
            let _ = completion.send(());
        }
    }
}

/// Serial execution context with its own worker thread
pub struct JobQueue {
    name: String,
    scheduling_class: SchedulingClass,
    sender: Option<flume::Sender<Job>>,
    exiting: Arc<AtomicCell<bool>>,
    worker: Option<JoinHandle<()>>,
    worker_id: ThreadId,
}

impl JobQueue {
    /// Create a queue and start its worker thread
    ///
    /// Fails only when the OS refuses to spawn the thread.
    pub fn new(name: impl Into<String>, priority: JobPriority) -> std::io::Result<Self> {
        let name = name.into();
        let scheduling_class = SchedulingClass::from(priority);
        let (sender, receiver) = flume::unbounded::<Job>();
        let exiting = Arc::new(AtomicCell::new(false));

        let worker_exiting = exiting.clone();
        let worker_name = name.clone();
        let worker = thread::Builder::new()
            .name(name.clone())
            .spawn(move || Self::run(worker_name, receiver, worker_exiting))?;
        let worker_id = worker.thread().id();

        debug!(queue = %name, class = ?scheduling_class, "Job queue started");

        Ok(JobQueue {
            name,
            scheduling_class,
            sender: Some(sender),
            exiting,
            worker: Some(worker),
            worker_id,
        })
    }

    fn run(name: String, receiver: flume::Receiver<Job>, exiting: Arc<AtomicCell<bool>>) {
        while let Ok(job) = receiver.recv() {
            // A blocked caller is waiting on synchronous jobs, they always run
            if !job.is_synchronous() && exiting.get() {
                trace!(queue = %name, "Dropping job, queue is exiting");
                continue;
            }
            trace!(queue = %name, waited_us = job.created_at.elapsed().as_micros() as u64, "Running job");
            job.exec();
        }
        debug!(queue = %name, "Job queue stopped");
    }

    /// Queue name, also the worker thread name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Scheduling class derived from the requested priority
    pub fn scheduling_class(&self) -> SchedulingClass {
        self.scheduling_class
    }

    /// Whether [`JobQueue::mark_exiting`] has been called
    pub fn is_exiting(&self) -> bool {
        self.exiting.get()
    }

    /// Stop running asynchronous jobs that have not started yet.
    ///
    /// Idempotent. A job already running completes normally.
    pub fn mark_exiting(&self) {
        self.exiting.set(true);
    }

    /// Submit `job` for asynchronous execution
    pub fn enqueue(&self, job: Job) {
        self.submit(job);
    }

    /// Submit a closure for asynchronous execution
    pub fn enqueue_fn(&self, work: impl FnOnce() + Send + 'static) {
        self.enqueue(Job::new(work));
    }

    /// Run `job` on the queue and wait for it.
    ///
    /// Runs inline when already called from this queue's worker.
    pub fn enqueue_sync(&self, mut job: Job) {
        if self.is_current() {
            job.exec();
            return;
        }

        let (completion, completed) = flume::bounded(1);
        job.synchronous = true;
        job.completion = Some(completion);
        if self.submit(job) && completed.recv().is_err() {
            warn!(queue = %self.name, "Synchronous job did not complete");
        }
    }

    /// Run a closure on the queue and wait for it
    pub fn enqueue_sync_fn(&self, work: impl FnOnce() + Send + 'static) {
        self.enqueue_sync(Job::new(work));
    }

    /// Run `work` on the queue, wait, and hand back its result.
    ///
    /// Returns `None` when the job could not run (worker gone or job panicked).
    pub fn enqueue_sync_with<R: Send + 'static>(
        &self,
        work: impl FnOnce() -> R + Send + 'static,
    ) -> Option<R> {
        let (result_tx, result_rx) = flume::bounded(1);
        self.enqueue_sync(Job::new(move || {
            let _ = result_tx.send(work());
        }));
        result_rx.try_recv().ok()
    }

    /// Whether the calling thread is this queue's worker
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.worker_id
    }

    fn submit(&self, job: Job) -> bool {
        match &self.sender {
            Some(sender) if sender.send(job).is_ok() => true,
            _ => {
                warn!(queue = %self.name, "Job queue worker is gone, job dropped");
                false
            }
        }
    }
}

impl Drop for JobQueue {
    fn drop(&mut self) {
        self.mark_exiting();
        // Closing the channel ends the worker loop once it drains
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if !self.is_current() {
                let _ = worker.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn queue(name: &str) -> JobQueue {
        JobQueue::new(name, JobPriority::Default).unwrap()
    }

    #[test]
    fn test_priority_maps_to_scheduling_class() {
        let high = JobQueue::new("test.high", JobPriority::High).unwrap();
        let low = JobQueue::new("test.low", JobPriority::Low).unwrap();
        assert_eq!(high.scheduling_class(), SchedulingClass::UserInitiated);
        assert_eq!(low.scheduling_class(), SchedulingClass::Utility);
        assert_eq!(queue("test.default").scheduling_class(), SchedulingClass::Default);
    }

    #[test]
    fn test_jobs_run_in_submission_order() {
        let queue = queue("test.order");
        let seen = Arc::new(AtomicCell::new(Vec::new()));
        for i in 0..100 {
            let seen = seen.clone();
            queue.enqueue_fn(move || seen.modify(|v| v.push(i)));
        }
        queue.enqueue_sync_fn(|| {});
        assert_eq!(seen.get(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_enqueue_sync_blocks_until_done() {
        let queue = queue("test.sync");
        let job = Job::new(|| thread::sleep(Duration::from_millis(20)));
        let done = job.done_flag();
        queue.enqueue_sync(job);
        assert!(done.get());
    }

    #[test]
    fn test_enqueue_sync_from_own_worker_runs_inline() {
        let queue = Arc::new(queue("test.reentrant"));
        let inner = queue.clone();
        let value = queue.enqueue_sync_with(move || {
            assert!(inner.is_current());
            inner.enqueue_sync_with(|| 42).unwrap_or_default()
        });
        assert_eq!(value, Some(42));
    }

    #[test]
    fn test_no_jobs_run_after_mark_exiting() {
        let queue = queue("test.exiting");
        let (started_tx, started_rx) = flume::bounded::<()>(1);
        let (gate_tx, gate_rx) = flume::bounded::<()>(1);
        let counter = Arc::new(AtomicCell::new(0));

        // Park the worker so the next jobs are queued but not dispatched
        queue.enqueue_fn(move || {
            let _ = started_tx.send(());
            let _ = gate_rx.recv();
        });
        started_rx.recv().unwrap();
        for _ in 0..3 {
            let counter = counter.clone();
            queue.enqueue_fn(move || counter.modify(|c| *c += 1));
        }
        queue.mark_exiting();
        queue.mark_exiting();
        gate_tx.send(()).unwrap();

        // Synchronous jobs still run and act as a barrier
        assert_eq!(queue.enqueue_sync_with(|| 1), Some(1));
        assert_eq!(counter.get(), 0);
        assert!(queue.is_exiting());
    }

    #[test]
    fn test_worker_thread_is_named() {
        let queue = queue("broadcast.test.named");
        let name = queue.enqueue_sync_with(|| thread::current().name().map(str::to_string));
        assert_eq!(name.flatten().as_deref(), Some("broadcast.test.named"));
    }
}
