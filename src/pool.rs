//! Bounded worker pool
//!
//! A semaphore caps how many jobs run at once. Jobs are admitted in the order
//! they are submitted as permits free up, each on its own tokio task, so a
//! slow or failing job never holds back its siblings beyond its own slot.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};

/// Fixed-width pool of concurrent jobs
#[derive(Clone)]
pub struct WorkerPool {
    width: usize,
    /// Semaphore limiting concurrent jobs (never closed)
    limit: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

/// Decrements the in-flight counter when a job ends, even by panic
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl WorkerPool {
    /// Create a pool running at most `width` jobs at once (minimum 1)
    pub fn new(width: usize) -> Self {
        let width = width.max(1);
        Self {
            width,
            limit: Arc::new(Semaphore::new(width)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Maximum concurrent jobs
    pub fn width(&self) -> usize {
        self.width
    }

    /// Jobs running right now
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of jobs that ever ran at once
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Wait for a free slot, then start `job` on its own task
    ///
    /// The slot is released when the job finishes.
    pub async fn submit<Fut>(&self, job: Fut) -> JoinHandle<Fut::Output>
    where
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        // Only fails on a closed semaphore, and this one is never closed
        let permit = Arc::clone(&self.limit).acquire_owned().await.ok();
        let in_flight = Arc::clone(&self.in_flight);
        let peak = Arc::clone(&self.peak);

        tokio::spawn(async move {
            let _permit = permit;
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            let _guard = InFlight(in_flight);
            job.await
        })
    }

    /// Run `job` over every item and collect the results in input order
    ///
    /// A job that panics yields a `JoinError` in its slot; the rest still run.
    pub async fn run<I, F, Fut>(&self, items: I, job: F) -> Vec<Result<Fut::Output, JoinError>>
    where
        I: IntoIterator,
        F: Fn(I::Item) -> Fut,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let mut handles = Vec::new();
        for item in items {
            handles.push(self.submit(job(item)).await);
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.await);
        }
        results
    }
}
