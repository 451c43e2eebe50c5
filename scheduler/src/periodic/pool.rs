//! Fixed-size worker pool
//!
//! Jobs travel through a bounded channel. Workers share the receiving end;
//! whoever holds the lock takes the next job. A full queue is reported back
//! to the tick loop instead of blocking it.

use super::component::Job;
use super::PeriodicScheduler;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub struct WorkerPool {
    sender: mpsc::Sender<Job>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers on the current tokio runtime
    pub fn spawn(size: usize, queue_depth: usize, scheduler: Arc<PeriodicScheduler>) -> Self {
        let (sender, receiver) = mpsc::channel(queue_depth.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..size)
            .map(|worker| {
                let receiver = Arc::clone(&receiver);
                let scheduler = Arc::clone(&scheduler);
                tokio::spawn(async move {
                    loop {
                        let job = {
                            let mut receiver = receiver.lock().await;
                            receiver.recv().await
                        };
                        let Some(job) = job else {
                            break;
                        };
                        scheduler.execute(job).await;
                    }
                    debug!(worker, "Worker exiting");
                })
            })
            .collect();

        Self { sender, workers }
    }

    /// Queue a job without waiting. Hands the job back if the queue is full
    /// or the pool is shutting down.
    pub fn try_submit(&self, job: Job) -> Result<(), Job> {
        self.sender.try_send(job).map_err(|e| match e {
            TrySendError::Full(job) | TrySendError::Closed(job) => job,
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Close the queue, let workers drain it, and wait for them
    pub async fn shutdown(self) {
        drop(self.sender);
        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!("Worker task failed: {}", e);
            }
        }
    }
}
