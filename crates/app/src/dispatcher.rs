//! Fixed-size worker pool that runs rule callbacks off the ingestion path.
//!
//! Workers share one job queue. Every job runs in its own spawned task so a
//! panicking rule only loses that job; the worker logs the failure and moves
//! on to the next one.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;

use hubwatch_domain::error::HubError;

use crate::error::DispatchError;
use crate::sync::lock;

/// Default number of workers.
pub const DEFAULT_WORKERS: usize = 2;

type Task = Pin<Box<dyn Future<Output = Result<(), HubError>> + Send + 'static>>;

/// A unit of work submitted on behalf of a rule.
pub struct Job {
    rule: String,
    task: Task,
}

impl Job {
    /// Wrap a rule callback.
    pub fn new<F>(rule: impl Into<String>, task: F) -> Self
    where
        F: Future<Output = Result<(), HubError>> + Send + 'static,
    {
        Self {
            rule: rule.into(),
            task: Box::pin(task),
        }
    }
}

struct Running {
    sender: mpsc::UnboundedSender<Job>,
    workers: Vec<JoinHandle<()>>,
}

/// Background pool executing [`Job`]s.
#[derive(Default)]
pub struct Dispatcher {
    running: Mutex<Option<Running>>,
}

impl Dispatcher {
    /// Create a stopped dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `workers` tasks (at least one). Calling it again while running
    /// does nothing.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, workers: usize) {
        let mut running = lock(&self.running);
        if running.is_some() {
            return;
        }
        let workers = workers.max(1);
        let (sender, receiver) = mpsc::unbounded_channel();
        let queue = Arc::new(AsyncMutex::new(receiver));
        let handles = (0..workers)
            .map(|index| tokio::spawn(worker_loop(index, Arc::clone(&queue))))
            .collect();
        *running = Some(Running {
            sender,
            workers: handles,
        });
        tracing::info!(workers, "dispatcher started");
    }

    /// Whether `start` was called and `shutdown` was not.
    #[must_use]
    pub fn is_running(&self) -> bool {
        lock(&self.running).is_some()
    }

    /// Enqueue a job.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NotInitialized`] before [`start`](Self::start)
    /// or after [`shutdown`](Self::shutdown).
    pub fn submit(&self, job: Job) -> Result<(), DispatchError> {
        let running = lock(&self.running);
        let Some(running) = running.as_ref() else {
            return Err(DispatchError::NotInitialized);
        };
        running
            .sender
            .send(job)
            .map_err(|_| DispatchError::NotInitialized)
    }

    /// Close the queue and wait for the workers to drain it.
    pub async fn shutdown(&self) {
        let Some(running) = lock(&self.running).take() else {
            return;
        };
        drop(running.sender);
        for worker in running.workers {
            if let Err(err) = worker.await {
                tracing::warn!(%err, "dispatcher worker ended abnormally");
            }
        }
        tracing::info!("dispatcher stopped");
    }
}

async fn worker_loop(index: usize, queue: Arc<AsyncMutex<mpsc::UnboundedReceiver<Job>>>) {
    loop {
        let next = queue.lock().await.recv().await;
        let Some(job) = next else {
            break;
        };
        run_job(job).await;
    }
    tracing::debug!(worker = index, "dispatcher worker stopped");
}

async fn run_job(job: Job) {
    let Job { rule, task } = job;
    match tokio::spawn(task).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::warn!(%err, rule = %rule, "rule failed"),
        Err(err) => tracing::error!(%err, rule = %rule, "rule task aborted"),
    }
}
