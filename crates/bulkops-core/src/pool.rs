//! Bounded worker pools.
//!
//! A pool owns `size` worker tasks pulling jobs from one FIFO queue, so a
//! single-worker pool runs jobs strictly in submission order. Every job gets
//! a [`TaskHandle`] that resolves exactly once to the job's result, to
//! [`BulkError::TaskPanicked`] if it panicked, or to
//! [`BulkError::Cancelled`] if the pool's token fired first.
//!
//! Dropping a pool cancels its token and aborts its workers; queued jobs are
//! dropped and their handles resolve as failed. [`WorkerPool::shutdown`]
//! drains the queue instead.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{BulkError, Result};

type Job = BoxFuture<'static, ()>;

pub struct WorkerPool {
    name: String,
    size: usize,
    queue: Option<mpsc::UnboundedSender<Job>>,
    workers: JoinSet<()>,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Pool with its own root cancellation token.
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self::with_cancel(name, size, &CancellationToken::new())
    }

    /// Pool whose jobs are cancelled when `parent` is. Cancelling or
    /// dropping the pool never cancels `parent`.
    pub fn with_cancel(name: impl Into<String>, size: usize, parent: &CancellationToken) -> Self {
        let name = name.into();
        let size = size.max(1);
        let (tx, rx) = mpsc::unbounded_channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let mut workers = JoinSet::new();
        for index in 0..size {
            let rx = rx.clone();
            let pool = name.clone();
            workers.spawn(async move {
                loop {
                    // Holding the lock while waiting keeps dequeue order FIFO.
                    let job = rx.lock().await.recv().await;
                    match job {
                        Some(job) => job.await,
                        None => break,
                    }
                }
                debug!(pool = %pool, worker = index, "worker exited");
            });
        }
        debug!(pool = %name, size, "worker pool started");
        Self {
            name,
            size,
            queue: Some(tx),
            workers,
            cancel: parent.child_token(),
        }
    }

    /// Per-run pool: `parallel_workers` workers when parallel, else one.
    pub fn for_run(parallel: bool, parallel_workers: usize, parent: &CancellationToken) -> Self {
        if parallel {
            Self::with_cancel("run-parallel", parallel_workers, parent)
        } else {
            Self::with_cancel("run-sequential", 1, parent)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Queue `fut` and return its handle. `label` names the job in errors.
    pub fn submit<T, Fut>(&self, label: impl Into<String>, fut: Fut) -> TaskHandle<T>
    where
        T: Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let label = label.into();
        let (tx, rx) = oneshot::channel();
        let cancel = self.cancel.clone();
        let job_label = label.clone();
        let job = async move {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(BulkError::Cancelled),
                res = AssertUnwindSafe(fut).catch_unwind() => match res {
                    Ok(out) => out,
                    Err(_) => Err(BulkError::TaskPanicked(job_label)),
                },
            };
            let _ = tx.send(outcome);
        }
        .boxed();

        if let Some(queue) = &self.queue {
            // A closed queue drops the job, and with it the sender.
            let _ = queue.send(job);
        }
        TaskHandle { label, rx }
    }

    /// Stop accepting jobs, run everything already queued, and wait for the
    /// workers to exit.
    pub async fn shutdown(mut self) {
        self.queue.take();
        let mut workers = std::mem::take(&mut self.workers);
        while workers.join_next().await.is_some() {}
        debug!(pool = %self.name, "worker pool drained");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.cancel.cancel();
        if !self.workers.is_empty() {
            debug!(pool = %self.name, "worker pool dropped, aborting workers");
        }
        // JoinSet aborts its remaining tasks when dropped.
    }
}

/// Pending result of one submitted job. Consumed by [`TaskHandle::wait`],
/// so it can be waited on only once.
#[must_use = "a task handle does nothing unless waited on"]
pub struct TaskHandle<T> {
    label: String,
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> TaskHandle<T> {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub async fn wait(self) -> Result<T> {
        match self.rx.await {
            Ok(out) => out,
            Err(_) => Err(BulkError::TaskFailed {
                target: self.label,
                reason: "worker pool stopped before the task completed".to_string(),
            }),
        }
    }
}
