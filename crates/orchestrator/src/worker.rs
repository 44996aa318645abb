//! Worker contract and the bounded pool jobs are dispatched over.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use sluice_store::FileInfo;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::job::WorkRequest;

/// Progress message a worker may stream while executing; the scheduler
/// forwards these without interpreting them.
#[derive(Clone, Debug)]
pub struct JobProgress {
    pub module_name: String,
    pub last_block: u64,
}

/// Callback workers invoke to stream progress back to the request.
pub type ResponseSink = Arc<dyn Fn(JobProgress) + Send + Sync>;

/// Failure of one worker attempt.
#[derive(Debug, Error)]
pub enum WorkError {
    /// Transient infrastructure fault; the scheduler may retry.
    #[error("retryable: {0}")]
    Retryable(anyhow::Error),

    #[error("operation canceled")]
    Canceled,

    /// Anything else aborts the job.
    #[error("{0}")]
    Fatal(anyhow::Error),
}

impl WorkError {
    pub fn retryable(err: impl Into<anyhow::Error>) -> Self {
        WorkError::Retryable(err.into())
    }

    pub fn fatal(err: impl Into<anyhow::Error>) -> Self {
        WorkError::Fatal(err.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkError::Retryable(_))
    }
}

/// An opaque executor of one partial-range job at a time.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Stable identity, used to key the scheduler's in-flight table.
    fn id(&self) -> &str;

    /// Executes one job to completion, returning the partial files written.
    async fn work(
        &self,
        token: CancellationToken,
        request: WorkRequest,
        sink: ResponseSink,
    ) -> Result<Vec<FileInfo>, WorkError>;
}

/// Fixed-size pool with borrow/return semantics.
///
/// A borrowed worker is exclusively the borrower's until returned; returns
/// never block.
pub struct WorkerPool {
    size: usize,
    available: AtomicUsize,
    tx: mpsc::UnboundedSender<Box<dyn Worker>>,
    rx: Mutex<mpsc::UnboundedReceiver<Box<dyn Worker>>>,
}

impl WorkerPool {
    pub fn new(workers: Vec<Box<dyn Worker>>) -> Self {
        let size = workers.len();
        let (tx, rx) = mpsc::unbounded_channel();
        for worker in workers {
            tx.send(worker).expect("receiver held by pool");
        }
        Self {
            size,
            available: AtomicUsize::new(size),
            tx,
            rx: Mutex::new(rx),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Workers currently free, for observability and tests.
    pub fn available(&self) -> usize {
        self.available.load(Ordering::Acquire)
    }

    /// Blocks until a worker frees up; `None` on cancellation.
    pub async fn borrow(&self, token: &CancellationToken) -> Option<Box<dyn Worker>> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            _ = token.cancelled() => None,
            worker = rx.recv() => {
                let worker = worker.expect("pool sender never dropped");
                self.available.fetch_sub(1, Ordering::AcqRel);
                Some(worker)
            }
        }
    }

    pub fn return_worker(&self, worker: Box<dyn Worker>) {
        self.available.fetch_add(1, Ordering::AcqRel);
        let _ = self.tx.send(worker);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    struct NoopWorker(String);

    #[async_trait]
    impl Worker for NoopWorker {
        fn id(&self) -> &str {
            &self.0
        }

        async fn work(
            &self,
            _token: CancellationToken,
            _request: WorkRequest,
            _sink: ResponseSink,
        ) -> Result<Vec<FileInfo>, WorkError> {
            Ok(vec![])
        }
    }

    fn make_pool(n: usize) -> WorkerPool {
        WorkerPool::new(
            (0..n)
                .map(|i| Box::new(NoopWorker(format!("worker-{i}"))) as Box<dyn Worker>)
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_borrow_and_return() {
        let pool = make_pool(2);
        let token = CancellationToken::new();
        assert_eq!(pool.available(), 2);

        let a = pool.borrow(&token).await.unwrap();
        let b = pool.borrow(&token).await.unwrap();
        assert_eq!(pool.available(), 0);
        assert_ne!(a.id(), b.id());

        pool.return_worker(a);
        assert_eq!(pool.available(), 1);
        let c = pool.borrow(&token).await.unwrap();
        pool.return_worker(b);
        pool.return_worker(c);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn test_borrow_blocks_until_return() {
        let pool = Arc::new(make_pool(1));
        let token = CancellationToken::new();
        let held = pool.borrow(&token).await.unwrap();

        let waiter = {
            let pool = pool.clone();
            let token = token.clone();
            tokio::spawn(async move { pool.borrow(&token).await.map(|w| w.id().to_owned()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        pool.return_worker(held);
        let got = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.as_deref(), Some("worker-0"));
    }

    #[tokio::test]
    async fn test_cancelled_borrow_returns_none() {
        let pool = make_pool(1);
        let token = CancellationToken::new();
        let _held = pool.borrow(&token).await.unwrap();

        token.cancel();
        assert!(pool.borrow(&token).await.is_none());
    }
}
