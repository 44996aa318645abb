//! The backfill scheduling loop.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sluice_primitives::ModuleDef;
use sluice_store::FileInfo;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::OrchestratorConfig;
use crate::errors::{OrchestratorError, OrchestratorResult};
use crate::job::{Job, JobState};
use crate::plan::Plan;
use crate::retry;
use crate::worker::{ResponseSink, WorkError, Worker, WorkerPool};

/// Callback through which the squasher reports each new consolidated
/// snapshot back into the scheduler's plan.
pub type CompletionSink = Arc<dyn Fn(&str, u64) + Send + Sync>;

/// Receives the partial files of every successfully terminated store job.
pub trait StoreJobObserver: Send + Sync {
    fn on_store_job_terminated(
        &self,
        module_name: &str,
        partials: &[FileInfo],
    ) -> anyhow::Result<()>;
}

struct JobOutcome {
    job: Arc<Job>,
    result: Result<Vec<FileInfo>, WorkError>,
}

/// Drives one backfill request to completion.
///
/// A dispatcher task borrows workers and hands them ready jobs; a collector
/// applies results in arrival order.  The first non-retryable failure
/// anywhere terminates the whole request.
pub struct Scheduler {
    config: OrchestratorConfig,
    plan: Arc<Plan>,
    request_modules: Arc<Vec<ModuleDef>>,
    response_sink: ResponseSink,
    observer: Arc<dyn StoreJobObserver>,
    /// Jobs currently executing, keyed by worker id.
    current_jobs: Mutex<HashMap<String, Arc<Job>>>,
}

impl Scheduler {
    pub fn new(
        config: OrchestratorConfig,
        plan: Arc<Plan>,
        request_modules: Arc<Vec<ModuleDef>>,
        response_sink: ResponseSink,
        observer: Arc<dyn StoreJobObserver>,
    ) -> Self {
        Self {
            config,
            plan,
            request_modules,
            response_sink,
            observer,
            current_jobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn plan(&self) -> &Arc<Plan> {
        &self.plan
    }

    /// Called when a store has consolidated snapshots up to `block`; unblocks
    /// every job waiting on them.
    pub fn on_store_completed_until_block(&self, store_name: &str, block: u64) {
        self.plan.mark_dependency_complete(store_name, block);
    }

    /// Runs the request until every planned job is done, a job fails, or the
    /// token is cancelled.
    pub async fn schedule(
        self: Arc<Self>,
        token: CancellationToken,
        pool: Arc<WorkerPool>,
    ) -> OrchestratorResult<()> {
        info!(jobs = self.plan.job_count(), "launching scheduler");

        // Child token so a terminating collector can stop dispatch and
        // in-flight work.
        let run_token = token.child_token();
        let (result_tx, result_rx) = mpsc::unbounded_channel();

        {
            let this = self.clone();
            let run_token = run_token.clone();
            let pool = pool.clone();
            tokio::spawn(async move {
                while !Self::dispatch_one(&this, &run_token, &pool, &result_tx).await {}
                debug!("scheduler finished starting jobs");
                // The channel closes once this sender and every in-flight
                // execution's clone are gone.
                drop(result_tx);
            });
        }

        let result = self.gather_results(&token, result_rx).await;
        run_token.cancel();
        result
    }

    /// One dispatcher iteration: borrow a worker, pull the next ready job,
    /// spawn its execution.  Returns true when dispatching is finished.
    async fn dispatch_one(
        this: &Arc<Self>,
        token: &CancellationToken,
        pool: &Arc<WorkerPool>,
        result_tx: &mpsc::UnboundedSender<JobOutcome>,
    ) -> bool {
        let Some(worker) = pool.borrow(token).await else {
            return true;
        };

        let Some(job) = this.poll_next_job(token).await else {
            pool.return_worker(worker);
            return true;
        };

        let worker_id = worker.id().to_owned();
        {
            let mut current = this.current_jobs.lock().expect("in-flight lock poisoned");
            debug!(jobs = ?jobs_summary(&current), "current running jobs");
            current.insert(worker_id.clone(), job.clone());
        }

        let this = this.clone();
        let token = token.clone();
        let pool = pool.clone();
        let result_tx = result_tx.clone();
        tokio::spawn(async move {
            let outcome = this.run_single_job(&token, worker.as_ref(), &job).await;
            if !token.is_cancelled() {
                let _ = result_tx.send(outcome);
            }

            // Release on every exit path, after the result is delivered.
            this.current_jobs
                .lock()
                .expect("in-flight lock poisoned")
                .remove(&worker_id);
            pool.return_worker(worker);
        });

        false
    }

    /// Next ready job, polling while jobs remain but none is ready.  `None`
    /// when cancelled or the plan is exhausted.
    async fn poll_next_job(&self, token: &CancellationToken) -> Option<Arc<Job>> {
        loop {
            if token.is_cancelled() {
                return None;
            }
            let (job, more_jobs) = self.plan.next_job();
            if let Some(job) = job {
                return Some(job);
            }
            if !more_jobs {
                return None;
            }
            tokio::select! {
                _ = token.cancelled() => return None,
                _ = tokio::time::sleep(self.config.ready_poll_interval) => {}
            }
        }
    }

    async fn run_single_job(
        &self,
        token: &CancellationToken,
        worker: &dyn Worker,
        job: &Arc<Job>,
    ) -> JobOutcome {
        let request = job.create_request(&self.request_modules);

        let result = retry::retry_work(token, self.config.max_retries, || {
            worker.work(token.clone(), request.clone(), self.response_sink.clone())
        })
        .await;

        match &result {
            Ok(files) => info!(job = %job, files = files.len(), "job completed"),
            Err(WorkError::Canceled) => debug!(job = %job, "job canceled"),
            Err(err) => info!(job = %job, %err, "job failed"),
        }

        JobOutcome {
            job: job.clone(),
            result,
        }
    }

    async fn gather_results(
        &self,
        token: &CancellationToken,
        mut result_rx: mpsc::UnboundedReceiver<JobOutcome>,
    ) -> OrchestratorResult<()> {
        loop {
            tokio::select! {
                _ = token.cancelled() => return Err(OrchestratorError::Canceled),
                outcome = result_rx.recv() => match outcome {
                    None => return Ok(()),
                    Some(outcome) => self.process_job_result(outcome)?,
                },
            }
        }
    }

    fn process_job_result(&self, outcome: JobOutcome) -> OrchestratorResult<()> {
        let module = outcome.job.module_name.clone();
        match outcome.result {
            Err(source) => {
                self.plan.mark_job_terminated(&outcome.job, JobState::Failed);
                Err(OrchestratorError::JobFailed { module, source })
            }
            Ok(partials) => {
                self.plan.mark_job_terminated(&outcome.job, JobState::Done);
                if !partials.is_empty() {
                    // Signals the squasher that this segment can be folded in.
                    self.observer
                        .on_store_job_terminated(&module, &partials)
                        .map_err(|source| OrchestratorError::OnJobTerminated {
                            module: module.clone(),
                            source,
                        })?;
                }
                Ok(())
            }
        }
    }
}

fn jobs_summary(current: &HashMap<String, Arc<Job>>) -> Vec<String> {
    current
        .iter()
        .map(|(worker_id, job)| format!("{job} (on {worker_id})"))
        .collect()
}
