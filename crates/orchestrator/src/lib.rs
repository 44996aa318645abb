//! # sluice-orchestrator
//!
//! The parallel backfill core: turns a request `(graph, output module,
//! range)` into partial-range jobs, dispatches them over a bounded worker
//! pool respecting inter-store dependencies, and squashes the resulting
//! partial files into consolidated snapshots that unblock downstream work.

mod config;
mod errors;
mod job;
mod plan;
mod retry;
mod scheduler;
mod squasher;
mod waiter;
mod worker;

pub use config::OrchestratorConfig;
pub use errors::{OrchestratorError, OrchestratorResult};
pub use job::{Job, JobState, StoreDep, WorkRequest};
pub use plan::Plan;
pub use scheduler::{CompletionSink, Scheduler, StoreJobObserver};
pub use squasher::Squasher;
pub use waiter::BlockWaiter;
pub use worker::{JobProgress, ResponseSink, WorkError, Worker, WorkerPool};
