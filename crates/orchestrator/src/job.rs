//! Backfill jobs.

use std::fmt;
use std::sync::Arc;

use sluice_primitives::{BlockRange, ModuleDef};

/// One `(store, block)` snapshot a job needs before it may run.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct StoreDep {
    pub store_name: String,
    pub block: u64,
}

impl StoreDep {
    pub fn new(store_name: impl Into<String>, block: u64) -> Self {
        Self {
            store_name: store_name.into(),
            block,
        }
    }
}

/// An immutable unit of backfill work: run one store module over one
/// save-aligned segment.
#[derive(Clone, Debug)]
pub struct Job {
    pub module_name: String,
    pub range: BlockRange,
    /// Snapshots that must exist before dispatch.
    pub deps: Vec<StoreDep>,
    /// Position of the module in the graph's topological order; earlier
    /// modules dispatch first among ready jobs.
    pub topo_rank: usize,
}

impl Job {
    /// Builds the request handed to a worker: the job's own scope plus the
    /// module set of the upstream user request.
    pub fn create_request(&self, request_modules: &Arc<Vec<ModuleDef>>) -> WorkRequest {
        WorkRequest {
            output_module: self.module_name.clone(),
            range: self.range,
            modules: request_modules.clone(),
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job {} {}", self.module_name, self.range)
    }
}

/// Scheduler-side lifecycle of a job.  Terminal states are absorbing.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum JobState {
    /// Dependencies unmet.
    Pending,
    /// Borrowed by a worker.
    InFlight,
    Done,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }
}

/// What a worker receives for one job.
#[derive(Clone, Debug)]
pub struct WorkRequest {
    pub output_module: String,
    pub range: BlockRange,
    /// The full module set the user submitted.
    pub modules: Arc<Vec<ModuleDef>>,
}
