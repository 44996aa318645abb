//! Segment planning and the scheduler-facing work plan.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sluice_graph::ModuleGraph;
use sluice_primitives::{BlockRange, ModuleKind};
use sluice_store::SnapshotCatalog;
use tracing::debug;

use crate::errors::OrchestratorResult;
use crate::job::{Job, JobState, StoreDep};
use crate::waiter::BlockWaiter;

struct PlanEntry {
    job: Arc<Job>,
    waiter: BlockWaiter,
    state: JobState,
}

struct PlanInner {
    entries: Vec<PlanEntry>,
    /// Highest completed snapshot block per store, monotone.
    completions: HashMap<String, u64>,
    tail_waiter: Option<Arc<BlockWaiter>>,
}

/// The work plan of one backfill request.
///
/// Built once from the graph, the request range and the snapshot catalog;
/// afterwards the scheduler pulls ready jobs out of it while snapshot
/// completions trickle in.  All mutation happens under the plan's own lock,
/// so `next_job` and `mark_dependency_complete` are mutually exclusive.
pub struct Plan {
    inner: Mutex<PlanInner>,
    mapper_tail: Option<BlockRange>,
}

impl Plan {
    /// Derives the deterministic job sequence for a request.
    ///
    /// Per store module reachable from `output_module`, one job is emitted
    /// for every save-aligned segment of the request range not already
    /// covered by a cached snapshot.  A job depends on its input stores'
    /// snapshots at the segment end, and on its own store's snapshot at the
    /// segment start (except for the module's very first segment, which has
    /// nothing to load).
    pub fn build(
        graph: &ModuleGraph,
        output_module: &str,
        range: BlockRange,
        save_interval: u64,
        catalog: &dyn SnapshotCatalog,
    ) -> OrchestratorResult<Self> {
        let output = graph.get(output_module)?;
        let mut entries = Vec::new();
        let mut completions: HashMap<String, u64> = HashMap::new();

        for module in graph.ancestors_of(output_module)? {
            if !module.is_store() {
                continue;
            }
            let module_hash = graph.module_hash(&module.name)?;
            let topo_rank = graph.topo_rank(&module.name)?;

            // Snapshots from previous runs already satisfy dependencies.
            let cached = catalog.snapshot_blocks(module_hash)?;
            if let Some(&highest) = cached.iter().max() {
                completions.insert(module.name.clone(), highest);
            }

            for segment in range.aligned_segments(save_interval, module.initial_block) {
                if cached.contains(&segment.exclusive_end_block()) {
                    continue;
                }

                let mut deps = Vec::new();
                for input in graph.input_stores_of(&module.name)? {
                    let required = segment.exclusive_end_block();
                    if required > input.initial_block {
                        deps.push(StoreDep::new(&input.name, required));
                    }
                }
                if segment.start_block() > module.initial_block {
                    deps.push(StoreDep::new(&module.name, segment.start_block()));
                }

                let job = Arc::new(Job {
                    module_name: module.name.clone(),
                    range: segment,
                    deps: deps.clone(),
                    topo_rank,
                });
                debug!(%job, deps = deps.len(), "planned job");
                entries.push(PlanEntry {
                    job,
                    waiter: BlockWaiter::new(deps),
                    state: JobState::Pending,
                });
            }
        }

        // The linear tail of the terminal mapper is served by the request
        // tier, not dispatched here; expose its range and a waiter over the
        // store snapshots it starts from.
        let mut mapper_tail = None;
        let mut tail_waiter = None;
        if matches!(output.kind, ModuleKind::Mapper) {
            if let Some(tail) = range.unaligned_suffix(save_interval, output.initial_block) {
                let mut deps = Vec::new();
                for input in graph.input_stores_of(output_module)? {
                    if tail.start_block() > input.initial_block {
                        deps.push(StoreDep::new(&input.name, tail.start_block()));
                    }
                }
                mapper_tail = Some(tail);
                tail_waiter = Some(Arc::new(BlockWaiter::new(deps)));
            }
        }

        let plan = Self {
            inner: Mutex::new(PlanInner {
                entries,
                completions: HashMap::new(),
                tail_waiter,
            }),
            mapper_tail,
        };

        // Seed the completion set with the cached coverage.
        for (store, block) in completions {
            plan.mark_dependency_complete(&store, block);
        }

        Ok(plan)
    }

    /// Picks the next ready job and moves it in-flight.
    ///
    /// Ready jobs are ordered by topological rank, then start block, so a
    /// single-worker run dispatches deterministically.  The boolean reports
    /// whether unready jobs remain; `(None, false)` means the plan is
    /// exhausted.
    pub fn next_job(&self) -> (Option<Arc<Job>>, bool) {
        let mut inner = self.inner.lock().expect("plan lock poisoned");

        let mut best: Option<usize> = None;
        for (idx, entry) in inner.entries.iter().enumerate() {
            if entry.state != JobState::Pending || !entry.waiter.is_resolved() {
                continue;
            }
            let better = match best {
                None => true,
                Some(current) => job_key(&entry.job) < job_key(&inner.entries[current].job),
            };
            if better {
                best = Some(idx);
            }
        }

        let job = best.map(|idx| {
            inner.entries[idx].state = JobState::InFlight;
            inner.entries[idx].job.clone()
        });
        let more_jobs = inner
            .entries
            .iter()
            .any(|entry| entry.state == JobState::Pending);
        (job, more_jobs)
    }

    /// Records that `store_name` has consolidated snapshots up to `block`.
    ///
    /// Idempotent and monotone; every live waiter interested in this store
    /// at or below `block` gets signalled.
    pub fn mark_dependency_complete(&self, store_name: &str, block: u64) {
        let mut inner = self.inner.lock().expect("plan lock poisoned");

        let completed = inner.completions.entry(store_name.to_owned()).or_insert(0);
        if block > *completed {
            *completed = block;
        }

        for entry in &inner.entries {
            if !entry.state.is_terminal() {
                entry.waiter.signal(store_name, block);
            }
        }
        if let Some(tail_waiter) = &inner.tail_waiter {
            tail_waiter.signal(store_name, block);
        }
    }

    /// Moves a dispatched job to a terminal state.  Terminal states are
    /// absorbing; later calls for the same job are ignored.
    pub fn mark_job_terminated(&self, job: &Job, state: JobState) {
        debug_assert!(state.is_terminal());
        let mut inner = self.inner.lock().expect("plan lock poisoned");
        for entry in inner.entries.iter_mut() {
            if entry.job.module_name == job.module_name
                && entry.job.range == job.range
                && !entry.state.is_terminal()
            {
                entry.state = state;
            }
        }
    }

    /// Highest completed snapshot block observed for a store.
    pub fn completed_block(&self, store_name: &str) -> Option<u64> {
        let inner = self.inner.lock().expect("plan lock poisoned");
        inner.completions.get(store_name).copied()
    }

    pub fn job_count(&self) -> usize {
        let inner = self.inner.lock().expect("plan lock poisoned");
        inner.entries.len()
    }

    pub fn job_state(&self, module_name: &str, range: BlockRange) -> Option<JobState> {
        let inner = self.inner.lock().expect("plan lock poisoned");
        inner
            .entries
            .iter()
            .find(|entry| entry.job.module_name == module_name && entry.job.range == range)
            .map(|entry| entry.state)
    }

    /// Range of the terminal mapper's linear tail, when the request ends past
    /// the last save boundary.
    pub fn mapper_tail(&self) -> Option<BlockRange> {
        self.mapper_tail
    }

    /// Barrier over the snapshots the mapper tail starts from.
    pub fn tail_waiter(&self) -> Option<Arc<BlockWaiter>> {
        let inner = self.inner.lock().expect("plan lock poisoned");
        inner.tail_waiter.clone()
    }
}

fn job_key(job: &Job) -> (usize, u64, u64) {
    (
        job.topo_rank,
        job.range.start_block(),
        job.range.exclusive_end_block(),
    )
}
