//! Folds per-segment partial files into consolidated snapshots.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use sluice_graph::ModuleGraph;
use sluice_store::{FileInfo, PartialSegment, SegmentIo, SegmentKind, StoreError, StoreState};
use tracing::{debug, info};

use crate::errors::{OrchestratorError, OrchestratorResult};
use crate::scheduler::{CompletionSink, StoreJobObserver};

struct StoreSquasher {
    module_hash: String,
    /// Consolidated state through `next_start`.
    state: StoreState,
    /// Start block of the next contiguous segment to fold in.
    next_start: u64,
    /// Delivered partials waiting for their predecessors, keyed by start.
    pending: BTreeMap<u64, PartialSegment>,
}

/// Merges the partial files jobs deliver into snapshots aligned to the save
/// interval, reporting every new snapshot through the completion sink.
///
/// Squashing is serialised behind one lock; partials may arrive in any order
/// and are folded in as soon as their segment becomes contiguous with the
/// consolidated state.
pub struct Squasher {
    io: Arc<dyn SegmentIo>,
    completion: CompletionSink,
    stores: Mutex<HashMap<String, StoreSquasher>>,
}

impl Squasher {
    /// Prepares one squash state per store module reachable from
    /// `output_module`, resuming from the highest cached snapshot when one
    /// exists.
    pub fn new(
        graph: &ModuleGraph,
        output_module: &str,
        io: Arc<dyn SegmentIo>,
        completion: CompletionSink,
    ) -> OrchestratorResult<Self> {
        let mut stores = HashMap::new();
        for module in graph.ancestors_of(output_module)? {
            let Some(spec) = module.store_spec() else {
                continue;
            };
            let module_hash = graph.module_hash(&module.name)?.to_owned();

            let cached = io.snapshot_blocks(&module_hash)?;
            let (state, next_start) = match cached.iter().max() {
                Some(&block) => {
                    let state = io.load_snapshot(&module_hash, block)?.ok_or_else(|| {
                        StoreError::MissingSnapshot {
                            module_hash: module_hash.clone(),
                            block,
                        }
                    })?;
                    (state, block)
                }
                None => (StoreState::new(&module.name, *spec), module.initial_block),
            };

            stores.insert(
                module.name.clone(),
                StoreSquasher {
                    module_hash,
                    state,
                    next_start,
                    pending: BTreeMap::new(),
                },
            );
        }

        Ok(Self {
            io,
            completion,
            stores: Mutex::new(stores),
        })
    }

    fn absorb(&self, module_name: &str, partials: &[FileInfo]) -> OrchestratorResult<Vec<u64>> {
        let mut stores = self.stores.lock().expect("squasher lock poisoned");
        let squasher = stores
            .get_mut(module_name)
            .ok_or_else(|| OrchestratorError::UnknownStore(module_name.to_owned()))?;

        for file in partials {
            if file.kind != SegmentKind::Partial {
                continue;
            }
            let segment = self
                .io
                .load_partial(&squasher.module_hash, file.range)?
                .ok_or_else(|| StoreError::MissingPartial {
                    module_hash: squasher.module_hash.clone(),
                    range: file.range,
                })?;
            squasher
                .pending
                .insert(segment.range().start_block(), segment);
        }

        let mut completed = Vec::new();
        while let Some(segment) = squasher.pending.remove(&squasher.next_start) {
            squasher.state.apply_partial(&segment)?;
            let end = segment.range().exclusive_end_block();
            self.io
                .write_snapshot(&squasher.module_hash, end, &squasher.state)?;
            self.io.delete_partial(&squasher.module_hash, segment.range())?;
            squasher.next_start = end;
            completed.push(end);
            info!(store = %module_name, block = end, "wrote consolidated snapshot");
        }
        if !completed.is_empty() {
            debug!(store = %module_name, pending = squasher.pending.len(), "squash pass done");
        }
        Ok(completed)
    }
}

impl StoreJobObserver for Squasher {
    fn on_store_job_terminated(
        &self,
        module_name: &str,
        partials: &[FileInfo],
    ) -> anyhow::Result<()> {
        let completed = self.absorb(module_name, partials)?;
        // Completions fire outside the squash lock; the sink re-enters the
        // plan, which takes its own lock.
        for block in completed {
            (self.completion)(module_name, block);
        }
        Ok(())
    }
}
