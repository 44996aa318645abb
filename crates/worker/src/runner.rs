//! Executes one partial-range job against the wasm runtime.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use sluice_graph::ModuleGraph;
use sluice_orchestrator::{JobProgress, ResponseSink, WorkError, WorkRequest, Worker};
use sluice_primitives::{Block, ModuleDef, StoreSpec};
use sluice_store::{
    DeltaStore, FileInfo, SegmentIo, StoreError, StoreRead, StoreState,
};
use sluice_wasm::{Argument, WasmModule, WasmRuntime};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A worker executing jobs inside the current process.
///
/// Loads the starting snapshot, runs the output module's entrypoint once per
/// block with the block payload and its input-store readers, and writes the
/// accumulated deltas as one partial file.
pub struct LocalWorker {
    id: String,
    runtime: WasmRuntime,
    source: Arc<dyn crate::BlockSource>,
    io: Arc<dyn SegmentIo>,
    max_log_bytes: u64,
}

impl LocalWorker {
    pub fn new(
        id: impl Into<String>,
        source: Arc<dyn crate::BlockSource>,
        io: Arc<dyn SegmentIo>,
        max_log_bytes: u64,
    ) -> Self {
        Self {
            id: id.into(),
            runtime: WasmRuntime::new(),
            source,
            io,
            max_log_bytes,
        }
    }

    /// Builds `count` workers over the same source and segment store, for
    /// wiring a pool of `worker_pool_size` workers.
    pub fn spawn_many(
        count: usize,
        source: Arc<dyn crate::BlockSource>,
        io: Arc<dyn SegmentIo>,
        max_log_bytes: u64,
    ) -> Vec<Box<dyn Worker>> {
        (0..count)
            .map(|i| {
                Box::new(LocalWorker::new(
                    format!("local-{i}"),
                    source.clone(),
                    io.clone(),
                    max_log_bytes,
                )) as Box<dyn Worker>
            })
            .collect()
    }

    /// Loads the snapshot an input store must provide at `block`, or an
    /// empty state when the store only begins afterwards.
    fn load_input_state(
        &self,
        graph: &ModuleGraph,
        input: &ModuleDef,
        spec: StoreSpec,
        block: u64,
    ) -> Result<StoreState, WorkError> {
        if block <= input.initial_block {
            return Ok(StoreState::new(&input.name, spec));
        }
        let hash = graph.module_hash(&input.name).map_err(WorkError::fatal)?;
        match self.io.load_snapshot(hash, block) {
            Ok(Some(state)) => Ok(state),
            // The scheduler only dispatches once the snapshot is advertised;
            // not seeing it yet is an infrastructure race, not a dead end.
            Ok(None) => Err(WorkError::retryable(StoreError::MissingSnapshot {
                module_hash: hash.to_owned(),
                block,
            })),
            Err(err) => Err(io_error(err)),
        }
    }
}

#[async_trait]
impl Worker for LocalWorker {
    fn id(&self) -> &str {
        &self.id
    }

    async fn work(
        &self,
        token: CancellationToken,
        request: WorkRequest,
        sink: ResponseSink,
    ) -> Result<Vec<FileInfo>, WorkError> {
        let graph = ModuleGraph::new(request.modules.as_ref().clone()).map_err(WorkError::fatal)?;
        let module = graph
            .get(&request.output_module)
            .map_err(WorkError::fatal)?;
        let Some(spec) = module.store_spec().copied() else {
            return Err(WorkError::fatal(anyhow!(
                "job output module {:?} is not a store",
                request.output_module
            )));
        };
        let module_hash = graph
            .module_hash(&request.output_module)
            .map_err(WorkError::fatal)?
            .to_owned();

        // Starting state: the module's own snapshot at the segment start,
        // except for its very first segment.
        let base = if request.range.start_block() > module.initial_block {
            match self.io.load_snapshot(&module_hash, request.range.start_block()) {
                Ok(Some(state)) => state,
                Ok(None) => {
                    return Err(WorkError::retryable(StoreError::MissingSnapshot {
                        module_hash,
                        block: request.range.start_block(),
                    }))
                }
                Err(err) => return Err(io_error(err)),
            }
        } else {
            StoreState::new(&module.name, spec)
        };

        // Input stores are read at the segment end, which the job's
        // dependencies guarantee to exist.
        let mut readers: Vec<Arc<dyn StoreRead>> = Vec::new();
        for input in graph
            .input_stores_of(&request.output_module)
            .map_err(WorkError::fatal)?
        {
            let input_spec = input.store_spec().expect("input_stores_of yields stores");
            let state = self.load_input_state(
                &graph,
                input,
                *input_spec,
                request.range.exclusive_end_block(),
            )?;
            readers.push(Arc::new(state));
        }

        let wasm_module = self
            .runtime
            .compile(&module.binary)
            .map_err(WorkError::fatal)?;

        let blocks = self
            .source
            .stream_blocks(request.range)
            .await
            .map_err(|err| match err {
                crate::BlockSourceError::Transient(_) => WorkError::retryable(err),
                crate::BlockSourceError::Fatal(_) => WorkError::fatal(err),
            })?;

        debug!(
            module = %request.output_module,
            range = %request.range,
            blocks = blocks.len(),
            "executing job"
        );

        // The wasm loop is compute-bound; run it off the async threads.
        let module_name = request.output_module.clone();
        let entrypoint = module.entrypoint.clone();
        let max_log_bytes = self.max_log_bytes;
        let range = request.range;
        let delta = DeltaStore::new(&module.name, spec, base);
        let partial = tokio::task::spawn_blocking(move || {
            execute_blocks(
                &token,
                &wasm_module,
                &module_name,
                &entrypoint,
                &blocks,
                &readers,
                delta,
                max_log_bytes,
                &sink,
            )
            .map(|delta| delta.into_partial(range))
        })
        .await
        .map_err(|err| WorkError::fatal(anyhow!("job execution task failed: {err}")))??;

        let info = self
            .io
            .write_partial(&module_hash, &partial)
            .map_err(io_error)?;
        Ok(vec![info])
    }
}

/// Runs the entrypoint once per block, threading the delta store through
/// every call.
#[allow(clippy::too_many_arguments)]
fn execute_blocks(
    token: &CancellationToken,
    wasm_module: &WasmModule,
    module_name: &str,
    entrypoint: &str,
    blocks: &[Block],
    readers: &[Arc<dyn StoreRead>],
    mut delta: DeltaStore,
    max_log_bytes: u64,
    sink: &ResponseSink,
) -> Result<DeltaStore, WorkError> {
    for block in blocks {
        if token.is_cancelled() {
            return Err(WorkError::Canceled);
        }

        let mut arguments = vec![Argument::value("block", block.payload.clone())];
        for reader in readers {
            arguments.push(Argument::store_reader(reader.clone()));
        }
        arguments.push(Argument::store_writer(delta));

        let mut call = wasm_module
            .execute_new_call(module_name, entrypoint, arguments, max_log_bytes)
            .map_err(WorkError::fatal)?;

        delta = call
            .take_output_store()
            .ok_or_else(|| WorkError::fatal(anyhow!("call returned without its output store")))?;

        sink(JobProgress {
            module_name: module_name.to_owned(),
            last_block: block.number,
        });
    }
    Ok(delta)
}

fn io_error(err: StoreError) -> WorkError {
    match err {
        // Backend faults are the transient class; everything else is a
        // deterministic dead end.
        StoreError::Backend(_) => WorkError::retryable(err),
        other => WorkError::fatal(other),
    }
}
