//! Full-pipeline runs: plan, scheduler, local wasm workers, squasher.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use sluice_graph::ModuleGraph;
use sluice_orchestrator::{
    CompletionSink, OrchestratorConfig, Plan, ResponseSink, Scheduler, Squasher, WorkRequest,
    Worker, WorkerPool,
};
use sluice_primitives::{BlockRange, ModuleDef, UpdatePolicy, ValueType};
use sluice_store::{MemSegmentStore, SegmentIo, SnapshotCatalog, StoreRead, StoreState};
use sluice_worker::{LocalWorker, MemBlockSource};
use tokio_util::sync::CancellationToken;

/// Adds the block payload (ascii int64) into key "total" on every block.
const COUNTER_WAT: &str = r#"
    (module
      (import "state" "add_int64"
        (func $add_int64 (param i32 i32 i32 i32)))
      (memory (export "memory") 1)
      (global $heap (mut i32) (i32.const 1024))
      (data (i32.const 0) "total")
      (func (export "alloc") (param i32) (result i32)
        (local i32)
        (local.set 1 (global.get $heap))
        (global.set $heap
          (i32.add (global.get $heap) (local.get 0)))
        (local.get 1))
      (func (export "run") (param i32 i32)
        (call $add_int64
          (i32.const 0) (i32.const 5)
          (local.get 0) (local.get 1)))
    )
"#;

/// Copies key "total" of input store 0 into its own store under "seen".
const MIRROR_WAT: &str = r#"
    (module
      (import "state" "get_last"
        (func $get_last (param i32 i32 i32 i32) (result i32)))
      (import "state" "set"
        (func $set (param i32 i32 i32 i32)))
      (memory (export "memory") 1)
      (global $heap (mut i32) (i32.const 1024))
      (data (i32.const 0) "totalseen")
      (func (export "alloc") (param i32) (result i32)
        (local i32)
        (local.set 1 (global.get $heap))
        (global.set $heap
          (i32.add (global.get $heap) (local.get 0)))
        (local.get 1))
      (func (export "run") (param i32 i32 i32)
        (if (i32.eqz
              (call $get_last
                (local.get 2)
                (i32.const 0) (i32.const 5)   ;; key "total"
                (i32.const 16)))              ;; out pair at 16
          (then (return)))
        (call $set
          (i32.const 5) (i32.const 4)         ;; key "seen"
          (i32.load (i32.const 16))
          (i32.load (i32.const 20))))
    )
"#;

fn make_counter_module(name: &str) -> ModuleDef {
    ModuleDef::store(name, UpdatePolicy::Add, ValueType::Int64)
        .with_binary(COUNTER_WAT.as_bytes().to_vec())
}

fn make_mirror_module(name: &str, input: &str) -> ModuleDef {
    ModuleDef::store(name, UpdatePolicy::Set, ValueType::String)
        .with_inputs([input])
        .with_binary(MIRROR_WAT.as_bytes().to_vec())
}

fn noop_sink() -> ResponseSink {
    Arc::new(|_| {})
}

fn make_config() -> OrchestratorConfig {
    OrchestratorConfig {
        save_interval: 10,
        worker_pool_size: 2,
        ready_poll_interval: Duration::from_millis(10),
        ..OrchestratorConfig::default()
    }
}

struct Pipeline {
    scheduler: Arc<Scheduler>,
    pool: Arc<WorkerPool>,
    io: Arc<MemSegmentStore>,
    completions: Arc<Mutex<Vec<(String, u64)>>>,
}

fn make_pipeline(modules: Vec<ModuleDef>, output: &str, range: BlockRange) -> Pipeline {
    let graph = ModuleGraph::new(modules.clone()).unwrap();
    let io = Arc::new(MemSegmentStore::new());
    let config = make_config();

    let plan =
        Arc::new(Plan::build(&graph, output, range, config.save_interval, io.as_ref()).unwrap());

    let completions = Arc::new(Mutex::new(Vec::new()));
    let sink: CompletionSink = {
        let plan = plan.clone();
        let completions = completions.clone();
        Arc::new(move |store: &str, block: u64| {
            completions.lock().unwrap().push((store.to_owned(), block));
            plan.mark_dependency_complete(store, block);
        })
    };
    let squasher = Arc::new(Squasher::new(&graph, output, io.clone(), sink).unwrap());

    let source = Arc::new(MemBlockSource::with_uniform_payload(
        range.exclusive_end_block(),
        b"1",
    ));
    let pool = Arc::new(WorkerPool::new(LocalWorker::spawn_many(
        config.worker_pool_size,
        source,
        io.clone(),
        config.max_log_bytes,
    )));

    let scheduler = Arc::new(Scheduler::new(
        config,
        plan,
        Arc::new(modules),
        noop_sink(),
        squasher,
    ));

    Pipeline {
        scheduler,
        pool,
        io,
        completions,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_backfill_single_store() {
    let modules = vec![make_counter_module("totals")];
    let graph = ModuleGraph::new(modules.clone()).unwrap();
    let hash = graph.module_hash("totals").unwrap().to_owned();

    let pipeline = make_pipeline(modules, "totals", BlockRange::new(0, 20));
    pipeline
        .scheduler
        .clone()
        .schedule(CancellationToken::new(), pipeline.pool.clone())
        .await
        .unwrap();

    assert_eq!(pipeline.io.snapshot_blocks(&hash).unwrap(), vec![10, 20]);
    assert_eq!(pipeline.io.partial_count(&hash), 0);
    assert_eq!(
        *pipeline.completions.lock().unwrap(),
        vec![("totals".to_owned(), 10), ("totals".to_owned(), 20)]
    );

    // One "1" added per block.
    let mid = load_snapshot(&pipeline.io, &hash, 10);
    assert_eq!(mid.get("total"), Some(b"10".to_vec()));
    let end = load_snapshot(&pipeline.io, &hash, 20);
    assert_eq!(end.get("total"), Some(b"20".to_vec()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_backfill_dependent_store_reads_upstream_snapshot() {
    let modules = vec![
        make_counter_module("totals"),
        make_mirror_module("mirror", "totals"),
    ];
    let graph = ModuleGraph::new(modules.clone()).unwrap();
    let totals_hash = graph.module_hash("totals").unwrap().to_owned();
    let mirror_hash = graph.module_hash("mirror").unwrap().to_owned();

    let pipeline = make_pipeline(modules, "mirror", BlockRange::new(0, 20));
    pipeline
        .scheduler
        .clone()
        .schedule(CancellationToken::new(), pipeline.pool.clone())
        .await
        .unwrap();

    assert_eq!(
        pipeline.io.snapshot_blocks(&totals_hash).unwrap(),
        vec![10, 20]
    );
    assert_eq!(
        pipeline.io.snapshot_blocks(&mirror_hash).unwrap(),
        vec![10, 20]
    );

    // The mirror segment [0,10) read totals' snapshot at its end block.
    let mirror_mid = load_snapshot(&pipeline.io, &mirror_hash, 10);
    assert_eq!(mirror_mid.get("seen"), Some(b"10".to_vec()));
    let mirror_end = load_snapshot(&pipeline.io, &mirror_hash, 20);
    assert_eq!(mirror_end.get("seen"), Some(b"20".to_vec()));
}

fn load_snapshot(io: &MemSegmentStore, hash: &str, block: u64) -> StoreState {
    io.load_snapshot(hash, block).unwrap().unwrap()
}

/// The runner rejects jobs whose output module is a mapper.
#[tokio::test]
async fn test_runner_rejects_mapper_jobs() {
    let modules = vec![ModuleDef::mapper("map_out")];
    let io = Arc::new(MemSegmentStore::new());
    let source = Arc::new(MemBlockSource::with_uniform_payload(10, b"1"));
    let worker = LocalWorker::new("local-0", source, io, 1024);

    let request = WorkRequest {
        output_module: "map_out".to_owned(),
        range: BlockRange::new(0, 10),
        modules: Arc::new(modules),
    };
    let err = worker
        .work(CancellationToken::new(), request, noop_sink())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not a store"), "{err}");
}
