//! Module compilation and single-shot call execution.

use tracing::debug;
use wasmtime::{Engine, Instance, Linker, Module, Store, Val};

use crate::args::Argument;
use crate::call::{Call, CallContext};
use crate::errors::{WasmError, WasmResult};
use crate::host;

/// Shared engine behind every compiled module.
#[derive(Clone, Default)]
pub struct WasmRuntime {
    engine: Engine,
}

impl WasmRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiles a module binary (or wat text, in tests).
    pub fn compile(&self, binary: &[u8]) -> WasmResult<WasmModule> {
        let module = Module::new(&self.engine, binary).map_err(WasmError::Compile)?;
        Ok(WasmModule {
            engine: self.engine.clone(),
            module,
        })
    }
}

/// A compiled module, instantiated fresh for every call.
#[derive(Clone)]
pub struct WasmModule {
    engine: Engine,
    module: Module,
}

impl WasmModule {
    /// Runs one entrypoint invocation against the given arguments.
    ///
    /// The instance and its linear memory live only for the duration of the
    /// call; the returned [`Call`] carries everything that outlives it.  A
    /// fatal host-side error takes precedence over whatever trap the guest
    /// surfaced.
    pub fn execute_new_call(
        &self,
        module_name: &str,
        entrypoint: &str,
        arguments: Vec<Argument>,
        max_log_bytes: u64,
    ) -> WasmResult<Call> {
        let mut ctx = CallContext::new(module_name, max_log_bytes);

        // Wire stores first; value bytes can only land once memory exists.
        enum Pending {
            Handle(u32),
            Value { name: String, value: Vec<u8> },
        }
        let mut pending = Vec::with_capacity(arguments.len());
        for argument in arguments {
            match argument {
                Argument::StoreWriter { store } => ctx.set_output(store),
                Argument::StoreReader { store } => {
                    pending.push(Pending::Handle(ctx.push_input(store)));
                }
                Argument::Value { name, value } => {
                    pending.push(Pending::Value { name, value });
                }
            }
        }

        let mut store = Store::new(&self.engine, ctx);
        let mut linker = Linker::new(&self.engine);
        host::register(&mut linker).map_err(|source| WasmError::Instantiate {
            module: module_name.to_owned(),
            source,
        })?;

        let instance =
            linker
                .instantiate(&mut store, &self.module)
                .map_err(|source| WasmError::Instantiate {
                    module: module_name.to_owned(),
                    source,
                })?;

        let func = instance.get_func(&mut store, entrypoint).ok_or_else(|| {
            WasmError::MissingEntrypoint {
                module: module_name.to_owned(),
                entrypoint: entrypoint.to_owned(),
            }
        })?;

        let mut params = Vec::new();
        for arg in pending {
            match arg {
                Pending::Handle(handle) => params.push(Val::I32(handle as i32)),
                Pending::Value { name, value } => {
                    let ptr = write_value(&mut store, &instance, module_name, &name, &value)?;
                    params.push(Val::I32(ptr as i32));
                    params.push(Val::I32(value.len() as i32));
                }
            }
        }

        debug!(module = %module_name, %entrypoint, args = params.len(), "invoking module call");
        let invoked = func.call(&mut store, &params, &mut []);

        let mut ctx = store.into_data();
        match invoked {
            Ok(()) => Ok(Call::from_context(ctx)),
            Err(trap) => {
                // A captured host error wins over the guest's own trap.
                if let Some(err) = ctx.take_fatal_error() {
                    return Err(err);
                }
                Err(WasmError::Execution {
                    module: module_name.to_owned(),
                    source: trap,
                })
            }
        }
    }
}

/// Copies one value argument into guest memory through the exported `alloc`,
/// returning the guest pointer.
fn write_value(
    store: &mut Store<CallContext>,
    instance: &Instance,
    module_name: &str,
    arg_name: &str,
    value: &[u8],
) -> WasmResult<u32> {
    let alloc = instance
        .get_typed_func::<u32, u32>(&mut *store, "alloc")
        .map_err(|_| WasmError::MissingAlloc {
            module: module_name.to_owned(),
        })?;

    let ptr = alloc
        .call(&mut *store, value.len() as u32)
        .map_err(|source| WasmError::ArgumentWrite {
            module: module_name.to_owned(),
            name: arg_name.to_owned(),
            source,
        })?;

    let memory = instance
        .get_memory(&mut *store, "memory")
        .ok_or_else(|| WasmError::MissingMemory {
            module: module_name.to_owned(),
        })?;
    memory
        .write(&mut *store, ptr as usize, value)
        .map_err(|source| WasmError::ArgumentWrite {
            module: module_name.to_owned(),
            name: arg_name.to_owned(),
            source: source.into(),
        })?;

    Ok(ptr)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sluice_primitives::{StoreSpec, UpdatePolicy, ValueType};
    use sluice_store::{DeltaStore, StoreState};

    use super::*;
    use crate::call::DEFAULT_MAX_LOG_BYTES;

    /// A module with a bump allocator and a data segment holding
    /// `total` (5 bytes at 0) and `7` (1 byte at 5).
    const ADDER_WAT: &str = r#"
        (module
          (import "state" "add_int64"
            (func $add_int64 (param i32 i32 i32 i32)))
          (memory (export "memory") 1)
          (global $heap (mut i32) (i32.const 1024))
          (data (i32.const 0) "total7")
          (func (export "alloc") (param i32) (result i32)
            (local i32)
            (local.set 1 (global.get $heap))
            (global.set $heap
              (i32.add (global.get $heap) (local.get 0)))
            (local.get 1))
          (func (export "run")
            (call $add_int64
              (i32.const 0) (i32.const 5)    ;; key "total"
              (i32.const 5) (i32.const 1)))  ;; value "7"
        )
    "#;

    /// Calls `set` with key "k" and the value argument it was given.
    const SETTER_WAT: &str = r#"
        (module
          (import "state" "set"
            (func $set (param i32 i32 i32 i32)))
          (memory (export "memory") 1)
          (global $heap (mut i32) (i32.const 1024))
          (data (i32.const 0) "k")
          (func (export "alloc") (param i32) (result i32)
            (local i32)
            (local.set 1 (global.get $heap))
            (global.set $heap
              (i32.add (global.get $heap) (local.get 0)))
            (local.get 1))
          (func (export "run") (param i32 i32)
            (call $set
              (i32.const 0) (i32.const 1)
              (local.get 0) (local.get 1)))
        )
    "#;

    /// Reads key "k" from input store 0 and mirrors it into its output store.
    const MIRROR_WAT: &str = r#"
        (module
          (import "state" "get_last"
            (func $get_last (param i32 i32 i32 i32) (result i32)))
          (import "state" "set"
            (func $set (param i32 i32 i32 i32)))
          (memory (export "memory") 1)
          (global $heap (mut i32) (i32.const 1024))
          (data (i32.const 0) "k")
          (func (export "alloc") (param i32) (result i32)
            (local i32)
            (local.set 1 (global.get $heap))
            (global.set $heap
              (i32.add (global.get $heap) (local.get 0)))
            (local.get 1))
          (func (export "run") (param i32)
            (if (i32.eqz
                  (call $get_last
                    (local.get 0)
                    (i32.const 0) (i32.const 1)   ;; key "k"
                    (i32.const 8)))               ;; out pair at 8
              (then (unreachable)))
            (call $set
              (i32.const 0) (i32.const 1)
              (i32.load (i32.const 8))            ;; value ptr
              (i32.load (i32.const 12))))         ;; value len
        )
    "#;

    /// Emits its value argument as the call's output.
    const ECHO_WAT: &str = r#"
        (module
          (import "env" "output" (func $output (param i32 i32)))
          (memory (export "memory") 1)
          (global $heap (mut i32) (i32.const 1024))
          (func (export "alloc") (param i32) (result i32)
            (local i32)
            (local.set 1 (global.get $heap))
            (global.set $heap
              (i32.add (global.get $heap) (local.get 0)))
            (local.get 1))
          (func (export "run") (param i32 i32)
            (call $output (local.get 0) (local.get 1)))
        )
    "#;

    /// Logs the value argument, twice.
    const LOGGER_WAT: &str = r#"
        (module
          (import "logger" "println" (func $println (param i32 i32)))
          (memory (export "memory") 1)
          (global $heap (mut i32) (i32.const 1024))
          (func (export "alloc") (param i32) (result i32)
            (local i32)
            (local.set 1 (global.get $heap))
            (global.set $heap
              (i32.add (global.get $heap) (local.get 0)))
            (local.get 1))
          (func (export "run") (param i32 i32)
            (call $println (local.get 0) (local.get 1))
            (call $println (local.get 0) (local.get 1)))
        )
    "#;

    fn make_writer(policy: UpdatePolicy, value_type: ValueType) -> DeltaStore {
        let spec = StoreSpec::new(policy, value_type);
        DeltaStore::new("out", spec, StoreState::new("out", spec))
    }

    fn compile(wat: &str) -> WasmModule {
        WasmRuntime::new().compile(wat.as_bytes()).unwrap()
    }

    #[test]
    fn test_add_int64_through_guest() {
        let module = compile(ADDER_WAT);
        let writer = make_writer(UpdatePolicy::Add, ValueType::Int64);

        let mut call = module
            .execute_new_call(
                "totals",
                "run",
                vec![Argument::store_writer(writer)],
                DEFAULT_MAX_LOG_BYTES,
            )
            .unwrap();

        let out = call.take_output_store().unwrap();
        assert_eq!(out.get_last("total"), Some(b"7".to_vec()));
        assert_eq!(call.execution_stack().len(), 1);
        assert!(call.execution_stack()[0].contains("add_int64"));
    }

    #[test]
    fn test_policy_violation_aborts_call() {
        // Store declared add/int64, guest calls plain `set`.
        let module = compile(SETTER_WAT);
        let writer = make_writer(UpdatePolicy::Add, ValueType::Int64);

        let err = module
            .execute_new_call(
                "totals",
                "run",
                vec![
                    Argument::value("payload", b"v".to_vec()),
                    Argument::store_writer(writer),
                ],
                DEFAULT_MAX_LOG_BYTES,
            )
            .unwrap_err();

        let text = err.to_string();
        assert!(text.contains(r#"invalid store operation "set""#), "{text}");
        assert!(text.contains(r#""totals""#), "{text}");
        assert!(matches!(err, WasmError::InvalidStoreOperation { .. }));
    }

    #[test]
    fn test_value_argument_lands_in_guest_memory() {
        let module = compile(SETTER_WAT);
        let writer = make_writer(UpdatePolicy::Set, ValueType::String);

        let mut call = module
            .execute_new_call(
                "setter",
                "run",
                vec![
                    Argument::value("payload", b"hello".to_vec()),
                    Argument::store_writer(writer),
                ],
                DEFAULT_MAX_LOG_BYTES,
            )
            .unwrap();

        let out = call.take_output_store().unwrap();
        assert_eq!(out.get_last("k"), Some(b"hello".to_vec()));
    }

    #[test]
    fn test_store_reader_handle_and_readback() {
        let spec = StoreSpec::new(UpdatePolicy::Set, ValueType::String);
        let mut upstream = DeltaStore::new("up", spec, StoreState::new("up", spec));
        upstream.set("k", b"mirrored".to_vec());
        let mut upstream_state = StoreState::new("up", spec);
        upstream_state
            .apply_partial(&upstream.into_partial(sluice_primitives::BlockRange::new(0, 10)))
            .unwrap();

        let module = compile(MIRROR_WAT);
        let writer = make_writer(UpdatePolicy::Set, ValueType::String);

        let mut call = module
            .execute_new_call(
                "mirror",
                "run",
                vec![
                    Argument::store_reader(Arc::new(upstream_state)),
                    Argument::store_writer(writer),
                ],
                DEFAULT_MAX_LOG_BYTES,
            )
            .unwrap();

        let out = call.take_output_store().unwrap();
        assert_eq!(out.get_last("k"), Some(b"mirrored".to_vec()));
        // One read trace plus one write trace.
        assert_eq!(call.execution_stack().len(), 2);
    }

    #[test]
    fn test_mapper_output_round_trips() {
        let module = compile(ECHO_WAT);
        let mut call = module
            .execute_new_call(
                "echo",
                "run",
                vec![Argument::value("payload", b"block-data".to_vec())],
                DEFAULT_MAX_LOG_BYTES,
            )
            .unwrap();
        assert_eq!(call.output(), Some(&b"block-data"[..]));
        // No writer was wired, so there is no store to hand back.
        assert!(call.take_output_store().is_none());
    }

    #[test]
    fn test_guest_logs_capped() {
        let module = compile(LOGGER_WAT);

        let call = module
            .execute_new_call(
                "chatty",
                "run",
                vec![Argument::value("line", vec![b'x'; 6])],
                10,
            )
            .unwrap();

        // Second println would blow the 10-byte budget.
        assert_eq!(call.logs().len(), 1);
        assert!(call.reached_logs_max_byte_count());
    }

    #[test]
    fn test_missing_entrypoint() {
        let module = compile(LOGGER_WAT);
        let err = module
            .execute_new_call("m", "not_there", vec![], DEFAULT_MAX_LOG_BYTES)
            .unwrap_err();
        assert!(matches!(err, WasmError::MissingEntrypoint { .. }));
    }
}
