//! Host functions exposed to guest modules.
//!
//! Registered fresh on a `Linker<CallContext>` per call; each function pulls
//! the owning call out of the store data, never out of globals.

use anyhow::{anyhow, Result};
use sluice_primitives::{UpdatePolicy, ValueType};
use wasmtime::{Caller, Extern, Linker, Memory};

use crate::call::CallContext;
use crate::errors::WasmError;

/// Registers the `state`, `logger` and `env` host modules.
pub(crate) fn register(linker: &mut Linker<CallContext>) -> Result<()> {
    register_logger(linker)?;
    register_env(linker)?;
    register_state_writes(linker)?;
    register_state_reads(linker)?;
    Ok(())
}

fn register_logger(linker: &mut Linker<CallContext>) -> Result<()> {
    linker.func_wrap(
        "logger",
        "println",
        |mut caller: Caller<'_, CallContext>, ptr: u32, len: u32| -> Result<()> {
            let message = read_string(&mut caller, ptr, len)?;
            caller.data_mut().append_log(message);
            Ok(())
        },
    )?;
    Ok(())
}

fn register_env(linker: &mut Linker<CallContext>) -> Result<()> {
    linker.func_wrap(
        "env",
        "output",
        |mut caller: Caller<'_, CallContext>, ptr: u32, len: u32| -> Result<()> {
            let value = read_bytes(&mut caller, ptr, len)?;
            caller.data_mut().set_return_value(value);
            Ok(())
        },
    )?;
    Ok(())
}

/// Declarative write-op table: host name, required policy, optional required
/// value type, and the mutation itself.
fn register_state_writes(linker: &mut Linker<CallContext>) -> Result<()> {
    write_op(linker, "set", UpdatePolicy::Set, None, |store, key, value| {
        store.set(key, value);
        Ok(())
    })?;
    write_op(
        linker,
        "set_if_not_exists",
        UpdatePolicy::SetIfNotExists,
        None,
        |store, key, value| {
            store.set_if_not_exists(key, &value);
            Ok(())
        },
    )?;
    write_op(
        linker,
        "append",
        UpdatePolicy::Append,
        None,
        |store, key, value| {
            store.append(key, &value);
            Ok(())
        },
    )?;

    for (name, value_type) in [
        ("add_bigint", ValueType::BigInt),
        ("add_bigdecimal", ValueType::BigDecimal),
        ("add_int64", ValueType::Int64),
        ("add_float64", ValueType::Float64),
    ] {
        write_op(linker, name, UpdatePolicy::Add, Some(value_type), |store, key, value| {
            store.add(key, &value)
        })?;
    }

    for (name, value_type) in [
        ("set_min_int64", ValueType::Int64),
        ("set_min_bigint", ValueType::BigInt),
        ("set_min_float64", ValueType::Float64),
        ("set_min_bigdecimal", ValueType::BigDecimal),
    ] {
        write_op(linker, name, UpdatePolicy::Min, Some(value_type), |store, key, value| {
            store.set_min(key, &value)
        })?;
    }

    for (name, value_type) in [
        ("set_max_int64", ValueType::Int64),
        ("set_max_bigint", ValueType::BigInt),
        ("set_max_float64", ValueType::Float64),
        ("set_max_bigdecimal", ValueType::BigDecimal),
    ] {
        write_op(linker, name, UpdatePolicy::Max, Some(value_type), |store, key, value| {
            store.set_max(key, &value)
        })?;
    }

    Ok(())
}

fn write_op(
    linker: &mut Linker<CallContext>,
    name: &'static str,
    required: UpdatePolicy,
    value_type: Option<ValueType>,
    apply: impl Fn(&mut sluice_store::DeltaStore, &str, Vec<u8>) -> sluice_store::StoreResult<()>
        + Send
        + Sync
        + 'static,
) -> Result<()> {
    linker.func_wrap(
        "state",
        name,
        move |mut caller: Caller<'_, CallContext>,
              key_ptr: u32,
              key_len: u32,
              val_ptr: u32,
              val_len: u32|
              -> Result<()> {
            let key = read_string(&mut caller, key_ptr, key_len)?;
            let value = read_bytes(&mut caller, val_ptr, val_len)?;

            let ctx = caller.data_mut();
            match value_type {
                Some(vt) => ctx.validate_with_value_type(name, required, vt, &key)?,
                None => ctx.validate_simple(name, required, &key)?,
            }
            if let Err(err) = apply(ctx.output_store()?, &key, value) {
                let module = ctx.module_name().to_owned();
                return Err(ctx.fail(WasmError::StoreValue {
                    module,
                    source: err,
                }));
            }
            Ok(())
        },
    )?;
    Ok(())
}

fn register_state_reads(linker: &mut Linker<CallContext>) -> Result<()> {
    read_op(linker, "get_first")?;
    read_op(linker, "get_last")?;

    // Ordinal-addressed variant; backfill inputs are segment snapshots,
    // which hold a single version per key.
    linker.func_wrap(
        "state",
        "get_at",
        |mut caller: Caller<'_, CallContext>,
         store_index: u32,
         _ordinal: u64,
         key_ptr: u32,
         key_len: u32,
         output_ptr: u32|
         -> Result<u32> {
            lookup(&mut caller, "get_at", store_index, key_ptr, key_len, output_ptr)
        },
    )?;
    Ok(())
}

fn read_op(linker: &mut Linker<CallContext>, name: &'static str) -> Result<()> {
    linker.func_wrap(
        "state",
        name,
        move |mut caller: Caller<'_, CallContext>,
              store_index: u32,
              key_ptr: u32,
              key_len: u32,
              output_ptr: u32|
              -> Result<u32> {
            lookup(&mut caller, name, store_index, key_ptr, key_len, output_ptr)
        },
    )?;
    Ok(())
}

/// Shared body of the read ops: resolve the handle, fetch the value, and on
/// a hit write an allocated `(ptr, len)` little-endian pair at `output_ptr`.
/// Returns 1 on hit, 0 on miss.
fn lookup(
    caller: &mut Caller<'_, CallContext>,
    op: &'static str,
    store_index: u32,
    key_ptr: u32,
    key_len: u32,
    output_ptr: u32,
) -> Result<u32> {
    let key = read_string(caller, key_ptr, key_len)?;
    let index = store_index as usize;

    let Some(reader) = caller.data().input_store(index) else {
        let module = caller.data().module_name().to_owned();
        return Err(caller
            .data_mut()
            .fail(WasmError::UnknownStoreIndex { module, index }));
    };

    let found = reader.get(&key);
    caller
        .data_mut()
        .trace_state_read(op, index, found.is_some(), &key);

    let Some(value) = found else {
        return Ok(0);
    };

    let ptr = write_to_heap(caller, &value)?;
    let mut pair = [0u8; 8];
    pair[..4].copy_from_slice(&ptr.to_le_bytes());
    pair[4..].copy_from_slice(&(value.len() as u32).to_le_bytes());

    let memory = guest_memory(caller)?;
    memory.write(&mut *caller, output_ptr as usize, &pair)?;
    Ok(1)
}

fn guest_memory(caller: &mut Caller<'_, CallContext>) -> Result<Memory> {
    match caller.get_export("memory") {
        Some(Extern::Memory(memory)) => Ok(memory),
        _ => Err(anyhow!(
            "module {:?} exports no linear memory",
            caller.data().module_name()
        )),
    }
}

fn read_bytes(caller: &mut Caller<'_, CallContext>, ptr: u32, len: u32) -> Result<Vec<u8>> {
    let memory = guest_memory(caller)?;
    let mut buf = vec![0u8; len as usize];
    memory.read(&mut *caller, ptr as usize, &mut buf)?;
    Ok(buf)
}

fn read_string(caller: &mut Caller<'_, CallContext>, ptr: u32, len: u32) -> Result<String> {
    let bytes = read_bytes(caller, ptr, len)?;
    String::from_utf8(bytes).map_err(|_| anyhow!("guest passed invalid utf-8"))
}

/// Copies bytes into guest memory through the module's exported allocator.
pub(crate) fn write_to_heap(caller: &mut Caller<'_, CallContext>, bytes: &[u8]) -> Result<u32> {
    let Some(Extern::Func(alloc)) = caller.get_export("alloc") else {
        let module = caller.data().module_name().to_owned();
        return Err(caller.data_mut().fail(WasmError::MissingAlloc { module }));
    };
    let alloc = alloc.typed::<u32, u32>(&*caller)?;
    let ptr = alloc.call(&mut *caller, bytes.len() as u32)?;

    let memory = guest_memory(caller)?;
    memory.write(&mut *caller, ptr as usize, bytes)?;
    Ok(ptr)
}
