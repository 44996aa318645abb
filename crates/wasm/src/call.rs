//! Per-call execution context and its result carrier.

use std::sync::Arc;

use sluice_primitives::{UpdatePolicy, ValueType};
use sluice_store::{DeltaStore, StoreRead};

use crate::errors::WasmError;

/// Hard cap on accumulated guest log bytes.
pub const DEFAULT_MAX_LOG_BYTES: u64 = 128 * 1024;

/// Mutable state of one in-flight module call.
///
/// Lives as the wasmtime store data, so every host function resolves the
/// execution it belongs to without any process-wide state.
pub(crate) struct CallContext {
    module_name: String,
    update_policy: Option<UpdatePolicy>,
    value_type: Option<ValueType>,
    output: Option<DeltaStore>,
    inputs: Vec<Arc<dyn StoreRead>>,
    logs: Vec<String>,
    logs_byte_count: u64,
    max_log_bytes: u64,
    execution_stack: Vec<String>,
    fatal_error: Option<WasmError>,
    return_value: Option<Vec<u8>>,
}

impl CallContext {
    pub(crate) fn new(module_name: impl Into<String>, max_log_bytes: u64) -> Self {
        Self {
            module_name: module_name.into(),
            update_policy: None,
            value_type: None,
            output: None,
            inputs: Vec::new(),
            logs: Vec::new(),
            logs_byte_count: 0,
            max_log_bytes,
            execution_stack: Vec::new(),
            fatal_error: None,
            return_value: None,
        }
    }

    pub(crate) fn module_name(&self) -> &str {
        &self.module_name
    }

    pub(crate) fn set_output(&mut self, store: DeltaStore) {
        self.update_policy = Some(store.spec().update_policy);
        self.value_type = Some(store.spec().value_type);
        self.output = Some(store);
    }

    /// Registers an input store, returning its guest-visible handle.
    pub(crate) fn push_input(&mut self, store: Arc<dyn StoreRead>) -> u32 {
        self.inputs.push(store);
        (self.inputs.len() - 1) as u32
    }

    pub(crate) fn input_store(&self, index: usize) -> Option<Arc<dyn StoreRead>> {
        self.inputs.get(index).cloned()
    }

    pub(crate) fn output_store(&mut self) -> Result<&mut DeltaStore, anyhow::Error> {
        if self.output.is_none() {
            return Err(self.fail(WasmError::NoOutputStore {
                module: self.module_name.clone(),
            }));
        }
        Ok(self.output.as_mut().expect("just checked"))
    }

    pub(crate) fn set_return_value(&mut self, value: Vec<u8>) {
        self.return_value = Some(value);
    }

    /// Records a fatal host-side error and hands back a trap for the guest.
    /// Only the first fatal error is kept.
    pub(crate) fn fail(&mut self, err: WasmError) -> anyhow::Error {
        let trap = anyhow::anyhow!("{err}");
        if self.fatal_error.is_none() {
            self.fatal_error = Some(err);
        }
        trap
    }

    pub(crate) fn take_fatal_error(&mut self) -> Option<WasmError> {
        self.fatal_error.take()
    }

    pub(crate) fn append_log(&mut self, message: String) {
        if self.reached_logs_max_byte_count() {
            return;
        }
        let size = message.len() as u64;
        if self.logs_byte_count + size > self.max_log_bytes {
            // Cap reached, drop this and everything after it.
            self.logs_byte_count = self.max_log_bytes;
            return;
        }
        self.logs_byte_count += size;
        self.logs.push(message);
    }

    pub(crate) fn reached_logs_max_byte_count(&self) -> bool {
        self.logs_byte_count >= self.max_log_bytes
    }

    pub(crate) fn validate_simple(
        &mut self,
        op: &'static str,
        required: UpdatePolicy,
        key: &str,
    ) -> Result<(), anyhow::Error> {
        if self.update_policy != Some(required) {
            return Err(self.invalid_store_operation(
                op,
                format!("updatePolicy == {:?}", required.as_str()),
            ));
        }
        self.trace_state_write(op, key);
        Ok(())
    }

    pub(crate) fn validate_with_value_type(
        &mut self,
        op: &'static str,
        required: UpdatePolicy,
        value_type: ValueType,
        key: &str,
    ) -> Result<(), anyhow::Error> {
        if self.update_policy != Some(required) || self.value_type != Some(value_type) {
            return Err(self.invalid_store_operation(
                op,
                format!(
                    "updatePolicy == {:?} and valueType == {:?}",
                    required.as_str(),
                    value_type.as_str()
                ),
            ));
        }
        self.trace_state_write(op, key);
        Ok(())
    }

    fn invalid_store_operation(&mut self, op: &str, expectation: String) -> anyhow::Error {
        self.fail(WasmError::InvalidStoreOperation {
            module: self.module_name.clone(),
            op: op.to_owned(),
            expectation,
        })
    }

    fn trace_state_write(&mut self, op: &str, key: &str) {
        let store = self
            .output
            .as_ref()
            .map(|s| s.name().to_owned())
            .unwrap_or_default();
        self.execution_stack
            .push(format!("{store}::{op} key: {key:?}"));
    }

    pub(crate) fn trace_state_read(&mut self, op: &str, index: usize, found: bool, key: &str) {
        let store = self
            .inputs
            .get(index)
            .map(|s| s.name().to_owned())
            .unwrap_or_default();
        self.execution_stack
            .push(format!("{store}::{op} key: {key:?}, found: {found}"));
    }
}

/// The completed record of one module call.
///
/// Survives the guest instance, which is torn down as soon as execution
/// finishes.
#[derive(Debug)]
pub struct Call {
    module_name: String,
    logs: Vec<String>,
    logs_byte_count: u64,
    max_log_bytes: u64,
    execution_stack: Vec<String>,
    return_value: Option<Vec<u8>>,
    output: Option<DeltaStore>,
}

impl Call {
    pub(crate) fn from_context(ctx: CallContext) -> Self {
        Self {
            module_name: ctx.module_name,
            logs: ctx.logs,
            logs_byte_count: ctx.logs_byte_count,
            max_log_bytes: ctx.max_log_bytes,
            execution_stack: ctx.execution_stack,
            return_value: ctx.return_value,
            output: ctx.output,
        }
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// Guest log lines, capped at the configured byte budget.
    pub fn logs(&self) -> &[String] {
        &self.logs
    }

    pub fn logs_byte_count(&self) -> u64 {
        self.logs_byte_count
    }

    pub fn reached_logs_max_byte_count(&self) -> bool {
        self.logs_byte_count >= self.max_log_bytes
    }

    /// Trace of store operations the guest performed, in order.
    pub fn execution_stack(&self) -> &[String] {
        &self.execution_stack
    }

    /// Bytes the guest emitted through the output host call, if any.
    pub fn output(&self) -> Option<&[u8]> {
        self.return_value.as_deref()
    }

    /// Hands back the designated output store with everything the call wrote.
    pub fn take_output_store(&mut self) -> Option<DeltaStore> {
        self.output.take()
    }
}
