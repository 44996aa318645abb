//! # sluice-wasm
//!
//! The contract-checked call protocol between untrusted user modules and the
//! pipeline's typed stores.  Every execution instantiates a fresh module
//! instance whose host functions reach their own [`Call`] through the
//! wasmtime store data, so concurrent executions never observe each other.

mod args;
mod call;
mod errors;
mod host;
mod runtime;

pub use args::Argument;
pub use call::{Call, DEFAULT_MAX_LOG_BYTES};
pub use errors::{WasmError, WasmResult};
pub use runtime::{WasmModule, WasmRuntime};
