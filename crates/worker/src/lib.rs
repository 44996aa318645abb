//! # sluice-worker
//!
//! The in-process realization of the worker contract: executes one
//! partial-range job by streaming blocks through the module's wasm
//! entrypoint and writing the resulting partial store file.

mod runner;
mod source;

pub use runner::LocalWorker;
pub use source::{BlockSource, BlockSourceError, MemBlockSource};
