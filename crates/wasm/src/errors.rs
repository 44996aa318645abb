use sluice_store::StoreError;
use thiserror::Error;

pub type WasmResult<T> = Result<T, WasmError>;

#[derive(Debug, Error)]
pub enum WasmError {
    #[error("could not compile wasm module: {0}")]
    Compile(anyhow::Error),

    #[error("could not instantiate wasm module for {module:?}: {source}")]
    Instantiate {
        module: String,
        source: anyhow::Error,
    },

    #[error("could not find entrypoint function {entrypoint:?} for module {module:?}")]
    MissingEntrypoint { module: String, entrypoint: String },

    #[error("module {module:?} exports no alloc function")]
    MissingAlloc { module: String },

    #[error("module {module:?} exports no linear memory")]
    MissingMemory { module: String },

    #[error("writing argument {name:?} for module {module:?}: {source}")]
    ArgumentWrite {
        module: String,
        name: String,
        source: anyhow::Error,
    },

    #[error("module {module:?}: invalid store operation {op:?}, only valid for stores with {expectation}")]
    InvalidStoreOperation {
        module: String,
        op: String,
        expectation: String,
    },

    #[error("module {module:?}: unknown store handle {index}")]
    UnknownStoreIndex { module: String, index: usize },

    #[error("module {module:?}: no writable output store")]
    NoOutputStore { module: String },

    #[error("module {module:?}: {source}")]
    StoreValue {
        module: String,
        #[source]
        source: StoreError,
    },

    #[error("executing module {module:?}: {source}")]
    Execution {
        module: String,
        source: anyhow::Error,
    },
}
