use sluice_primitives::{BlockRange, ValueType};
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid {value_type} value {value:?}")]
    InvalidValue { value_type: ValueType, value: String },

    #[error("operation {op:?} not supported for value type {value_type}")]
    UnsupportedValueType {
        op: &'static str,
        value_type: ValueType,
    },

    #[error("missing snapshot for module {module_hash} at block {block}")]
    MissingSnapshot { module_hash: String, block: u64 },

    #[error("missing partial for module {module_hash} over {range}")]
    MissingPartial {
        module_hash: String,
        range: BlockRange,
    },

    #[error("store backend error: {0}")]
    Backend(String),
}
