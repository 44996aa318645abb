use thiserror::Error;

pub type GraphResult<T> = Result<T, GraphError>;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("duplicate module name {0:?}")]
    DuplicateModule(String),

    #[error("module {module:?} references unknown input {input:?}")]
    UnknownInput { module: String, input: String },

    #[error("unknown module {0:?}")]
    UnknownModule(String),

    #[error("dependency cycle involving module {0:?}")]
    Cycle(String),
}
