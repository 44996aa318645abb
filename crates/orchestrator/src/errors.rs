use sluice_graph::GraphError;
use sluice_store::StoreError;
use thiserror::Error;

use crate::worker::WorkError;

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("process job result for module {module:?}: job ended in error: {source}")]
    JobFailed {
        module: String,
        #[source]
        source: WorkError,
    },

    #[error("process job result for module {module:?}: on job terminated: {source}")]
    OnJobTerminated { module: String, source: anyhow::Error },

    #[error("operation canceled")]
    Canceled,

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("no squash state for store {0:?}")]
    UnknownStore(String),
}
