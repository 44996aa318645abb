//! # sluice-graph
//!
//! The validated module DAG behind a request: name resolution, topological
//! ordering, reachability from the requested output module, and the content
//! hashes that key the snapshot cache.

mod errors;
mod graph;
mod hash;

pub use errors::{GraphError, GraphResult};
pub use graph::ModuleGraph;
