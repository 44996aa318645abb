//! Block payloads as seen by the pipeline.

use serde::{Deserialize, Serialize};

/// One immutable block handed to module execution.
///
/// The pipeline does not interpret the payload; it is copied verbatim into
/// guest memory as the first argument of every module call.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub number: u64,
    pub payload: Vec<u8>,
}

impl Block {
    pub fn new(number: u64, payload: Vec<u8>) -> Self {
        Self { number, payload }
    }
}
