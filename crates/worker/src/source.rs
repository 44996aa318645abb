//! Block stream seam.

use async_trait::async_trait;
use sluice_primitives::{Block, BlockRange};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlockSourceError {
    /// Infrastructure hiccup; the job may be retried.
    #[error("transient block source failure: {0}")]
    Transient(String),

    #[error("block source failure: {0}")]
    Fatal(String),
}

/// An ordered stream of immutable blocks.
#[async_trait]
pub trait BlockSource: Send + Sync {
    /// All blocks of `range`, ascending by height.
    async fn stream_blocks(&self, range: BlockRange) -> Result<Vec<Block>, BlockSourceError>;
}

/// Fixed block set served from memory, for tests and local runs.
pub struct MemBlockSource {
    blocks: Vec<Block>,
}

impl MemBlockSource {
    pub fn new(mut blocks: Vec<Block>) -> Self {
        blocks.sort_by_key(|b| b.number);
        Self { blocks }
    }

    /// Blocks `[0, count)` with the same payload each.
    pub fn with_uniform_payload(count: u64, payload: &[u8]) -> Self {
        Self::new(
            (0..count)
                .map(|number| Block::new(number, payload.to_vec()))
                .collect(),
        )
    }
}

#[async_trait]
impl BlockSource for MemBlockSource {
    async fn stream_blocks(&self, range: BlockRange) -> Result<Vec<Block>, BlockSourceError> {
        Ok(self
            .blocks
            .iter()
            .filter(|b| range.contains(b.number))
            .cloned()
            .collect())
    }
}
