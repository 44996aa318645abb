//! Persistence seams for store segments.
//!
//! The physical backend (object store, local disk, ...) lives behind these
//! traits; the orchestration core only ever sees snapshots and partials by
//! module hash.

use sluice_primitives::BlockRange;

use crate::delta::PartialSegment;
use crate::errors::StoreResult;
use crate::file::FileInfo;
use crate::state::StoreState;

/// Read-only view of which consolidated snapshots exist.
pub trait SnapshotCatalog: Send + Sync {
    /// Blocks with a consolidated snapshot for the module hash, ascending.
    fn snapshot_blocks(&self, module_hash: &str) -> StoreResult<Vec<u64>>;

    fn has_snapshot(&self, module_hash: &str, block: u64) -> StoreResult<bool> {
        Ok(self.snapshot_blocks(module_hash)?.contains(&block))
    }
}

/// Full segment-file access for workers and the squasher.
pub trait SegmentIo: SnapshotCatalog {
    fn load_snapshot(&self, module_hash: &str, block: u64) -> StoreResult<Option<StoreState>>;

    fn write_snapshot(
        &self,
        module_hash: &str,
        block: u64,
        state: &StoreState,
    ) -> StoreResult<FileInfo>;

    fn load_partial(
        &self,
        module_hash: &str,
        range: BlockRange,
    ) -> StoreResult<Option<PartialSegment>>;

    fn write_partial(&self, module_hash: &str, partial: &PartialSegment) -> StoreResult<FileInfo>;

    /// Removes a partial that has been squashed into a snapshot.  Deleting a
    /// missing partial is not an error.
    fn delete_partial(&self, module_hash: &str, range: BlockRange) -> StoreResult<()>;
}
