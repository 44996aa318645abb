//! In-memory segment store, used by tests and single-process runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use sluice_primitives::BlockRange;

use crate::delta::PartialSegment;
use crate::errors::StoreResult;
use crate::file::FileInfo;
use crate::state::StoreState;
use crate::traits::{SegmentIo, SnapshotCatalog};

#[derive(Debug, Default)]
struct ModuleFiles {
    snapshots: BTreeMap<u64, StoreState>,
    partials: BTreeMap<(u64, u64), PartialSegment>,
}

/// Keeps every segment file in process memory.
#[derive(Debug, Default)]
pub struct MemSegmentStore {
    inner: Mutex<HashMap<String, ModuleFiles>>,
}

impl MemSegmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a snapshot, for setting up pre-cached state.
    pub fn put_snapshot(&self, module_hash: &str, block: u64, state: StoreState) {
        let mut inner = self.inner.lock().expect("mem store poisoned");
        inner
            .entry(module_hash.to_owned())
            .or_default()
            .snapshots
            .insert(block, state);
    }

    pub fn partial_count(&self, module_hash: &str) -> usize {
        let inner = self.inner.lock().expect("mem store poisoned");
        inner
            .get(module_hash)
            .map(|f| f.partials.len())
            .unwrap_or(0)
    }
}

impl SnapshotCatalog for MemSegmentStore {
    fn snapshot_blocks(&self, module_hash: &str) -> StoreResult<Vec<u64>> {
        let inner = self.inner.lock().expect("mem store poisoned");
        Ok(inner
            .get(module_hash)
            .map(|f| f.snapshots.keys().copied().collect())
            .unwrap_or_default())
    }
}

impl SegmentIo for MemSegmentStore {
    fn load_snapshot(&self, module_hash: &str, block: u64) -> StoreResult<Option<StoreState>> {
        let inner = self.inner.lock().expect("mem store poisoned");
        Ok(inner
            .get(module_hash)
            .and_then(|f| f.snapshots.get(&block))
            .cloned())
    }

    fn write_snapshot(
        &self,
        module_hash: &str,
        block: u64,
        state: &StoreState,
    ) -> StoreResult<FileInfo> {
        let mut inner = self.inner.lock().expect("mem store poisoned");
        inner
            .entry(module_hash.to_owned())
            .or_default()
            .snapshots
            .insert(block, state.clone());
        Ok(FileInfo::snapshot(module_hash, block))
    }

    fn load_partial(
        &self,
        module_hash: &str,
        range: BlockRange,
    ) -> StoreResult<Option<PartialSegment>> {
        let inner = self.inner.lock().expect("mem store poisoned");
        Ok(inner
            .get(module_hash)
            .and_then(|f| {
                f.partials
                    .get(&(range.start_block(), range.exclusive_end_block()))
            })
            .cloned())
    }

    fn write_partial(&self, module_hash: &str, partial: &PartialSegment) -> StoreResult<FileInfo> {
        let range = partial.range();
        let mut inner = self.inner.lock().expect("mem store poisoned");
        inner
            .entry(module_hash.to_owned())
            .or_default()
            .partials
            .insert(
                (range.start_block(), range.exclusive_end_block()),
                partial.clone(),
            );
        Ok(FileInfo::partial(module_hash, range))
    }

    fn delete_partial(&self, module_hash: &str, range: BlockRange) -> StoreResult<()> {
        let mut inner = self.inner.lock().expect("mem store poisoned");
        if let Some(files) = inner.get_mut(module_hash) {
            files
                .partials
                .remove(&(range.start_block(), range.exclusive_end_block()));
        }
        Ok(())
    }
}
