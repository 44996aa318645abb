//! Segment file identity and naming.

use std::fmt;

use serde::{Deserialize, Serialize};
use sluice_primitives::BlockRange;

/// What a segment file holds.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum SegmentKind {
    /// Full state valid through the end block minus one.
    Snapshot,
    /// Deltas produced over the range.
    Partial,
}

/// Identity of one persisted segment file for a store module.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub module_hash: String,
    pub filename: String,
    pub kind: SegmentKind,
    pub range: BlockRange,
}

impl FileInfo {
    pub fn snapshot(module_hash: impl Into<String>, block: u64) -> Self {
        let module_hash = module_hash.into();
        Self {
            filename: snapshot_filename(&module_hash, block),
            module_hash,
            kind: SegmentKind::Snapshot,
            range: BlockRange::new(0, block),
        }
    }

    pub fn partial(module_hash: impl Into<String>, range: BlockRange) -> Self {
        let module_hash = module_hash.into();
        Self {
            filename: partial_filename(&module_hash, range),
            module_hash,
            kind: SegmentKind::Partial,
            range,
        }
    }
}

impl fmt::Display for FileInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.filename)
    }
}

/// `<hash>/<block>.kv`
pub fn snapshot_filename(module_hash: &str, block: u64) -> String {
    format!("{module_hash}/{block}.kv")
}

/// `<hash>/<start>-<end>.partial`
pub fn partial_filename(module_hash: &str, range: BlockRange) -> String {
    format!(
        "{module_hash}/{}-{}.partial",
        range.start_block(),
        range.exclusive_end_block()
    )
}
