//! Per-segment delta accumulation during module execution.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sluice_primitives::{BlockRange, StoreSpec};

use crate::errors::StoreResult;
use crate::state::StoreState;
use crate::value;

/// The deltas a store module produced over one save-aligned segment, keyed
/// per store key and already folded under the store's update policy.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PartialSegment {
    range: BlockRange,
    kv: HashMap<String, Vec<u8>>,
}

impl PartialSegment {
    pub fn range(&self) -> BlockRange {
        self.range
    }

    pub fn kv(&self) -> &HashMap<String, Vec<u8>> {
        &self.kv
    }

    pub fn len(&self) -> usize {
        self.kv.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kv.is_empty()
    }
}

/// Writable view of a store during execution of one partial-range job.
///
/// Keeps two maps in lockstep: the effective state (starting snapshot plus
/// everything written so far, what reads observe) and the delta set (only
/// what this segment contributed, what ends up in the partial file).
#[derive(Debug)]
pub struct DeltaStore {
    name: String,
    spec: StoreSpec,
    effective: HashMap<String, Vec<u8>>,
    deltas: HashMap<String, Vec<u8>>,
}

impl DeltaStore {
    /// Starts from the snapshot loaded at the segment's start block.
    pub fn new(name: impl Into<String>, spec: StoreSpec, base: StoreState) -> Self {
        Self {
            name: name.into(),
            spec,
            effective: base.into_kv(),
            deltas: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spec(&self) -> &StoreSpec {
        &self.spec
    }

    /// Latest effective value for a key.
    pub fn get_last(&self, key: &str) -> Option<Vec<u8>> {
        self.effective.get(key).cloned()
    }

    pub fn set(&mut self, key: &str, value: Vec<u8>) {
        self.effective.insert(key.to_owned(), value.clone());
        self.deltas.insert(key.to_owned(), value);
    }

    pub fn set_if_not_exists(&mut self, key: &str, value: &[u8]) {
        if self.effective.contains_key(key) {
            return;
        }
        self.effective.insert(key.to_owned(), value.to_vec());
        self.deltas.insert(key.to_owned(), value.to_vec());
    }

    pub fn append(&mut self, key: &str, value: &[u8]) {
        self.effective
            .entry(key.to_owned())
            .or_default()
            .extend_from_slice(value);
        self.deltas
            .entry(key.to_owned())
            .or_default()
            .extend_from_slice(value);
    }

    pub fn add(&mut self, key: &str, value: &[u8]) -> StoreResult<()> {
        let value_type = self.spec.value_type;
        value::validate(value_type, value)?;

        let merged = match self.effective.get(key) {
            Some(old) => value::add(value_type, old, value)?,
            None => value.to_vec(),
        };
        self.effective.insert(key.to_owned(), merged);

        let delta = match self.deltas.get(key) {
            Some(old) => value::add(value_type, old, value)?,
            None => value.to_vec(),
        };
        self.deltas.insert(key.to_owned(), delta);
        Ok(())
    }

    pub fn set_min(&mut self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.fold(key, value, value::min_of)
    }

    pub fn set_max(&mut self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.fold(key, value, value::max_of)
    }

    fn fold(
        &mut self,
        key: &str,
        value: &[u8],
        pick: impl Fn(sluice_primitives::ValueType, &[u8], &[u8]) -> StoreResult<Vec<u8>>,
    ) -> StoreResult<()> {
        let value_type = self.spec.value_type;
        value::validate(value_type, value)?;

        let merged = match self.effective.get(key) {
            Some(old) => pick(value_type, old, value)?,
            None => value.to_vec(),
        };
        self.effective.insert(key.to_owned(), merged);

        let delta = match self.deltas.get(key) {
            Some(old) => pick(value_type, old, value)?,
            None => value.to_vec(),
        };
        self.deltas.insert(key.to_owned(), delta);
        Ok(())
    }

    pub fn delta_count(&self) -> usize {
        self.deltas.len()
    }

    /// Finishes the segment, keeping only the deltas it contributed.
    pub fn into_partial(self, range: BlockRange) -> PartialSegment {
        PartialSegment {
            range,
            kv: self.deltas,
        }
    }
}

#[cfg(test)]
mod tests {
    use sluice_primitives::{UpdatePolicy, ValueType};

    use super::*;

    fn make_delta(policy: UpdatePolicy, value_type: ValueType) -> DeltaStore {
        let spec = StoreSpec::new(policy, value_type);
        DeltaStore::new("s", spec, StoreState::new("s", spec))
    }

    #[test]
    fn test_reads_observe_base_and_writes() {
        let spec = StoreSpec::new(UpdatePolicy::Add, ValueType::Int64);
        let mut base_delta = DeltaStore::new("s", spec, StoreState::new("s", spec));
        base_delta.add("total", b"10").unwrap();
        let mut base = StoreState::new("s", spec);
        base.apply_partial(&base_delta.into_partial(BlockRange::new(0, 10)))
            .unwrap();

        let mut delta = DeltaStore::new("s", spec, base);
        assert_eq!(delta.get_last("total"), Some(b"10".to_vec()));

        delta.add("total", b"5").unwrap();
        // Effective value includes the base; the partial only the delta.
        assert_eq!(delta.get_last("total"), Some(b"15".to_vec()));
        let partial = delta.into_partial(BlockRange::new(10, 20));
        assert_eq!(partial.kv().get("total"), Some(&b"5".to_vec()));
    }

    #[test]
    fn test_set_if_not_exists_respects_base() {
        let spec = StoreSpec::new(UpdatePolicy::SetIfNotExists, ValueType::String);
        let mut seed = DeltaStore::new("s", spec, StoreState::new("s", spec));
        seed.set_if_not_exists("k", b"base");
        let mut base = StoreState::new("s", spec);
        base.apply_partial(&seed.into_partial(BlockRange::new(0, 10)))
            .unwrap();

        let mut delta = DeltaStore::new("s", spec, base);
        delta.set_if_not_exists("k", b"late");
        let partial = delta.into_partial(BlockRange::new(10, 20));
        // The key existed in the base, so the segment records no delta.
        assert!(partial.is_empty());
    }

    #[test]
    fn test_min_tracks_both_maps() {
        let mut delta = make_delta(UpdatePolicy::Min, ValueType::Int64);
        delta.set_min("low", b"9").unwrap();
        delta.set_min("low", b"4").unwrap();
        delta.set_min("low", b"6").unwrap();
        assert_eq!(delta.get_last("low"), Some(b"4".to_vec()));
        let partial = delta.into_partial(BlockRange::new(0, 10));
        assert_eq!(partial.kv().get("low"), Some(&b"4".to_vec()));
    }

    #[test]
    fn test_malformed_numeric_value_is_rejected() {
        let mut delta = make_delta(UpdatePolicy::Add, ValueType::Int64);
        assert!(delta.add("total", b"not-a-number").is_err());
        assert_eq!(delta.delta_count(), 0);
    }
}
