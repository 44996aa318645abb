//! Full snapshot state of a store module.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sluice_primitives::{StoreSpec, UpdatePolicy};

use crate::delta::PartialSegment;
use crate::errors::StoreResult;
use crate::value;

/// Read access to a store, as exposed to downstream module executions.
pub trait StoreRead: Send + Sync {
    fn name(&self) -> &str;
    fn get(&self, key: &str) -> Option<Vec<u8>>;
}

/// The full `{key -> value}` state of a store module at some block boundary.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct StoreState {
    name: String,
    spec: StoreSpec,
    kv: HashMap<String, Vec<u8>>,
}

impl StoreState {
    pub fn new(name: impl Into<String>, spec: StoreSpec) -> Self {
        Self {
            name: name.into(),
            spec,
            kv: HashMap::new(),
        }
    }

    pub fn spec(&self) -> &StoreSpec {
        &self.spec
    }

    pub fn len(&self) -> usize {
        self.kv.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kv.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.kv.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub(crate) fn into_kv(self) -> HashMap<String, Vec<u8>> {
        self.kv
    }

    /// Squashes a partial segment onto this snapshot, folding each delta in
    /// under the store's update policy.  Applying the partials of consecutive
    /// segments in order yields the same state as executing the module over
    /// the combined range.
    pub fn apply_partial(&mut self, partial: &PartialSegment) -> StoreResult<()> {
        let value_type = self.spec.value_type;
        for (key, delta) in partial.kv() {
            match self.spec.update_policy {
                UpdatePolicy::Set => {
                    self.kv.insert(key.clone(), delta.clone());
                }
                UpdatePolicy::SetIfNotExists => {
                    self.kv.entry(key.clone()).or_insert_with(|| delta.clone());
                }
                UpdatePolicy::Append => {
                    self.kv
                        .entry(key.clone())
                        .or_default()
                        .extend_from_slice(delta);
                }
                UpdatePolicy::Add => {
                    let merged = match self.kv.get(key) {
                        Some(old) => value::add(value_type, old, delta)?,
                        None => delta.clone(),
                    };
                    self.kv.insert(key.clone(), merged);
                }
                UpdatePolicy::Min => {
                    let merged = match self.kv.get(key) {
                        Some(old) => value::min_of(value_type, old, delta)?,
                        None => delta.clone(),
                    };
                    self.kv.insert(key.clone(), merged);
                }
                UpdatePolicy::Max => {
                    let merged = match self.kv.get(key) {
                        Some(old) => value::max_of(value_type, old, delta)?,
                        None => delta.clone(),
                    };
                    self.kv.insert(key.clone(), merged);
                }
            }
        }
        Ok(())
    }
}

impl StoreRead for StoreState {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.kv.get(key).cloned()
    }
}
