//! Module content hashing.

use sha2::{Digest, Sha256};
use sluice_primitives::{ModuleDef, ModuleKind};

/// Computes the hex content hash of a module given the hashes of its direct
/// inputs (which already cover their own transitive inputs).
pub(crate) fn module_hash(module: &ModuleDef, input_hashes: &[&str]) -> String {
    let mut hasher = Sha256::new();

    hasher.update(module.name.as_bytes());
    match &module.kind {
        ModuleKind::Mapper => {
            hasher.update(b"mapper");
        }
        ModuleKind::Store(spec) => {
            hasher.update(b"store");
            hasher.update(spec.update_policy.as_str().as_bytes());
            hasher.update(spec.value_type.as_str().as_bytes());
        }
    }
    hasher.update(module.initial_block.to_be_bytes());
    hasher.update(module.entrypoint.as_bytes());
    hasher.update(&module.binary);
    for input_hash in input_hashes {
        hasher.update(input_hash.as_bytes());
    }

    hex::encode(hasher.finalize())
}
