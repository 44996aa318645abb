//! Arguments wired into one module call.

use std::sync::Arc;

use sluice_store::{DeltaStore, StoreRead};

/// One argument of a module entrypoint.
///
/// Values land in guest memory as `(ptr, len)` pairs, store readers as
/// integer handles assigned in registration order starting at 0, and the
/// writer output is not passed to the guest at all.
pub enum Argument {
    /// Raw bytes copied into the guest's linear memory.
    Value { name: String, value: Vec<u8> },

    /// A read-only upstream store, addressed by handle.
    StoreReader { store: Arc<dyn StoreRead> },

    /// The store this call writes to.  At most one per call.
    StoreWriter { store: DeltaStore },
}

impl Argument {
    pub fn value(name: impl Into<String>, value: Vec<u8>) -> Self {
        Argument::Value {
            name: name.into(),
            value,
        }
    }

    pub fn store_reader(store: Arc<dyn StoreRead>) -> Self {
        Argument::StoreReader { store }
    }

    pub fn store_writer(store: DeltaStore) -> Self {
        Argument::StoreWriter { store }
    }
}
