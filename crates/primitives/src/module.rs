//! User-submitted module definitions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a store module folds a new value for a key into its existing state.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePolicy {
    Set,
    SetIfNotExists,
    Add,
    Min,
    Max,
    Append,
}

impl UpdatePolicy {
    /// Short policy tag used in host-side diagnostics.
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdatePolicy::Set => "replace",
            UpdatePolicy::SetIfNotExists => "ignore",
            UpdatePolicy::Add => "add",
            UpdatePolicy::Min => "min",
            UpdatePolicy::Max => "max",
            UpdatePolicy::Append => "append",
        }
    }
}

impl fmt::Display for UpdatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared type of the values a store holds.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Bytes,
    String,
    Int64,
    Float64,
    BigInt,
    BigDecimal,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Bytes => "bytes",
            ValueType::String => "string",
            ValueType::Int64 => "int64",
            ValueType::Float64 => "float64",
            ValueType::BigInt => "bigint",
            ValueType::BigDecimal => "bigdecimal",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown value type {0:?}")]
pub struct ValueTypeParseError(String);

impl FromStr for ValueType {
    type Err = ValueTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bytes" => Ok(ValueType::Bytes),
            "string" => Ok(ValueType::String),
            "int64" => Ok(ValueType::Int64),
            "float64" => Ok(ValueType::Float64),
            "bigint" => Ok(ValueType::BigInt),
            // Older manifests spell bigdecimal as bigfloat.
            "bigdecimal" | "bigfloat" => Ok(ValueType::BigDecimal),
            other => Err(ValueTypeParseError(other.to_owned())),
        }
    }
}

/// Store-module behaviour declaration.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct StoreSpec {
    pub update_policy: UpdatePolicy,
    pub value_type: ValueType,
}

impl StoreSpec {
    pub fn new(update_policy: UpdatePolicy, value_type: ValueType) -> Self {
        Self {
            update_policy,
            value_type,
        }
    }
}

/// What a module computes.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ModuleKind {
    /// Consumes inputs, emits an output payload per block.
    Mapper,
    /// Consumes inputs, mutates keyed state under an update policy.
    Store(StoreSpec),
}

/// One module of a user-submitted processing graph.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ModuleDef {
    pub name: String,
    pub kind: ModuleKind,
    /// First block this module applies to.
    pub initial_block: u64,
    /// Names of upstream modules, in declaration order.
    pub inputs: Vec<String>,
    /// Compiled wasm binary.
    pub binary: Vec<u8>,
    /// Exported guest function to invoke.
    pub entrypoint: String,
}

impl ModuleDef {
    pub fn mapper(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ModuleKind::Mapper,
            initial_block: 0,
            inputs: Vec::new(),
            binary: Vec::new(),
            entrypoint: "run".to_owned(),
        }
    }

    pub fn store(
        name: impl Into<String>,
        update_policy: UpdatePolicy,
        value_type: ValueType,
    ) -> Self {
        Self {
            name: name.into(),
            kind: ModuleKind::Store(StoreSpec::new(update_policy, value_type)),
            initial_block: 0,
            inputs: Vec::new(),
            binary: Vec::new(),
            entrypoint: "run".to_owned(),
        }
    }

    pub fn with_initial_block(mut self, initial_block: u64) -> Self {
        self.initial_block = initial_block;
        self
    }

    pub fn with_inputs(mut self, inputs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_binary(mut self, binary: Vec<u8>) -> Self {
        self.binary = binary;
        self
    }

    pub fn with_entrypoint(mut self, entrypoint: impl Into<String>) -> Self {
        self.entrypoint = entrypoint.into();
        self
    }

    pub fn is_store(&self) -> bool {
        matches!(self.kind, ModuleKind::Store(_))
    }

    pub fn store_spec(&self) -> Option<&StoreSpec> {
        match &self.kind {
            ModuleKind::Store(spec) => Some(spec),
            ModuleKind::Mapper => None,
        }
    }
}
