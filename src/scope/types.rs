/// Scope declarations and the lookup capability
/// 
/// Declarations arrive from deployed flow JSON as `{name, type, value}`. The
/// set of kinds is closed; anything else fails to deserialize.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;

/// Prefix that forces a lookup to skip the local scope
pub const PARENT_PREFIX: &str = "$parent.";

/// Kind of a declared setting, fixed at deploy time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvKind {
    /// Plain text, stored as-is
    #[serde(alias = "str")]
    String,
    /// Numeric value, parsed once at start
    #[serde(alias = "num")]
    Number,
    /// `true` / `false`, parsed once at start
    #[serde(alias = "bool")]
    Boolean,
    /// Structured JSON, parsed once at start and deep-copied on every read
    Json,
    /// Deferred expression, evaluated by the message evaluator at read time
    #[serde(alias = "jsonata")]
    Expression,
    /// Reference to another variable visible from this scope
    Env,
}

/// A single declared setting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvDeclaration {
    /// Variable name (e.g. "API_BASE")
    pub name: String,
    /// Declared kind
    #[serde(rename = "type")]
    pub kind: EnvKind,
    /// Raw declared value as authored in the flow
    #[serde(default)]
    pub value: Value,
}

impl EnvDeclaration {
    pub fn new(name: impl Into<String>, kind: EnvKind, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            kind,
            value: value.into(),
        }
    }

    /// The declared value as text, the way it was typed into the editor
    pub fn raw_text(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Anything that can answer a setting lookup
/// 
/// Returned values are owned: a caller can mutate what it gets back without
/// affecting the scope or any other caller.
pub trait Scope: Send + Sync + Debug {
    /// Resolve `name`, delegating through parents; `None` when nothing defines it
    fn get_setting(&self, name: &str) -> Option<Value>;

    /// The raw declaration behind `name`, searched through the same chain
    fn declaration(&self, _name: &str) -> Option<EnvDeclaration> {
        None
    }
}

/// Coercion failures raised while starting a scope
#[derive(Debug, thiserror::Error)]
pub enum ScopeError {
    #[error("invalid json for '{name}' in scope '{scope}': {source}")]
    InvalidJson {
        scope: String,
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid number for '{name}' in scope '{scope}': {value}")]
    InvalidNumber {
        scope: String,
        name: String,
        value: String,
    },

    #[error("invalid boolean for '{name}' in scope '{scope}': {value}")]
    InvalidBoolean {
        scope: String,
        name: String,
        value: String,
    },
}
