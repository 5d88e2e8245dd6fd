use std::collections::HashMap;
use tracing::trace;

use super::{ResolveError, Value};

/// Variables of one running macro.
///
/// Names are trimmed on every access and must not be empty. A store belongs to
/// exactly one run; two macros executing at the same time each get their own.
#[derive(Debug, Clone, Default)]
pub struct VariableStore {
    values: HashMap<String, Value>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or override) a variable.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), ResolveError> {
        let key = name.trim();
        if key.is_empty() {
            return Err(ResolveError::EmptyVariableName);
        }
        let value = value.into();
        trace!(target: "macrotree::variables", name = key, %value, "set variable");
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name.trim())
    }

    /// Like [`get`](Self::get) but reports a missing variable as an error.
    pub fn require(&self, name: &str) -> Result<&Value, ResolveError> {
        self.get(name).ok_or_else(|| ResolveError::UnresolvedVariable {
            name: name.trim().to_string(),
        })
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.values.remove(name.trim())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name.trim())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}
