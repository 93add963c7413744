//! Hierarchical variable and command scopes.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::commands::Command;
use crate::runtime::value::Value;

/// Variable holding the component `.id` words resolve against.
pub const CONTEXT_VAR: &str = "_CTXT";

/// Variable collecting trapped failure messages.
pub const ERRORS_VAR: &str = "_ERRORS";

#[derive(Default)]
struct Scope {
    parent: Option<Namespace>,
    vars: BTreeMap<String, Value>,
    commands: BTreeMap<String, Arc<dyn Command>>,
}

/// Shared handle to a scope; lookups fall back to the parent chain.
#[derive(Clone, Default)]
pub struct Namespace {
    inner: Arc<Mutex<Scope>>,
}

impl Namespace {
    /// Empty top-level scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Child scope whose definitions shadow this one.
    pub fn child(&self) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Scope {
                parent: Some(self.clone()),
                ..Scope::default()
            })),
        }
    }

    /// Variable value, searching parents.
    pub fn get(&self, name: &str) -> Option<Value> {
        let scope = self.inner.lock();
        match scope.vars.get(name) {
            Some(value) => Some(value.clone()),
            None => scope.parent.as_ref().and_then(|parent| parent.get(name)),
        }
    }

    /// Set a variable in this scope.
    pub fn set(&self, name: &str, value: Value) {
        self.inner.lock().vars.insert(name.to_string(), value);
    }

    /// Remove a variable from this scope.
    pub fn unset(&self, name: &str) -> Option<Value> {
        self.inner.lock().vars.remove(name)
    }

    /// Define a command in this scope.
    pub fn define(&self, name: &str, command: Arc<dyn Command>) {
        self.inner.lock().commands.insert(name.to_string(), command);
    }

    /// Command by name, searching parents.
    pub fn command(&self, name: &str) -> Option<Arc<dyn Command>> {
        let scope = self.inner.lock();
        match scope.commands.get(name) {
            Some(command) => Some(command.clone()),
            None => scope.parent.as_ref().and_then(|parent| parent.command(name)),
        }
    }

    /// Append to a list variable in this scope.
    pub fn push(&self, name: &str, value: Value) {
        let mut scope = self.inner.lock();
        let entry = scope
            .vars
            .entry(name.to_string())
            .or_insert_with(|| Value::List(Vec::new()));
        match entry {
            Value::List(items) => items.push(value),
            other => *other = Value::List(vec![other.clone(), value]),
        }
    }
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scope = self.inner.lock();
        f.debug_struct("Namespace")
            .field("vars", &scope.vars.keys().collect::<Vec<_>>())
            .field("commands", &scope.commands.len())
            .field("nested", &scope.parent.is_some())
            .finish()
    }
}
