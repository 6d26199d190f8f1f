//! Function cache: resolves global names to persistent registry references.
//!
//! Every acquired [`FunctionRef`] owns one registry slot and must be released
//! exactly once. Handles are issued from a monotonically increasing counter,
//! so releasing twice or validating a released handle is harmless.

use crate::env::ScriptEnvironment;
use crate::error::ScriptError;
use crate::state::FunctionRef;
use mlua::{Function, RegistryKey, Value};

#[derive(Debug)]
struct Entry {
    id: FunctionRef,
    name: String,
    key: RegistryKey,
}

/// Arena of live function references.
#[derive(Debug)]
pub struct FunctionCache {
    entries: Vec<Entry>,
    next_id: u32,
}

impl Default for FunctionCache {
    fn default() -> Self {
        Self {
            // Switches hold at most the old and the new reference.
            entries: Vec::with_capacity(2),
            next_id: 1,
        }
    }
}

impl FunctionCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `name` is currently a callable global. Acquires nothing.
    pub fn probe(&self, env: &ScriptEnvironment, name: &str) -> bool {
        matches!(env.global(name), Ok(Value::Function(_)))
    }

    /// Resolves `name` and takes a persistent reference to it.
    ///
    /// Reports [`ScriptError::FunctionNotFound`] if the global is absent or not
    /// callable; nothing is held in that case.
    pub fn cache_function(
        &mut self,
        env: &ScriptEnvironment,
        name: &str,
    ) -> Result<FunctionRef, ScriptError> {
        let func = match env.global(name) {
            Ok(Value::Function(func)) => func,
            _ => {
                let err = ScriptError::FunctionNotFound(name.to_string());
                log::error!("{}", err);
                return Err(err);
            }
        };
        let key = env
            .lua()
            .create_registry_value(func)
            .map_err(|e| ScriptError::Binding(e.to_string()))?;

        let id = self.issue();
        self.entries.push(Entry {
            id,
            name: name.to_string(),
            key,
        });
        Ok(id)
    }

    /// Frees a reference. No-op on the sentinel or an already-released handle.
    /// Returns whether a registry slot was freed.
    pub fn release_function(&mut self, env: &ScriptEnvironment, func: FunctionRef) -> bool {
        if func.is_invalid() {
            return false;
        }
        let Some(pos) = self.entries.iter().position(|e| e.id == func) else {
            return false;
        };
        let entry = self.entries.swap_remove(pos);
        if let Err(e) = env.lua().remove_registry_value(entry.key) {
            log::warn!("releasing '{}': {}", entry.name, e);
        }
        true
    }

    /// Dereferences the handle and checks the value is still callable.
    pub fn is_valid(&self, env: &ScriptEnvironment, func: FunctionRef) -> bool {
        self.function(env, func).is_some()
    }

    /// The callable behind a handle, if it is live and still a function.
    #[inline]
    pub(crate) fn function(&self, env: &ScriptEnvironment, func: FunctionRef) -> Option<Function> {
        if func.is_invalid() {
            return None;
        }
        let entry = self.entries.iter().find(|e| e.id == func)?;
        match env.lua().registry_value::<Value>(&entry.key) {
            Ok(Value::Function(f)) => Some(f),
            _ => None,
        }
    }

    /// Name the handle was resolved from.
    pub fn name_of(&self, func: FunctionRef) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.id == func)
            .map(|e| e.name.as_str())
    }

    /// Number of references currently held.
    pub fn live_count(&self) -> usize {
        self.entries.len()
    }

    /// Releases everything. Used on teardown.
    pub fn release_all(&mut self, env: &ScriptEnvironment) {
        for entry in self.entries.drain(..) {
            let _ = env.lua().remove_registry_value(entry.key);
        }
    }

    fn issue(&mut self) -> FunctionRef {
        let id = FunctionRef(self.next_id);
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }
}
