use crate::handler::{TaskConfig, TaskEntry, TaskHandler};
use bk_core::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Key under which a task entry is stored: name plus an optional exact
/// version. Resolution is by name first; when a version is supplied the
/// registry must return an entry whose version matches exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TaskKey {
    name: String,
    version: Option<String>,
}

/// Maps a task name (+ optional version) to an executable handle and its
/// static configuration. Populated once at process start; lookups never
/// perform runtime attribute resolution.
#[derive(Default)]
pub struct TaskRegistry {
    entries: RwLock<HashMap<TaskKey, TaskEntry>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `name` (and, if given, `version`).
    /// Re-registering the same (name, version) pair is an error.
    pub fn register(
        &self,
        name: impl Into<String>,
        version: Option<String>,
        handler: Arc<dyn TaskHandler>,
        config: TaskConfig,
    ) -> Result<()> {
        let name = name.into();
        let key = TaskKey {
            name: name.clone(),
            version: version.clone(),
        };
        let mut entries = self.entries.write().expect("registry lock poisoned");
        if entries.contains_key(&key) {
            return Err(Error::Validation(format!(
                "task '{name}' (version {:?}) is already registered",
                version
            )));
        }
        entries.insert(
            key,
            TaskEntry {
                name: name.clone(),
                version,
                handler,
                config,
            },
        );
        info!(task = %name, "registered task handler");
        Ok(())
    }

    /// Resolve `name` (and, if given, `version`) to its entry. When a
    /// version is requested but the registered entry doesn't match it
    /// exactly, this signals `NotFound` rather than silently falling back
    /// to an unversioned entry.
    pub fn lookup(&self, name: &str, version: Option<&str>) -> Result<TaskEntry> {
        let entries = self.entries.read().expect("registry lock poisoned");
        let key = TaskKey {
            name: name.to_string(),
            version: version.map(str::to_string),
        };
        if let Some(entry) = entries.get(&key) {
            return Ok(entry.clone());
        }
        if version.is_some() {
            debug!(task = %name, ?version, "versioned task lookup missed");
            return Err(Error::NotFound(format!(
                "task '{name}' has no registration matching version {:?}",
                version
            )));
        }
        Err(Error::NotFound(format!("unknown task: {name}")))
    }

    pub fn has(&self, name: &str, version: Option<&str>) -> bool {
        self.lookup(name, version).is_ok()
    }

    /// All registered (name, version) pairs, for discovery/introspection.
    pub fn list(&self) -> Vec<(String, Option<String>)> {
        let entries = self.entries.read().expect("registry lock poisoned");
        entries
            .keys()
            .map(|k| (k.name.clone(), k.version.clone()))
            .collect()
    }
}
