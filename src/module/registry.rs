//! Name → factory lookup for module kinds.

use std::collections::BTreeMap;

use super::Module;

/// Builds a fresh, unconfigured module instance.
pub type ModuleFactory = fn() -> Box<dyn Module>;

/// One registered module kind.
#[derive(Clone)]
pub struct ModuleEntry {
    pub name: &'static str,
    /// One-line description for `--list-modules`.
    pub summary: &'static str,
    /// Option and column reference for `--help-module`.
    pub help: &'static str,
    pub factory: ModuleFactory,
}

impl std::fmt::Debug for ModuleEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleEntry")
            .field("name", &self.name)
            .field("summary", &self.summary)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    UnknownModule { name: String, known: Vec<String> },
    Duplicate(String),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::UnknownModule { name, known } => {
                write!(f, "unknown module '{}' (available: {})", name, known.join(", "))
            }
            RegistryError::Duplicate(name) => write!(f, "module '{}' registered twice", name),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Available module kinds, ordered by name.
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    entries: BTreeMap<&'static str, ModuleEntry>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, entry: ModuleEntry) -> Result<(), RegistryError> {
        if self.entries.contains_key(entry.name) {
            return Err(RegistryError::Duplicate(entry.name.to_string()));
        }
        self.entries.insert(entry.name, entry);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&ModuleEntry, RegistryError> {
        self.entries
            .get(name)
            .ok_or_else(|| RegistryError::UnknownModule {
                name: name.to_string(),
                known: self.names().into_iter().map(str::to_string).collect(),
            })
    }

    /// New instance of module kind `name`.
    pub fn create(&self, name: &str) -> Result<Box<dyn Module>, RegistryError> {
        self.get(name).map(|entry| (entry.factory)())
    }

    pub fn help(&self, name: &str) -> Result<&'static str, RegistryError> {
        self.get(name).map(|entry| entry.help)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.keys().copied().collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &ModuleEntry> {
        self.entries.values()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }
}
