//! Named lookup of pre-validated commands.

use super::{Command, CommandError};
use crate::config::{Config, ConfigError, ConfigResult};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Commands known to the application, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct CommandCatalog {
    commands: BTreeMap<String, Arc<Command>>,
}

impl CommandCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the catalog from the `[commands.<name>]` tables of a config.
    pub fn from_config(config: &Config) -> ConfigResult<Self> {
        let mut catalog = Self::new();
        for (name, def) in &config.commands {
            let command = def
                .build(name)
                .map_err(|source| ConfigError::InvalidCommand {
                    name: name.clone(),
                    source,
                })?;
            catalog.insert(command);
        }
        Ok(catalog)
    }

    /// Register a command, replacing any previous one with the same name.
    pub fn insert(&mut self, command: Command) -> Option<Arc<Command>> {
        self.commands
            .insert(command.name().to_string(), Arc::new(command))
    }

    pub fn get(&self, name: &str) -> Option<Arc<Command>> {
        self.commands.get(name).cloned()
    }

    /// Like [`get`](Self::get) but reports unknown names as an error.
    pub fn require(&self, name: &str) -> Result<Arc<Command>, CommandError> {
        self.get(name)
            .ok_or_else(|| CommandError::UnknownCommand(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Command>> {
        self.commands.values()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
