//! Command plugins run from the binary as `brook <command> [args]`
//!
//! Each command module exposes a `register` function that adds its commands
//! to a [`PluginRegistryBuilder`]. The binary builds the registry once at
//! startup with [`default_registry`]; nothing registers itself implicitly.

use crate::database::Database;
use std::collections::BTreeMap;

pub mod shell;

/// Handler signature shared by every command
pub type CommandFn = fn(&Database, &[String]) -> CommandOutcome;

/// Exit classification of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Failed,
}

impl Status {
    pub fn exit_code(&self) -> i32 {
        match self {
            Status::Ok => 0,
            Status::Failed => 1,
        }
    }
}

/// What a command produced, for the binary to print and exit with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub status: Status,
    pub message: String,
}

impl CommandOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: Status::Ok,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Status::Failed,
            message: message.into(),
        }
    }
}

/// A named command
#[derive(Debug, Clone)]
pub struct Plugin {
    pub name: &'static str,
    pub help: &'static str,
    pub run: CommandFn,
}

#[derive(Default)]
pub struct PluginRegistryBuilder {
    plugins: BTreeMap<&'static str, Plugin>,
}

impl PluginRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a command. A later registration under the same name replaces
    /// the earlier one.
    pub fn register(&mut self, plugin: Plugin) -> &mut Self {
        let name = plugin.name;
        if self.plugins.insert(name, plugin).is_some() {
            tracing::warn!("Command '{}' registered twice", name);
        }
        self
    }

    /// Run a module's registration function
    pub fn with(mut self, register: fn(&mut PluginRegistryBuilder)) -> Self {
        register(&mut self);
        self
    }

    pub fn build(self) -> PluginRegistry {
        PluginRegistry {
            plugins: self.plugins,
        }
    }
}

/// Immutable table of commands
pub struct PluginRegistry {
    plugins: BTreeMap<&'static str, Plugin>,
}

impl PluginRegistry {
    pub fn builder() -> PluginRegistryBuilder {
        PluginRegistryBuilder::new()
    }

    pub fn get(&self, name: &str) -> Option<&Plugin> {
        self.plugins.get(name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.plugins.keys().copied().collect()
    }

    pub fn run(
        &self,
        name: &str,
        db: &Database,
        args: &[String],
    ) -> Result<CommandOutcome, PluginError> {
        let plugin = self
            .get(name)
            .ok_or_else(|| PluginError::NoPlugin(name.to_string()))?;
        tracing::debug!("Running command {} {:?}", name, args);
        Ok((plugin.run)(db, args))
    }

    /// One line per command, sorted by name
    pub fn usage(&self) -> String {
        self.plugins
            .values()
            .map(|p| format!("  {:<12}{}", p.name, p.help))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Registry with every built-in command
pub fn default_registry() -> PluginRegistry {
    PluginRegistry::builder().with(shell::register).build()
}

#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("No command named '{0}'")]
    NoPlugin(String),
}
