use std::collections::BTreeMap;

use crate::registry::DEFAULT_REGISTRY_TABLE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
}

impl Version {
    #[must_use]
    pub const fn new(major: u16, minor: u16, patch: u16) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: String,
    pub extra: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstallMode {
    #[default]
    Apply,
    /// Run everything, capture the statements, then roll back.
    DryRun,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOptions {
    pub schema_group: String,
    pub registry_table: String,
    pub mode: InstallMode,
}

impl InstallOptions {
    pub fn new(schema_group: impl Into<String>) -> Self {
        Self {
            schema_group: schema_group.into(),
            registry_table: DEFAULT_REGISTRY_TABLE.to_string(),
            mode: InstallMode::Apply,
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: InstallMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_registry_table(mut self, registry_table: impl Into<String>) -> Self {
        self.registry_table = registry_table.into();
        self
    }
}
