use std::fmt;

use crate::{SchemaObject, SchemaObjectKind, migrate::TableMigration};

/// Why an object is part of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PlanReason {
    /// Desired but not registered.
    New,
    /// Registered with a different signature.
    Changed,
    /// Registered but no longer desired.
    Removed,
    /// Depends on an object that is dropped or modified.
    Dependent,
    /// Registered and unchanged, but absent from the database.
    Missing,
}

impl fmt::Display for PlanReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::New => "new",
            Self::Changed => "changed",
            Self::Removed => "removed",
            Self::Dependent => "dependent",
            Self::Missing => "missing",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedObject {
    pub object: SchemaObject,
    pub reason: PlanReason,
    /// Distance from the object whose change pulled this one in.
    pub depth: usize,
}

impl PlannedObject {
    pub fn new(object: SchemaObject, reason: PlanReason) -> Self {
        Self {
            object,
            reason,
            depth: 0,
        }
    }

    #[must_use]
    pub fn at_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    #[must_use]
    pub fn kind(&self) -> SchemaObjectKind {
        self.object.kind()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.object.name()
    }
}

/// A changed table evolved in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableModification {
    pub object: SchemaObject,
    pub migration: TableMigration,
}

/// Registry row changes applied after the DDL succeeds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryChanges {
    pub upserts: Vec<SchemaObject>,
    pub deletes: Vec<String>,
}

impl RegistryChanges {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletes.is_empty()
    }
}

/// Everything an install will do, phase by phase, already ordered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallPlan {
    pub drops: Vec<PlannedObject>,
    pub table_modifications: Vec<TableModification>,
    pub adds: Vec<PlannedObject>,
    pub registry: RegistryChanges,
    /// The validated desired set, checked again after the add phase.
    pub desired: Vec<SchemaObject>,
}

impl InstallPlan {
    /// True when the database already matches the desired set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.drops.is_empty()
            && self.table_modifications.is_empty()
            && self.adds.is_empty()
            && self.registry.is_empty()
    }

    #[must_use]
    pub fn has_ddl(&self) -> bool {
        !self.drops.is_empty() || !self.adds.is_empty() || !self.table_modifications.is_empty()
    }

    /// One line per step, for `plan` output.
    #[must_use]
    pub fn summary(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for planned in &self.drops {
            lines.push(format!(
                "drop   {} {} ({})",
                planned.kind(),
                planned.name(),
                planned.reason
            ));
        }
        for modification in &self.table_modifications {
            lines.push(format!(
                "alter  Table {} ({} statements)",
                modification.object.name(),
                modification.migration.statements.len()
            ));
        }
        for planned in &self.adds {
            lines.push(format!(
                "create {} {} ({})",
                planned.kind(),
                planned.name(),
                planned.reason
            ));
        }
        lines
    }
}
