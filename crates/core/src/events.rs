use std::fmt;

use tracing::{debug, info, warn};

use crate::SchemaObjectKind;

/// Progress notifications raised while an install runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallEvent<'a> {
    BeforeDrop { kind: SchemaObjectKind, name: &'a str },
    AfterDrop { kind: SchemaObjectKind, name: &'a str },
    BeforeCreate { kind: SchemaObjectKind, name: &'a str },
    AfterCreate { kind: SchemaObjectKind, name: &'a str },
    BeforeTableModify { name: &'a str },
    AfterTableModify { name: &'a str },
    /// Registered and unchanged, but absent from the database.
    MissingObject { kind: SchemaObjectKind, name: &'a str },
}

impl fmt::Display for InstallEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BeforeDrop { kind, name } => write!(f, "dropping {kind} {name}"),
            Self::AfterDrop { kind, name } => write!(f, "dropped {kind} {name}"),
            Self::BeforeCreate { kind, name } => write!(f, "creating {kind} {name}"),
            Self::AfterCreate { kind, name } => write!(f, "created {kind} {name}"),
            Self::BeforeTableModify { name } => write!(f, "modifying table {name}"),
            Self::AfterTableModify { name } => write!(f, "modified table {name}"),
            Self::MissingObject { kind, name } => {
                write!(f, "{kind} {name} is registered but missing")
            }
        }
    }
}

pub trait InstallListener {
    fn on_event(&self, event: &InstallEvent<'_>);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl InstallListener for NoopListener {
    fn on_event(&self, _event: &InstallEvent<'_>) {}
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingListener;

impl InstallListener for TracingListener {
    fn on_event(&self, event: &InstallEvent<'_>) {
        match event {
            InstallEvent::MissingObject { .. } => warn!(target: "dbshape::install", "{event}"),
            InstallEvent::BeforeDrop { .. }
            | InstallEvent::BeforeCreate { .. }
            | InstallEvent::BeforeTableModify { .. } => debug!(target: "dbshape::install", "{event}"),
            InstallEvent::AfterDrop { .. }
            | InstallEvent::AfterCreate { .. }
            | InstallEvent::AfterTableModify { .. } => info!(target: "dbshape::install", "{event}"),
        }
    }
}
