//! Declarative schema installer for SQL Server.
//!
//! Desired objects are plain SQL. The [`Installer`] classifies them, compares
//! them with what the [`SchemaRegistry`] says a schema group installed, and
//! applies the drops, in-place table changes and creates that close the gap
//! inside one transaction.

mod autoproc;
mod catalog;
mod classify;
mod config;
mod connection;
mod ddl;
mod error;
mod events;
mod executor;
mod installer;
mod kind;
mod migrate;
mod name;
mod object;
mod ordering;
mod plan;
mod planner;
mod registry;
mod renderer;

pub use autoproc::{
    AutoProcDirective, AutoProcGenerator, AutoProcVerb, GENERATOR_VERSION, GeneratedName,
    GeneratedObject,
};
pub use catalog::{
    Catalog, ColumnDefinition, ColumnShape, ComputedColumn, DataType, DefaultConstraint,
    DependentObject, ForeignKeyDefinition, IdentitySpec, IndexColumn, IndexDefinition, IndexStyle,
    SqlServerCatalog, TableShape, apply_identity_key_fallback,
};
pub use classify::{
    Classification, Classifier, ClassifierRules, MatchTarget, Rule, mask_comments_and_strings,
};
pub use config::{ConnectionConfig, InstallMode, InstallOptions, Version};
pub use connection::{
    BEGIN_TRANSACTION_SQL, COMMIT_TRANSACTION_SQL, Connection, ConnectionExt, FromRow,
    FromSqlValue, ROLLBACK_TRANSACTION_SQL, Row, SqlValue, Transaction,
};
pub use ddl::drop_statements;
pub use error::{
    BoxError, CatalogError, Error, ExecutionError, ObjectAction, ParseError, Result,
    UnsupportedError, ValidationError, VerificationError,
};
pub use events::{InstallEvent, InstallListener, NoopListener, TracingListener};
pub use executor::Executor;
pub use installer::{InstallReport, Installer};
pub use kind::SchemaObjectKind;
pub use migrate::{ShadowRewriter, TableMigration, TableMigrator, diff_table_shapes};
pub use name::{
    DEFAULT_SCHEMA, Ident, MAX_OBJECT_NAME_CHARS, PermissionName, PermissionTarget, QualifiedName, TableScopedName,
    name_key, names_equal, quote_ident, quote_literal, schema_object_name, split_name,
    table_scoped_name, unqualified_name, validate_object_name,
};
pub use object::{
    BATCH_SEPARATOR, SchemaObject, Signature, canonical_text, split_batches, split_objects,
};
pub use ordering::{sort_adds, sort_drops};
pub use plan::{InstallPlan, PlanReason, PlannedObject, RegistryChanges, TableModification};
pub use planner::Planner;
pub use registry::{DEFAULT_REGISTRY_TABLE, RegistryEntry, SchemaRegistry};
pub use renderer::Renderer;
