//! Typed views of the live database catalog.

mod queries;
mod script;
mod sqlserver;

pub use script::{ForeignKeyDefinition, IndexColumn, IndexDefinition, IndexStyle};
pub use sqlserver::SqlServerCatalog;

use crate::{Result, SchemaObject, SchemaObjectKind, name::QualifiedName};

/// A column as seen by the AutoProc generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub name: String,
    /// Type with length, precision or scale baked in, e.g. `varchar(128)`.
    pub sql_type: String,
    pub is_key: bool,
    pub is_identity: bool,
    pub is_read_only: bool,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            is_key: false,
            is_identity: false,
            is_read_only: false,
        }
    }

    #[must_use]
    pub fn key(mut self) -> Self {
        self.is_key = true;
        self
    }

    /// Identity columns are always read-only.
    #[must_use]
    pub fn identity(mut self) -> Self {
        self.is_identity = true;
        self.is_read_only = true;
        self
    }

    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.is_read_only = true;
        self
    }

    /// Type name without its length/precision suffix.
    #[must_use]
    pub fn base_type(&self) -> &str {
        self.sql_type
            .split('(')
            .next()
            .unwrap_or_default()
            .trim()
    }
}

/// Tables without primary-key columns use their identity column as the key.
pub fn apply_identity_key_fallback(columns: &mut [ColumnDefinition]) {
    if columns.iter().any(|column| column.is_key) {
        return;
    }
    for column in columns.iter_mut().filter(|column| column.is_identity) {
        column.is_key = true;
    }
}

/// A catalog data type with its raw length, precision and scale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataType {
    pub name: String,
    /// Bytes, `-1` for `MAX`. Unicode types store two bytes per character.
    pub max_length: i64,
    pub precision: i64,
    pub scale: i64,
}

impl DataType {
    pub fn new(name: impl Into<String>, max_length: i64, precision: i64, scale: i64) -> Self {
        Self {
            name: name.into(),
            max_length,
            precision,
            scale,
        }
    }

    /// SQL text for the type, e.g. `nvarchar(50)` or `decimal(18, 2)`.
    #[must_use]
    pub fn render(&self) -> String {
        let name = self.name.trim();
        match name.to_ascii_lowercase().as_str() {
            "nvarchar" | "nchar" => {
                if self.max_length == -1 {
                    format!("{name}(MAX)")
                } else {
                    format!("{name}({})", (self.max_length / 2).max(1))
                }
            }
            "varchar" | "char" | "varbinary" | "binary" => {
                if self.max_length == -1 {
                    format!("{name}(MAX)")
                } else {
                    format!("{name}({})", self.max_length.max(1))
                }
            }
            "decimal" | "numeric" if self.precision > 0 => {
                format!("{name}({}, {})", self.precision, self.scale.max(0))
            }
            "datetime2" | "time" | "datetimeoffset" if self.scale != 7 => {
                format!("{name}({})", self.scale.max(0))
            }
            _ => name.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentitySpec {
    pub seed: i64,
    pub increment: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputedColumn {
    pub definition: String,
    pub persisted: bool,
}

/// Full column shape used by the table migrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnShape {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub identity: Option<IdentitySpec>,
    pub computed: Option<ComputedColumn>,
    pub collation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultConstraint {
    pub name: String,
    pub column: String,
    pub definition: String,
    pub system_named: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableShape {
    pub columns: Vec<ColumnShape>,
    pub defaults: Vec<DefaultConstraint>,
    /// Filegroup or partition scheme holding the heap or clustered index.
    pub data_space: String,
}

/// An object whose definition references another, with the text needed to
/// recreate it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependentObject {
    pub object: SchemaObject,
    /// Bound through `SCHEMABINDING`, so it blocks changes to its referent.
    pub schema_bound: bool,
}

impl DependentObject {
    pub fn new(kind: SchemaObjectKind, name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            object: SchemaObject::new(kind, name, sql, 0),
            schema_bound: false,
        }
    }

    #[must_use]
    pub fn schema_bound(mut self, schema_bound: bool) -> Self {
        self.schema_bound = schema_bound;
        self
    }
}

/// Read-only catalog introspection.
pub trait Catalog {
    fn object_exists(&self, kind: SchemaObjectKind, name: &str) -> Result<bool>;

    /// Columns in declaration order; empty when the table does not exist.
    fn column_definitions(&self, table: &QualifiedName) -> Result<Vec<ColumnDefinition>>;

    fn table_shape(&self, table: &QualifiedName) -> Result<Option<TableShape>>;

    /// Direct dependents of an object. Callers recurse.
    fn dependents(&self, kind: SchemaObjectKind, name: &str) -> Result<Vec<DependentObject>>;

    /// Indexes, keys, foreign keys and check constraints that involve any
    /// of `columns`.
    fn column_dependents(
        &self,
        table: &QualifiedName,
        columns: &[String],
    ) -> Result<Vec<DependentObject>>;
}

#[cfg(test)]
mod tests {
    use super::{ColumnDefinition, DataType, apply_identity_key_fallback};

    #[test]
    fn render_data_type_bakes_in_lengths() {
        assert_eq!(DataType::new("nvarchar", 100, 0, 0).render(), "nvarchar(50)");
        assert_eq!(DataType::new("varchar", -1, 0, 0).render(), "varchar(MAX)");
        assert_eq!(DataType::new("decimal", 9, 18, 2).render(), "decimal(18, 2)");
        assert_eq!(DataType::new("datetime2", 8, 27, 7).render(), "datetime2");
        assert_eq!(DataType::new("datetime2", 6, 23, 3).render(), "datetime2(3)");
        assert_eq!(DataType::new("int", 4, 10, 0).render(), "int");
    }

    #[test]
    fn identity_column_becomes_key_without_primary_key() {
        let mut columns = vec![
            ColumnDefinition::new("ID", "int").identity(),
            ColumnDefinition::new("Name", "varchar(128)"),
        ];
        apply_identity_key_fallback(&mut columns);
        assert!(columns[0].is_key);
        assert!(!columns[1].is_key);

        let mut keyed = vec![
            ColumnDefinition::new("Code", "char(3)").key(),
            ColumnDefinition::new("Row", "int").identity(),
        ];
        apply_identity_key_fallback(&mut keyed);
        assert!(!keyed[1].is_key);
    }

    #[test]
    fn base_type_strips_length() {
        assert_eq!(ColumnDefinition::new("Stamp", "timestamp").base_type(), "timestamp");
        assert_eq!(ColumnDefinition::new("Name", "varchar(128)").base_type(), "varchar");
    }
}
