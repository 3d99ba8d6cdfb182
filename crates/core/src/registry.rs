//! The record, inside the target database, of what each schema group has
//! installed.

use std::collections::BTreeMap;

use crate::{
    CatalogError, Result, SchemaObjectKind, Signature, ValidationError,
    connection::{Connection, ConnectionExt, FromRow, Row},
    name::{MAX_OBJECT_NAME_CHARS, QualifiedName, name_key, quote_ident, quote_literal},
};

pub const DEFAULT_REGISTRY_TABLE: &str = "[dbo].[SchemaRegistry]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub schema_group: String,
    pub object_name: String,
    pub kind: SchemaObjectKind,
    pub signature: Signature,
    pub original_order: usize,
}

impl FromRow for RegistryEntry {
    fn from_row(row: &Row) -> std::result::Result<Self, CatalogError> {
        const QUERY: &str = "schema registry";
        let original_order = usize::try_from(row.opt_int(4, QUERY)?.unwrap_or(0)).map_err(|_| {
            CatalogError::UnexpectedValue {
                query: QUERY,
                column: 4,
                expected: "non-negative order",
            }
        })?;
        Ok(Self {
            schema_group: row.text(0, QUERY)?,
            object_name: row.text(1, QUERY)?,
            signature: Signature::from_stored(row.text(2, QUERY)?),
            kind: row.text(3, QUERY)?.parse()?,
            original_order,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingChange {
    Upsert(RegistryEntry),
    Delete(String),
}

/// Registry rows loaded eagerly; mutations are buffered until
/// [`SchemaRegistry::commit`].
pub struct SchemaRegistry<'c> {
    connection: &'c dyn Connection,
    table: QualifiedName,
    entries: BTreeMap<String, RegistryEntry>,
    pending: BTreeMap<String, PendingChange>,
}

impl<'c> SchemaRegistry<'c> {
    /// Ensures the backing table exists and is current, then loads it.
    pub fn open(connection: &'c dyn Connection, table: &str) -> Result<Self> {
        let table = QualifiedName::parse(table).ok_or_else(|| ValidationError::InvalidName {
            name: table.to_string(),
            reason: "is not a one or two part table name",
        })?;
        let mut registry = Self {
            connection,
            table,
            entries: BTreeMap::new(),
            pending: BTreeMap::new(),
        };
        registry.ensure_table()?;
        registry.reload()?;
        Ok(registry)
    }

    #[must_use]
    pub fn table(&self) -> &QualifiedName {
        &self.table
    }

    /// Creates the registry table, or adds columns introduced since it was
    /// created.
    fn ensure_table(&self) -> Result<()> {
        let table = self.table.canonical();
        let literal = quote_literal(&table);
        let key_name = quote_ident(&format!("PK_{}", self.table.name.value));

        self.connection.execute(&format!(
            "IF OBJECT_ID({literal}, N'U') IS NULL\n\
             CREATE TABLE {table}\n\
             (\n\
             \t[SchemaGroup] nvarchar(128) NOT NULL,\n\
             \t[ObjectName] nvarchar({MAX_OBJECT_NAME_CHARS}) NOT NULL,\n\
             \t[Signature] varchar(64) NOT NULL,\n\
             \t[Type] varchar(32) NOT NULL,\n\
             \t[OriginalOrder] int NOT NULL DEFAULT (0),\n\
             \tCONSTRAINT {key_name} PRIMARY KEY ([ObjectName])\n\
             )"
        ))?;
        self.connection.execute(&format!(
            "IF COL_LENGTH({literal}, N'OriginalOrder') IS NULL\n\
             ALTER TABLE {table} ADD [OriginalOrder] int NOT NULL DEFAULT (0)"
        ))?;
        // Early registries stored names as varchar(256).
        self.connection.execute(&format!(
            "IF EXISTS (SELECT 1 FROM sys.columns WHERE [object_id] = OBJECT_ID({literal}) \
             AND [name] = N'ObjectName' AND [system_type_id] = TYPE_ID(N'varchar'))\n\
             BEGIN\n\
             \tALTER TABLE {table} DROP CONSTRAINT {key_name};\n\
             \tALTER TABLE {table} ALTER COLUMN [SchemaGroup] nvarchar(128) NOT NULL;\n\
             \tALTER TABLE {table} ALTER COLUMN [ObjectName] nvarchar({MAX_OBJECT_NAME_CHARS}) NOT NULL;\n\
             \tALTER TABLE {table} ADD CONSTRAINT {key_name} PRIMARY KEY ([ObjectName]);\n\
             END"
        ))?;
        Ok(())
    }

    /// Reloads every group's rows and discards buffered changes.
    pub fn reload(&mut self) -> Result<()> {
        let rows = self.connection.query_as::<RegistryEntry>(
            &format!(
                "SELECT [SchemaGroup], [ObjectName], [Signature], [Type], [OriginalOrder] FROM {}",
                self.table.canonical()
            ),
            &[],
        )?;
        self.entries = rows
            .into_iter()
            .map(|entry| (name_key(&entry.object_name), entry))
            .collect();
        self.pending.clear();
        Ok(())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name_key(name))
    }

    #[must_use]
    pub fn find(&self, name: &str) -> Option<&RegistryEntry> {
        self.entries.get(&name_key(name))
    }

    /// Entries of one group in declaration order.
    #[must_use]
    pub fn entries(&self, group: &str) -> Vec<&RegistryEntry> {
        let mut entries = self
            .entries
            .values()
            .filter(|entry| entry.schema_group.eq_ignore_ascii_case(group))
            .collect::<Vec<_>>();
        entries.sort_by_key(|entry| entry.original_order);
        entries
    }

    /// Fails when `name` is registered to a different group.
    pub fn check_owner(&self, group: &str, name: &str) -> std::result::Result<(), ValidationError> {
        match self.find(name) {
            Some(entry) if !entry.schema_group.eq_ignore_ascii_case(group) => {
                Err(ValidationError::ForeignGroup {
                    name: name.to_string(),
                    registered_group: entry.schema_group.clone(),
                })
            }
            _ => Ok(()),
        }
    }

    pub fn upsert(&mut self, entry: RegistryEntry) {
        let key = name_key(&entry.object_name);
        self.entries.insert(key.clone(), entry.clone());
        self.pending.insert(key, PendingChange::Upsert(entry));
    }

    pub fn delete(&mut self, name: &str) {
        let key = name_key(name);
        if let Some(entry) = self.entries.remove(&key) {
            self.pending
                .insert(key, PendingChange::Delete(entry.object_name));
        }
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Writes buffered changes as one batch and returns how many rows changed.
    pub fn commit(&mut self) -> Result<usize> {
        if self.pending.is_empty() {
            return Ok(0);
        }

        let table = self.table.canonical();
        let mut statements = Vec::new();
        for change in self.pending.values() {
            match change {
                PendingChange::Delete(name) => statements.push(format!(
                    "DELETE FROM {table} WHERE [ObjectName] = {}",
                    quote_literal(name)
                )),
                PendingChange::Upsert(entry) => {
                    statements.push(format!(
                        "DELETE FROM {table} WHERE [ObjectName] = {}",
                        quote_literal(&entry.object_name)
                    ));
                    statements.push(format!(
                        "INSERT INTO {table} ([SchemaGroup], [ObjectName], [Signature], [Type], [OriginalOrder]) VALUES ({}, {}, {}, {}, {})",
                        quote_literal(&entry.schema_group),
                        quote_literal(&entry.object_name),
                        quote_literal(entry.signature.as_str()),
                        quote_literal(entry.kind.as_str()),
                        entry.original_order
                    ));
                }
            }
        }

        self.connection.execute(&statements.join(";\n"))?;
        let changed = self.pending.len();
        self.pending.clear();
        Ok(changed)
    }
}
