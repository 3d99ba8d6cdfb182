//! In-place evolution of changed tables.
//!
//! The desired definition is created as a shadow table so both shapes can be
//! read back from the catalog in the same normalized form, then compared
//! column by column.

use std::collections::BTreeMap;

use regex::Regex;
use tracing::debug;

use crate::{
    CatalogError, ParseError, Result, SchemaObject, UnsupportedError,
    catalog::{Catalog, ColumnShape, DefaultConstraint, TableShape},
    classify::mask_comments_and_strings,
    connection::Connection,
    name::{QualifiedName, name_key, quote_ident, quote_literal},
};

const SHADOW_MARKER: &str = "_dbshape_";
const SHADOW_SIGNATURE_CHARS: usize = 8;

const IDENT: &str = r#"(?:\[(?:[^\]]|\]\])+\]|"(?:[^"]|"")+"|[\w@#$]+)"#;

/// The ALTER statements that take a table from its current shape to the
/// desired one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMigration {
    pub table: QualifiedName,
    pub statements: Vec<String>,
    /// Dropped, altered or recomputed columns. Objects built on them must be
    /// dropped first and recreated afterwards.
    pub touched_columns: Vec<String>,
    /// Columns removed for good. Objects built on them are dropped only.
    pub dropped_columns: Vec<String>,
}

impl TableMigration {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

/// Rewrites a `CREATE TABLE` into its shadow. Patterns are compiled once
/// and shared by every migration of an install.
pub struct ShadowRewriter {
    create_table: Regex,
    constraint_name: Regex,
}

impl Default for ShadowRewriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ShadowRewriter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            create_table: Regex::new(&format!(
                r"(?is)\bCREATE\s+TABLE\s+(?P<name>(?:{IDENT}\s*\.\s*)?{IDENT})"
            ))
            .expect("create table pattern should compile"),
            constraint_name: Regex::new(&format!(r"(?is)\bCONSTRAINT\s+(?P<name>{IDENT})"))
                .expect("constraint name pattern should compile"),
        }
    }

    /// Makes `sql` create `shadow`, with every named constraint suffixed so
    /// it does not collide with the live table's.
    pub fn rewrite(&self, sql: &str, shadow: &QualifiedName, suffix: &str) -> Result<String> {
        let masked = mask_comments_and_strings(sql);
        let table_name = self
            .create_table
            .captures(&masked)
            .and_then(|captures| captures.name("name"))
            .ok_or_else(|| ParseError::Unrecognized {
                sql: sql.to_string(),
            })?
            .range();

        let mut replacements = vec![(table_name.clone(), shadow.canonical())];
        for captures in self.constraint_name.captures_iter(&masked) {
            let Some(name) = captures.name("name") else {
                continue;
            };
            if name.start() < table_name.end {
                continue;
            }
            let original = crate::name::Ident::parse(&sql[name.range()]);
            replacements.push((name.range(), quote_ident(&format!("{}{suffix}", original.value))));
        }

        let mut rewritten = sql.to_string();
        replacements.sort_by_key(|(range, _)| std::cmp::Reverse(range.start));
        for (range, replacement) in replacements {
            rewritten.replace_range(range, &replacement);
        }
        Ok(rewritten)
    }
}

pub struct TableMigrator<'a> {
    connection: &'a dyn Connection,
    catalog: &'a dyn Catalog,
    rewriter: &'a ShadowRewriter,
    /// Defaults installed as their own objects, not by the table definition.
    standalone_defaults: Vec<String>,
}

impl<'a> TableMigrator<'a> {
    pub fn new(
        connection: &'a dyn Connection,
        catalog: &'a dyn Catalog,
        rewriter: &'a ShadowRewriter,
    ) -> Self {
        Self {
            connection,
            catalog,
            rewriter,
            standalone_defaults: Vec::new(),
        }
    }

    /// Names of `ALTER TABLE .. ADD CONSTRAINT .. DEFAULT` objects on the
    /// table. The shadow never carries them, so they are kept as they are.
    #[must_use]
    pub fn with_standalone_defaults(mut self, names: Vec<String>) -> Self {
        self.standalone_defaults = names;
        self
    }

    /// Compares the live table with the desired definition in `object`.
    pub fn plan(&self, object: &SchemaObject) -> Result<TableMigration> {
        let table = QualifiedName::parse(object.name()).ok_or_else(|| ParseError::Unrecognized {
            sql: object.name().to_string(),
        })?;
        let current = self
            .catalog
            .table_shape(&table)?
            .ok_or_else(|| CatalogError::MissingTable {
                table: table.canonical(),
            })?;

        let suffix = shadow_suffix(object);
        let shadow = QualifiedName::new(
            Some(table.schema_or_default()),
            &format!("{}{suffix}", table.name.value),
        );
        let desired = self.read_shadow_shape(object, &shadow, &suffix);
        let mut desired = strip_shadow_suffix(desired?, &suffix);
        desired.defaults.extend(
            current
                .defaults
                .iter()
                .filter(|default| {
                    self.standalone_defaults
                        .iter()
                        .any(|name| name.eq_ignore_ascii_case(&default.name))
                })
                .cloned(),
        );

        diff_table_shapes(&table, &current, &desired)
    }

    /// Creates the shadow, reads its shape and always drops it again.
    fn read_shadow_shape(
        &self,
        object: &SchemaObject,
        shadow: &QualifiedName,
        suffix: &str,
    ) -> Result<TableShape> {
        let drop_shadow = format!(
            "IF OBJECT_ID({}, N'U') IS NOT NULL DROP TABLE {}",
            quote_literal(&shadow.canonical()),
            shadow.canonical()
        );
        self.connection.execute(&drop_shadow)?;

        let shape = self.rewriter.rewrite(object.sql(), shadow, suffix).and_then(|sql| {
            debug!(table = object.name(), shadow = %shadow, "creating shadow table");
            for batch in crate::object::split_batches(&sql) {
                self.connection.execute(&batch)?;
            }
            self.catalog
                .table_shape(shadow)?
                .ok_or_else(|| {
                    CatalogError::MissingTable {
                        table: shadow.canonical(),
                    }
                    .into()
                })
        });

        let dropped = self.connection.execute(&drop_shadow);
        let shape = shape?;
        dropped?;
        Ok(shape)
    }
}

fn shadow_suffix(object: &SchemaObject) -> String {
    let digest = object
        .signature()
        .as_str()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(SHADOW_SIGNATURE_CHARS)
        .collect::<String>();
    format!("{SHADOW_MARKER}{digest}")
}

fn strip_shadow_suffix(mut shape: TableShape, suffix: &str) -> TableShape {
    for default in &mut shape.defaults {
        if let Some(stripped) = default.name.strip_suffix(suffix) {
            default.name = stripped.to_string();
        }
    }
    shape
}

/// Pure comparison of two table shapes.
pub fn diff_table_shapes(
    table: &QualifiedName,
    current: &TableShape,
    desired: &TableShape,
) -> Result<TableMigration> {
    let target = table.canonical();
    if !current.data_space.eq_ignore_ascii_case(&desired.data_space) {
        return Err(UnsupportedError::StorageRelocation {
            table: target,
            from: current.data_space.clone(),
            to: desired.data_space.clone(),
        }
        .into());
    }

    let current_columns = by_column(&current.columns, |column| &column.name);
    let desired_columns = by_column(&desired.columns, |column| &column.name);
    let current_defaults = by_column(&current.defaults, |default| &default.column);
    let desired_defaults = by_column(&desired.defaults, |default| &default.column);

    let mut drop_defaults = Vec::new();
    let mut drop_columns = Vec::new();
    let mut alter_columns = Vec::new();
    let mut add_columns = Vec::new();
    let mut add_defaults = Vec::new();
    let mut reseeds = Vec::new();
    let mut touched = Vec::new();
    let mut dropped = Vec::new();

    for column in &current.columns {
        if !desired_columns.contains_key(&name_key(&column.name)) {
            drop_columns.push(format!("ALTER TABLE {target} DROP COLUMN {}", quote_ident(&column.name)));
            touched.push(column.name.clone());
            dropped.push(column.name.clone());
        }
    }

    for column in &desired.columns {
        let key = name_key(&column.name);
        let Some(existing) = current_columns.get(&key) else {
            add_columns.push(format!(
                "ALTER TABLE {target} ADD {}",
                column_definition(column, desired_defaults.get(&key).copied())
            ));
            continue;
        };

        if existing.computed.is_some() || column.computed.is_some() {
            if existing.computed != column.computed {
                drop_columns.push(format!("ALTER TABLE {target} DROP COLUMN {}", quote_ident(&existing.name)));
                add_columns.push(format!("ALTER TABLE {target} ADD {}", column_definition(column, None)));
                touched.push(column.name.clone());
            }
            continue;
        }

        match (existing.identity, column.identity) {
            (None, None) => {}
            (Some(old), Some(new)) if old.increment != new.increment => {
                return Err(identity_change(&target, column, "changing the identity increment is not supported"));
            }
            (Some(old), Some(new)) => {
                if old.seed != new.seed {
                    reseeds.push(format!(
                        "DBCC CHECKIDENT ({}, RESEED, {})",
                        quote_literal(&target),
                        new.seed
                    ));
                }
            }
            (None, Some(_)) => {
                return Err(identity_change(&target, column, "adding IDENTITY to an existing column is not supported"));
            }
            (Some(_), None) => {
                return Err(identity_change(&target, column, "removing IDENTITY from a column is not supported"));
            }
        }

        if column_differs(existing, column) {
            alter_columns.push(format!(
                "ALTER TABLE {target} ALTER COLUMN {}",
                column_type_clause(column)
            ));
            touched.push(column.name.clone());
        }
    }

    // Defaults on rebuilt columns are dropped first and re-added afterwards.
    for default in &current.defaults {
        let key = name_key(&default.column);
        let rebuilt = touched.iter().any(|column| name_key(column) == key);
        let unchanged = desired_defaults
            .get(&key)
            .is_some_and(|wanted| same_default(default, wanted));
        if rebuilt || !unchanged {
            drop_defaults.push(format!(
                "ALTER TABLE {target} DROP CONSTRAINT {}",
                quote_ident(&default.name)
            ));
        }
    }
    for default in &desired.defaults {
        let key = name_key(&default.column);
        if !current_columns.contains_key(&key) {
            continue;
        }
        let rebuilt = touched.iter().any(|column| name_key(column) == key);
        let unchanged = current_defaults
            .get(&key)
            .is_some_and(|existing| same_default(existing, default));
        if rebuilt || !unchanged {
            add_defaults.push(add_default(&target, default));
        }
    }

    let statements = drop_defaults
        .into_iter()
        .chain(drop_columns)
        .chain(alter_columns)
        .chain(add_columns)
        .chain(add_defaults)
        .chain(reseeds)
        .collect();

    Ok(TableMigration {
        table: table.clone(),
        statements,
        touched_columns: touched,
        dropped_columns: dropped,
    })
}

fn by_column<'a, T>(items: &'a [T], column: impl Fn(&T) -> &String) -> BTreeMap<String, &'a T> {
    items.iter().map(|item| (name_key(column(item)), item)).collect()
}

fn identity_change(table: &str, column: &ColumnShape, detail: &'static str) -> crate::Error {
    UnsupportedError::IdentityChange {
        table: table.to_string(),
        column: column.name.clone(),
        detail,
    }
    .into()
}

fn column_differs(current: &ColumnShape, desired: &ColumnShape) -> bool {
    !current
        .data_type
        .render()
        .eq_ignore_ascii_case(&desired.data_type.render())
        || current.nullable != desired.nullable
        || !optional_eq(current.collation.as_deref(), desired.collation.as_deref())
}

fn optional_eq(left: Option<&str>, right: Option<&str>) -> bool {
    match (left, right) {
        (Some(left), Some(right)) => left.eq_ignore_ascii_case(right),
        (None, None) => true,
        _ => false,
    }
}

fn same_default(current: &DefaultConstraint, desired: &DefaultConstraint) -> bool {
    if current.definition != desired.definition || current.system_named != desired.system_named {
        return false;
    }
    current.system_named || current.name.eq_ignore_ascii_case(&desired.name)
}

/// `[name] type [COLLATE c] NULL|NOT NULL`, as used by ALTER COLUMN.
fn column_type_clause(column: &ColumnShape) -> String {
    let mut clause = format!("{} {}", quote_ident(&column.name), column.data_type.render());
    if let Some(collation) = &column.collation {
        clause.push_str(&format!(" COLLATE {collation}"));
    }
    clause.push_str(if column.nullable { " NULL" } else { " NOT NULL" });
    clause
}

fn column_definition(column: &ColumnShape, default: Option<&DefaultConstraint>) -> String {
    if let Some(computed) = &column.computed {
        let persisted = if computed.persisted { " PERSISTED" } else { "" };
        return format!("{} AS {}{persisted}", quote_ident(&column.name), computed.definition);
    }

    let mut definition = format!("{} {}", quote_ident(&column.name), column.data_type.render());
    if let Some(collation) = &column.collation {
        definition.push_str(&format!(" COLLATE {collation}"));
    }
    if let Some(identity) = column.identity {
        definition.push_str(&format!(" IDENTITY({}, {})", identity.seed, identity.increment));
    }
    definition.push_str(if column.nullable { " NULL" } else { " NOT NULL" });
    if let Some(default) = default {
        if !default.system_named {
            definition.push_str(&format!(" CONSTRAINT {}", quote_ident(&default.name)));
        }
        definition.push_str(&format!(" DEFAULT {}", default.definition));
    }
    definition
}

fn add_default(target: &str, default: &DefaultConstraint) -> String {
    if default.system_named {
        format!(
            "ALTER TABLE {target} ADD DEFAULT {} FOR {}",
            default.definition,
            quote_ident(&default.column)
        )
    } else {
        format!(
            "ALTER TABLE {target} ADD CONSTRAINT {} DEFAULT {} FOR {}",
            quote_ident(&default.name),
            default.definition,
            quote_ident(&default.column)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{ShadowRewriter, diff_table_shapes};
    use crate::{
        Error, UnsupportedError,
        catalog::{ColumnShape, ComputedColumn, DataType, DefaultConstraint, IdentitySpec, TableShape},
        name::QualifiedName,
    };

    fn column(name: &str, type_name: &str, max_length: i64, nullable: bool) -> ColumnShape {
        ColumnShape {
            name: name.to_string(),
            data_type: DataType::new(type_name, max_length, 0, 0),
            nullable,
            identity: None,
            computed: None,
            collation: None,
        }
    }

    fn identity(seed: i64, increment: i64) -> ColumnShape {
        ColumnShape {
            identity: Some(IdentitySpec { seed, increment }),
            ..column("ID", "int", 4, false)
        }
    }

    fn shape(columns: Vec<ColumnShape>, defaults: Vec<DefaultConstraint>) -> TableShape {
        TableShape {
            columns,
            defaults,
            data_space: "PRIMARY".to_string(),
        }
    }

    fn beer() -> QualifiedName {
        QualifiedName::new(Some("dbo"), "Beer")
    }

    #[test]
    fn unchanged_shapes_need_nothing() {
        let current = shape(vec![identity(1, 1), column("Name", "varchar", 128, true)], vec![]);
        let migration = diff_table_shapes(&beer(), &current, &current.clone()).expect("diff");
        assert!(migration.is_empty());
        assert!(migration.touched_columns.is_empty());
    }

    #[test]
    fn add_drop_and_widen_are_in_place() {
        let current = shape(
            vec![identity(1, 1), column("Name", "varchar", 64, true), column("Old", "int", 4, true)],
            vec![],
        );
        let desired = shape(
            vec![identity(1, 1), column("Name", "varchar", 128, true), column("Description", "varchar", -1, true)],
            vec![],
        );

        let migration = diff_table_shapes(&beer(), &current, &desired).expect("diff");
        assert_eq!(
            migration.statements,
            vec![
                "ALTER TABLE [dbo].[Beer] DROP COLUMN [Old]",
                "ALTER TABLE [dbo].[Beer] ALTER COLUMN [Name] varchar(128) NULL",
                "ALTER TABLE [dbo].[Beer] ADD [Description] varchar(MAX) NULL",
            ]
        );
        assert_eq!(migration.touched_columns, vec!["Old", "Name"]);
        assert_eq!(migration.dropped_columns, vec!["Old"]);
    }

    #[test]
    fn defaults_on_altered_columns_are_rebuilt() {
        let default = DefaultConstraint {
            name: "DF_Beer_Abv".to_string(),
            column: "Abv".to_string(),
            definition: "((0))".to_string(),
            system_named: false,
        };
        let current = shape(vec![column("Abv", "int", 4, false)], vec![default.clone()]);
        let desired = shape(vec![column("Abv", "bigint", 8, false)], vec![default]);

        let migration = diff_table_shapes(&beer(), &current, &desired).expect("diff");
        assert_eq!(
            migration.statements,
            vec![
                "ALTER TABLE [dbo].[Beer] DROP CONSTRAINT [DF_Beer_Abv]",
                "ALTER TABLE [dbo].[Beer] ALTER COLUMN [Abv] bigint NOT NULL",
                "ALTER TABLE [dbo].[Beer] ADD CONSTRAINT [DF_Beer_Abv] DEFAULT ((0)) FOR [Abv]",
            ]
        );
    }

    #[test]
    fn system_named_defaults_compare_by_definition() {
        let named = |name: &str, definition: &str| DefaultConstraint {
            name: name.to_string(),
            column: "Abv".to_string(),
            definition: definition.to_string(),
            system_named: true,
        };
        let current = shape(vec![column("Abv", "int", 4, false)], vec![named("DF__Beer__Abv__1A2B", "((0))")]);
        let same = shape(vec![column("Abv", "int", 4, false)], vec![named("DF__Beer__Abv__9F8E", "((0))")]);
        assert!(diff_table_shapes(&beer(), &current, &same).expect("diff").is_empty());

        let changed = shape(vec![column("Abv", "int", 4, false)], vec![named("DF__x", "((5))")]);
        let migration = diff_table_shapes(&beer(), &current, &changed).expect("diff");
        assert_eq!(
            migration.statements,
            vec![
                "ALTER TABLE [dbo].[Beer] DROP CONSTRAINT [DF__Beer__Abv__1A2B]",
                "ALTER TABLE [dbo].[Beer] ADD DEFAULT ((5)) FOR [Abv]",
            ]
        );
    }

    #[test]
    fn new_columns_carry_their_default_inline() {
        let current = shape(vec![identity(1, 1)], vec![]);
        let desired = shape(
            vec![identity(1, 1), column("Active", "bit", 1, false)],
            vec![DefaultConstraint {
                name: "DF_Beer_Active".to_string(),
                column: "Active".to_string(),
                definition: "((1))".to_string(),
                system_named: false,
            }],
        );
        let migration = diff_table_shapes(&beer(), &current, &desired).expect("diff");
        assert_eq!(
            migration.statements,
            vec!["ALTER TABLE [dbo].[Beer] ADD [Active] bit NOT NULL CONSTRAINT [DF_Beer_Active] DEFAULT ((1))"]
        );
    }

    #[test]
    fn computed_columns_are_dropped_and_added() {
        let computed = |definition: &str| ColumnShape {
            computed: Some(ComputedColumn {
                definition: definition.to_string(),
                persisted: false,
            }),
            ..column("Total", "int", 4, true)
        };
        let current = shape(vec![computed("([A]+[B])")], vec![]);
        let desired = shape(vec![computed("([A]*[B])")], vec![]);
        let migration = diff_table_shapes(&beer(), &current, &desired).expect("diff");
        assert_eq!(
            migration.statements,
            vec![
                "ALTER TABLE [dbo].[Beer] DROP COLUMN [Total]",
                "ALTER TABLE [dbo].[Beer] ADD [Total] AS ([A]*[B])",
            ]
        );
        assert_eq!(migration.touched_columns, vec!["Total"]);
    }

    #[test]
    fn identity_seed_reseeds_and_increment_is_unsupported() {
        let current = shape(vec![identity(1, 1)], vec![]);
        let reseeded = shape(vec![identity(100, 1)], vec![]);
        let migration = diff_table_shapes(&beer(), &current, &reseeded).expect("diff");
        assert_eq!(
            migration.statements,
            vec!["DBCC CHECKIDENT (N'[dbo].[Beer]', RESEED, 100)"]
        );

        let stepped = shape(vec![identity(1, 2)], vec![]);
        let error = diff_table_shapes(&beer(), &current, &stepped).expect_err("increment");
        assert!(matches!(
            error,
            Error::Unsupported(UnsupportedError::IdentityChange { .. })
        ));
    }

    #[test]
    fn relocating_storage_is_unsupported() {
        let current = shape(vec![identity(1, 1)], vec![]);
        let mut desired = current.clone();
        desired.data_space = "ARCHIVE".to_string();
        let error = diff_table_shapes(&beer(), &current, &desired).expect_err("relocation");
        assert!(matches!(
            error,
            Error::Unsupported(UnsupportedError::StorageRelocation { .. })
        ));
    }

    #[test]
    fn shadow_rewrite_renames_table_and_constraints() {
        let sql = "-- CREATE TABLE Nope\nCREATE TABLE Beer\n(\n\tID int CONSTRAINT PK_Beer PRIMARY KEY,\n\tName varchar(10) CONSTRAINT [DF_Name] DEFAULT ('CONSTRAINT x')\n)";
        let shadow = QualifiedName::new(Some("dbo"), "Beer_dbshape_abcd1234");
        let rewritten = ShadowRewriter::new()
            .rewrite(sql, &shadow, "_dbshape_abcd1234")
            .expect("shadow");
        assert_eq!(
            rewritten,
            "-- CREATE TABLE Nope\nCREATE TABLE [dbo].[Beer_dbshape_abcd1234]\n(\n\tID int CONSTRAINT [PK_Beer_dbshape_abcd1234] PRIMARY KEY,\n\tName varchar(10) CONSTRAINT [DF_Name_dbshape_abcd1234] DEFAULT ('CONSTRAINT x')\n)"
        );
    }
}
