//! An in-memory SQL Server stand-in. It understands the DDL the installer
//! emits well enough to run installs end to end: object creation through the
//! classifier, the kind-specific drops, in-place `ALTER TABLE` column work
//! that carries stored rows along, the registry table and transaction
//! rollback.

use std::{cell::RefCell, collections::BTreeMap, ops::Range};

use dbshape_core::{
    BEGIN_TRANSACTION_SQL, COMMIT_TRANSACTION_SQL, Catalog, Classifier, ColumnDefinition,
    ColumnShape, ComputedColumn, Connection, DEFAULT_REGISTRY_TABLE, DataType, DefaultConstraint,
    DependentObject, ExecutionError, IdentitySpec, Ident, PermissionName, QualifiedName,
    ROLLBACK_TRANSACTION_SQL, Result, Row, SchemaObjectKind, SqlValue, TableScopedName,
    TableShape, apply_identity_key_fallback, mask_comments_and_strings, name_key,
    table_scoped_name, unqualified_name,
};
use regex::{Captures, Regex};

const IDENT: &str = r#"(?:\[(?:[^\]]|\]\])+\]|"(?:[^"]|"")+"|[\w@#$]+)"#;
const DEFAULT_DATA_SPACE: &str = "PRIMARY";

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ServerError(String);

#[derive(Debug, Clone)]
struct StoredObject {
    kind: SchemaObjectKind,
    name: String,
    sql: String,
}

#[derive(Debug, Clone)]
struct FakeTable {
    name: QualifiedName,
    columns: Vec<ColumnShape>,
    defaults: Vec<DefaultConstraint>,
    primary_key: Vec<String>,
    data_space: String,
    /// Stored values keyed by lowercased column name; a missing key is NULL.
    rows: Vec<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default)]
struct ServerState {
    objects: BTreeMap<String, StoredObject>,
    tables: BTreeMap<String, FakeTable>,
    registry: BTreeMap<String, Row>,
}

struct Patterns {
    guard: Regex,
    drop_index: Regex,
    drop: Regex,
    revoke: Regex,
    alter_table: Regex,
    add_named_default: Regex,
    add_default: Regex,
    add_constraint: Regex,
    drop_constraint: Regex,
    drop_column: Regex,
    alter_column: Regex,
    add_column: Regex,
    reseed: Regex,
    create_table: Regex,
    column: Regex,
    data_type: Regex,
    identity: Regex,
    not_null: Regex,
    collate: Regex,
    primary_key: Regex,
    inline_default: Regex,
    table_constraint: Regex,
    data_space: Regex,
    registry_delete: Regex,
    registry_insert: Regex,
}

impl Patterns {
    fn new() -> Self {
        let qualified = format!(r"(?:{IDENT}\s*\.\s*)?{IDENT}");
        let compile = |pattern: &str| Regex::new(pattern).expect("fake server pattern should compile");
        Self {
            guard: compile(r"(?is)^\s*IF\s+(?:OBJECT_ID|TYPE_ID)\s*\([^)]*\)\s+IS\s+NOT\s+NULL\s+"),
            drop_index: compile(&format!(
                r"(?is)^\s*DROP\s+INDEX\s+(?P<item>{IDENT})\s+ON\s+(?P<table>{qualified})\s*;?\s*$"
            )),
            drop: compile(&format!(
                r"(?is)^\s*DROP\s+(?P<keyword>TABLE|VIEW|PROCEDURE|PROC|FUNCTION|TRIGGER|TYPE|QUEUE|ROLE|USER|LOGIN|SCHEMA|PARTITION\s+SCHEME|PARTITION\s+FUNCTION|MESSAGE\s+TYPE|CONTRACT|SERVICE|BROKER\s+PRIORITY)\s+(?P<name>{qualified})\s*;?\s*$"
            )),
            revoke: compile(r"(?is)^\s*REVOKE\s+(?P<body>.+?)\s*;?\s*$"),
            alter_table: compile(&format!(
                r"(?is)^\s*ALTER\s+TABLE\s+(?P<table>{qualified})\s+(?P<rest>.+?)\s*;?\s*$"
            )),
            add_named_default: compile(&format!(
                r"(?is)^(?:WITH\s+(?:NO)?CHECK\s+)?ADD\s+CONSTRAINT\s+(?P<name>{IDENT})\s+DEFAULT\s+(?P<expr>.+?)\s+FOR\s+(?P<column>{IDENT})$"
            )),
            add_default: compile(&format!(
                r"(?is)^ADD\s+DEFAULT\s+(?P<expr>.+?)\s+FOR\s+(?P<column>{IDENT})$"
            )),
            add_constraint: compile(&format!(
                r"(?is)^(?:WITH\s+(?:NO)?CHECK\s+)?ADD\s+CONSTRAINT\s+{IDENT}\s+(?P<constraint>PRIMARY\s+KEY|FOREIGN\s+KEY|CHECK|UNIQUE)\b"
            )),
            drop_constraint: compile(&format!(r"(?is)^DROP\s+CONSTRAINT\s+(?P<name>{IDENT})$")),
            drop_column: compile(&format!(r"(?is)^DROP\s+COLUMN\s+(?P<name>{IDENT})$")),
            alter_column: compile(r"(?is)^ALTER\s+COLUMN\s+(?P<definition>.+)$"),
            add_column: compile(r"(?is)^ADD\s+(?P<definition>.+)$"),
            reseed: compile(
                r"(?is)^\s*DBCC\s+CHECKIDENT\s*\(\s*N'(?P<table>(?:[^']|'')+)'\s*,\s*RESEED\s*,\s*(?P<seed>-?\d+)\s*\)\s*;?\s*$",
            ),
            create_table: compile(&format!(r"(?is)\bCREATE\s+TABLE\s+{qualified}\s*\(")),
            column: compile(&format!(r"(?is)^\s*(?P<name>{IDENT})\s+(?P<rest>.*)$")),
            data_type: compile(r"(?is)^(?P<type>\[?[A-Za-z_]\w*\]?)(?:\s*\(\s*(?P<args>[^)]*)\))?"),
            identity: compile(r"(?is)\bIDENTITY\b(?:\s*\(\s*(?P<seed>-?\d+)\s*,\s*(?P<increment>-?\d+)\s*\))?"),
            not_null: compile(r"(?is)\bNOT\s+NULL\b"),
            collate: compile(r"(?is)\bCOLLATE\s+(?P<collation>\w+)"),
            primary_key: compile(r"(?is)\bPRIMARY\s+KEY\b"),
            inline_default: compile(&format!(
                r"(?is)(?:\bCONSTRAINT\s+(?P<name>{IDENT})\s+)?\bDEFAULT\s+"
            )),
            table_constraint: compile(&format!(
                r"(?is)^\s*(?:CONSTRAINT\s+{IDENT}\s+)?(?P<constraint>PRIMARY\s+KEY|FOREIGN\s+KEY|CHECK|UNIQUE)\b"
            )),
            data_space: compile(&format!(r"(?is)^\s*ON\s+(?P<space>{IDENT})")),
            registry_delete: compile(
                r"(?s)^DELETE FROM .+? WHERE \[ObjectName\] = N'(?P<name>(?:[^']|'')*)'$",
            ),
            registry_insert: compile(
                r"(?s)^INSERT INTO .+? VALUES \(N'(?P<group>(?:[^']|'')*)', N'(?P<name>(?:[^']|'')*)', N'(?P<signature>(?:[^']|'')*)', N'(?P<kind>(?:[^']|'')*)', (?P<order>\d+)\)$",
            ),
        }
    }
}

/// Implements both [`Connection`] and [`Catalog`], so an installer can be
/// pointed at it with `Installer::new(&server, ..).with_catalog(&server)`.
pub struct FakeServer {
    state: RefCell<ServerState>,
    snapshot: RefCell<Option<ServerState>>,
    executed: RefCell<Vec<String>>,
    fail_on: RefCell<Option<String>>,
    registry_table: String,
    classifier: Classifier,
    patterns: Patterns,
}

impl Default for FakeServer {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeServer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RefCell::new(ServerState::default()),
            snapshot: RefCell::new(None),
            executed: RefCell::new(Vec::new()),
            fail_on: RefCell::new(None),
            registry_table: DEFAULT_REGISTRY_TABLE.to_string(),
            classifier: Classifier::standard(),
            patterns: Patterns::new(),
        }
    }

    /// Every batch received, including transaction control.
    pub fn executed_sql(&self) -> Vec<String> {
        self.executed.borrow().clone()
    }

    pub fn clear_log(&self) {
        self.executed.borrow_mut().clear();
    }

    /// Fails the next batches whose text contains `fragment`.
    pub fn fail_on_sql(&self, fragment: impl Into<String>) {
        *self.fail_on.borrow_mut() = Some(fragment.into());
    }

    pub fn clear_failure(&self) {
        self.fail_on.borrow_mut().take();
    }

    pub fn in_transaction(&self) -> bool {
        self.snapshot.borrow().is_some()
    }

    /// Canonical names of every object of `kind`, sorted.
    pub fn object_names(&self, kind: SchemaObjectKind) -> Vec<String> {
        self.state
            .borrow()
            .objects
            .values()
            .filter(|object| object.kind == kind)
            .map(|object| object.name.clone())
            .collect()
    }

    pub fn object_sql(&self, name: &str) -> Option<String> {
        self.state
            .borrow()
            .objects
            .get(&name_key(name))
            .map(|object| object.sql.clone())
    }

    pub fn column_names(&self, table: &str) -> Vec<String> {
        self.state
            .borrow()
            .tables
            .get(&name_key(table))
            .map(|table| table.columns.iter().map(|column| column.name.clone()).collect())
            .unwrap_or_default()
    }

    /// Stores one row in `table`. Columns left out hold NULL.
    pub fn insert_row(&self, table: &str, values: &[(&str, &str)]) -> std::result::Result<(), ServerError> {
        let mut state = self.state.borrow_mut();
        let Some(fake) = state.tables.get_mut(&name_key(table)) else {
            return Err(ServerError(format!("Invalid object name '{table}'.")));
        };
        let mut row = BTreeMap::new();
        for (column, value) in values {
            let Some(shape) = fake.columns.iter().find(|shape| shape.name.eq_ignore_ascii_case(column)) else {
                return Err(ServerError(format!("Invalid column name '{column}'.")));
            };
            if char_capacity(&shape.data_type).is_some_and(|capacity| value.chars().count() > capacity) {
                return Err(ServerError(truncation_message(&shape.name)));
            }
            row.insert(column.to_ascii_lowercase(), (*value).to_string());
        }
        for default in &fake.defaults {
            row.entry(default.column.to_ascii_lowercase())
                .or_insert_with(|| default.definition.clone());
        }
        if let Some(shape) = fake
            .columns
            .iter()
            .find(|shape| !shape.nullable && shape.identity.is_none() && !row.contains_key(&shape.name.to_ascii_lowercase()))
        {
            return Err(ServerError(null_message(&shape.name)));
        }
        fake.rows.push(row);
        Ok(())
    }

    /// Values of one column in insertion order, `None` for NULL.
    pub fn column_values(&self, table: &str, column: &str) -> Vec<Option<String>> {
        let key = column.to_ascii_lowercase();
        self.state
            .borrow()
            .tables
            .get(&name_key(table))
            .map(|table| table.rows.iter().map(|row| row.get(&key).cloned()).collect())
            .unwrap_or_default()
    }

    /// Registered object names of one group in declaration order.
    pub fn registered(&self, group: &str) -> Vec<String> {
        let state = self.state.borrow();
        let mut rows = state
            .registry
            .values()
            .filter(|row| {
                matches!(row.get(0), Some(SqlValue::Text(row_group)) if row_group.eq_ignore_ascii_case(group))
            })
            .filter_map(|row| match (row.get(1), row.get(4)) {
                (Some(SqlValue::Text(name)), Some(SqlValue::Int(order))) => Some((*order, name.clone())),
                _ => None,
            })
            .collect::<Vec<_>>();
        rows.sort();
        rows.into_iter().map(|(_, name)| name).collect()
    }

    /// Removes an object behind the installer's back, as a DBA might.
    pub fn drop_out_of_band(&self, name: &str) -> bool {
        let mut state = self.state.borrow_mut();
        let key = name_key(name);
        let Some(kind) = state.objects.get(&key).map(|object| object.kind) else {
            return false;
        };
        remove_object(&mut state, kind, &key);
        true
    }

    fn registry_batch(&self, sql: &str) -> std::result::Result<(), String> {
        if sql.trim_start().starts_with("IF ") {
            return Ok(());
        }

        let mut state = self.state.borrow_mut();
        for statement in sql.split(";\n").map(str::trim) {
            if let Some(captures) = self.patterns.registry_delete.captures(statement) {
                state.registry.remove(&name_key(&unescape(&captures["name"])));
            } else if let Some(captures) = self.patterns.registry_insert.captures(statement) {
                let name = unescape(&captures["name"]);
                let order = captures["order"]
                    .parse::<i64>()
                    .map_err(|error| error.to_string())?;
                let row = Row::new(vec![
                    SqlValue::Text(unescape(&captures["group"])),
                    SqlValue::Text(name.clone()),
                    SqlValue::Text(unescape(&captures["signature"])),
                    SqlValue::Text(unescape(&captures["kind"])),
                    SqlValue::Int(order),
                ]);
                if state.registry.insert(name_key(&name), row).is_some() {
                    return Err(format!("Violation of PRIMARY KEY constraint; duplicate key ({name})"));
                }
            } else {
                return Err(format!("unsupported registry statement: {statement}"));
            }
        }
        Ok(())
    }

    fn apply(&self, sql: &str) -> std::result::Result<(), String> {
        let patterns = &self.patterns;
        let masked_full = mask_comments_and_strings(sql);
        let (text, masked, lenient) = match patterns.guard.find(&masked_full) {
            Some(guard) => (&sql[guard.end()..], &masked_full[guard.end()..], true),
            None => (sql, masked_full.as_str(), false),
        };
        let mut state = self.state.borrow_mut();

        if let Some(captures) = patterns.drop_index.captures(masked) {
            let table = qualified(&captures["table"])?;
            let key = name_key(&table_scoped_name(&table, &captures["item"]));
            let found = state
                .objects
                .get(&key)
                .is_some_and(|object| matches!(object.kind, SchemaObjectKind::Index | SchemaObjectKind::IndexedView));
            return match (found, lenient) {
                (true, _) => {
                    state.objects.remove(&key);
                    Ok(())
                }
                (false, true) => Ok(()),
                (false, false) => Err(format!("Cannot drop the index '{key}', because it does not exist")),
            };
        }

        if let Some(captures) = patterns.drop.captures(masked) {
            let kind = drop_kind(&captures["keyword"]);
            let name = if matches!(
                kind,
                SchemaObjectKind::Table
                    | SchemaObjectKind::View
                    | SchemaObjectKind::StoredProcedure
                    | SchemaObjectKind::Function
                    | SchemaObjectKind::Trigger
                    | SchemaObjectKind::UserDefinedType
                    | SchemaObjectKind::Queue
            ) {
                qualified(&captures["name"])?.canonical()
            } else {
                unqualified_name(&captures["name"])
            };
            let key = name_key(&name);
            let found = state.objects.get(&key).is_some_and(|object| object.kind == kind);
            return match (found, lenient) {
                (true, _) => {
                    remove_object(&mut state, kind, &key);
                    Ok(())
                }
                (false, true) => Ok(()),
                (false, false) => Err(format!(
                    "Cannot drop the {} '{name}', because it does not exist or you do not have permission.",
                    captures["keyword"].to_ascii_lowercase()
                )),
            };
        }

        if let Some(captures) = patterns.revoke.captures(text) {
            let body = &captures["body"];
            let grant = match body.rfind(" FROM ") {
                Some(at) => format!("GRANT {} TO {}", &body[..at], &body[at + " FROM ".len()..]),
                None => return Err(format!("malformed REVOKE: {body}")),
            };
            if let Some(mut permission) = PermissionName::parse(&grant) {
                state.objects.remove(&name_key(&permission.canonical()));
                permission.deny = true;
                state.objects.remove(&name_key(&permission.canonical()));
            }
            return Ok(());
        }

        if let Some(captures) = patterns.alter_table.captures(masked) {
            let table = qualified(&captures["table"])?;
            let Some(rest) = captures.name("rest") else {
                return Err("ALTER TABLE without an action".to_string());
            };
            return self.alter_table(
                &mut state,
                &table,
                &text[rest.range()],
                &masked[rest.range()],
                text,
            );
        }

        if let Some(captures) = patterns.reseed.captures(text) {
            let table = qualified(&unescape(&captures["table"]))?;
            let seed = captures["seed"].parse::<i64>().map_err(|error| error.to_string())?;
            let fake = table_mut(&mut state, &table)?;
            for column in &mut fake.columns {
                if let Some(identity) = column.identity.as_mut() {
                    identity.seed = seed;
                }
            }
            return Ok(());
        }

        let classification = self
            .classifier
            .classify(text)
            .map_err(|error| error.to_string())?;
        let (kind, name) = (classification.kind, classification.name);
        let key = name_key(&name);
        match kind {
            SchemaObjectKind::Unused | SchemaObjectKind::Script | SchemaObjectKind::PreScript => {
                return Ok(());
            }
            SchemaObjectKind::AutoProc => {
                return Err("AUTOPROC directives cannot be executed".to_string());
            }
            SchemaObjectKind::Permission => {
                state.objects.insert(
                    key,
                    StoredObject {
                        kind,
                        name,
                        sql: text.trim().to_string(),
                    },
                );
                return Ok(());
            }
            _ => {}
        }

        let replace = Regex::new(r"(?is)\bCREATE\s+OR\s+ALTER\b")
            .map_err(|error| error.to_string())?
            .is_match(masked);
        if state.objects.contains_key(&key) && !replace {
            return Err(format!(
                "There is already an object named '{name}' in the database."
            ));
        }

        if kind.is_table_scoped() {
            let Some(scoped) = TableScopedName::parse(&name) else {
                return Err(format!("malformed table-scoped name {name}"));
            };
            if !state.objects.contains_key(&name_key(&scoped.table.canonical())) {
                return Err(format!(
                    "Cannot find the object \"{}\" because it does not exist.",
                    scoped.table.canonical()
                ));
            }
        }

        if kind == SchemaObjectKind::Table {
            let table = QualifiedName::parse(&name).ok_or_else(|| format!("malformed table name {name}"))?;
            let fake = self.parse_table(table, text, masked)?;
            state.tables.insert(key.clone(), fake);
        }

        state.objects.insert(
            key,
            StoredObject {
                kind,
                name,
                sql: text.trim().to_string(),
            },
        );
        Ok(())
    }

    fn alter_table(
        &self,
        state: &mut ServerState,
        table: &QualifiedName,
        rest: &str,
        masked_rest: &str,
        statement: &str,
    ) -> std::result::Result<(), String> {
        let patterns = &self.patterns;

        if let Some(captures) = patterns.add_named_default.captures(masked_rest) {
            let name = Ident::parse(&captures["name"]).value;
            let column = Ident::parse(&captures["column"]).value;
            let definition = slice(rest, &captures, "expr");
            return add_default(state, table, name, column, definition, false);
        }

        if let Some(captures) = patterns.add_default.captures(masked_rest) {
            let column = Ident::parse(&captures["column"]).value;
            let name = system_default_name(table, &column);
            let definition = slice(rest, &captures, "expr");
            return add_default(state, table, name, column, definition, true);
        }

        if let Some(captures) = patterns.add_constraint.captures(masked_rest) {
            let classification = self
                .classifier
                .classify(statement)
                .map_err(|error| error.to_string())?;
            let key = name_key(&classification.name);
            if state.objects.contains_key(&key) {
                return Err(format!(
                    "There is already an object named '{}' in the database.",
                    classification.name
                ));
            }
            if captures["constraint"].to_ascii_uppercase().starts_with("PRIMARY") {
                let columns = parenthesized_columns(masked_rest);
                table_mut(state, table)?.primary_key = columns;
            } else {
                table_mut(state, table)?;
            }
            state.objects.insert(
                key,
                StoredObject {
                    kind: classification.kind,
                    name: classification.name,
                    sql: statement.trim().to_string(),
                },
            );
            return Ok(());
        }

        if let Some(captures) = patterns.drop_constraint.captures(masked_rest) {
            let name = Ident::parse(&captures["name"]).value;
            let fake = table_mut(state, table)?;
            let before = fake.defaults.len();
            fake.defaults.retain(|default| !default.name.eq_ignore_ascii_case(&name));
            if fake.defaults.len() != before {
                return Ok(());
            }
            let key = name_key(&table_scoped_name(table, &name));
            let Some(kind) = state.objects.get(&key).map(|object| object.kind) else {
                return Err(format!(
                    "'{name}' is not a constraint. Could not drop constraint."
                ));
            };
            if kind == SchemaObjectKind::PrimaryKey {
                table_mut(state, table)?.primary_key.clear();
            }
            remove_object(state, kind, &key);
            return Ok(());
        }

        if let Some(captures) = patterns.drop_column.captures(masked_rest) {
            let column = Ident::parse(&captures["name"]).value;
            ensure_column_unbound(state, table, &column)?;
            let fake = table_mut(state, table)?;
            let before = fake.columns.len();
            fake.columns.retain(|existing| !existing.name.eq_ignore_ascii_case(&column));
            if fake.columns.len() == before {
                return Err(format!("Invalid column name '{column}'."));
            }
            let key = column.to_ascii_lowercase();
            for row in &mut fake.rows {
                row.remove(&key);
            }
            return Ok(());
        }

        if let Some(captures) = patterns.alter_column.captures(masked_rest) {
            let parsed = self.parse_column(
                slice(rest, &captures, "definition"),
                &captures["definition"],
                &table.name.value,
            )?;
            ensure_column_unbound(state, table, &parsed.shape.name)?;
            let fake = table_mut(state, table)?;
            let Some(existing) = fake
                .columns
                .iter_mut()
                .find(|existing| existing.name.eq_ignore_ascii_case(&parsed.shape.name))
            else {
                return Err(format!("Invalid column name '{}'.", parsed.shape.name));
            };
            let key = existing.name.to_ascii_lowercase();
            let stored = fake.rows.iter().filter_map(|row| row.get(&key));
            if let Some(capacity) = char_capacity(&parsed.shape.data_type)
                && stored.clone().any(|value| value.chars().count() > capacity)
            {
                return Err(truncation_message(&existing.name));
            }
            if !parsed.shape.nullable && stored.count() < fake.rows.len() {
                return Err(null_message(&existing.name));
            }
            existing.data_type = parsed.shape.data_type;
            existing.nullable = parsed.shape.nullable;
            existing.collation = parsed.shape.collation;
            return Ok(());
        }

        if let Some(captures) = patterns.add_column.captures(masked_rest) {
            let parsed = self.parse_column(
                slice(rest, &captures, "definition"),
                &captures["definition"],
                &table.name.value,
            )?;
            let fake = table_mut(state, table)?;
            if fake
                .columns
                .iter()
                .any(|existing| existing.name.eq_ignore_ascii_case(&parsed.shape.name))
            {
                return Err(format!(
                    "Column names in each table must be unique. Column name '{}' is specified more than once.",
                    parsed.shape.name
                ));
            }
            let key = parsed.shape.name.to_ascii_lowercase();
            match (&parsed.default, parsed.shape.nullable) {
                // Only a NOT NULL column takes its default into existing rows.
                (Some(default), false) => {
                    for row in &mut fake.rows {
                        row.insert(key.clone(), default.definition.clone());
                    }
                }
                (None, false) if parsed.shape.identity.is_none() && !fake.rows.is_empty() => {
                    return Err(format!(
                        "ALTER TABLE only allows columns to be added that can contain nulls, or have a DEFAULT definition specified. Column '{}' cannot be added to non-empty table '{}'.",
                        parsed.shape.name, table.name.value
                    ));
                }
                _ => {}
            }
            if let Some(default) = parsed.default {
                fake.defaults.push(default);
            }
            fake.columns.push(parsed.shape);
            return Ok(());
        }

        Err(format!("unsupported ALTER TABLE action: {rest}"))
    }

    fn parse_table(
        &self,
        name: QualifiedName,
        text: &str,
        masked: &str,
    ) -> std::result::Result<FakeTable, String> {
        let open = self
            .patterns
            .create_table
            .find(masked)
            .map(|found| found.end() - 1)
            .ok_or_else(|| format!("CREATE TABLE {name} has no column list"))?;
        let close = matching_paren(masked, open)
            .ok_or_else(|| format!("CREATE TABLE {name} has an unbalanced column list"))?;

        let data_space = self
            .patterns
            .data_space
            .captures(&masked[close + 1..])
            .map(|captures| Ident::parse(&captures["space"]).value)
            .unwrap_or_else(|| DEFAULT_DATA_SPACE.to_string());

        let mut table = FakeTable {
            name,
            columns: Vec::new(),
            defaults: Vec::new(),
            primary_key: Vec::new(),
            data_space,
            rows: Vec::new(),
        };

        let body = open + 1..close;
        for item in split_top_level(&masked[body.clone()]) {
            let range = body.start + item.start..body.start + item.end;
            let (item_text, item_masked) = (&text[range.clone()], &masked[range]);
            if item_masked.trim().is_empty() {
                continue;
            }

            if let Some(captures) = self.patterns.table_constraint.captures(item_masked) {
                if captures["constraint"].to_ascii_uppercase().starts_with("PRIMARY") {
                    table.primary_key = parenthesized_columns(item_masked);
                }
                continue;
            }

            let parsed = self.parse_column(item_text, item_masked, &table.name.name.value)?;
            if parsed.primary_key {
                table.primary_key.push(parsed.shape.name.clone());
            }
            if let Some(default) = parsed.default {
                table.defaults.push(default);
            }
            table.columns.push(parsed.shape);
        }

        for column in &mut table.columns {
            if table
                .primary_key
                .iter()
                .any(|key| key.eq_ignore_ascii_case(&column.name))
            {
                column.nullable = false;
            }
        }
        Ok(table)
    }

    fn parse_column(
        &self,
        text: &str,
        masked: &str,
        table: &str,
    ) -> std::result::Result<ParsedColumn, String> {
        let patterns = &self.patterns;
        let captures = patterns
            .column
            .captures(masked)
            .ok_or_else(|| format!("cannot parse column definition `{}`", text.trim()))?;
        let name = Ident::parse(&captures["name"]).value;
        let Some(rest_range) = captures.name("rest").map(|rest| rest.range()) else {
            return Err(format!("column {name} has no type"));
        };
        let (rest, masked_rest) = (&text[rest_range.clone()], &masked[rest_range]);

        if let Some(expression) = masked_rest
            .get(..3)
            .filter(|head| head.eq_ignore_ascii_case("AS "))
            .map(|_| rest[3..].trim())
        {
            let persisted = expression.to_ascii_uppercase().ends_with("PERSISTED");
            let end = if persisted {
                expression.len() - "PERSISTED".len()
            } else {
                expression.len()
            };
            let definition = expression.get(..end).unwrap_or(expression).trim().to_string();
            return Ok(ParsedColumn {
                shape: ColumnShape {
                    name,
                    data_type: DataType::new("computed", 0, 0, 0),
                    nullable: true,
                    identity: None,
                    computed: Some(ComputedColumn {
                        definition,
                        persisted,
                    }),
                    collation: None,
                },
                default: None,
                primary_key: false,
            });
        }

        let data_type = patterns
            .data_type
            .captures(masked_rest)
            .ok_or_else(|| format!("column {name} has no type"))?;
        let type_name = Ident::parse(&data_type["type"]).value;
        let data_type_end = data_type.get(0).map_or(0, |matched| matched.end());
        let data_type = parse_data_type(&type_name, data_type.name("args").map(|args| args.as_str()));
        let flags = &masked_rest[data_type_end..];

        let identity = patterns.identity.captures(flags).map(|captures| IdentitySpec {
            seed: captures
                .name("seed")
                .and_then(|seed| seed.as_str().parse().ok())
                .unwrap_or(1),
            increment: captures
                .name("increment")
                .and_then(|increment| increment.as_str().parse().ok())
                .unwrap_or(1),
        });
        let collation = patterns
            .collate
            .captures(flags)
            .map(|captures| captures["collation"].to_string());
        let primary_key = patterns.primary_key.is_match(flags);
        let nullable = !(patterns.not_null.is_match(flags) || identity.is_some() || primary_key);

        let default = match patterns.inline_default.captures(flags) {
            Some(captures) => {
                let start = data_type_end + captures.get(0).map_or(0, |matched| matched.end());
                let definition = default_expression(&rest[start..], &masked_rest[start..]);
                let (default_name, system_named) = match captures.name("name") {
                    Some(explicit) => (Ident::parse(explicit.as_str()).value, false),
                    None => (format!("DF__{table}__{name}"), true),
                };
                Some(DefaultConstraint {
                    name: default_name,
                    column: name.clone(),
                    definition,
                    system_named,
                })
            }
            None => None,
        };

        Ok(ParsedColumn {
            shape: ColumnShape {
                name,
                data_type,
                nullable,
                identity,
                computed: None,
                collation,
            },
            default,
            primary_key,
        })
    }

    fn modules_referencing(state: &ServerState, name: &str) -> Vec<DependentObject> {
        state
            .objects
            .values()
            .filter(|object| {
                matches!(
                    object.kind,
                    SchemaObjectKind::View
                        | SchemaObjectKind::StoredProcedure
                        | SchemaObjectKind::Function
                        | SchemaObjectKind::Trigger
                )
            })
            .filter(|object| name_key(&object.name) != name_key(name) && references(&object.sql, name))
            .map(|object| {
                let schema_bound = mask_comments_and_strings(&object.sql)
                    .to_ascii_uppercase()
                    .contains("SCHEMABINDING");
                to_dependent(object).schema_bound(schema_bound)
            })
            .collect()
    }
}

impl Connection for FakeServer {
    fn execute(&self, sql: &str) -> Result<u64> {
        self.executed.borrow_mut().push(sql.to_string());
        if let Some(fragment) = self.fail_on.borrow().as_deref()
            && sql.contains(fragment)
        {
            return Err(failure(sql, format!("injected failure on `{fragment}`")));
        }

        match sql {
            BEGIN_TRANSACTION_SQL => {
                *self.snapshot.borrow_mut() = Some(self.state.borrow().clone());
                return Ok(0);
            }
            COMMIT_TRANSACTION_SQL => {
                self.snapshot.borrow_mut().take();
                return Ok(0);
            }
            ROLLBACK_TRANSACTION_SQL => {
                if let Some(snapshot) = self.snapshot.borrow_mut().take() {
                    *self.state.borrow_mut() = snapshot;
                }
                return Ok(0);
            }
            _ => {}
        }

        let outcome = if sql.contains(&self.registry_table) {
            self.registry_batch(sql)
        } else {
            self.apply(sql)
        };
        outcome.map(|()| 0).map_err(|message| failure(sql, message))
    }

    fn query(&self, sql: &str, _params: &[SqlValue]) -> Result<Vec<Row>> {
        if sql.trim_start().starts_with("SELECT") && sql.contains(&self.registry_table) {
            return Ok(self.state.borrow().registry.values().cloned().collect());
        }
        Err(failure(sql, "the fake server only answers registry queries".to_string()))
    }
}

impl Catalog for FakeServer {
    fn object_exists(&self, kind: SchemaObjectKind, name: &str) -> Result<bool> {
        if matches!(
            kind,
            SchemaObjectKind::AutoProc
                | SchemaObjectKind::Script
                | SchemaObjectKind::PreScript
                | SchemaObjectKind::Unused
        ) {
            return Ok(true);
        }

        let state = self.state.borrow();
        let key = name_key(name);
        if state.objects.get(&key).is_some_and(|object| object.kind == kind) {
            return Ok(true);
        }
        if kind != SchemaObjectKind::Default {
            return Ok(false);
        }
        let Some(scoped) = TableScopedName::parse(name) else {
            return Ok(false);
        };
        Ok(state
            .tables
            .get(&name_key(&scoped.table.canonical()))
            .is_some_and(|table| {
                table
                    .defaults
                    .iter()
                    .any(|default| default.name.eq_ignore_ascii_case(&scoped.name.value))
            }))
    }

    fn column_definitions(&self, table: &QualifiedName) -> Result<Vec<ColumnDefinition>> {
        let state = self.state.borrow();
        let Some(fake) = state.tables.get(&name_key(&table.canonical())) else {
            return Ok(Vec::new());
        };

        let mut columns = fake
            .columns
            .iter()
            .map(|column| {
                let sql_type = if column.computed.is_some() {
                    "sql_variant".to_string()
                } else {
                    column.data_type.render()
                };
                let mut definition = ColumnDefinition::new(column.name.clone(), sql_type);
                if fake
                    .primary_key
                    .iter()
                    .any(|key| key.eq_ignore_ascii_case(&column.name))
                {
                    definition = definition.key();
                }
                if column.identity.is_some() {
                    definition = definition.identity();
                }
                if column.computed.is_some()
                    || column.data_type.name.eq_ignore_ascii_case("rowversion")
                    || column.data_type.name.eq_ignore_ascii_case("timestamp")
                {
                    definition = definition.read_only();
                }
                definition
            })
            .collect::<Vec<_>>();
        apply_identity_key_fallback(&mut columns);
        Ok(columns)
    }

    fn table_shape(&self, table: &QualifiedName) -> Result<Option<TableShape>> {
        Ok(self
            .state
            .borrow()
            .tables
            .get(&name_key(&table.canonical()))
            .map(|fake| TableShape {
                columns: fake.columns.clone(),
                defaults: fake.defaults.clone(),
                data_space: fake.data_space.clone(),
            }))
    }

    fn dependents(&self, kind: SchemaObjectKind, name: &str) -> Result<Vec<DependentObject>> {
        use SchemaObjectKind as K;

        let state = self.state.borrow();
        let key = name_key(name);
        let mut found = Vec::new();
        match kind {
            K::Table => {
                found.extend(Self::modules_referencing(&state, name));
                found.extend(foreign_keys_referencing(&state, name));
                found.extend(permissions_on(&state, &key));
            }
            K::View => {
                found.extend(Self::modules_referencing(&state, name));
                found.extend(
                    children(&state, &key)
                        .filter(|object| matches!(object.kind, K::Index | K::IndexedView))
                        .map(|object| to_dependent(object).schema_bound(true)),
                );
                found.extend(permissions_on(&state, &key));
            }
            K::Function => {
                found.extend(Self::modules_referencing(&state, name));
                found.extend(
                    state
                        .objects
                        .values()
                        .filter(|object| object.kind == K::Constraint && references(&object.sql, name))
                        .map(to_dependent),
                );
                found.extend(permissions_on(&state, &key));
            }
            K::StoredProcedure | K::UserDefinedType => {
                found.extend(Self::modules_referencing(&state, name));
                found.extend(permissions_on(&state, &key));
            }
            K::PrimaryKey | K::Index | K::Constraint => {
                if let Some(scoped) = TableScopedName::parse(name) {
                    found.extend(foreign_keys_referencing(&state, &scoped.table.canonical()));
                }
            }
            _ => {}
        }
        Ok(found)
    }

    fn column_dependents(
        &self,
        table: &QualifiedName,
        columns: &[String],
    ) -> Result<Vec<DependentObject>> {
        let state = self.state.borrow();
        let key = name_key(&table.canonical());
        Ok(children(&state, &key)
            .filter(|object| {
                matches!(
                    object.kind,
                    SchemaObjectKind::Index
                        | SchemaObjectKind::PrimaryKey
                        | SchemaObjectKind::ForeignKey
                        | SchemaObjectKind::Constraint
                )
            })
            .filter(|object| columns.iter().any(|column| mentions(&object.sql, column)))
            .map(to_dependent)
            .collect())
    }
}

struct ParsedColumn {
    shape: ColumnShape,
    default: Option<DefaultConstraint>,
    primary_key: bool,
}

fn failure(sql: &str, message: String) -> dbshape_core::Error {
    ExecutionError::statement_failed(sql, ServerError(message)).into()
}

fn qualified(text: &str) -> std::result::Result<QualifiedName, String> {
    QualifiedName::parse(text).ok_or_else(|| format!("malformed object name {text}"))
}

fn table_mut<'s>(
    state: &'s mut ServerState,
    table: &QualifiedName,
) -> std::result::Result<&'s mut FakeTable, String> {
    state
        .tables
        .get_mut(&name_key(&table.canonical()))
        .ok_or_else(|| format!("Cannot find the object \"{}\" because it does not exist.", table.canonical()))
}

/// Characters a string column holds, `None` for `MAX` and non-string types.
fn char_capacity(data_type: &DataType) -> Option<usize> {
    if data_type.max_length < 0 {
        return None;
    }
    let bytes = usize::try_from(data_type.max_length).ok()?;
    match data_type.name.to_ascii_lowercase().as_str() {
        "nvarchar" | "nchar" => Some(bytes / 2),
        "varchar" | "char" | "varbinary" | "binary" => Some(bytes),
        _ => None,
    }
}

fn truncation_message(column: &str) -> String {
    format!("String or binary data would be truncated in column '{column}'.")
}

fn null_message(column: &str) -> String {
    format!("Cannot insert the value NULL into column '{column}'; column does not allow nulls.")
}

fn drop_kind(keyword: &str) -> SchemaObjectKind {
    use SchemaObjectKind as K;

    let keyword = keyword.split_whitespace().collect::<Vec<_>>().join(" ");
    match keyword.to_ascii_uppercase().as_str() {
        "TABLE" => K::Table,
        "VIEW" => K::View,
        "PROCEDURE" | "PROC" => K::StoredProcedure,
        "FUNCTION" => K::Function,
        "TRIGGER" => K::Trigger,
        "TYPE" => K::UserDefinedType,
        "QUEUE" => K::Queue,
        "ROLE" => K::Role,
        "USER" => K::User,
        "LOGIN" => K::Login,
        "SCHEMA" => K::Schema,
        "PARTITION SCHEME" => K::PartitionScheme,
        "PARTITION FUNCTION" => K::PartitionFunction,
        "MESSAGE TYPE" => K::MessageType,
        "CONTRACT" => K::Contract,
        "SERVICE" => K::Service,
        _ => K::BrokerPriority,
    }
}

/// Drops the object with everything the server drops alongside it: a
/// table's indexes and constraints, and permissions granted on it.
fn remove_object(state: &mut ServerState, kind: SchemaObjectKind, key: &str) {
    state.objects.remove(key);
    if kind == SchemaObjectKind::Table {
        state.tables.remove(key);
    }
    let prefix = format!("{key}.");
    let on_object = format!(" on {key} to ");
    let on_type = format!(" on type::{key} to ");
    state.objects.retain(|child_key, object| {
        let child = child_key.starts_with(&prefix);
        let permission = object.kind == SchemaObjectKind::Permission
            && (child_key.contains(&on_object) || child_key.contains(&on_type));
        !(child || permission)
    });
}

fn add_default(
    state: &mut ServerState,
    table: &QualifiedName,
    name: String,
    column: String,
    definition: &str,
    system_named: bool,
) -> std::result::Result<(), String> {
    let fake = table_mut(state, table)?;
    if !fake
        .columns
        .iter()
        .any(|existing| existing.name.eq_ignore_ascii_case(&column))
    {
        return Err(format!("Invalid column name '{column}'."));
    }
    if fake
        .defaults
        .iter()
        .any(|default| default.column.eq_ignore_ascii_case(&column))
    {
        return Err(format!(
            "Column already has a DEFAULT bound to it. ({column})"
        ));
    }
    fake.defaults.push(DefaultConstraint {
        name,
        column,
        definition: definition.trim().to_string(),
        system_named,
    });
    Ok(())
}

fn system_default_name(table: &QualifiedName, column: &str) -> String {
    format!("DF__{}__{column}", table.name.value)
}

/// A column cannot be dropped or altered while a default or index uses it.
fn ensure_column_unbound(
    state: &ServerState,
    table: &QualifiedName,
    column: &str,
) -> std::result::Result<(), String> {
    let key = name_key(&table.canonical());
    if let Some(default) = state.tables.get(&key).and_then(|fake| {
        fake.defaults
            .iter()
            .find(|default| default.column.eq_ignore_ascii_case(column))
    }) {
        return Err(format!(
            "The object '{}' is dependent on column '{column}'.",
            default.name
        ));
    }
    if let Some(object) = children(state, &key).find(|object| {
        matches!(object.kind, SchemaObjectKind::Index | SchemaObjectKind::ForeignKey | SchemaObjectKind::Constraint)
            && mentions(&object.sql, column)
    }) {
        return Err(format!(
            "The object '{}' is dependent on column '{column}'.",
            object.name
        ));
    }
    Ok(())
}

fn children<'s>(state: &'s ServerState, key: &str) -> impl Iterator<Item = &'s StoredObject> + 's {
    let prefix = format!("{key}.");
    state
        .objects
        .iter()
        .filter(move |(child_key, _)| child_key.starts_with(&prefix))
        .map(|(_, object)| object)
}

fn foreign_keys_referencing(state: &ServerState, table: &str) -> Vec<DependentObject> {
    state
        .objects
        .values()
        .filter(|object| object.kind == SchemaObjectKind::ForeignKey)
        .filter(|object| {
            let upper = mask_comments_and_strings(&object.sql).to_ascii_uppercase();
            upper
                .find("REFERENCES")
                .is_some_and(|at| references(&object.sql[at..], table))
        })
        .map(to_dependent)
        .collect()
}

fn permissions_on(state: &ServerState, key: &str) -> Vec<DependentObject> {
    let on_object = format!(" on {key} to ");
    let on_type = format!(" on type::{key} to ");
    state
        .objects
        .iter()
        .filter(|(object_key, object)| {
            object.kind == SchemaObjectKind::Permission
                && (object_key.contains(&on_object) || object_key.contains(&on_type))
        })
        .map(|(_, object)| to_dependent(object))
        .collect()
}

fn to_dependent(object: &StoredObject) -> DependentObject {
    DependentObject::new(object.kind, object.name.clone(), object.sql.clone())
}

/// Whether `sql` mentions the last part of `name` as a whole identifier.
fn references(sql: &str, name: &str) -> bool {
    QualifiedName::parse(name).is_some_and(|target| mentions(sql, &target.name.value))
}

fn mentions(sql: &str, identifier: &str) -> bool {
    let pattern = format!(
        r"(?i)(?:^|[^\w@#$])\[?{}\]?(?:[^\w@#$]|$)",
        regex::escape(identifier)
    );
    Regex::new(&pattern).is_ok_and(|pattern| pattern.is_match(&mask_comments_and_strings(sql)))
}

fn parse_data_type(name: &str, args: Option<&str>) -> DataType {
    let name = name.to_ascii_lowercase();
    let args = args
        .map(|args| args.split(',').map(str::trim).collect::<Vec<_>>())
        .unwrap_or_default();
    let first = args.first().copied();
    let number = |value: Option<&&str>| value.and_then(|value| value.parse::<i64>().ok());
    let length = |unit: i64| match first {
        Some(value) if value.eq_ignore_ascii_case("max") => -1,
        Some(value) => value.parse::<i64>().unwrap_or(1) * unit,
        None => unit,
    };

    match name.as_str() {
        "nvarchar" | "nchar" => DataType::new(name.clone(), length(2), 0, 0),
        "varchar" | "char" | "varbinary" | "binary" => DataType::new(name.clone(), length(1), 0, 0),
        "decimal" | "numeric" => DataType::new(
            name.clone(),
            0,
            number(args.first()).unwrap_or(18),
            number(args.get(1)).unwrap_or(0),
        ),
        "datetime2" | "time" | "datetimeoffset" => {
            DataType::new(name.clone(), 0, 0, number(args.first()).unwrap_or(7))
        }
        _ => DataType::new(name.clone(), 0, 0, 0),
    }
}

/// A default expression: a balanced parenthesized group, or one token.
fn default_expression(text: &str, masked: &str) -> String {
    let offset = masked.len() - masked.trim_start().len();
    if masked[offset..].starts_with('(')
        && let Some(close) = matching_paren(masked, offset)
    {
        return text[offset..=close].to_string();
    }
    text[offset..]
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Column names inside the first parenthesized list, sort order dropped.
fn parenthesized_columns(masked: &str) -> Vec<String> {
    let Some(open) = masked.find('(') else {
        return Vec::new();
    };
    let Some(close) = matching_paren(masked, open) else {
        return Vec::new();
    };
    masked[open + 1..close]
        .split(',')
        .filter_map(|part| part.split_whitespace().next())
        .map(|column| Ident::parse(column).value)
        .collect()
}

fn matching_paren(masked: &str, open: usize) -> Option<usize> {
    let bytes = masked.as_bytes();
    let mut depth = 0_usize;
    let mut in_bracket = false;
    for (index, byte) in bytes.iter().enumerate().skip(open) {
        match byte {
            b'[' if !in_bracket => in_bracket = true,
            b']' if in_bracket => in_bracket = false,
            b'(' if !in_bracket => depth += 1,
            b')' if !in_bracket => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(index);
                }
            }
            _ => {}
        }
    }
    None
}

fn split_top_level(masked: &str) -> Vec<Range<usize>> {
    let mut items = Vec::new();
    let mut depth = 0_usize;
    let mut in_bracket = false;
    let mut start = 0;
    for (index, byte) in masked.bytes().enumerate() {
        match byte {
            b'[' if !in_bracket => in_bracket = true,
            b']' if in_bracket => in_bracket = false,
            b'(' if !in_bracket => depth += 1,
            b')' if !in_bracket => depth = depth.saturating_sub(1),
            b',' if !in_bracket && depth == 0 => {
                items.push(start..index);
                start = index + 1;
            }
            _ => {}
        }
    }
    items.push(start..masked.len());
    items
}

fn slice<'t>(text: &'t str, captures: &Captures<'_>, group: &str) -> &'t str {
    captures
        .name(group)
        .map_or("", |matched| &text[matched.range()])
}

fn unescape(literal: &str) -> String {
    literal.replace("''", "'")
}
