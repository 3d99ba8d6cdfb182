use std::collections::HashSet;

use crate::{
    CatalogError, Result, SchemaObjectKind,
    connection::{Connection, ConnectionExt, FromRow, Row, SqlValue},
    name::{
        Ident, PermissionName, PermissionTarget, QualifiedName, TableScopedName, name_key,
        quote_ident, schema_object_name,
    },
};

use super::{
    Catalog, ColumnDefinition, ComputedColumn, DataType, DefaultConstraint, DependentObject,
    ForeignKeyDefinition, IdentitySpec, IndexColumn, IndexDefinition, IndexStyle, ColumnShape,
    TableShape, apply_identity_key_fallback, queries::*, script,
};

const MASTER_KEY_NAME: &str = "##MS_DatabaseMasterKey##";
const OBJECT_CLASS: i64 = 1;
const SCHEMA_CLASS: i64 = 3;
const TYPE_CLASS: i64 = 6;
const DATABASE_CLASS: i64 = 0;

/// [`Catalog`] over the `sys.*` views of a live SQL Server database.
pub struct SqlServerCatalog<'c> {
    connection: &'c dyn Connection,
}

impl<'c> SqlServerCatalog<'c> {
    pub fn new(connection: &'c dyn Connection) -> Self {
        Self { connection }
    }

    fn exists(&self, sql: &str, params: &[SqlValue]) -> Result<bool> {
        Ok(self.connection.scalar::<i64>(sql, params)?.unwrap_or(0) > 0)
    }

    fn named_exists(&self, sql: &str, name: &str) -> Result<bool> {
        self.exists(sql, &[Ident::parse(name).value.into()])
    }

    fn constraint_exists(&self, name: &str) -> Result<bool> {
        let Some(scoped) = TableScopedName::parse(name) else {
            return Ok(false);
        };
        let lookup = format!(
            "{}.{}",
            quote_ident(scoped.table.schema_or_default()),
            scoped.name.bracketed()
        );
        self.exists(OBJECT_EXISTS_QUERY, &[lookup.into()])
    }

    fn index_exists(&self, name: &str) -> Result<bool> {
        let Some(scoped) = TableScopedName::parse(name) else {
            return Ok(false);
        };
        self.exists(
            INDEX_EXISTS_QUERY,
            &[scoped.table.canonical().into(), scoped.name.value.into()],
        )
    }

    fn permission_exists(&self, name: &str) -> Result<bool> {
        let Some(permission) = PermissionName::parse(name) else {
            return Ok(false);
        };
        let (target, class) = match &permission.target {
            Some(PermissionTarget::Object(object)) => (object.canonical(), OBJECT_CLASS),
            Some(PermissionTarget::Schema(schema)) => (schema.value.clone(), SCHEMA_CLASS),
            Some(PermissionTarget::Type(type_name)) => (type_name.canonical(), TYPE_CLASS),
            None => (String::new(), DATABASE_CLASS),
        };
        for granted in &permission.permissions {
            let params = [
                SqlValue::from(granted.as_str()),
                SqlValue::from(permission.principal.value.as_str()),
                SqlValue::from(target.as_str()),
                SqlValue::from(class),
            ];
            if !self.exists(PERMISSION_EXISTS_QUERY, &params)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn modules(&self, sql: &str, name: &str) -> Result<Vec<DependentObject>> {
        let rows = self.connection.query_as::<ModuleRow>(sql, &[name.into()])?;
        Ok(rows.into_iter().filter_map(ModuleRow::into_dependent).collect())
    }

    fn constraints(&self, sql: &str, name: &str) -> Result<Vec<ConstraintRow>> {
        self.connection.query_as::<ConstraintRow>(sql, &[name.into()])
    }

    fn permissions(&self, name: &str, class: i64) -> Result<Vec<DependentObject>> {
        let rows = self
            .connection
            .query_as::<PermissionRow>(PERMISSION_DEPENDENTS_QUERY, &[name.into(), class.into()])?;
        let target = if class == TYPE_CLASS {
            format!("TYPE::{name}")
        } else {
            name.to_string()
        };
        Ok(rows
            .iter()
            .filter_map(|row| script::permission(&row.state, &row.permission, &target, &row.principal))
            .collect())
    }

    fn foreign_keys(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<ForeignKeyDefinition>> {
        let rows = self.connection.query_as::<ForeignKeyRow>(sql, params)?;
        let mut keys: Vec<ForeignKeyDefinition> = Vec::new();
        for row in rows {
            let table = QualifiedName::new(Some(&row.table_schema), &row.table_name);
            match keys.last_mut() {
                Some(last) if last.name == row.name && last.table == table => {
                    last.columns.push(row.column);
                    last.referenced_columns.push(row.referenced_column);
                }
                _ => keys.push(ForeignKeyDefinition {
                    table,
                    name: row.name,
                    columns: vec![row.column],
                    referenced_table: QualifiedName::new(
                        Some(&row.referenced_schema),
                        &row.referenced_table,
                    ),
                    referenced_columns: vec![row.referenced_column],
                    on_delete: row.on_delete,
                    on_update: row.on_update,
                    not_trusted: row.not_trusted,
                }),
            }
        }
        Ok(keys)
    }

    fn indexes(&self, table: &QualifiedName) -> Result<Vec<IndexDefinition>> {
        let rows = self
            .connection
            .query_as::<IndexRow>(INDEXES_QUERY, &[table.canonical().into()])?;
        let mut indexes: Vec<IndexDefinition> = Vec::new();
        for row in rows {
            let column = IndexColumn {
                name: row.column,
                descending: row.descending,
                included: row.included,
            };
            match indexes.last_mut() {
                Some(last) if last.name == row.name => last.columns.push(column),
                _ => {
                    let type_desc = row.type_desc.to_ascii_uppercase();
                    if type_desc.contains("XML") || type_desc.contains("SPATIAL") {
                        continue;
                    }
                    let style = if row.primary_key {
                        IndexStyle::PrimaryKey
                    } else if row.unique_constraint {
                        IndexStyle::UniqueConstraint
                    } else {
                        IndexStyle::Index
                    };
                    indexes.push(IndexDefinition {
                        table: table.clone(),
                        name: row.name,
                        style,
                        unique: row.unique,
                        clustered: type_desc.starts_with("CLUSTERED"),
                        columnstore: type_desc.contains("COLUMNSTORE"),
                        columns: vec![column],
                        filter: row.filter,
                    });
                }
            }
        }
        Ok(indexes)
    }
}

impl Catalog for SqlServerCatalog<'_> {
    fn object_exists(&self, kind: SchemaObjectKind, name: &str) -> Result<bool> {
        use SchemaObjectKind as K;

        match kind {
            K::Table | K::View | K::StoredProcedure | K::Function | K::Trigger | K::Queue => {
                self.exists(OBJECT_EXISTS_QUERY, &[name.into()])
            }
            K::PrimaryKey | K::ForeignKey | K::Constraint | K::Default => self.constraint_exists(name),
            K::Index | K::IndexedView => self.index_exists(name),
            K::UserDefinedType => self.exists(TYPE_EXISTS_QUERY, &[name.into()]),
            K::Role | K::User => self.named_exists(DATABASE_PRINCIPAL_EXISTS_QUERY, name),
            K::Login => self.named_exists(LOGIN_EXISTS_QUERY, name),
            K::Schema => self.named_exists(SCHEMA_EXISTS_QUERY, name),
            K::Certificate => self.named_exists(CERTIFICATE_EXISTS_QUERY, name),
            K::MasterKey => self.exists(SYMMETRIC_KEY_EXISTS_QUERY, &[MASTER_KEY_NAME.into()]),
            K::SymmetricKey => self.named_exists(SYMMETRIC_KEY_EXISTS_QUERY, name),
            K::PartitionFunction => self.named_exists(PARTITION_FUNCTION_EXISTS_QUERY, name),
            K::PartitionScheme => self.named_exists(PARTITION_SCHEME_EXISTS_QUERY, name),
            K::MessageType => self.named_exists(MESSAGE_TYPE_EXISTS_QUERY, name),
            K::Contract => self.named_exists(CONTRACT_EXISTS_QUERY, name),
            K::Service => self.named_exists(SERVICE_EXISTS_QUERY, name),
            K::BrokerPriority => self.named_exists(BROKER_PRIORITY_EXISTS_QUERY, name),
            K::Permission => self.permission_exists(name),
            // Generated objects are checked one by one by the installer.
            K::AutoProc | K::Script | K::PreScript | K::Unused => Ok(true),
        }
    }

    fn column_definitions(&self, table: &QualifiedName) -> Result<Vec<ColumnDefinition>> {
        let rows = self
            .connection
            .query_as::<ColumnDefinitionRow>(COLUMN_DEFINITIONS_QUERY, &[table.canonical().into()])?;
        let mut columns = rows
            .into_iter()
            .map(|row| ColumnDefinition {
                name: row.name,
                sql_type: row.data_type.render(),
                is_key: row.is_key,
                is_identity: row.is_identity,
                is_read_only: row.is_identity || row.is_read_only,
            })
            .collect::<Vec<_>>();
        apply_identity_key_fallback(&mut columns);
        Ok(columns)
    }

    fn table_shape(&self, table: &QualifiedName) -> Result<Option<TableShape>> {
        let params = [SqlValue::from(table.canonical())];
        let columns = self
            .connection
            .query_as::<ColumnShapeRow>(TABLE_COLUMNS_QUERY, &params)?;
        if columns.is_empty() {
            return Ok(None);
        }
        let defaults = self
            .connection
            .query_as::<DefaultRow>(TABLE_DEFAULTS_QUERY, &params)?;
        let data_space = self
            .connection
            .scalar::<String>(TABLE_DATA_SPACE_QUERY, &params)?
            .unwrap_or_default();

        Ok(Some(TableShape {
            columns: columns.into_iter().map(|row| row.0).collect(),
            defaults: defaults.into_iter().map(|row| row.0).collect(),
            data_space,
        }))
    }

    fn dependents(&self, kind: SchemaObjectKind, name: &str) -> Result<Vec<DependentObject>> {
        use SchemaObjectKind as K;

        let mut found = Vec::new();
        match kind {
            K::Table => {
                found.extend(self.modules(MODULE_DEPENDENTS_QUERY, name)?);
                found.extend(
                    self.foreign_keys(REFERENCING_FOREIGN_KEYS_QUERY, &[name.into()])?
                        .iter()
                        .map(ForeignKeyDefinition::to_dependent),
                );
                found.extend(self.permissions(name, OBJECT_CLASS)?);
            }
            K::View => {
                found.extend(self.modules(MODULE_DEPENDENTS_QUERY, name)?);
                found.extend(self.modules(VIEW_TRIGGERS_QUERY, name)?);
                if let Some(view) = QualifiedName::parse(name) {
                    found.extend(
                        self.indexes(&view)?
                            .iter()
                            .map(|index| index.to_dependent(true)),
                    );
                }
                found.extend(self.permissions(name, OBJECT_CLASS)?);
            }
            K::Function => {
                found.extend(self.modules(MODULE_DEPENDENTS_QUERY, name)?);
                found.extend(
                    self.constraints(CONSTRAINT_DEPENDENTS_QUERY, name)?
                        .iter()
                        .filter_map(ConstraintRow::to_dependent),
                );
                found.extend(self.permissions(name, OBJECT_CLASS)?);
            }
            K::StoredProcedure => {
                found.extend(self.modules(MODULE_DEPENDENTS_QUERY, name)?);
                found.extend(self.permissions(name, OBJECT_CLASS)?);
            }
            K::UserDefinedType => {
                found.extend(self.modules(TYPE_DEPENDENTS_QUERY, name)?);
                found.extend(self.permissions(name, TYPE_CLASS)?);
            }
            K::PrimaryKey | K::Index | K::Constraint => {
                if let Some(scoped) = TableScopedName::parse(name) {
                    let params = [
                        SqlValue::from(scoped.table.canonical()),
                        SqlValue::from(scoped.name.value),
                    ];
                    found.extend(
                        self.foreign_keys(KEY_FOREIGN_KEYS_QUERY, &params)?
                            .iter()
                            .map(ForeignKeyDefinition::to_dependent),
                    );
                }
            }
            _ => {}
        }

        Ok(dedupe(found))
    }

    fn column_dependents(
        &self,
        table: &QualifiedName,
        columns: &[String],
    ) -> Result<Vec<DependentObject>> {
        if columns.is_empty() {
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        found.extend(
            self.indexes(table)?
                .iter()
                .filter(|index| index.involves(columns))
                .map(|index| index.to_dependent(false)),
        );
        found.extend(
            self.foreign_keys(TABLE_FOREIGN_KEYS_QUERY, &[table.canonical().into()])?
                .iter()
                .filter(|foreign_key| foreign_key.involves(table, columns))
                .map(ForeignKeyDefinition::to_dependent),
        );
        found.extend(
            self.constraints(TABLE_CHECK_CONSTRAINTS_QUERY, &table.canonical())?
                .iter()
                .filter(|constraint| constraint.involves(columns))
                .filter_map(ConstraintRow::to_dependent),
        );

        Ok(dedupe(found))
    }
}

fn dedupe(found: Vec<DependentObject>) -> Vec<DependentObject> {
    let mut seen = HashSet::new();
    found
        .into_iter()
        .filter(|dependent| seen.insert(name_key(dependent.object.name())))
        .collect()
}

struct ColumnDefinitionRow {
    name: String,
    data_type: DataType,
    is_identity: bool,
    is_read_only: bool,
    is_key: bool,
}

impl FromRow for ColumnDefinitionRow {
    fn from_row(row: &Row) -> std::result::Result<Self, CatalogError> {
        const QUERY: &str = "column definitions";
        Ok(Self {
            name: row.text(0, QUERY)?,
            data_type: DataType::new(
                row.text(1, QUERY)?,
                row.int(2, QUERY)?,
                row.int(3, QUERY)?,
                row.int(4, QUERY)?,
            ),
            is_identity: row.bool(5, QUERY)?,
            is_read_only: row.bool(6, QUERY)?,
            is_key: row.bool(7, QUERY)?,
        })
    }
}

struct ColumnShapeRow(ColumnShape);

impl FromRow for ColumnShapeRow {
    fn from_row(row: &Row) -> std::result::Result<Self, CatalogError> {
        const QUERY: &str = "table columns";
        let identity = if row.bool(6, QUERY)? {
            Some(IdentitySpec {
                seed: row.opt_int(7, QUERY)?.unwrap_or(1),
                increment: row.opt_int(8, QUERY)?.unwrap_or(1),
            })
        } else {
            None
        };
        let computed = row
            .opt_text(9, QUERY)?
            .map(|definition| -> std::result::Result<_, CatalogError> {
                Ok(ComputedColumn {
                    definition,
                    persisted: row.bool(10, QUERY)?,
                })
            })
            .transpose()?;

        Ok(Self(ColumnShape {
            name: row.text(0, QUERY)?,
            data_type: DataType::new(
                row.text(1, QUERY)?,
                row.int(2, QUERY)?,
                row.int(3, QUERY)?,
                row.int(4, QUERY)?,
            ),
            nullable: row.bool(5, QUERY)?,
            identity,
            computed,
            collation: row.opt_text(11, QUERY)?,
        }))
    }
}

struct DefaultRow(DefaultConstraint);

impl FromRow for DefaultRow {
    fn from_row(row: &Row) -> std::result::Result<Self, CatalogError> {
        const QUERY: &str = "table defaults";
        Ok(Self(DefaultConstraint {
            name: row.text(0, QUERY)?,
            column: row.text(1, QUERY)?,
            definition: row.text(2, QUERY)?,
            system_named: row.bool(3, QUERY)?,
        }))
    }
}

struct ModuleRow {
    type_code: String,
    schema: String,
    name: String,
    definition: Option<String>,
    schema_bound: bool,
}

impl ModuleRow {
    /// Encrypted modules have no definition and cannot be recreated.
    fn into_dependent(self) -> Option<DependentObject> {
        let kind = script::module_kind(&self.type_code)?;
        let definition = self.definition?;
        Some(
            DependentObject::new(
                kind,
                schema_object_name(Some(&self.schema), &self.name),
                definition,
            )
            .schema_bound(self.schema_bound),
        )
    }
}

impl FromRow for ModuleRow {
    fn from_row(row: &Row) -> std::result::Result<Self, CatalogError> {
        const QUERY: &str = "module dependents";
        Ok(Self {
            type_code: row.text(0, QUERY)?,
            schema: row.text(1, QUERY)?,
            name: row.text(2, QUERY)?,
            definition: row.opt_text(3, QUERY)?,
            schema_bound: row.bool(4, QUERY)?,
        })
    }
}

struct ConstraintRow {
    type_code: String,
    table: QualifiedName,
    name: String,
    definition: String,
    column: Option<String>,
}

impl ConstraintRow {
    fn to_dependent(&self) -> Option<DependentObject> {
        match self.type_code.trim() {
            "C" => Some(script::check_constraint(&self.table, &self.name, &self.definition)),
            "D" => self.column.as_deref().map(|column| {
                script::default_constraint(&self.table, &self.name, &self.definition, column)
            }),
            _ => None,
        }
    }

    fn involves(&self, columns: &[String]) -> bool {
        let definition = self.definition.to_lowercase();
        columns.iter().any(|column| {
            self.column
                .as_deref()
                .is_some_and(|own| own.eq_ignore_ascii_case(column))
                || definition.contains(&quote_ident(column).to_lowercase())
        })
    }
}

impl FromRow for ConstraintRow {
    fn from_row(row: &Row) -> std::result::Result<Self, CatalogError> {
        const QUERY: &str = "constraint dependents";
        Ok(Self {
            type_code: row.text(0, QUERY)?,
            table: QualifiedName::new(Some(&row.text(1, QUERY)?), &row.text(2, QUERY)?),
            name: row.text(3, QUERY)?,
            definition: row.text(4, QUERY)?,
            column: row.opt_text(5, QUERY)?,
        })
    }
}

struct ForeignKeyRow {
    name: String,
    table_schema: String,
    table_name: String,
    referenced_schema: String,
    referenced_table: String,
    column: String,
    referenced_column: String,
    on_delete: String,
    on_update: String,
    not_trusted: bool,
}

impl FromRow for ForeignKeyRow {
    fn from_row(row: &Row) -> std::result::Result<Self, CatalogError> {
        const QUERY: &str = "foreign keys";
        Ok(Self {
            name: row.text(0, QUERY)?,
            table_schema: row.text(1, QUERY)?,
            table_name: row.text(2, QUERY)?,
            referenced_schema: row.text(3, QUERY)?,
            referenced_table: row.text(4, QUERY)?,
            column: row.text(5, QUERY)?,
            referenced_column: row.text(6, QUERY)?,
            on_delete: row.text(7, QUERY)?,
            on_update: row.text(8, QUERY)?,
            not_trusted: row.bool(9, QUERY)?,
        })
    }
}

struct IndexRow {
    name: String,
    primary_key: bool,
    unique_constraint: bool,
    unique: bool,
    type_desc: String,
    filter: Option<String>,
    column: String,
    descending: bool,
    included: bool,
}

impl FromRow for IndexRow {
    fn from_row(row: &Row) -> std::result::Result<Self, CatalogError> {
        const QUERY: &str = "indexes";
        Ok(Self {
            name: row.text(0, QUERY)?,
            primary_key: row.bool(1, QUERY)?,
            unique_constraint: row.bool(2, QUERY)?,
            unique: row.bool(3, QUERY)?,
            type_desc: row.text(4, QUERY)?,
            filter: row.opt_text(5, QUERY)?,
            column: row.text(6, QUERY)?,
            descending: row.bool(7, QUERY)?,
            included: row.bool(8, QUERY)?,
        })
    }
}

struct PermissionRow {
    state: String,
    permission: String,
    principal: String,
}

impl FromRow for PermissionRow {
    fn from_row(row: &Row) -> std::result::Result<Self, CatalogError> {
        const QUERY: &str = "permission dependents";
        Ok(Self {
            state: row.text(0, QUERY)?,
            permission: row.text(1, QUERY)?,
            principal: row.text(2, QUERY)?,
        })
    }
}
