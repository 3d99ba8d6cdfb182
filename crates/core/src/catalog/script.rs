use crate::{
    SchemaObjectKind,
    name::{PermissionName, QualifiedName, quote_ident, table_scoped_name},
};

use super::DependentObject;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStyle {
    PrimaryKey,
    UniqueConstraint,
    Index,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexColumn {
    pub name: String,
    pub descending: bool,
    pub included: bool,
}

/// An index, primary key or unique constraint rebuilt from `sys.indexes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    pub table: QualifiedName,
    pub name: String,
    pub style: IndexStyle,
    pub unique: bool,
    pub clustered: bool,
    pub columnstore: bool,
    pub columns: Vec<IndexColumn>,
    pub filter: Option<String>,
}

impl IndexDefinition {
    #[must_use]
    pub fn kind(&self, on_view: bool) -> SchemaObjectKind {
        match self.style {
            IndexStyle::PrimaryKey => SchemaObjectKind::PrimaryKey,
            IndexStyle::UniqueConstraint => SchemaObjectKind::Constraint,
            IndexStyle::Index if on_view => SchemaObjectKind::IndexedView,
            IndexStyle::Index => SchemaObjectKind::Index,
        }
    }

    #[must_use]
    pub fn involves(&self, columns: &[String]) -> bool {
        self.columns.iter().any(|column| {
            columns
                .iter()
                .any(|candidate| candidate.eq_ignore_ascii_case(&column.name))
        })
    }

    #[must_use]
    pub fn create_sql(&self) -> String {
        let table = self.table.canonical();
        let name = quote_ident(&self.name);
        let clustering = if self.clustered { "CLUSTERED" } else { "NONCLUSTERED" };
        let keys = self
            .columns
            .iter()
            .filter(|column| !column.included)
            .map(|column| {
                let direction = if column.descending { " DESC" } else { "" };
                format!("{}{direction}", quote_ident(&column.name))
            })
            .collect::<Vec<_>>()
            .join(", ");

        match self.style {
            IndexStyle::PrimaryKey => {
                format!("ALTER TABLE {table} ADD CONSTRAINT {name} PRIMARY KEY {clustering} ({keys})")
            }
            IndexStyle::UniqueConstraint => {
                format!("ALTER TABLE {table} ADD CONSTRAINT {name} UNIQUE {clustering} ({keys})")
            }
            IndexStyle::Index if self.columnstore && self.clustered => {
                format!("CREATE CLUSTERED COLUMNSTORE INDEX {name} ON {table}")
            }
            IndexStyle::Index => {
                let unique = if self.unique { "UNIQUE " } else { "" };
                let columnstore = if self.columnstore { " COLUMNSTORE" } else { "" };
                let key_list = if self.columnstore {
                    self.columns
                        .iter()
                        .map(|column| quote_ident(&column.name))
                        .collect::<Vec<_>>()
                        .join(", ")
                } else {
                    keys
                };
                let mut sql = format!(
                    "CREATE {unique}{clustering}{columnstore} INDEX {name} ON {table} ({key_list})"
                );
                let included = self
                    .columns
                    .iter()
                    .filter(|column| column.included)
                    .map(|column| quote_ident(&column.name))
                    .collect::<Vec<_>>();
                if !included.is_empty() && !self.columnstore {
                    sql.push_str(&format!(" INCLUDE ({})", included.join(", ")));
                }
                if let Some(filter) = &self.filter {
                    sql.push_str(&format!(" WHERE {filter}"));
                }
                sql
            }
        }
    }

    #[must_use]
    pub fn to_dependent(&self, on_view: bool) -> DependentObject {
        DependentObject::new(
            self.kind(on_view),
            table_scoped_name(&self.table, &self.name),
            self.create_sql(),
        )
        .schema_bound(on_view)
    }
}

/// A foreign key rebuilt from `sys.foreign_keys`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyDefinition {
    pub table: QualifiedName,
    pub name: String,
    pub columns: Vec<String>,
    pub referenced_table: QualifiedName,
    pub referenced_columns: Vec<String>,
    /// `sys.foreign_keys` action descriptions such as `NO_ACTION` or `CASCADE`.
    pub on_delete: String,
    pub on_update: String,
    pub not_trusted: bool,
}

impl ForeignKeyDefinition {
    #[must_use]
    pub fn involves(&self, table: &QualifiedName, columns: &[String]) -> bool {
        let matches = |candidate: &QualifiedName, names: &[String]| {
            crate::name::names_equal(&candidate.canonical(), &table.canonical())
                && names
                    .iter()
                    .any(|name| columns.iter().any(|column| column.eq_ignore_ascii_case(name)))
        };
        matches(&self.table, &self.columns) || matches(&self.referenced_table, &self.referenced_columns)
    }

    #[must_use]
    pub fn create_sql(&self) -> String {
        let check = if self.not_trusted { "NOCHECK" } else { "CHECK" };
        let mut sql = format!(
            "ALTER TABLE {} WITH {check} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
            self.table.canonical(),
            quote_ident(&self.name),
            column_list(&self.columns),
            self.referenced_table.canonical(),
            column_list(&self.referenced_columns),
        );
        if let Some(action) = referential_action(&self.on_delete) {
            sql.push_str(&format!(" ON DELETE {action}"));
        }
        if let Some(action) = referential_action(&self.on_update) {
            sql.push_str(&format!(" ON UPDATE {action}"));
        }
        sql
    }

    #[must_use]
    pub fn to_dependent(&self) -> DependentObject {
        DependentObject::new(
            SchemaObjectKind::ForeignKey,
            table_scoped_name(&self.table, &self.name),
            self.create_sql(),
        )
    }
}

pub(super) fn check_constraint(table: &QualifiedName, name: &str, definition: &str) -> DependentObject {
    DependentObject::new(
        SchemaObjectKind::Constraint,
        table_scoped_name(table, name),
        format!(
            "ALTER TABLE {} ADD CONSTRAINT {} CHECK {definition}",
            table.canonical(),
            quote_ident(name)
        ),
    )
}

pub(super) fn default_constraint(
    table: &QualifiedName,
    name: &str,
    definition: &str,
    column: &str,
) -> DependentObject {
    DependentObject::new(
        SchemaObjectKind::Default,
        table_scoped_name(table, name),
        format!(
            "ALTER TABLE {} ADD CONSTRAINT {} DEFAULT {definition} FOR {}",
            table.canonical(),
            quote_ident(name),
            quote_ident(column)
        ),
    )
}

/// `state_desc` is one of `GRANT`, `GRANT_WITH_GRANT_OPTION` or `DENY`.
pub(super) fn permission(
    state_desc: &str,
    permission: &str,
    target: &str,
    principal: &str,
) -> Option<DependentObject> {
    let deny = state_desc.eq_ignore_ascii_case("DENY");
    let name = PermissionName::new(deny, permission, Some(target), principal)?;
    let mut sql = name.canonical();
    if state_desc.eq_ignore_ascii_case("GRANT_WITH_GRANT_OPTION") {
        sql.push_str(" WITH GRANT OPTION");
    }
    Some(DependentObject::new(
        SchemaObjectKind::Permission,
        name.canonical(),
        sql,
    ))
}

/// Maps a `sys.objects.type` code of a SQL module to its object kind.
pub(super) fn module_kind(type_code: &str) -> Option<SchemaObjectKind> {
    match type_code.trim() {
        "V" => Some(SchemaObjectKind::View),
        "P" => Some(SchemaObjectKind::StoredProcedure),
        "FN" | "IF" | "TF" => Some(SchemaObjectKind::Function),
        "TR" => Some(SchemaObjectKind::Trigger),
        _ => None,
    }
}

fn referential_action(description: &str) -> Option<String> {
    match description.trim() {
        "" | "NO_ACTION" => None,
        other => Some(other.replace('_', " ")),
    }
}

fn column_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|column| quote_ident(column))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::{ForeignKeyDefinition, IndexColumn, IndexDefinition, IndexStyle, permission};
    use crate::{SchemaObjectKind, name::QualifiedName};

    fn column(name: &str, included: bool) -> IndexColumn {
        IndexColumn {
            name: name.to_string(),
            descending: false,
            included,
        }
    }

    #[test]
    fn index_script_includes_included_columns_and_filter() {
        let index = IndexDefinition {
            table: QualifiedName::new(Some("dbo"), "Beer"),
            name: "IX_Beer_Name".to_string(),
            style: IndexStyle::Index,
            unique: true,
            clustered: false,
            columnstore: false,
            columns: vec![column("Name", false), column("Description", true)],
            filter: Some("([Name] IS NOT NULL)".to_string()),
        };

        assert_eq!(
            index.create_sql(),
            "CREATE UNIQUE NONCLUSTERED INDEX [IX_Beer_Name] ON [dbo].[Beer] ([Name]) INCLUDE ([Description]) WHERE ([Name] IS NOT NULL)"
        );
        let dependent = index.to_dependent(false);
        assert_eq!(dependent.object.name(), "[dbo].[Beer].[IX_Beer_Name]");
        assert_eq!(dependent.object.kind(), SchemaObjectKind::Index);
        assert!(index.involves(&["description".to_string()]));
    }

    #[test]
    fn primary_key_script_uses_alter_table() {
        let key = IndexDefinition {
            table: QualifiedName::new(Some("dbo"), "Beer"),
            name: "PK_Beer".to_string(),
            style: IndexStyle::PrimaryKey,
            unique: true,
            clustered: true,
            columnstore: false,
            columns: vec![column("ID", false)],
            filter: None,
        };
        assert_eq!(
            key.create_sql(),
            "ALTER TABLE [dbo].[Beer] ADD CONSTRAINT [PK_Beer] PRIMARY KEY CLUSTERED ([ID])"
        );
    }

    #[test]
    fn foreign_key_script_renders_actions() {
        let foreign_key = ForeignKeyDefinition {
            table: QualifiedName::new(Some("dbo"), "Review"),
            name: "FK_Review_Beer".to_string(),
            columns: vec!["BeerID".to_string()],
            referenced_table: QualifiedName::new(Some("dbo"), "Beer"),
            referenced_columns: vec!["ID".to_string()],
            on_delete: "CASCADE".to_string(),
            on_update: "NO_ACTION".to_string(),
            not_trusted: false,
        };

        assert_eq!(
            foreign_key.create_sql(),
            "ALTER TABLE [dbo].[Review] WITH CHECK ADD CONSTRAINT [FK_Review_Beer] FOREIGN KEY ([BeerID]) REFERENCES [dbo].[Beer] ([ID]) ON DELETE CASCADE"
        );
        assert!(foreign_key.involves(&QualifiedName::new(Some("dbo"), "Beer"), &["id".to_string()]));
        assert!(!foreign_key.involves(&QualifiedName::new(Some("dbo"), "Beer"), &["Name".to_string()]));
    }

    #[test]
    fn permission_dependent_keeps_grant_option() {
        let dependent = permission("GRANT_WITH_GRANT_OPTION", "SELECT", "[dbo].[BeerView]", "reader")
            .expect("permission");
        assert_eq!(dependent.object.name(), "GRANT SELECT ON [dbo].[BeerView] TO [reader]");
        assert_eq!(
            dependent.object.sql(),
            "GRANT SELECT ON [dbo].[BeerView] TO [reader] WITH GRANT OPTION"
        );
    }
}
