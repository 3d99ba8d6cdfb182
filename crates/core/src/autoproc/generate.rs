use crate::{
    catalog::ColumnDefinition,
    name::{QualifiedName, quote_ident, quote_literal},
};

use super::{AutoProcDirective, AutoProcVerb};

const FIND_OPERATORS: [&str; 8] = ["=", "<>", "<", "<=", ">", ">=", "LIKE", "NOT LIKE"];
const UNSEARCHABLE_TYPES: [&str; 6] = ["text", "ntext", "image", "xml", "timestamp", "rowversion"];
const ROW_NUMBER_COLUMN: &str = "[_RowNumber]";

pub(super) struct ProcedureText<'a> {
    directive: &'a AutoProcDirective,
    table: String,
    columns: &'a [ColumnDefinition],
}

impl<'a> ProcedureText<'a> {
    pub(super) fn new(directive: &'a AutoProcDirective, columns: &'a [ColumnDefinition]) -> Self {
        Self {
            directive,
            table: directive.table().canonical(),
            columns,
        }
    }

    pub(super) fn render(&self, verb: AutoProcVerb, name: &QualifiedName) -> String {
        match verb {
            AutoProcVerb::Table => self.table_type(name, self.columns.iter().collect(), true),
            AutoProcVerb::IdTable => self.table_type(name, self.keys(), false),
            AutoProcVerb::Select => self.select(name),
            AutoProcVerb::Insert => self.insert(name),
            AutoProcVerb::Update => self.update(name),
            AutoProcVerb::Upsert => self.upsert(name),
            AutoProcVerb::Delete => self.delete(name),
            AutoProcVerb::SelectMany => self.select_many(name),
            AutoProcVerb::InsertMany => self.merge_many(name, false),
            AutoProcVerb::UpdateMany => self.update_many(name),
            AutoProcVerb::UpsertMany => self.merge_many(name, true),
            AutoProcVerb::DeleteMany => self.delete_many(name),
            AutoProcVerb::Find => self.find(name),
        }
    }

    fn keys(&self) -> Vec<&'a ColumnDefinition> {
        self.columns.iter().filter(|column| column.is_key).collect()
    }

    fn writable(&self) -> Vec<&'a ColumnDefinition> {
        self.columns.iter().filter(|column| !column.is_read_only).collect()
    }

    fn updatable(&self) -> Vec<&'a ColumnDefinition> {
        self.columns
            .iter()
            .filter(|column| !column.is_key && !column.is_read_only)
            .collect()
    }

    fn outputs(&self) -> Vec<&'a ColumnDefinition> {
        self.columns.iter().filter(|column| column.is_read_only).collect()
    }

    fn keys_and_writable(&self) -> Vec<&'a ColumnDefinition> {
        self.columns
            .iter()
            .filter(|column| column.is_key || !column.is_read_only)
            .collect()
    }

    /// The row table carries a caller-filled ordinal; *Many outputs are
    /// returned ordered by it.
    fn table_type(
        &self,
        name: &QualifiedName,
        columns: Vec<&ColumnDefinition>,
        ordinal: bool,
    ) -> String {
        let mut lines = columns
            .iter()
            .map(|column| format!("{} {} NULL", quote_ident(&column.name), table_type_sql(column)))
            .collect::<Vec<_>>();
        if ordinal {
            lines.push(format!("{ROW_NUMBER_COLUMN} int NULL"));
        }
        let body = lines.join(",\n\t");
        format!("CREATE TYPE {} AS TABLE\n(\n\t{body}\n)", name.canonical())
    }

    fn select(&self, name: &QualifiedName) -> String {
        let keys = self.keys();
        let body = format!(
            "SELECT *\nFROM {}\nWHERE\n\t{}",
            self.table,
            key_predicate(&keys, |column| parameter(column))
        );
        self.procedure(name, declarations(&keys, None), &body)
    }

    fn insert(&self, name: &QualifiedName) -> String {
        let writable = self.writable();
        let output = output_clause(&self.outputs(), "Inserted");
        let body = if writable.is_empty() {
            format!("INSERT INTO {}{output}\nDEFAULT VALUES", self.table)
        } else {
            format!(
                "INSERT INTO {}\n(\n\t{}\n){output}\nVALUES\n(\n\t{}\n)",
                self.table,
                column_list(&writable, |column| quote_ident(&column.name)),
                column_list(&writable, |column| parameter(column)),
            )
        };
        self.procedure(name, declarations(&writable, None), &body)
    }

    fn update(&self, name: &QualifiedName) -> String {
        let inputs = self.keys_and_writable();
        let updatable = self.updatable();
        let body = if updatable.is_empty() {
            self.no_updatable_columns()
        } else {
            format!(
                "UPDATE {}\nSET\n\t{}{}\nWHERE\n\t{}",
                self.table,
                column_list(&updatable, |column| format!(
                    "{} = {}",
                    quote_ident(&column.name),
                    parameter(column)
                )),
                output_clause(&self.outputs(), "Inserted"),
                key_predicate(&self.keys(), |column| parameter(column)),
            )
        };
        self.procedure(name, declarations(&inputs, None), &body)
    }

    fn upsert(&self, name: &QualifiedName) -> String {
        let inputs = self.keys_and_writable();
        let source = column_list(&inputs, |column| {
            format!("{} AS {}", parameter(column), quote_ident(&column.name))
        });
        let body = format!(
            "MERGE INTO {} AS [Target]\nUSING (SELECT {source}) AS [Source]\nON ({})\n{}{};",
            self.table,
            self.join_predicate(),
            self.merge_actions(),
            output_clause(&self.outputs(), "Inserted"),
        );
        let identity_key: &dyn Fn(&ColumnDefinition) -> bool =
            &|column| column.is_key && column.is_identity;
        self.procedure(name, declarations(&inputs, Some(identity_key)), &body)
    }

    fn delete(&self, name: &QualifiedName) -> String {
        let keys = self.keys();
        let body = format!(
            "DELETE FROM {}\nWHERE\n\t{}",
            self.table,
            key_predicate(&keys, |column| parameter(column))
        );
        self.procedure(name, declarations(&keys, None), &body)
    }

    fn select_many(&self, name: &QualifiedName) -> String {
        let body = format!(
            "SELECT [Target].*\nFROM {} AS [Target]\nINNER JOIN {} AS [Source] ON {}",
            self.table,
            self.table_parameter(),
            self.join_predicate()
        );
        self.procedure(name, vec![self.table_parameter_declaration(AutoProcVerb::IdTable)], &body)
    }

    fn update_many(&self, name: &QualifiedName) -> String {
        let updatable = self.updatable();
        let body = if updatable.is_empty() {
            self.no_updatable_columns()
        } else {
            format!(
                "UPDATE [Target]\nSET\n\t{}{}\nFROM {} AS [Target]\nINNER JOIN {} AS [Source] ON {}",
                column_list(&updatable, |column| format!(
                    "[Target].{} = {}",
                    quote_ident(&column.name),
                    source_column(column)
                )),
                output_clause(&self.outputs(), "Inserted"),
                self.table,
                self.table_parameter(),
                self.join_predicate()
            )
        };
        self.procedure(name, vec![self.table_parameter_declaration(AutoProcVerb::Table)], &body)
    }

    fn delete_many(&self, name: &QualifiedName) -> String {
        let body = format!(
            "DELETE [Target]\nFROM {} AS [Target]\nINNER JOIN {} AS [Source] ON {}",
            self.table,
            self.table_parameter(),
            self.join_predicate()
        );
        self.procedure(name, vec![self.table_parameter_declaration(AutoProcVerb::IdTable)], &body)
    }

    /// InsertMany and UpsertMany. Outputs come back ordered by the source
    /// rows' `_RowNumber`, which the caller fills in input order.
    fn merge_many(&self, name: &QualifiedName, upsert: bool) -> String {
        let outputs = self.outputs();
        let on = if upsert {
            self.join_predicate()
        } else {
            "1 = 0".to_string()
        };
        let actions = if upsert {
            self.merge_actions()
        } else {
            self.insert_action()
        };

        let mut body = String::new();
        if !outputs.is_empty() {
            body.push_str(&format!(
                "DECLARE @Output TABLE\n(\n\t{ROW_NUMBER_COLUMN} int,\n\t{}\n)\n\n",
                column_list(&outputs, |column| format!(
                    "{} {}",
                    quote_ident(&column.name),
                    table_type_sql(column)
                ))
            ));
        }
        body.push_str(&format!(
            "MERGE INTO {} AS [Target]\nUSING {} AS [Source]\nON ({on})\n{actions}",
            self.table,
            self.table_parameter()
        ));
        if outputs.is_empty() {
            body.push(';');
        } else {
            body.push_str(&format!(
                "\nOUTPUT [Source].{ROW_NUMBER_COLUMN}, {} INTO @Output;\n\nSELECT {}\nFROM @Output\nORDER BY {ROW_NUMBER_COLUMN}",
                column_list_inline(&outputs, |column| format!("Inserted.{}", quote_ident(&column.name))),
                column_list_inline(&outputs, |column| quote_ident(&column.name)),
            ));
        }
        self.procedure(name, vec![self.table_parameter_declaration(AutoProcVerb::Table)], &body)
    }

    fn find(&self, name: &QualifiedName) -> String {
        let searchable = self
            .columns
            .iter()
            .filter(|column| is_searchable(column))
            .collect::<Vec<_>>();
        let base_query = format!("SELECT * FROM {} WHERE 1 = 1", self.table);
        if searchable.is_empty() {
            return self.procedure(name, Vec::new(), &format!("SELECT *\nFROM {}", self.table));
        }

        let mut declarations = Vec::new();
        for column in &searchable {
            declarations.push(format!("{} {} = NULL", parameter(column), column.sql_type));
            declarations.push(format!("{} varchar(10) = '='", operator_parameter(column)));
        }

        let operators = FIND_OPERATORS
            .iter()
            .map(|operator| format!("'{operator}'"))
            .collect::<Vec<_>>()
            .join(", ");
        let requested = searchable
            .iter()
            .map(|column| format!("({})", operator_parameter(column)))
            .collect::<Vec<_>>()
            .join(", ");

        let mut body = format!(
            "IF EXISTS\n(\n\tSELECT 1\n\tFROM (VALUES {requested}) AS [Requested]([Operator])\n\tWHERE [Operator] IS NULL OR [Operator] NOT IN ({operators})\n)\nBEGIN\n\tRAISERROR (N'Unsupported comparison operator', 16, 1)\n\tRETURN\nEND\n\nDECLARE @sql nvarchar(MAX) = {}\n",
            quote_literal(&base_query)
        );
        for column in &searchable {
            body.push_str(&format!(
                "IF {param} IS NOT NULL SET @sql = @sql + {} + {} + {}\n",
                quote_literal(&format!(" AND {} ", quote_ident(&column.name))),
                operator_parameter(column),
                quote_literal(&format!(" {}", parameter(column))),
                param = parameter(column),
            ));
        }
        let parameter_types = searchable
            .iter()
            .map(|column| format!("{} {}", parameter(column), column.sql_type))
            .collect::<Vec<_>>()
            .join(", ");
        let bindings = searchable
            .iter()
            .map(|column| format!("{0} = {0}", parameter(column)))
            .collect::<Vec<_>>()
            .join(", ");
        body.push_str(&format!(
            "\nEXEC sp_executesql @sql, {}, {bindings}",
            quote_literal(&parameter_types)
        ));

        self.procedure(name, declarations, &body)
    }

    fn merge_actions(&self) -> String {
        let updatable = self.updatable();
        let mut actions = String::new();
        if !updatable.is_empty() {
            actions.push_str(&format!(
                "WHEN MATCHED THEN UPDATE SET\n\t{}\n",
                column_list(&updatable, |column| format!(
                    "[Target].{} = {}",
                    quote_ident(&column.name),
                    source_column(column)
                ))
            ));
        }
        actions.push_str(&self.insert_action());
        actions
    }

    fn insert_action(&self) -> String {
        let writable = self.writable();
        if writable.is_empty() {
            return "WHEN NOT MATCHED BY TARGET THEN INSERT DEFAULT VALUES".to_string();
        }
        format!(
            "WHEN NOT MATCHED BY TARGET THEN INSERT\n(\n\t{}\n)\nVALUES\n(\n\t{}\n)",
            column_list(&writable, |column| quote_ident(&column.name)),
            column_list(&writable, |column| source_column(column)),
        )
    }

    fn no_updatable_columns(&self) -> String {
        format!(
            "RAISERROR ({}, 16, 1)",
            quote_literal(&format!("{} has no updatable columns", self.table))
        )
    }

    fn join_predicate(&self) -> String {
        self.keys()
            .iter()
            .map(|column| {
                format!(
                    "[Target].{0} = [Source].{0}",
                    quote_ident(&column.name)
                )
            })
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    fn table_parameter(&self) -> String {
        format!("@{}", sanitize(&self.directive.plural()))
    }

    fn table_parameter_declaration(&self, table_type: AutoProcVerb) -> String {
        format!(
            "{} {} READONLY",
            self.table_parameter(),
            self.directive.generated_name(table_type).canonical()
        )
    }

    fn procedure(&self, name: &QualifiedName, parameters: Vec<String>, body: &str) -> String {
        let mut sql = format!("CREATE PROCEDURE {}", name.canonical());
        if !parameters.is_empty() {
            sql.push_str(&format!("\n(\n\t{}\n)", parameters.join(",\n\t")));
        }
        if self.directive.execute_as_owner() {
            sql.push_str("\nWITH EXECUTE AS OWNER");
        }
        sql.push_str("\nAS\nSET NOCOUNT ON\n\n");
        sql.push_str(body);
        sql
    }
}

fn declarations(
    columns: &[&ColumnDefinition],
    optional: Option<&dyn Fn(&ColumnDefinition) -> bool>,
) -> Vec<String> {
    columns
        .iter()
        .map(|column| {
            let default = match optional {
                Some(is_optional) if is_optional(column) => " = NULL",
                _ => "",
            };
            format!("{} {}{default}", parameter(column), column.sql_type)
        })
        .collect()
}

fn key_predicate(keys: &[&ColumnDefinition], value: impl Fn(&ColumnDefinition) -> String) -> String {
    keys.iter()
        .map(|column| format!("{} = {}", target_column(column), value(column)))
        .collect::<Vec<_>>()
        .join("\n\tAND ")
}

fn output_clause(columns: &[&ColumnDefinition], source: &str) -> String {
    if columns.is_empty() {
        return String::new();
    }
    format!(
        "\nOUTPUT\n\t{}",
        column_list(columns, |column| format!("{source}.{}", quote_ident(&column.name)))
    )
}

fn column_list(columns: &[&ColumnDefinition], render: impl Fn(&ColumnDefinition) -> String) -> String {
    columns
        .iter()
        .map(|column| render(column))
        .collect::<Vec<_>>()
        .join(",\n\t")
}

fn column_list_inline(
    columns: &[&ColumnDefinition],
    render: impl Fn(&ColumnDefinition) -> String,
) -> String {
    columns
        .iter()
        .map(|column| render(column))
        .collect::<Vec<_>>()
        .join(", ")
}

fn target_column(column: &ColumnDefinition) -> String {
    quote_ident(&column.name)
}

fn source_column(column: &ColumnDefinition) -> String {
    format!("[Source].{}", quote_ident(&column.name))
}

fn parameter(column: &ColumnDefinition) -> String {
    format!("@{}", sanitize(&column.name))
}

fn operator_parameter(column: &ColumnDefinition) -> String {
    format!("@{}Operator", sanitize(&column.name))
}

/// Table-valued parameters cannot carry rowversion values.
fn table_type_sql(column: &ColumnDefinition) -> &str {
    if is_rowversion(column) {
        "binary(8)"
    } else {
        &column.sql_type
    }
}

fn is_rowversion(column: &ColumnDefinition) -> bool {
    let base = column.base_type();
    base.eq_ignore_ascii_case("timestamp") || base.eq_ignore_ascii_case("rowversion")
}

fn is_searchable(column: &ColumnDefinition) -> bool {
    let base = column.base_type();
    !UNSEARCHABLE_TYPES
        .iter()
        .any(|excluded| excluded.eq_ignore_ascii_case(base))
}

fn sanitize(name: &str) -> String {
    let mut sanitized = name
        .chars()
        .map(|ch| if ch.is_alphanumeric() || ch == '_' { ch } else { '_' })
        .collect::<String>();
    if sanitized.chars().next().is_none_or(|ch| ch.is_ascii_digit()) {
        sanitized.insert(0, '_');
    }
    sanitized
}

#[cfg(test)]
mod tests {
    use super::sanitize;

    #[test]
    fn sanitize_produces_parameter_safe_names() {
        assert_eq!(sanitize("Name"), "Name");
        assert_eq!(sanitize("Unit Price"), "Unit_Price");
        assert_eq!(sanitize("2nd"), "_2nd");
    }
}
