//! Drop statements derived from an object's kind and canonical name alone.

use crate::{
    ParseError, Result, SchemaObjectKind,
    autoproc::{AutoProcDirective, AutoProcGenerator},
    name::{Ident, PermissionName, QualifiedName, TableScopedName},
};

/// Statements that remove the object, in execution order. Kinds that are
/// never dropped yield nothing.
pub fn drop_statements(kind: SchemaObjectKind, name: &str) -> Result<Vec<String>> {
    use SchemaObjectKind as K;

    let statement = match kind {
        K::Table => format!("DROP TABLE {}", schema_object(name)?),
        K::View => format!("DROP VIEW {}", schema_object(name)?),
        K::StoredProcedure => format!("DROP PROCEDURE {}", schema_object(name)?),
        K::Function => format!("DROP FUNCTION {}", schema_object(name)?),
        K::Trigger => format!("DROP TRIGGER {}", schema_object(name)?),
        K::UserDefinedType => format!("DROP TYPE {}", schema_object(name)?),
        K::Queue => format!("DROP QUEUE {}", schema_object(name)?),
        K::Index | K::IndexedView => {
            let scoped = table_scoped(name)?;
            format!(
                "DROP INDEX {} ON {}",
                scoped.name.bracketed(),
                scoped.table.canonical()
            )
        }
        K::PrimaryKey | K::ForeignKey | K::Constraint | K::Default => {
            let scoped = table_scoped(name)?;
            format!(
                "ALTER TABLE {} DROP CONSTRAINT {}",
                scoped.table.canonical(),
                scoped.name.bracketed()
            )
        }
        K::Permission => PermissionName::parse(name)
            .ok_or_else(|| unrecognized(name))?
            .revoke_sql(),
        K::Role => format!("DROP ROLE {}", principal(name)),
        K::User => format!("DROP USER {}", principal(name)),
        K::Login => format!("DROP LOGIN {}", principal(name)),
        K::Schema => format!("DROP SCHEMA {}", principal(name)),
        K::PartitionScheme => format!("DROP PARTITION SCHEME {}", principal(name)),
        K::PartitionFunction => format!("DROP PARTITION FUNCTION {}", principal(name)),
        K::MessageType => format!("DROP MESSAGE TYPE {}", principal(name)),
        K::Contract => format!("DROP CONTRACT {}", principal(name)),
        K::Service => format!("DROP SERVICE {}", principal(name)),
        K::BrokerPriority => format!("DROP BROKER PRIORITY {}", principal(name)),
        K::AutoProc => {
            let directive = AutoProcDirective::parse(name)?;
            return Ok(AutoProcGenerator::new().drop_statements(&directive));
        }
        K::PreScript
        | K::Script
        | K::MasterKey
        | K::Certificate
        | K::SymmetricKey
        | K::Unused => return Ok(Vec::new()),
    };

    Ok(vec![statement])
}

fn schema_object(name: &str) -> std::result::Result<String, ParseError> {
    QualifiedName::parse(name)
        .map(|qualified| qualified.canonical())
        .ok_or_else(|| unrecognized(name))
}

fn table_scoped(name: &str) -> std::result::Result<TableScopedName, ParseError> {
    TableScopedName::parse(name).ok_or_else(|| unrecognized(name))
}

fn principal(name: &str) -> String {
    Ident::parse(name.trim()).bracketed()
}

fn unrecognized(name: &str) -> ParseError {
    ParseError::Unrecognized {
        sql: name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::drop_statements;
    use crate::SchemaObjectKind as K;

    fn single(kind: K, name: &str) -> String {
        let mut statements = drop_statements(kind, name).expect("drop statements");
        assert_eq!(statements.len(), 1, "{statements:?}");
        statements.remove(0)
    }

    #[test]
    fn schema_scoped_kinds() {
        assert_eq!(single(K::Table, "[dbo].[Beer]"), "DROP TABLE [dbo].[Beer]");
        assert_eq!(single(K::StoredProcedure, "[app].[GetBeer]"), "DROP PROCEDURE [app].[GetBeer]");
        assert_eq!(single(K::UserDefinedType, "[dbo].[Ids]"), "DROP TYPE [dbo].[Ids]");
    }

    #[test]
    fn table_scoped_kinds() {
        assert_eq!(
            single(K::Index, "[dbo].[Beer].[IX_Beer_Name]"),
            "DROP INDEX [IX_Beer_Name] ON [dbo].[Beer]"
        );
        assert_eq!(
            single(K::ForeignKey, "[dbo].[Beer].[FK_Beer_Brewery]"),
            "ALTER TABLE [dbo].[Beer] DROP CONSTRAINT [FK_Beer_Brewery]"
        );
    }

    #[test]
    fn permissions_are_revoked() {
        assert_eq!(
            single(K::Permission, "GRANT EXECUTE ON [dbo].[GetBeer] TO [app]"),
            "REVOKE EXECUTE ON [dbo].[GetBeer] FROM [app]"
        );
    }

    #[test]
    fn undroppable_kinds_yield_nothing() {
        for kind in [K::Certificate, K::MasterKey, K::SymmetricKey, K::Script, K::PreScript] {
            assert!(drop_statements(kind, "[x]").expect("drop").is_empty());
        }
    }

    #[test]
    fn autoproc_drops_procedures_before_types() {
        let statements =
            drop_statements(K::AutoProc, "AUTOPROC Insert,InsertMany [dbo].[Beer]").expect("drop");
        assert_eq!(statements.len(), 3);
        assert!(statements[0].contains("DROP PROCEDURE [dbo].[InsertBeers]"));
        assert!(statements[1].contains("DROP PROCEDURE [dbo].[InsertBeer]"));
        assert!(statements[2].contains("DROP TYPE [dbo].[BeerTable]"));
    }

    #[test]
    fn malformed_names_are_rejected() {
        assert!(drop_statements(K::Index, "[dbo].[Beer]").is_err());
    }
}
