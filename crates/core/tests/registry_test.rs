use dbshape_core::{
    DEFAULT_REGISTRY_TABLE, Error, RegistryEntry, SchemaObject, SchemaObjectKind, SchemaRegistry,
    Signature, ValidationError,
};

#[path = "support/fake_connection.rs"]
mod fake_connection;

use fake_connection::FakeConnection;

fn table(name: &str, order: usize) -> SchemaObject {
    SchemaObject::new(
        SchemaObjectKind::Table,
        format!("[dbo].[{name}]"),
        format!("CREATE TABLE [dbo].[{name}] ([ID] int)"),
        order,
    )
}

#[test]
fn open_creates_and_migrates_the_backing_table() {
    let connection = FakeConnection::default();
    SchemaRegistry::open(&connection, DEFAULT_REGISTRY_TABLE).expect("open registry");

    let executed = connection.executed_sql();
    assert_eq!(executed.len(), 3);
    assert!(executed[0].starts_with("IF OBJECT_ID(N'[dbo].[SchemaRegistry]', N'U') IS NULL\nCREATE TABLE [dbo].[SchemaRegistry]"));
    assert!(executed[0].contains("CONSTRAINT [PK_SchemaRegistry] PRIMARY KEY ([ObjectName])"));
    assert!(executed[1].starts_with("IF COL_LENGTH(N'[dbo].[SchemaRegistry]', N'OriginalOrder') IS NULL"));
    assert!(executed[0].contains("[ObjectName] nvarchar(450) NOT NULL"));
    assert!(executed[0].contains("[SchemaGroup] nvarchar(128) NOT NULL"));
    assert!(executed[2].contains("TYPE_ID(N'varchar')"));
    assert!(executed[2].contains("ALTER COLUMN [ObjectName] nvarchar(450) NOT NULL"));
}

#[test]
fn entries_are_grouped_and_ordered() {
    let connection = FakeConnection::default();
    let (beer, brewery, other) = (table("Beer", 2), table("Brewery", 1), table("Other", 0));
    connection.respond(
        fake_connection::REGISTRY_SELECT,
        vec![
            fake_connection::registry_row("main", &beer),
            fake_connection::registry_row("main", &brewery),
            fake_connection::registry_row("reports", &other),
        ],
    );

    let registry = SchemaRegistry::open(&connection, DEFAULT_REGISTRY_TABLE).expect("open registry");

    let names = registry
        .entries("MAIN")
        .iter()
        .map(|entry| entry.object_name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["[dbo].[Brewery]", "[dbo].[Beer]"]);
    assert!(registry.contains("[DBO].[beer]"));
    assert_eq!(
        registry.find("[dbo].[Other]").map(|entry| entry.schema_group.as_str()),
        Some("reports")
    );
}

#[test]
fn names_owned_by_another_group_are_rejected() {
    let connection = FakeConnection::default();
    connection.with_registry("reports", &[&table("Beer", 0)]);
    let registry = SchemaRegistry::open(&connection, DEFAULT_REGISTRY_TABLE).expect("open registry");

    assert!(registry.check_owner("reports", "[dbo].[Beer]").is_ok());
    assert!(registry.check_owner("main", "[dbo].[Brewery]").is_ok());
    let error = registry
        .check_owner("main", "[dbo].[Beer]")
        .expect_err("foreign group");
    assert!(matches!(
        error,
        ValidationError::ForeignGroup { ref registered_group, .. } if registered_group == "reports"
    ));
}

#[test]
fn commit_writes_buffered_changes_in_one_batch() {
    let connection = FakeConnection::default();
    connection.with_registry("main", &[&table("Old", 0)]);
    let mut registry = SchemaRegistry::open(&connection, DEFAULT_REGISTRY_TABLE).expect("open registry");

    registry.upsert(RegistryEntry {
        schema_group: "main".to_string(),
        object_name: "[dbo].[Beer]".to_string(),
        kind: SchemaObjectKind::Table,
        signature: Signature::of("CREATE TABLE [dbo].[Beer] ([ID] int)"),
        original_order: 3,
    });
    registry.delete("[dbo].[Old]");
    assert!(registry.has_pending());

    let changed = registry.commit().expect("commit registry");
    assert_eq!(changed, 2);
    assert!(!registry.has_pending());

    let batch = connection.executed_sql().pop().expect("registry batch");
    assert!(batch.contains("DELETE FROM [dbo].[SchemaRegistry] WHERE [ObjectName] = N'[dbo].[Old]'"));
    assert!(batch.contains("VALUES (N'main', N'[dbo].[Beer]', N'"));
    assert!(batch.contains("N'Table', 3)"));
    assert_eq!(registry.commit().expect("empty commit"), 0);
}

#[test]
fn undecodable_rows_are_catalog_errors() {
    let connection = FakeConnection::default();
    connection.respond(
        fake_connection::REGISTRY_SELECT,
        vec![dbshape_core::Row::new(vec!["main".into(), "[dbo].[Beer]".into()])],
    );

    let error = SchemaRegistry::open(&connection, DEFAULT_REGISTRY_TABLE)
        .err()
        .expect("missing columns");
    assert!(matches!(error, Error::Catalog(_)));
}
