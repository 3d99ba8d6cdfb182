use dbshape_core::{
    Classifier, ColumnShape, DEFAULT_REGISTRY_TABLE, DataType, DependentObject, Error,
    IdentitySpec, PlanReason, PlannedObject, Planner, SchemaObject, SchemaObjectKind as K,
    SchemaRegistry, TableShape, ValidationError,
};

#[path = "support/fake_catalog.rs"]
mod fake_catalog;
#[path = "support/fake_connection.rs"]
mod fake_connection;

use fake_catalog::FakeCatalog;
use fake_connection::FakeConnection;

const GROUP: &str = "main";

const BEER_TABLE: &str = "CREATE TABLE Beer ([ID] int IDENTITY, [Name] varchar(64))";
const RECENT_VIEW: &str = "CREATE VIEW RecentBeer AS SELECT [ID], [Name] FROM Beer";
const GET_PROC: &str = "CREATE PROCEDURE GetBeer AS SELECT * FROM RecentBeer";
const GRANT_EXEC: &str = "GRANT EXECUTE ON GetBeer TO [app]";

fn objects(chunks: &[&str]) -> Vec<SchemaObject> {
    Classifier::standard()
        .parse_objects(&chunks.join("\nGO\n"))
        .expect("parse objects")
}

fn find<'a>(objects: &'a [SchemaObject], name: &str) -> &'a SchemaObject {
    objects
        .iter()
        .find(|object| object.name() == name)
        .expect("object in set")
}

fn names(planned: &[PlannedObject]) -> Vec<&str> {
    planned.iter().map(PlannedObject::name).collect()
}

fn installed(catalog: &FakeCatalog, objects: &[SchemaObject]) {
    for object in objects {
        catalog.exists(object.kind(), object.name());
    }
}

fn plan(
    connection: &FakeConnection,
    catalog: &FakeCatalog,
    desired: Vec<SchemaObject>,
) -> dbshape_core::Result<dbshape_core::InstallPlan> {
    let registry = SchemaRegistry::open(connection, DEFAULT_REGISTRY_TABLE)?;
    Planner::new(connection, catalog).plan(GROUP, desired, &registry)
}

#[test]
fn first_install_adds_in_dependency_order() {
    let connection = FakeConnection::default();
    let catalog = FakeCatalog::default();

    let plan = plan(
        &connection,
        &catalog,
        objects(&[GRANT_EXEC, GET_PROC, RECENT_VIEW, BEER_TABLE]),
    )
    .expect("plan");

    assert!(plan.drops.is_empty());
    assert_eq!(
        plan.adds.iter().map(PlannedObject::kind).collect::<Vec<_>>(),
        vec![K::Table, K::View, K::StoredProcedure, K::Permission]
    );
    assert_eq!(
        names(&plan.adds)[..3],
        ["[dbo].[Beer]", "[dbo].[RecentBeer]", "[dbo].[GetBeer]"]
    );
    assert!(plan.adds.iter().all(|planned| planned.reason == PlanReason::New));
    assert_eq!(plan.registry.upserts.len(), 4);
}

#[test]
fn unchanged_installed_set_plans_nothing() {
    let connection = FakeConnection::default();
    let catalog = FakeCatalog::default();
    let desired = objects(&[BEER_TABLE, RECENT_VIEW, GET_PROC, GRANT_EXEC]);
    connection.with_registry(GROUP, &desired.iter().collect::<Vec<_>>());
    installed(&catalog, &desired);

    let plan = plan(&connection, &catalog, desired).expect("plan");

    assert!(plan.is_empty());
    assert!(!plan.has_ddl());
}

#[test]
fn noise_is_discarded_before_planning() {
    let connection = FakeConnection::default();
    let catalog = FakeCatalog::default();

    let plan = plan(
        &connection,
        &catalog,
        objects(&["SET ANSI_NULLS ON", BEER_TABLE, "SET QUOTED_IDENTIFIER ON"]),
    )
    .expect("plan");

    assert_eq!(names(&plan.adds), vec!["[dbo].[Beer]"]);
    assert_eq!(plan.desired.len(), 1);
}

#[test]
fn removed_objects_are_dropped_and_unregistered() {
    let connection = FakeConnection::default();
    let catalog = FakeCatalog::default();
    let installed_set = objects(&[BEER_TABLE, RECENT_VIEW]);
    connection.with_registry(GROUP, &installed_set.iter().collect::<Vec<_>>());
    installed(&catalog, &installed_set);
    catalog.add_dependent(
        "[dbo].[RecentBeer]",
        DependentObject::new(K::StoredProcedure, "[dbo].[Untracked]", "CREATE PROCEDURE Untracked AS SELECT 1"),
    );

    let plan = plan(&connection, &catalog, objects(&[BEER_TABLE])).expect("plan");

    assert_eq!(names(&plan.drops), vec!["[dbo].[Untracked]", "[dbo].[RecentBeer]"]);
    assert_eq!(plan.drops[1].reason, PlanReason::Removed);
    assert!(plan.adds.is_empty(), "untracked dependents of removed objects stay dropped");
    assert_eq!(plan.registry.deletes, vec!["[dbo].[RecentBeer]".to_string()]);
}

#[test]
fn changed_object_recreates_its_dependents() {
    let connection = FakeConnection::default();
    let catalog = FakeCatalog::default();
    let installed_set = objects(&[BEER_TABLE, RECENT_VIEW, GET_PROC]);
    connection.with_registry(GROUP, &installed_set.iter().collect::<Vec<_>>());
    installed(&catalog, &installed_set);
    catalog.add_dependent(
        "[dbo].[RecentBeer]",
        DependentObject::new(K::StoredProcedure, "[dbo].[GetBeer]", "CREATE PROCEDURE [dbo].[GetBeer] AS SELECT 0"),
    );
    catalog.add_dependent(
        "[dbo].[RecentBeer]",
        DependentObject::new(K::StoredProcedure, "[dbo].[Report]", "CREATE PROCEDURE [dbo].[Report] AS SELECT 1"),
    );
    catalog.add_dependent(
        "[dbo].[Report]",
        DependentObject::new(K::Permission, "GRANT EXECUTE ON [dbo].[Report] TO [app]", "GRANT EXECUTE ON [dbo].[Report] TO [app]"),
    );

    let changed_view = "CREATE VIEW RecentBeer AS SELECT [ID] FROM Beer";
    let desired = objects(&[BEER_TABLE, changed_view, GET_PROC]);
    let plan = plan(&connection, &catalog, desired.clone()).expect("plan");

    assert_eq!(plan.drops.first().map(PlannedObject::kind), Some(K::Permission));
    assert_eq!(plan.drops.last().map(PlannedObject::name), Some("[dbo].[RecentBeer]"));
    assert_eq!(plan.drops.len(), 4);

    assert_eq!(plan.adds.first().map(PlannedObject::name), Some("[dbo].[RecentBeer]"));
    assert_eq!(plan.adds[0].reason, PlanReason::Changed);
    assert_eq!(plan.adds.last().map(PlannedObject::kind), Some(K::Permission));

    let get_beer = plan
        .adds
        .iter()
        .find(|planned| planned.name() == "[dbo].[GetBeer]")
        .expect("tracked dependent re-added");
    assert_eq!(get_beer.object.sql(), find(&desired, "[dbo].[GetBeer]").sql());
    assert_eq!(get_beer.reason, PlanReason::Dependent);

    let report = plan
        .adds
        .iter()
        .find(|planned| planned.name() == "[dbo].[Report]")
        .expect("untracked dependent re-added");
    assert_eq!(report.object.sql(), "CREATE PROCEDURE [dbo].[Report] AS SELECT 1");

    assert_eq!(
        plan.registry
            .upserts
            .iter()
            .map(SchemaObject::name)
            .collect::<Vec<_>>(),
        vec!["[dbo].[RecentBeer]"]
    );
}

#[test]
fn missing_objects_are_recreated() {
    let connection = FakeConnection::default();
    let catalog = FakeCatalog::default();
    let desired = objects(&[BEER_TABLE, RECENT_VIEW]);
    connection.with_registry(GROUP, &desired.iter().collect::<Vec<_>>());
    installed(&catalog, &desired);
    catalog.remove(K::View, "[dbo].[RecentBeer]");

    let plan = plan(&connection, &catalog, desired).expect("plan");

    assert!(plan.drops.is_empty());
    assert_eq!(names(&plan.adds), vec!["[dbo].[RecentBeer]"]);
    assert_eq!(plan.adds[0].reason, PlanReason::Missing);
    assert!(plan.registry.is_empty());
}

#[test]
fn reordering_only_updates_the_registry() {
    let connection = FakeConnection::default();
    let catalog = FakeCatalog::default();
    let before = objects(&[BEER_TABLE, RECENT_VIEW]);
    connection.with_registry(GROUP, &before.iter().collect::<Vec<_>>());
    installed(&catalog, &before);

    let plan = plan(&connection, &catalog, objects(&[RECENT_VIEW, BEER_TABLE])).expect("plan");

    assert!(!plan.has_ddl());
    assert_eq!(plan.registry.upserts.len(), 2);
    assert!(!plan.is_empty());
}

#[test]
fn changed_table_is_modified_in_place() {
    let connection = FakeConnection::default();
    let catalog = FakeCatalog::default();
    let installed_set = objects(&[BEER_TABLE]);
    connection.with_registry(GROUP, &installed_set.iter().collect::<Vec<_>>());
    installed(&catalog, &installed_set);

    let column = |name: &str, type_name: &str, max_length: i64| ColumnShape {
        name: name.to_string(),
        data_type: DataType::new(type_name, max_length, 0, 0),
        nullable: true,
        identity: None,
        computed: None,
        collation: None,
    };
    let id = ColumnShape {
        nullable: false,
        identity: Some(IdentitySpec { seed: 1, increment: 1 }),
        ..column("ID", "int", 4)
    };
    let shape = |name_length: i64| TableShape {
        columns: vec![id.clone(), column("Name", "varchar", name_length)],
        defaults: Vec::new(),
        data_space: "PRIMARY".to_string(),
    };
    catalog.set_shape("[dbo].[Beer]", shape(64), shape(128));
    catalog.add_column_dependent(
        "[dbo].[Beer]",
        "Name",
        DependentObject::new(K::Index, "[dbo].[Beer].[IX_Beer_Name]", "CREATE INDEX [IX_Beer_Name] ON [dbo].[Beer] ([Name])"),
    );
    catalog.add_column_dependent(
        "[dbo].[Beer]",
        "ID",
        DependentObject::new(K::Index, "[dbo].[Beer].[IX_Beer_ID]", "CREATE INDEX [IX_Beer_ID] ON [dbo].[Beer] ([ID])"),
    );

    let widened = "CREATE TABLE Beer ([ID] int IDENTITY, [Name] varchar(128))";
    let plan = plan(&connection, &catalog, objects(&[widened])).expect("plan");

    assert_eq!(plan.table_modifications.len(), 1);
    assert_eq!(
        plan.table_modifications[0].migration.statements,
        vec!["ALTER TABLE [dbo].[Beer] ALTER COLUMN [Name] varchar(128) NULL"]
    );
    assert_eq!(names(&plan.drops), vec!["[dbo].[Beer].[IX_Beer_Name]"]);
    assert_eq!(names(&plan.adds), vec!["[dbo].[Beer].[IX_Beer_Name]"]);

    let executed = connection.executed_sql();
    assert!(
        executed
            .iter()
            .any(|sql| sql.starts_with("CREATE TABLE [dbo].[Beer_dbshape_")),
        "shadow table created: {executed:?}"
    );
    assert!(
        executed
            .last()
            .is_some_and(|sql| sql.contains("DROP TABLE [dbo].[Beer_dbshape_")),
        "shadow table dropped last"
    );
}

#[test]
fn objects_on_a_dropped_column_are_dropped_but_not_recreated() {
    let connection = FakeConnection::default();
    let catalog = FakeCatalog::default();
    let current = "CREATE TABLE Beer ([ID] int NOT NULL, [Abv] int NULL CONSTRAINT CK_Beer_Abv CHECK ([Abv] > 0))";
    let installed_set = objects(&[current]);
    connection.with_registry(GROUP, &installed_set.iter().collect::<Vec<_>>());
    installed(&catalog, &installed_set);

    let column = |name: &str| ColumnShape {
        name: name.to_string(),
        data_type: DataType::new("int", 4, 10, 0),
        nullable: name != "ID",
        identity: None,
        computed: None,
        collation: None,
    };
    let shape = |columns: Vec<ColumnShape>| TableShape {
        columns,
        defaults: Vec::new(),
        data_space: "PRIMARY".to_string(),
    };
    catalog.set_shape(
        "[dbo].[Beer]",
        shape(vec![column("ID"), column("Abv")]),
        shape(vec![column("ID")]),
    );
    catalog.add_column_dependent(
        "[dbo].[Beer]",
        "Abv",
        DependentObject::new(
            K::Constraint,
            "[dbo].[Beer].[CK_Beer_Abv]",
            "ALTER TABLE [dbo].[Beer] ADD CONSTRAINT [CK_Beer_Abv] CHECK ([Abv] > 0)",
        ),
    );

    let narrowed = "CREATE TABLE Beer ([ID] int NOT NULL)";
    let plan = plan(&connection, &catalog, objects(&[narrowed])).expect("plan");

    assert_eq!(
        plan.table_modifications[0].migration.statements,
        vec!["ALTER TABLE [dbo].[Beer] DROP COLUMN [Abv]"]
    );
    assert_eq!(names(&plan.drops), vec!["[dbo].[Beer].[CK_Beer_Abv]"]);
    assert!(plan.adds.is_empty(), "{:?}", names(&plan.adds));
}

#[test]
fn duplicate_names_are_rejected() {
    let connection = FakeConnection::default();
    let catalog = FakeCatalog::default();

    let error = plan(
        &connection,
        &catalog,
        objects(&[BEER_TABLE, "CREATE TABLE [dbo].[BEER] ([ID] int)"]),
    )
    .expect_err("duplicate");

    assert!(matches!(error, Error::Validate(ValidationError::DuplicateName { .. })));
}

#[test]
fn objects_of_another_group_are_rejected() {
    let connection = FakeConnection::default();
    let catalog = FakeCatalog::default();
    let other = objects(&[BEER_TABLE]);
    connection.with_registry("reports", &other.iter().collect::<Vec<_>>());

    let error = plan(&connection, &catalog, objects(&[BEER_TABLE])).expect_err("foreign group");

    assert!(matches!(error, Error::Validate(ValidationError::ForeignGroup { .. })));
}

#[test]
fn empty_group_names_are_rejected() {
    let connection = FakeConnection::default();
    let catalog = FakeCatalog::default();
    let registry = SchemaRegistry::open(&connection, DEFAULT_REGISTRY_TABLE).expect("registry");

    let error = Planner::new(&connection, &catalog)
        .plan("  ", objects(&[BEER_TABLE]), &registry)
        .expect_err("empty group");

    assert!(matches!(error, Error::Validate(ValidationError::EmptyGroup)));
}
