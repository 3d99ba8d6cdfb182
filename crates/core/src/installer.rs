//! The install state machine: validate, load registry, diff, drop,
//! table-modify, add, verify, commit.

use tracing::info;

use crate::{
    InstallMode, InstallOptions, ObjectAction, Result, SchemaObject, SchemaObjectKind,
    VerificationError,
    autoproc::{AutoProcDirective, AutoProcGenerator},
    catalog::{Catalog, SqlServerCatalog},
    classify::Classifier,
    connection::{Connection, Transaction},
    ddl::drop_statements,
    events::{InstallEvent, InstallListener, TracingListener},
    executor::Executor,
    plan::{InstallPlan, PlanReason},
    planner::Planner,
    registry::{RegistryEntry, SchemaRegistry},
    renderer::Renderer,
};

/// What an install did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub mode: InstallMode,
    /// Every DDL statement run, in order.
    pub statements: Vec<String>,
    pub dropped: Vec<String>,
    pub created: Vec<String>,
    pub modified_tables: Vec<String>,
    /// Registry rows written or deleted.
    pub registry_changes: usize,
}

impl InstallReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty() && self.registry_changes == 0
    }

    /// The statements as a `GO`-separated script.
    #[must_use]
    pub fn script(&self) -> String {
        Renderer::new().render(&self.statements)
    }
}

pub struct Installer<'a> {
    connection: &'a dyn Connection,
    catalog: Option<&'a dyn Catalog>,
    listener: &'a dyn InstallListener,
    classifier: Classifier,
    options: InstallOptions,
}

impl<'a> Installer<'a> {
    pub fn new(connection: &'a dyn Connection, options: InstallOptions) -> Self {
        Self {
            connection,
            catalog: None,
            listener: &TracingListener,
            classifier: Classifier::standard(),
            options,
        }
    }

    /// Reads the catalog through `catalog` instead of the `sys.*` views.
    #[must_use]
    pub fn with_catalog(mut self, catalog: &'a dyn Catalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    #[must_use]
    pub fn with_listener(mut self, listener: &'a dyn InstallListener) -> Self {
        self.listener = listener;
        self
    }

    #[must_use]
    pub fn options(&self) -> &InstallOptions {
        &self.options
    }

    /// Splits an object source stream and classifies every object.
    pub fn parse(&self, source: &str) -> Result<Vec<SchemaObject>> {
        Ok(self.classifier.parse_objects(source)?)
    }

    pub fn install_sql(&self, source: &str) -> Result<InstallReport> {
        let objects = self.parse(source)?;
        self.install(objects)
    }

    /// Brings the group in line with `objects` inside one transaction.
    /// In [`InstallMode::DryRun`] everything runs and is then rolled back.
    pub fn install(&self, objects: Vec<SchemaObject>) -> Result<InstallReport> {
        let group = self.options.schema_group.as_str();
        info!(group, mode = ?self.options.mode, objects = objects.len(), "starting install");

        let transaction = Transaction::begin(self.connection)?;
        let report = self.run(&transaction, objects)?;
        match self.options.mode {
            InstallMode::Apply => transaction.commit()?,
            InstallMode::DryRun => transaction.rollback()?,
        }

        info!(
            group,
            statements = report.statements.len(),
            registry_changes = report.registry_changes,
            "install finished"
        );
        Ok(report)
    }

    /// Removes everything the group installed.
    pub fn uninstall(&self) -> Result<InstallReport> {
        self.install(Vec::new())
    }

    /// Computes the plan without applying it. Planning creates and drops
    /// shadow tables, so it still runs inside a transaction that is rolled
    /// back.
    pub fn plan(&self, objects: Vec<SchemaObject>) -> Result<InstallPlan> {
        let transaction = Transaction::begin(self.connection)?;
        let plan = {
            let registry = SchemaRegistry::open(&transaction, &self.options.registry_table)?;
            let default_catalog = SqlServerCatalog::new(&transaction);
            let catalog = self.catalog.unwrap_or(&default_catalog);
            Planner::new(&transaction, catalog).plan(&self.options.schema_group, objects, &registry)?
        };
        transaction.rollback()?;
        Ok(plan)
    }

    fn run(&self, transaction: &Transaction<'_>, objects: Vec<SchemaObject>) -> Result<InstallReport> {
        let mut registry = SchemaRegistry::open(transaction, &self.options.registry_table)?;
        let default_catalog = SqlServerCatalog::new(transaction);
        let catalog = self.catalog.unwrap_or(&default_catalog);
        let planner = Planner::new(transaction, catalog);

        let plan = planner.plan(&self.options.schema_group, objects, &registry)?;
        info!(
            drops = plan.drops.len(),
            table_modifications = plan.table_modifications.len(),
            adds = plan.adds.len(),
            "computed install plan"
        );

        let mut report = InstallReport {
            mode: self.options.mode,
            ..InstallReport::default()
        };
        let mut executor = Executor::new(transaction);

        self.drop_phase(&mut executor, &plan, &mut report)?;
        self.table_modify_phase(&mut executor, &plan, &mut report)?;
        self.add_phase(&mut executor, catalog, &plan, &mut report)?;
        report.statements = executor.into_executed();

        self.verify(&planner, &plan)?;

        for object in &plan.registry.upserts {
            registry.upsert(RegistryEntry {
                schema_group: self.options.schema_group.clone(),
                object_name: object.name().to_string(),
                kind: object.kind(),
                signature: object.signature().clone(),
                original_order: object.original_order(),
            });
        }
        for name in &plan.registry.deletes {
            registry.delete(name);
        }
        report.registry_changes = registry.commit()?;

        Ok(report)
    }

    fn drop_phase(
        &self,
        executor: &mut Executor<'_>,
        plan: &InstallPlan,
        report: &mut InstallReport,
    ) -> Result<()> {
        info!(count = plan.drops.len(), "drop phase");
        for planned in &plan.drops {
            let statements = drop_statements(planned.kind(), planned.name())?;
            if statements.is_empty() {
                continue;
            }
            let (kind, name) = (planned.kind(), planned.name());
            self.listener.on_event(&InstallEvent::BeforeDrop { kind, name });
            executor.run(name, ObjectAction::Drop, &statements)?;
            self.listener.on_event(&InstallEvent::AfterDrop { kind, name });
            report.dropped.push(name.to_string());
        }
        Ok(())
    }

    fn table_modify_phase(
        &self,
        executor: &mut Executor<'_>,
        plan: &InstallPlan,
        report: &mut InstallReport,
    ) -> Result<()> {
        info!(count = plan.table_modifications.len(), "table-modify phase");
        for modification in &plan.table_modifications {
            let name = modification.object.name();
            self.listener.on_event(&InstallEvent::BeforeTableModify { name });
            executor.run(name, ObjectAction::Modify, &modification.migration.statements)?;
            self.listener.on_event(&InstallEvent::AfterTableModify { name });
            report.modified_tables.push(name.to_string());
        }
        Ok(())
    }

    fn add_phase(
        &self,
        executor: &mut Executor<'_>,
        catalog: &dyn Catalog,
        plan: &InstallPlan,
        report: &mut InstallReport,
    ) -> Result<()> {
        info!(count = plan.adds.len(), "add phase");
        for planned in &plan.adds {
            let (kind, name) = (planned.kind(), planned.name());
            if planned.reason == PlanReason::Missing {
                self.listener.on_event(&InstallEvent::MissingObject { kind, name });
            }
            self.listener.on_event(&InstallEvent::BeforeCreate { kind, name });
            let statements = create_statements(catalog, &planned.object)?;
            executor.run(name, ObjectAction::Create, &statements)?;
            self.listener.on_event(&InstallEvent::AfterCreate { kind, name });
            report.created.push(name.to_string());
        }
        Ok(())
    }

    fn verify(&self, planner: &Planner<'_>, plan: &InstallPlan) -> Result<()> {
        info!(count = plan.desired.len(), "verify phase");
        for object in &plan.desired {
            if !planner.exists(object)? {
                return Err(VerificationError::MissingObject {
                    name: object.name().to_string(),
                    kind: object.kind().to_string(),
                }
                .into());
            }
        }
        Ok(())
    }
}

/// Batches that create the object. AutoProc objects are generated from the
/// table's live columns at this point, after any table changes ran.
fn create_statements(catalog: &dyn Catalog, object: &SchemaObject) -> Result<Vec<String>> {
    if object.kind() != SchemaObjectKind::AutoProc {
        return Ok(object.batches());
    }

    let directive = AutoProcDirective::parse(object.name())?;
    let columns = catalog.column_definitions(directive.table())?;
    Ok(AutoProcGenerator::new()
        .generate(&directive, &columns)?
        .into_iter()
        .map(|generated| generated.sql)
        .collect())
}
