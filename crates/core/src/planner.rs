//! Computes what an install must do: validation, diff against the registry,
//! dependent discovery and ordering.

use std::collections::{BTreeMap, HashSet, btree_map::Entry};

use tracing::debug;

use crate::{
    Result, SchemaObject, SchemaObjectKind, ValidationError,
    autoproc::{AutoProcDirective, AutoProcGenerator},
    catalog::{Catalog, DependentObject},
    connection::Connection,
    migrate::{ShadowRewriter, TableMigrator},
    name::{QualifiedName, TableScopedName, name_key, validate_object_name},
    ordering::{sort_adds, sort_drops},
    plan::{InstallPlan, PlanReason, PlannedObject, RegistryChanges, TableModification},
    registry::{RegistryEntry, SchemaRegistry},
};

/// What happens to untracked dependents of a root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cascade {
    /// The root comes back, so its dependents are rebuilt from the catalog.
    Recreate,
    /// The root is gone for good.
    DropOnly,
}

pub struct Planner<'a> {
    connection: &'a dyn Connection,
    catalog: &'a dyn Catalog,
    generator: AutoProcGenerator,
    rewriter: ShadowRewriter,
}

impl<'a> Planner<'a> {
    pub fn new(connection: &'a dyn Connection, catalog: &'a dyn Catalog) -> Self {
        Self {
            connection,
            catalog,
            generator: AutoProcGenerator::new(),
            rewriter: ShadowRewriter::new(),
        }
    }

    /// Drops `Unused` noise, rejects bad or conflicting names and signs
    /// AutoProc objects against the rest of the set.
    pub fn validate(
        &self,
        group: &str,
        objects: Vec<SchemaObject>,
        registry: &SchemaRegistry<'_>,
    ) -> Result<Vec<SchemaObject>> {
        if group.trim().is_empty() {
            return Err(ValidationError::EmptyGroup.into());
        }

        let mut seen = HashSet::new();
        let mut desired = Vec::new();
        for object in objects {
            if object.kind() == SchemaObjectKind::Unused {
                continue;
            }
            validate_object_name(object.name()).map_err(|reason| ValidationError::InvalidName {
                name: object.name().to_string(),
                reason,
            })?;
            if !seen.insert(name_key(object.name())) {
                return Err(ValidationError::DuplicateName {
                    name: object.name().to_string(),
                }
                .into());
            }
            registry.check_owner(group, object.name())?;
            desired.push(object);
        }

        let context = desired.clone();
        desired
            .into_iter()
            .map(|object| {
                if object.kind() != SchemaObjectKind::AutoProc {
                    return Ok(object);
                }
                let signature = self.generator.signature(&object, Some(&context))?;
                Ok(object.with_signature(signature))
            })
            .collect()
    }

    pub fn plan(
        &self,
        group: &str,
        objects: Vec<SchemaObject>,
        registry: &SchemaRegistry<'_>,
    ) -> Result<InstallPlan> {
        let desired = self.validate(group, objects, registry)?;
        let wanted = desired
            .iter()
            .map(|object| (name_key(object.name()), object))
            .collect::<BTreeMap<_, _>>();
        let registered = registry.entries(group);

        let mut builder = PlanBuilder::default();
        let mut removed = HashSet::new();
        let mut roots = Vec::new();
        let mut rebuilt = Vec::new();
        // Built on columns the migration removes; they cannot come back.
        let mut retired = Vec::new();

        for entry in &registered {
            let key = name_key(&entry.object_name);
            if wanted.contains_key(&key) {
                continue;
            }
            removed.insert(key);
            builder.registry.deletes.push(entry.object_name.clone());
            let object = registered_object(entry);
            if self.droppable(&object)? {
                builder.drop(PlannedObject::new(object.clone(), PlanReason::Removed));
                roots.push((object, Cascade::DropOnly));
            }
        }

        for object in &desired {
            let Some(entry) = registry.find(object.name()) else {
                builder.add(PlannedObject::new(object.clone(), PlanReason::New));
                builder.registry.upserts.push(object.clone());
                continue;
            };

            if object.signature().matches(&entry.signature) && object.kind() == entry.kind {
                if entry.original_order != object.original_order() {
                    builder.registry.upserts.push(object.clone());
                }
                if !self.exists(object)? {
                    debug!(kind = %object.kind(), name = object.name(), "registered object is missing");
                    if object.kind() == SchemaObjectKind::AutoProc {
                        builder.drop(PlannedObject::new(object.clone(), PlanReason::Missing));
                    }
                    builder.add(PlannedObject::new(object.clone(), PlanReason::Missing));
                }
                continue;
            }

            builder.registry.upserts.push(object.clone());
            if object.kind() == SchemaObjectKind::Table
                && entry.kind == SchemaObjectKind::Table
                && self.catalog.object_exists(SchemaObjectKind::Table, object.name())?
            {
                let migration = TableMigrator::new(self.connection, self.catalog, &self.rewriter)
                    .with_standalone_defaults(standalone_defaults(
                        object.name(),
                        desired
                            .iter()
                            .map(|object| (object.kind(), object.name()))
                            .chain(
                                registered
                                    .iter()
                                    .map(|entry| (entry.kind, entry.object_name.as_str())),
                            ),
                    ))
                    .plan(object)?;
                let doomed = self
                    .catalog
                    .column_dependents(&migration.table, &migration.dropped_columns)?
                    .into_iter()
                    .map(|dependent| dependent.object.with_order(object.original_order()))
                    .collect::<Vec<_>>();
                let doomed_keys = doomed
                    .iter()
                    .map(|dependent| name_key(dependent.name()))
                    .collect::<HashSet<_>>();
                rebuilt.extend(
                    self.table_dependents(&migration.table, &migration.touched_columns)?
                        .into_iter()
                        .map(|dependent| dependent.object.with_order(object.original_order()))
                        .filter(|dependent| !doomed_keys.contains(&name_key(dependent.name()))),
                );
                retired.extend(doomed);
                if !migration.is_empty() {
                    builder.modifications.push(TableModification {
                        object: object.clone(),
                        migration,
                    });
                }
                continue;
            }

            let previous = registered_object(entry);
            if self.droppable(&previous)? {
                builder.drop(PlannedObject::new(previous.clone(), PlanReason::Changed));
                roots.push((previous, Cascade::Recreate));
            }
            builder.add(PlannedObject::new(object.clone(), PlanReason::Changed));
        }

        // Recreating cascades run first so a dependent reached from both
        // kinds of root comes back.
        roots.sort_by_key(|(_, cascade)| *cascade == Cascade::DropOnly);
        let managed = managed_names(
            registered
                .iter()
                .filter(|entry| entry.kind == SchemaObjectKind::AutoProc)
                .map(|entry| entry.object_name.as_str())
                .chain(
                    desired
                        .iter()
                        .filter(|object| object.kind() == SchemaObjectKind::AutoProc)
                        .map(SchemaObject::name),
                ),
        )?;
        let scope = Scope {
            wanted,
            removed,
            managed,
        };
        let mut visited = HashSet::new();
        for object in rebuilt {
            if !visited.insert(name_key(object.name())) {
                continue;
            }
            self.schedule_dependent(&mut builder, &scope, object.clone(), 1, Cascade::Recreate);
            self.cascade(&mut builder, &scope, &object, 1, Cascade::Recreate, &mut visited)?;
        }
        for object in retired {
            if !visited.insert(name_key(object.name())) {
                continue;
            }
            self.schedule_dependent(&mut builder, &scope, object.clone(), 1, Cascade::DropOnly);
            self.cascade(&mut builder, &scope, &object, 1, Cascade::DropOnly, &mut visited)?;
        }
        for (root, cascade) in &roots {
            self.cascade(&mut builder, &scope, root, 0, *cascade, &mut visited)?;
        }

        Ok(builder.finish(desired))
    }

    fn cascade(
        &self,
        builder: &mut PlanBuilder,
        scope: &Scope<'_>,
        root: &SchemaObject,
        depth: usize,
        cascade: Cascade,
        visited: &mut HashSet<String>,
    ) -> Result<()> {
        let mut pending = vec![(root.kind(), root.name().to_string(), depth)];
        while let Some((kind, name, depth)) = pending.pop() {
            for dependent in self.direct_dependents(kind, &name)? {
                let object = dependent.object.with_order(root.original_order());
                let key = name_key(object.name());
                if scope.managed.contains(&key) || !visited.insert(key) {
                    continue;
                }
                pending.push((object.kind(), object.name().to_string(), depth + 1));
                self.schedule_dependent(builder, scope, object, depth + 1, cascade);
            }
        }
        Ok(())
    }

    fn schedule_dependent(
        &self,
        builder: &mut PlanBuilder,
        scope: &Scope<'_>,
        object: SchemaObject,
        depth: usize,
        cascade: Cascade,
    ) {
        let key = name_key(object.name());
        debug!(kind = %object.kind(), name = object.name(), depth, "scheduling dependent");
        builder.drop(PlannedObject::new(object.clone(), PlanReason::Dependent).at_depth(depth));
        if let Some(desired) = scope.wanted.get(&key) {
            builder.add(PlannedObject::new((*desired).clone(), PlanReason::Dependent).at_depth(depth));
        } else if cascade == Cascade::Recreate && !scope.removed.contains(&key) {
            builder.add(PlannedObject::new(object, PlanReason::Dependent).at_depth(depth));
        }
    }

    /// Schema-bound dependents of the table plus everything built on the
    /// columns the migration rebuilds.
    fn table_dependents(
        &self,
        table: &QualifiedName,
        touched_columns: &[String],
    ) -> Result<Vec<DependentObject>> {
        let mut found = self
            .catalog
            .dependents(SchemaObjectKind::Table, &table.canonical())?
            .into_iter()
            .filter(|dependent| dependent.schema_bound)
            .collect::<Vec<_>>();
        found.extend(self.catalog.column_dependents(table, touched_columns)?);
        Ok(found)
    }

    /// AutoProc objects have no catalog footprint of their own; their
    /// dependents are those of the generated objects, minus the generated
    /// objects themselves.
    fn direct_dependents(&self, kind: SchemaObjectKind, name: &str) -> Result<Vec<DependentObject>> {
        if kind != SchemaObjectKind::AutoProc {
            return self.catalog.dependents(kind, name);
        }

        let generated = AutoProcDirective::parse(name)?.generated_names();
        let generated_keys = generated
            .iter()
            .map(|generated| name_key(&generated.name.canonical()))
            .collect::<HashSet<_>>();
        let mut found = Vec::new();
        for generated in &generated {
            found.extend(
                self.catalog
                    .dependents(generated.kind, &generated.name.canonical())?
                    .into_iter()
                    .filter(|dependent| !generated_keys.contains(&name_key(dependent.object.name()))),
            );
        }
        Ok(found)
    }

    fn droppable(&self, object: &SchemaObject) -> Result<bool> {
        if !object.kind().is_droppable() {
            return Ok(false);
        }
        self.catalog.object_exists(object.kind(), object.name())
    }

    /// Existence check; AutoProc objects exist when every generated object
    /// does.
    pub fn exists(&self, object: &SchemaObject) -> Result<bool> {
        if !object.kind().is_verifiable() {
            return Ok(true);
        }
        if object.kind() != SchemaObjectKind::AutoProc {
            return self.catalog.object_exists(object.kind(), object.name());
        }
        for generated in AutoProcDirective::parse(object.name())?.generated_names() {
            if !self
                .catalog
                .object_exists(generated.kind, &generated.name.canonical())?
            {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Desired objects by name key, registered names leaving the group, and
/// names generated by AutoProc directives.
struct Scope<'d> {
    wanted: BTreeMap<String, &'d SchemaObject>,
    removed: HashSet<String>,
    /// Dropped and regenerated only through their directive.
    managed: HashSet<String>,
}

fn managed_names<'n>(directives: impl Iterator<Item = &'n str>) -> Result<HashSet<String>> {
    let mut managed = HashSet::new();
    for directive in directives {
        managed.extend(
            AutoProcDirective::parse(directive)?
                .generated_names()
                .into_iter()
                .map(|generated| name_key(&generated.name.canonical())),
        );
    }
    Ok(managed)
}

/// Default constraints on `table` that are installed as objects of their own.
fn standalone_defaults<'n>(
    table: &str,
    objects: impl Iterator<Item = (SchemaObjectKind, &'n str)>,
) -> Vec<String> {
    objects
        .filter(|(kind, _)| *kind == SchemaObjectKind::Default)
        .filter_map(|(_, name)| TableScopedName::parse(name))
        .filter(|scoped| name_key(&scoped.table.canonical()) == name_key(table))
        .map(|scoped| scoped.name.value)
        .collect()
}

fn registered_object(entry: &RegistryEntry) -> SchemaObject {
    SchemaObject::new(entry.kind, entry.object_name.clone(), String::new(), entry.original_order)
        .with_signature(entry.signature.clone())
}

#[derive(Default)]
struct PlanBuilder {
    drops: BTreeMap<String, PlannedObject>,
    adds: BTreeMap<String, PlannedObject>,
    modifications: Vec<TableModification>,
    registry: RegistryChanges,
}

impl PlanBuilder {
    fn drop(&mut self, planned: PlannedObject) {
        merge(&mut self.drops, planned);
    }

    fn add(&mut self, planned: PlannedObject) {
        merge(&mut self.adds, planned);
    }

    fn finish(self, desired: Vec<SchemaObject>) -> InstallPlan {
        let mut drops = self.drops.into_values().collect::<Vec<_>>();
        let mut adds = self.adds.into_values().collect::<Vec<_>>();
        sort_drops(&mut drops);
        sort_adds(&mut adds);
        InstallPlan {
            drops,
            table_modifications: self.modifications,
            adds,
            registry: self.registry,
            desired,
        }
    }
}

/// Keeps the deepest position and prefers a root entry over a dependent one.
fn merge(planned: &mut BTreeMap<String, PlannedObject>, incoming: PlannedObject) {
    match planned.entry(name_key(incoming.name())) {
        Entry::Vacant(slot) => {
            slot.insert(incoming);
        }
        Entry::Occupied(mut slot) => {
            let existing = slot.get_mut();
            existing.depth = existing.depth.max(incoming.depth);
            if existing.reason == PlanReason::Dependent && incoming.reason != PlanReason::Dependent {
                existing.reason = incoming.reason;
                existing.object = incoming.object;
            }
        }
    }
}
