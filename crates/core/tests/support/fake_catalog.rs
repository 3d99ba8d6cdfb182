#![allow(dead_code)]

use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet},
};

use dbshape_core::{
    Catalog, ColumnDefinition, DependentObject, QualifiedName, Result, SchemaObjectKind,
    TableShape, name_key,
};

const SHADOW_MARKER: &str = "_dbshape_";

#[derive(Debug, Default)]
struct FakeCatalogState {
    existing: BTreeSet<(SchemaObjectKind, String)>,
    columns: BTreeMap<String, Vec<ColumnDefinition>>,
    shapes: BTreeMap<String, TableShape>,
    desired_shapes: BTreeMap<String, TableShape>,
    dependents: BTreeMap<String, Vec<DependentObject>>,
    column_dependents: BTreeMap<String, Vec<(String, DependentObject)>>,
}

/// In-memory catalog. Shadow tables resolve to the desired shape registered
/// for their base table.
#[derive(Debug, Default)]
pub struct FakeCatalog {
    state: RefCell<FakeCatalogState>,
}

impl FakeCatalog {
    pub fn exists(&self, kind: SchemaObjectKind, name: &str) {
        self.state
            .borrow_mut()
            .existing
            .insert((kind, name_key(name)));
    }

    pub fn remove(&self, kind: SchemaObjectKind, name: &str) {
        self.state
            .borrow_mut()
            .existing
            .remove(&(kind, name_key(name)));
    }

    pub fn set_columns(&self, table: &str, columns: Vec<ColumnDefinition>) {
        self.state
            .borrow_mut()
            .columns
            .insert(name_key(table), columns);
    }

    pub fn set_shape(&self, table: &str, current: TableShape, desired: TableShape) {
        let mut state = self.state.borrow_mut();
        state.shapes.insert(name_key(table), current);
        state.desired_shapes.insert(name_key(table), desired);
    }

    pub fn add_dependent(&self, name: &str, dependent: DependentObject) {
        self.state
            .borrow_mut()
            .dependents
            .entry(name_key(name))
            .or_default()
            .push(dependent);
    }

    pub fn add_column_dependent(&self, table: &str, column: &str, dependent: DependentObject) {
        self.state
            .borrow_mut()
            .column_dependents
            .entry(name_key(table))
            .or_default()
            .push((column.to_string(), dependent));
    }
}

impl Catalog for FakeCatalog {
    fn object_exists(&self, kind: SchemaObjectKind, name: &str) -> Result<bool> {
        if matches!(kind, SchemaObjectKind::AutoProc | SchemaObjectKind::Script | SchemaObjectKind::PreScript) {
            return Ok(true);
        }
        Ok(self.state.borrow().existing.contains(&(kind, name_key(name))))
    }

    fn column_definitions(&self, table: &QualifiedName) -> Result<Vec<ColumnDefinition>> {
        Ok(self
            .state
            .borrow()
            .columns
            .get(&name_key(&table.canonical()))
            .cloned()
            .unwrap_or_default())
    }

    fn table_shape(&self, table: &QualifiedName) -> Result<Option<TableShape>> {
        let state = self.state.borrow();
        if let Some((base, _)) = table.name.value.split_once(SHADOW_MARKER) {
            let base = QualifiedName::new(Some(table.schema_or_default()), base);
            return Ok(state.desired_shapes.get(&name_key(&base.canonical())).cloned());
        }
        Ok(state.shapes.get(&name_key(&table.canonical())).cloned())
    }

    fn dependents(&self, _kind: SchemaObjectKind, name: &str) -> Result<Vec<DependentObject>> {
        Ok(self
            .state
            .borrow()
            .dependents
            .get(&name_key(name))
            .cloned()
            .unwrap_or_default())
    }

    fn column_dependents(
        &self,
        table: &QualifiedName,
        columns: &[String],
    ) -> Result<Vec<DependentObject>> {
        Ok(self
            .state
            .borrow()
            .column_dependents
            .get(&name_key(&table.canonical()))
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(column, _)| columns.iter().any(|touched| touched.eq_ignore_ascii_case(column)))
                    .map(|(_, dependent)| dependent.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}
