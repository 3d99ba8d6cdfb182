//! Expansion of `-- AUTOPROC` directives into generated CRUD procedures and
//! the table types they take.

mod directive;
mod generate;

pub use directive::{AutoProcDirective, AutoProcVerb, GeneratedName};

use crate::{
    CatalogError, Result, SchemaObject, SchemaObjectKind, Signature, UnsupportedError,
    catalog::ColumnDefinition,
    name::{QualifiedName, TableScopedName, names_equal, quote_literal},
    object::canonical_text,
};

use generate::ProcedureText;

/// Bumped whenever generated text changes, so installed procedures are
/// regenerated.
pub const GENERATOR_VERSION: &str = "dbshape-autoproc/2";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedObject {
    pub verb: AutoProcVerb,
    pub kind: SchemaObjectKind,
    pub name: QualifiedName,
    pub sql: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AutoProcGenerator;

impl AutoProcGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Generates one object per effective verb from the table's live columns.
    pub fn generate(
        &self,
        directive: &AutoProcDirective,
        columns: &[ColumnDefinition],
    ) -> Result<Vec<GeneratedObject>> {
        let table = directive.table().canonical();
        if columns.is_empty() {
            return Err(CatalogError::MissingTable { table }.into());
        }

        if !columns.iter().any(|column| column.is_key) {
            if let Some(verb) = directive
                .effective_verbs()
                .into_iter()
                .find(|verb| verb.requires_keys())
            {
                return Err(UnsupportedError::KeylessAutoProc {
                    table,
                    verb: verb.as_str(),
                }
                .into());
            }
        }

        let text = ProcedureText::new(directive, columns);
        Ok(directive
            .generated_names()
            .into_iter()
            .map(|generated| GeneratedObject {
                sql: text.render(generated.verb, &generated.name),
                verb: generated.verb,
                kind: generated.kind,
                name: generated.name,
            })
            .collect())
    }

    /// Digest over the directive, the desired definition of its table and
    /// primary key, and [`GENERATOR_VERSION`]. Without a context the result
    /// never matches, forcing regeneration.
    pub fn signature(
        &self,
        object: &SchemaObject,
        context: Option<&[SchemaObject]>,
    ) -> Result<Signature> {
        let Some(context) = context else {
            return Ok(Signature::always_different());
        };
        let directive = AutoProcDirective::parse(object.name())?;
        let table = directive.table().canonical();

        let directive_text = canonical_text(object.sql());
        let related = context
            .iter()
            .filter(|candidate| defines_table(candidate, &table))
            .map(|candidate| canonical_text(candidate.sql()))
            .collect::<Vec<_>>();

        let parts = std::iter::once(directive_text.as_str())
            .chain(related.iter().map(String::as_str))
            .chain(std::iter::once(GENERATOR_VERSION));
        Ok(Signature::of_parts(parts))
    }

    /// Guarded drops: procedures first, then the table types they use.
    #[must_use]
    pub fn drop_statements(&self, directive: &AutoProcDirective) -> Vec<String> {
        let generated = directive.generated_names();
        let procedures = generated
            .iter()
            .rev()
            .filter(|generated| generated.kind == SchemaObjectKind::StoredProcedure)
            .map(|generated| {
                let name = generated.name.canonical();
                format!(
                    "IF OBJECT_ID({}, N'P') IS NOT NULL DROP PROCEDURE {name}",
                    quote_literal(&name)
                )
            });
        let types = generated
            .iter()
            .rev()
            .filter(|generated| generated.kind == SchemaObjectKind::UserDefinedType)
            .map(|generated| {
                let name = generated.name.canonical();
                format!(
                    "IF TYPE_ID({}) IS NOT NULL DROP TYPE {name}",
                    quote_literal(&name)
                )
            });
        procedures.chain(types).collect()
    }
}

fn defines_table(candidate: &SchemaObject, table: &str) -> bool {
    match candidate.kind() {
        SchemaObjectKind::Table => names_equal(candidate.name(), table),
        SchemaObjectKind::PrimaryKey => TableScopedName::parse(candidate.name())
            .is_some_and(|scoped| names_equal(&scoped.table.canonical(), table)),
        _ => false,
    }
}
