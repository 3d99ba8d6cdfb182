use std::{collections::BTreeSet, fmt};

use crate::{
    ParseError, SchemaObjectKind,
    name::{QualifiedName, name_key, validate_object_name},
};

const DIRECTIVE_KEYWORD: &str = "AUTOPROC";
const DEFAULT_NAME_TEMPLATE: &str = "{0}{1}";

/// One thing an AUTOPROC directive can generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AutoProcVerb {
    Table,
    IdTable,
    Select,
    Insert,
    Update,
    Upsert,
    Delete,
    SelectMany,
    InsertMany,
    UpdateMany,
    UpsertMany,
    DeleteMany,
    Find,
}

impl AutoProcVerb {
    pub const ALL: [Self; 13] = [
        Self::Table,
        Self::IdTable,
        Self::Select,
        Self::Insert,
        Self::Update,
        Self::Upsert,
        Self::Delete,
        Self::SelectMany,
        Self::InsertMany,
        Self::UpdateMany,
        Self::UpsertMany,
        Self::DeleteMany,
        Self::Find,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Table => "Table",
            Self::IdTable => "IdTable",
            Self::Select => "Select",
            Self::Insert => "Insert",
            Self::Update => "Update",
            Self::Upsert => "Upsert",
            Self::Delete => "Delete",
            Self::SelectMany => "SelectMany",
            Self::InsertMany => "InsertMany",
            Self::UpdateMany => "UpdateMany",
            Self::UpsertMany => "UpsertMany",
            Self::DeleteMany => "DeleteMany",
            Self::Find => "Find",
        }
    }

    /// The `{0}` placeholder value.
    #[must_use]
    pub const fn word(self) -> &'static str {
        match self {
            Self::Table | Self::IdTable => "",
            Self::Select | Self::SelectMany => "Select",
            Self::Insert | Self::InsertMany => "Insert",
            Self::Update | Self::UpdateMany => "Update",
            Self::Upsert | Self::UpsertMany => "Upsert",
            Self::Delete | Self::DeleteMany => "Delete",
            Self::Find => "Find",
        }
    }

    #[must_use]
    pub const fn is_many(self) -> bool {
        matches!(
            self,
            Self::SelectMany | Self::InsertMany | Self::UpdateMany | Self::UpsertMany | Self::DeleteMany
        )
    }

    #[must_use]
    pub const fn is_type(self) -> bool {
        matches!(self, Self::Table | Self::IdTable)
    }

    #[must_use]
    pub const fn requires_keys(self) -> bool {
        !matches!(self, Self::Table | Self::Insert | Self::InsertMany | Self::Find)
    }

    /// The table type a set-based verb takes as its parameter.
    #[must_use]
    pub const fn parameter_type(self) -> Option<Self> {
        match self {
            Self::InsertMany | Self::UpdateMany | Self::UpsertMany => Some(Self::Table),
            Self::SelectMany | Self::DeleteMany => Some(Self::IdTable),
            _ => None,
        }
    }

    #[must_use]
    pub const fn object_kind(self) -> SchemaObjectKind {
        if self.is_type() {
            SchemaObjectKind::UserDefinedType
        } else {
            SchemaObjectKind::StoredProcedure
        }
    }

    fn parse(word: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|verb| verb.as_str().eq_ignore_ascii_case(word))
    }
}

impl fmt::Display for AutoProcVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed `-- AUTOPROC <verbs> <table> [options]` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoProcDirective {
    verbs: BTreeSet<AutoProcVerb>,
    all: bool,
    table: QualifiedName,
    single: Option<String>,
    plural: Option<String>,
    name_template: Option<String>,
    execute_as_owner: bool,
}

/// A procedure or table type the directive expands to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedName {
    pub verb: AutoProcVerb,
    pub kind: SchemaObjectKind,
    pub name: QualifiedName,
}

impl AutoProcDirective {
    /// Parses the directive from a marker line or a normalized registry name.
    /// The leading `--` and the `AUTOPROC` keyword are both optional.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let trimmed = text.trim();
        let body = trimmed.strip_prefix("--").unwrap_or(trimmed).trim_start();
        let body = match body.get(..DIRECTIVE_KEYWORD.len()) {
            Some(head) if head.eq_ignore_ascii_case(DIRECTIVE_KEYWORD) => &body[DIRECTIVE_KEYWORD.len()..],
            _ => body,
        };
        let fail = |reason: &str| ParseError::AutoProcDirective {
            directive: trimmed.to_string(),
            reason: reason.to_string(),
        };

        let tokens = tokenize(body);
        let mut index = 0;
        let mut verb_list = tokens.first().cloned().ok_or_else(|| fail("missing verb list"))?;
        index += 1;
        while verb_list.ends_with(',') || tokens.get(index).is_some_and(|next| next.starts_with(',')) {
            let Some(next) = tokens.get(index) else {
                return Err(fail("verb list ends with a comma"));
            };
            verb_list.push_str(next);
            index += 1;
        }

        let mut verbs = BTreeSet::new();
        let mut all = false;
        for word in verb_list.split(',').map(str::trim) {
            if word.eq_ignore_ascii_case("All") {
                all = true;
                verbs.extend(AutoProcVerb::ALL);
                continue;
            }
            let verb = AutoProcVerb::parse(word).ok_or_else(|| fail(&format!("unknown verb `{word}`")))?;
            verbs.insert(verb);
        }

        let table_token = tokens.get(index).ok_or_else(|| fail("missing table name"))?;
        let table = QualifiedName::parse(table_token).ok_or_else(|| fail("invalid table name"))?;
        validate_object_name(&table.canonical()).map_err(fail)?;
        index += 1;

        let mut directive = Self {
            verbs,
            all,
            table,
            single: None,
            plural: None,
            name_template: None,
            execute_as_owner: false,
        };

        for option in &tokens[index..] {
            let (key, value) = option
                .split_once('=')
                .ok_or_else(|| fail(&format!("expected Key=Value, found `{option}`")))?;
            let value = value.trim();
            if value.is_empty() {
                return Err(fail(&format!("option `{key}` has no value")));
            }
            match key.trim().to_ascii_lowercase().as_str() {
                "single" => directive.single = Some(value.to_string()),
                "plural" => directive.plural = Some(value.to_string()),
                "name" => directive.name_template = Some(value.to_string()),
                "executeasowner" => {
                    directive.execute_as_owner = parse_bool(value)
                        .ok_or_else(|| fail(&format!("ExecuteAsOwner expects true or false, found `{value}`")))?;
                }
                other => return Err(fail(&format!("unknown option `{other}`"))),
            }
        }

        directive.check_generated_names().map_err(|reason| fail(&reason))?;
        Ok(directive)
    }

    /// `AUTOPROC <verbs> <table> [options]` with the table bracketed and
    /// schema-qualified. Used as the registry name.
    #[must_use]
    pub fn canonical(&self) -> String {
        let verbs = if self.all {
            "All".to_string()
        } else {
            self.verbs
                .iter()
                .map(|verb| verb.as_str())
                .collect::<Vec<_>>()
                .join(",")
        };
        let mut text = format!("{DIRECTIVE_KEYWORD} {verbs} {}", self.table.canonical());
        if let Some(single) = &self.single {
            text.push_str(&format!(" Single={single}"));
        }
        if let Some(plural) = &self.plural {
            text.push_str(&format!(" Plural={plural}"));
        }
        if let Some(template) = &self.name_template {
            text.push_str(&format!(" Name={template}"));
        }
        if self.execute_as_owner {
            text.push_str(" ExecuteAsOwner=true");
        }
        text
    }

    #[must_use]
    pub fn table(&self) -> &QualifiedName {
        &self.table
    }

    #[must_use]
    pub fn execute_as_owner(&self) -> bool {
        self.execute_as_owner
    }

    /// Requested verbs plus the table types the set-based verbs need.
    #[must_use]
    pub fn effective_verbs(&self) -> BTreeSet<AutoProcVerb> {
        let mut verbs = self.verbs.clone();
        verbs.extend(self.verbs.iter().filter_map(|verb| verb.parameter_type()));
        verbs
    }

    #[must_use]
    pub fn singular(&self) -> String {
        if let Some(single) = &self.single {
            return single.clone();
        }
        let table = &self.table.name.value;
        match table.strip_suffix(['s', 'S']) {
            Some(stripped) if !stripped.is_empty() => stripped.to_string(),
            _ => table.clone(),
        }
    }

    #[must_use]
    pub fn plural(&self) -> String {
        self.plural
            .clone()
            .unwrap_or_else(|| format!("{}s", self.singular()))
    }

    /// Generated object name for one verb, in the table's schema.
    #[must_use]
    pub fn generated_name(&self, verb: AutoProcVerb) -> QualifiedName {
        let schema = Some(self.table.schema_or_default());
        let singular = self.singular();
        let local = match verb {
            AutoProcVerb::Table => format!("{singular}Table"),
            AutoProcVerb::IdTable => format!("{singular}IdTable"),
            _ => {
                let plural = self.plural();
                let noun = if verb.is_many() { plural.as_str() } else { singular.as_str() };
                self.name_template
                    .as_deref()
                    .unwrap_or(DEFAULT_NAME_TEMPLATE)
                    .replace("{0}", verb.word())
                    .replace("{1}", noun)
                    .replace("{2}", &plural)
            }
        };
        QualifiedName::new(schema, &local)
    }

    /// Everything the directive generates: table types first, then procedures.
    #[must_use]
    pub fn generated_names(&self) -> Vec<GeneratedName> {
        self.effective_verbs()
            .into_iter()
            .map(|verb| GeneratedName {
                verb,
                kind: verb.object_kind(),
                name: self.generated_name(verb),
            })
            .collect()
    }

    fn check_generated_names(&self) -> Result<(), String> {
        let mut seen = BTreeSet::new();
        for generated in self.generated_names() {
            let canonical = generated.name.canonical();
            if let Err(reason) = validate_object_name(&canonical) {
                return Err(format!("generated name {canonical} {reason}"));
            }
            if !seen.insert(name_key(&canonical)) {
                return Err(format!(
                    "name template gives more than one verb the name {canonical}"
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Display for AutoProcDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// Whitespace-separated tokens; bracketed and double-quoted runs stay intact.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut closing: Option<char> = None;

    for ch in text.chars() {
        match closing {
            Some(close) => {
                current.push(ch);
                if ch == close {
                    closing = None;
                }
            }
            None if ch.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            None => {
                if ch == '[' {
                    closing = Some(']');
                } else if ch == '"' {
                    closing = Some('"');
                }
                current.push(ch);
            }
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}
