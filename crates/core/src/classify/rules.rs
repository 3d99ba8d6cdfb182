use regex::{Captures, Regex};

use crate::{
    ParseError, SchemaObjectKind,
    autoproc::AutoProcDirective,
    name::{
        Ident, PermissionName, QualifiedName, schema_object_name, table_scoped_name,
        unqualified_name,
    },
};

/// One identifier part: bracketed, double-quoted or bare.
const IDENT: &str = r#"(?:\[(?:[^\]]|\]\])+\]|"(?:[^"]|"")+"|[\w@#$]+)"#;
const MASTER_KEY_NAME: &str = "[##MS_DatabaseMasterKey##]";

pub(crate) type Extractor = fn(&Captures<'_>) -> Result<String, ParseError>;

/// Which view of the text a rule runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTarget {
    /// Comments and string literals blanked out.
    Masked,
    /// Unmodified text, for comment markers.
    Raw,
}

pub struct Rule {
    pub(crate) kind: SchemaObjectKind,
    pub(crate) target: MatchTarget,
    pub(crate) pattern: Regex,
    pub(crate) extract: Extractor,
}

impl Rule {
    fn new(kind: SchemaObjectKind, target: MatchTarget, pattern: &str, extract: Extractor) -> Self {
        Self {
            kind,
            target,
            pattern: Regex::new(pattern).expect("classifier pattern should compile"),
            extract,
        }
    }

    fn masked(kind: SchemaObjectKind, pattern: &str, extract: Extractor) -> Self {
        Self::new(kind, MatchTarget::Masked, &format!(r"(?is)\b{pattern}"), extract)
    }
}

/// The ordered detector library used by [`super::Classifier`].
pub struct ClassifierRules {
    pub(crate) rules: Vec<Rule>,
    pub(crate) constraint_keywords: Regex,
}

impl ClassifierRules {
    /// Every supported DDL/DCL form, the comment markers and the noise
    /// statements that classify as `Unused`.
    #[must_use]
    pub fn standard() -> Self {
        use SchemaObjectKind as K;

        let object = qualified("");
        let table = qualified("table_");
        let constraint_head =
            format!(r"ALTER\s+TABLE\s+{table}\s+(?:WITH\s+(?:NO)?CHECK\s+)?ADD\s+CONSTRAINT\s+(?P<item>{IDENT})\s+");
        let module = |keyword: &str| format!(r"CREATE\s+(?:OR\s+ALTER\s+)?{keyword}\s+{object}");
        let named = |keyword: &str| format!(r"CREATE\s+{keyword}\s+(?P<name>{IDENT})");

        let rules = vec![
            Rule::new(
                K::PreScript,
                MatchTarget::Raw,
                r"(?im)^[ \t]*--[ \t]*PRESCRIPT[ \t]+(?P<name>[^\r\n]+?)[ \t]*$",
                extract_marker_name,
            ),
            Rule::new(
                K::Script,
                MatchTarget::Raw,
                r"(?im)^[ \t]*--[ \t]*SCRIPT[ \t]+(?P<name>[^\r\n]+?)[ \t]*$",
                extract_marker_name,
            ),
            Rule::new(
                K::AutoProc,
                MatchTarget::Raw,
                r"(?im)^[ \t]*(?P<directive>--[ \t]*AUTOPROC\b[^\r\n]*)",
                extract_autoproc,
            ),
            Rule::new(
                K::IndexedView,
                MatchTarget::Raw,
                &format!(
                    r"(?is)--[ \t]*INDEXEDVIEW\b.*?\bCREATE\s+(?:UNIQUE\s+)?(?:(?:NON)?CLUSTERED\s+)?INDEX\s+(?P<item>{IDENT})\s+ON\s+{table}"
                ),
                extract_table_scoped,
            ),
            Rule::masked(K::MasterKey, r"CREATE\s+MASTER\s+KEY\b", |_| Ok(MASTER_KEY_NAME.to_string())),
            Rule::masked(K::Certificate, &named("CERTIFICATE"), extract_unqualified),
            Rule::masked(K::SymmetricKey, &named(r"SYMMETRIC\s+KEY"), extract_unqualified),
            Rule::masked(K::Login, &named("LOGIN"), extract_unqualified),
            Rule::masked(K::User, &named("USER"), extract_unqualified),
            Rule::masked(K::Role, &named("ROLE"), extract_unqualified),
            Rule::masked(K::Schema, &named("SCHEMA"), extract_unqualified),
            Rule::masked(K::PartitionFunction, &named(r"PARTITION\s+FUNCTION"), extract_unqualified),
            Rule::masked(K::PartitionScheme, &named(r"PARTITION\s+SCHEME"), extract_unqualified),
            Rule::masked(K::MessageType, &named(r"MESSAGE\s+TYPE"), extract_unqualified),
            Rule::masked(K::Contract, &named("CONTRACT"), extract_unqualified),
            Rule::masked(K::Queue, &format!(r"CREATE\s+QUEUE\s+{object}"), extract_schema_object),
            Rule::masked(K::Service, &named("SERVICE"), extract_unqualified),
            Rule::masked(K::BrokerPriority, &named(r"BROKER\s+PRIORITY"), extract_unqualified),
            Rule::masked(K::UserDefinedType, &format!(r"CREATE\s+TYPE\s+{object}"), extract_schema_object),
            Rule::masked(K::Table, &format!(r"CREATE\s+TABLE\s+{object}"), extract_schema_object),
            Rule::masked(
                K::PrimaryKey,
                &format!(r"{constraint_head}PRIMARY\s+KEY\b"),
                extract_table_scoped,
            ),
            Rule::masked(
                K::Index,
                &format!(
                    r"CREATE\s+(?:UNIQUE\s+)?(?:(?:NON)?CLUSTERED\s+)?(?:COLUMNSTORE\s+|(?:PRIMARY\s+)?XML\s+|SPATIAL\s+)?INDEX\s+(?P<item>{IDENT})\s+ON\s+{table}"
                ),
                extract_table_scoped,
            ),
            Rule::masked(
                K::ForeignKey,
                &format!(r"{constraint_head}FOREIGN\s+KEY\b"),
                extract_table_scoped,
            ),
            Rule::masked(
                K::Constraint,
                &format!(r"{constraint_head}(?:CHECK|UNIQUE)\b"),
                extract_table_scoped,
            ),
            Rule::masked(
                K::Default,
                &format!(r"{constraint_head}DEFAULT\b"),
                extract_table_scoped,
            ),
            Rule::masked(K::Function, &module("FUNCTION"), extract_schema_object),
            Rule::masked(K::View, &module("VIEW"), extract_schema_object),
            Rule::masked(K::StoredProcedure, &module(r"PROC(?:EDURE)?"), extract_schema_object),
            Rule::masked(K::Trigger, &module("TRIGGER"), extract_schema_object),
            Rule::masked(
                K::Permission,
                &format!(
                    r"GRANT\s+(?P<permissions>[\w\s,]+?)(?:\s+ON\s+(?P<target>(?:(?:OBJECT|SCHEMA|TYPE)\s*::\s*)?{IDENT}(?:\s*\.\s*{IDENT})?))?\s+TO\s+(?P<principal>{IDENT})"
                ),
                extract_permission,
            ),
            Rule::new(
                K::Unused,
                MatchTarget::Masked,
                &format!(
                    r"(?is)\A(?:\s*(?:SET\s+[\w\s,]+?\s+(?:ON|OFF)|USE\s+{IDENT}|PRINT\s+[^;\r\n]*)\s*;?)+\s*\z"
                ),
                |_| Ok(String::new()),
            ),
        ];

        Self {
            rules,
            constraint_keywords: Regex::new(&format!(
                r"(?is)(?P<named>\bCONSTRAINT\s+{IDENT}\s+)?\b(?P<keyword>PRIMARY\s+KEY|FOREIGN\s+KEY|REFERENCES|CHECK\s*\()"
            ))
            .expect("constraint keyword pattern should compile"),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn qualified(prefix: &str) -> String {
    format!(r"(?:(?P<{prefix}schema>{IDENT})\s*\.\s*)?(?P<{prefix}name>{IDENT})")
}

fn capture<'t>(captures: &Captures<'t>, group: &str) -> Option<&'t str> {
    captures.name(group).map(|matched| matched.as_str())
}

fn missing(captures: &Captures<'_>) -> ParseError {
    ParseError::Unrecognized {
        sql: captures
            .get(0)
            .map(|matched| matched.as_str().to_string())
            .unwrap_or_default(),
    }
}

fn extract_schema_object(captures: &Captures<'_>) -> Result<String, ParseError> {
    let name = capture(captures, "name").ok_or_else(|| missing(captures))?;
    Ok(schema_object_name(capture(captures, "schema"), name))
}

fn extract_unqualified(captures: &Captures<'_>) -> Result<String, ParseError> {
    let name = capture(captures, "name").ok_or_else(|| missing(captures))?;
    Ok(unqualified_name(name))
}

fn extract_marker_name(captures: &Captures<'_>) -> Result<String, ParseError> {
    let name = capture(captures, "name").ok_or_else(|| missing(captures))?;
    Ok(Ident::parse(name.trim()).bracketed())
}

fn extract_table_scoped(captures: &Captures<'_>) -> Result<String, ParseError> {
    let table_name = capture(captures, "table_name").ok_or_else(|| missing(captures))?;
    let item = capture(captures, "item").ok_or_else(|| missing(captures))?;
    let table = QualifiedName::new(capture(captures, "table_schema"), table_name);
    Ok(table_scoped_name(&table, item))
}

fn extract_autoproc(captures: &Captures<'_>) -> Result<String, ParseError> {
    let directive = capture(captures, "directive").ok_or_else(|| missing(captures))?;
    Ok(AutoProcDirective::parse(directive)?.canonical())
}

fn extract_permission(captures: &Captures<'_>) -> Result<String, ParseError> {
    let permissions = capture(captures, "permissions").ok_or_else(|| missing(captures))?;
    let principal = capture(captures, "principal").ok_or_else(|| missing(captures))?;
    PermissionName::new(false, permissions, capture(captures, "target"), principal)
        .map(|permission| permission.canonical())
        .ok_or_else(|| missing(captures))
}
