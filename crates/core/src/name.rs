use std::fmt;

pub const DEFAULT_SCHEMA: &str = "dbo";

/// Widest name the registry key column holds.
pub const MAX_OBJECT_NAME_CHARS: usize = 450;

const FORBIDDEN_SEQUENCES: [(&str, &str); 7] = [
    (";", "contains a statement terminator"),
    ("'", "contains a string quote"),
    ("--", "contains a line comment marker"),
    ("/*", "contains a block comment marker"),
    ("*/", "contains a block comment marker"),
    ("\n", "contains a line break"),
    ("\r", "contains a line break"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident {
    pub value: String,
    pub quoted: bool,
}

impl Ident {
    pub fn quoted(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            quoted: true,
        }
    }

    pub fn unquoted(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            quoted: false,
        }
    }

    /// Parses a single identifier part, removing `[...]` or `"..."` quoting.
    #[must_use]
    pub fn parse(part: &str) -> Self {
        let part = part.trim();
        if let Some(inner) = part.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
            return Self::quoted(inner.replace("]]", "]"));
        }
        if let Some(inner) = part.strip_prefix('"').and_then(|rest| rest.strip_suffix('"')) {
            return Self::quoted(inner.replace("\"\"", "\""));
        }
        Self::unquoted(part)
    }

    #[must_use]
    pub fn bracketed(&self) -> String {
        quote_ident(&self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifiedName {
    pub schema: Option<Ident>,
    pub name: Ident,
}

impl QualifiedName {
    pub fn new(schema: Option<&str>, name: &str) -> Self {
        Self {
            schema: schema.map(Ident::parse),
            name: Ident::parse(name),
        }
    }

    /// Parses `name`, `schema.name` or a canonical bracketed form. Returns
    /// `None` for empty input or more than two parts.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = split_name(text);
        match parts.len() {
            1 => Some(Self {
                schema: None,
                name: parts.remove(0),
            }),
            2 => {
                let name = parts.remove(1);
                Some(Self {
                    schema: Some(parts.remove(0)),
                    name,
                })
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn schema_or_default(&self) -> &str {
        self.schema
            .as_ref()
            .map_or(DEFAULT_SCHEMA, |schema| schema.value.as_str())
    }

    /// `[schema].[name]`, defaulting the schema to `dbo`.
    #[must_use]
    pub fn canonical(&self) -> String {
        format!(
            "{}.{}",
            quote_ident(self.schema_or_default()),
            self.name.bracketed()
        )
    }

    /// `schema.name` without quoting, as used by `sp_rename` and `OBJECT_ID` literals.
    #[must_use]
    pub fn plain(&self) -> String {
        format!("{}.{}", self.schema_or_default(), self.name.value)
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// A constraint or index name that lives inside a table: `[schema].[table].[name]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableScopedName {
    pub table: QualifiedName,
    pub name: Ident,
}

impl TableScopedName {
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = split_name(text);
        if parts.len() != 3 {
            return None;
        }
        let name = parts.remove(2);
        let table = parts.remove(1);
        let schema = parts.remove(0);
        Some(Self {
            table: QualifiedName {
                schema: Some(schema),
                name: table,
            },
            name,
        })
    }

    #[must_use]
    pub fn canonical(&self) -> String {
        format!("{}.{}", self.table.canonical(), self.name.bracketed())
    }
}

/// What a permission is granted on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionTarget {
    Object(QualifiedName),
    Schema(Ident),
    Type(QualifiedName),
}

impl PermissionTarget {
    #[must_use]
    pub fn canonical(&self) -> String {
        match self {
            Self::Object(name) => name.canonical(),
            Self::Schema(schema) => format!("SCHEMA::{}", schema.bracketed()),
            Self::Type(name) => format!("TYPE::{}", name.canonical()),
        }
    }

    fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Some((class, name)) = text.split_once("::") {
            return match class.trim().to_ascii_uppercase().as_str() {
                "OBJECT" => QualifiedName::parse(name).map(Self::Object),
                "SCHEMA" => Some(Self::Schema(Ident::parse(name))),
                "TYPE" => QualifiedName::parse(name).map(Self::Type),
                _ => None,
            };
        }
        QualifiedName::parse(text).map(Self::Object)
    }
}

/// `GRANT <permissions> [ON <target>] TO <principal>`, also used as the
/// registry name of a permission object. `DENY` is kept for catalog
/// reconstruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionName {
    pub deny: bool,
    pub permissions: Vec<String>,
    pub target: Option<PermissionTarget>,
    pub principal: Ident,
}

impl PermissionName {
    #[must_use]
    pub fn new(
        deny: bool,
        permissions: &str,
        target: Option<&str>,
        principal: &str,
    ) -> Option<Self> {
        let permissions = permissions
            .split(',')
            .map(normalize_permission)
            .filter(|permission| !permission.is_empty())
            .collect::<Vec<_>>();
        if permissions.is_empty() {
            return None;
        }
        let target = match target {
            Some(target) => Some(PermissionTarget::parse(target)?),
            None => None,
        };
        Some(Self {
            deny,
            permissions,
            target,
            principal: Ident::parse(principal),
        })
    }

    /// Parses the canonical form produced by [`PermissionName::canonical`].
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let (deny, rest) = if let Some(rest) = strip_keyword(text, "GRANT") {
            (false, rest)
        } else {
            (true, strip_keyword(text, "DENY")?)
        };
        let (head, principal) = rest.rsplit_once(" TO ")?;
        let (permissions, target) = match head.split_once(" ON ") {
            Some((permissions, target)) => (permissions, Some(target)),
            None => (head, None),
        };
        Self::new(deny, permissions, target, principal)
    }

    #[must_use]
    pub fn canonical(&self) -> String {
        let verb = if self.deny { "DENY" } else { "GRANT" };
        let permissions = self.permissions.join(", ");
        match &self.target {
            Some(target) => format!(
                "{verb} {permissions} ON {} TO {}",
                target.canonical(),
                self.principal.bracketed()
            ),
            None => format!("{verb} {permissions} TO {}", self.principal.bracketed()),
        }
    }

    /// `REVOKE` removes grants and denies alike.
    #[must_use]
    pub fn revoke_sql(&self) -> String {
        let permissions = self.permissions.join(", ");
        match &self.target {
            Some(target) => format!(
                "REVOKE {permissions} ON {} FROM {}",
                target.canonical(),
                self.principal.bracketed()
            ),
            None => format!("REVOKE {permissions} FROM {}", self.principal.bracketed()),
        }
    }
}

fn strip_keyword<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    let head = text.get(..keyword.len())?;
    let rest = &text[keyword.len()..];
    (head.eq_ignore_ascii_case(keyword) && rest.starts_with(char::is_whitespace)).then(|| rest.trim_start())
}

fn normalize_permission(permission: &str) -> String {
    let words = permission
        .split_whitespace()
        .map(str::to_ascii_uppercase)
        .collect::<Vec<_>>()
        .join(" ");
    if words == "EXEC" { "EXECUTE".to_string() } else { words }
}

/// Splits a dotted SQL name into parts, honouring bracket and double-quote
/// quoting (including `]]` and `""` escapes).
#[must_use]
pub fn split_name(text: &str) -> Vec<Ident> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = text.trim().chars().peekable();
    let mut closing: Option<char> = None;

    while let Some(ch) = chars.next() {
        match closing {
            Some(close) => {
                current.push(ch);
                if ch == close {
                    if chars.peek() == Some(&close) {
                        current.push(close);
                        chars.next();
                    } else {
                        closing = None;
                    }
                }
            }
            None => match ch {
                '[' => {
                    current.push(ch);
                    closing = Some(']');
                }
                '"' => {
                    current.push(ch);
                    closing = Some('"');
                }
                '.' => {
                    parts.push(Ident::parse(&current));
                    current.clear();
                }
                _ => current.push(ch),
            },
        }
    }

    if !current.trim().is_empty() || !parts.is_empty() {
        parts.push(Ident::parse(&current));
    }

    parts
}

#[must_use]
pub fn quote_ident(value: &str) -> String {
    format!("[{}]", value.replace(']', "]]"))
}

/// Renders a unicode string literal: `N'...'` with embedded quotes doubled.
#[must_use]
pub fn quote_literal(value: &str) -> String {
    format!("N'{}'", value.replace('\'', "''"))
}

#[must_use]
pub fn schema_object_name(schema: Option<&str>, name: &str) -> String {
    QualifiedName::new(schema, name).canonical()
}

#[must_use]
pub fn table_scoped_name(table: &QualifiedName, name: &str) -> String {
    format!("{}.{}", table.canonical(), Ident::parse(name).bracketed())
}

/// Canonical `[name]` for database-level principals, schemas and keys.
#[must_use]
pub fn unqualified_name(name: &str) -> String {
    Ident::parse(name).bracketed()
}

/// Case-insensitive lookup key for an object name.
#[must_use]
pub fn name_key(name: &str) -> String {
    name.to_lowercase()
}

#[must_use]
pub fn names_equal(left: &str, right: &str) -> bool {
    name_key(left) == name_key(right)
}

/// Rejects names that could terminate a statement or open a comment when
/// embedded into generated SQL.
pub fn validate_object_name(name: &str) -> std::result::Result<(), &'static str> {
    if name.trim().is_empty() {
        return Err("is empty");
    }
    if name.contains('\0') {
        return Err("contains a NUL character");
    }
    if name.chars().count() > MAX_OBJECT_NAME_CHARS {
        return Err("is longer than 450 characters");
    }
    for (sequence, reason) in FORBIDDEN_SEQUENCES {
        if name.contains(sequence) {
            return Err(reason);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_wider_than_the_registry_key_are_invalid() {
        let widest = format!("[dbo].[{}]", "x".repeat(MAX_OBJECT_NAME_CHARS - 8));
        assert_eq!(validate_object_name(&widest), Ok(()));
        assert_eq!(
            validate_object_name(&format!("{widest}x")),
            Err("is longer than 450 characters")
        );
    }

    #[test]
    fn split_name_honours_brackets_and_escapes() {
        let parts = split_name("[my.schema].[odd]]name]");
        assert_eq!(
            parts,
            vec![Ident::quoted("my.schema"), Ident::quoted("odd]name")]
        );
    }

    #[test]
    fn canonical_name_defaults_schema() {
        let name = QualifiedName::parse("Beer").expect("single part name");
        assert_eq!(name.canonical(), "[dbo].[Beer]");

        let name = QualifiedName::parse("\"sales\".Orders").expect("two part name");
        assert_eq!(name.canonical(), "[sales].[Orders]");
    }

    #[test]
    fn table_scoped_name_round_trips() {
        let parsed = TableScopedName::parse("[dbo].[Beer].[PK_Beer]").expect("three parts");
        assert_eq!(parsed.table.canonical(), "[dbo].[Beer]");
        assert_eq!(parsed.name.value, "PK_Beer");
        assert_eq!(parsed.canonical(), "[dbo].[Beer].[PK_Beer]");
    }

    #[test]
    fn validate_rejects_terminators_and_comments() {
        assert!(validate_object_name("[dbo].[Beer]").is_ok());
        assert!(validate_object_name("[dbo].[Beer;DROP]").is_err());
        assert!(validate_object_name("[dbo].[Be--er]").is_err());
        assert!(validate_object_name("[dbo].[it's]").is_err());
        assert!(validate_object_name("  ").is_err());
    }

    #[test]
    fn quote_literal_doubles_quotes() {
        assert_eq!(quote_literal("O'Brien"), "N'O''Brien'");
    }

    #[test]
    fn permission_names_round_trip_through_canonical_form() {
        let grant = PermissionName::new(false, "exec", Some("dbo.InsertBeer"), "app_role").expect("grant");
        assert_eq!(grant.canonical(), "GRANT EXECUTE ON [dbo].[InsertBeer] TO [app_role]");
        assert_eq!(
            PermissionName::parse(&grant.canonical()).map(|parsed| parsed.canonical()),
            Some(grant.canonical())
        );
        assert_eq!(grant.revoke_sql(), "REVOKE EXECUTE ON [dbo].[InsertBeer] FROM [app_role]");

        let schema = PermissionName::parse("GRANT SELECT, insert ON SCHEMA::[sales] TO [reader]").expect("schema grant");
        assert_eq!(schema.target, Some(PermissionTarget::Schema(Ident::quoted("sales"))));
        assert_eq!(schema.canonical(), "GRANT SELECT, INSERT ON SCHEMA::[sales] TO [reader]");

        let database = PermissionName::parse("GRANT CREATE TABLE TO [builder]").expect("database grant");
        assert_eq!(database.target, None);
        assert_eq!(database.revoke_sql(), "REVOKE CREATE TABLE FROM [builder]");
    }
}
