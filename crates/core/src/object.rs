use std::fmt;

use sha2::{Digest, Sha256};

use crate::SchemaObjectKind;

pub const BATCH_SEPARATOR: &str = "GO";

const ALWAYS_DIFFERENT: &str = "*";

/// Deterministic content digest used to detect definition changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature(String);

impl Signature {
    #[must_use]
    pub fn of(sql: &str) -> Self {
        Self::of_parts([canonical_text(sql).as_str()])
    }

    /// Digest over several canonical fragments, separated so that moving
    /// text between fragments changes the result.
    #[must_use]
    pub fn of_parts<'a>(parts: impl IntoIterator<Item = &'a str>) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        Self(hex::encode(hasher.finalize()))
    }

    /// A signature that never matches anything, including itself.
    #[must_use]
    pub fn always_different() -> Self {
        Self(ALWAYS_DIFFERENT.to_string())
    }

    pub fn from_stored(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_always_different(&self) -> bool {
        self.0 == ALWAYS_DIFFERENT
    }

    /// Change detection: equal digests, unless either side is the
    /// always-different marker.
    #[must_use]
    pub fn matches(&self, stored: &Signature) -> bool {
        !self.is_always_different() && !stored.is_always_different() && self == stored
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One installable unit of schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaObject {
    kind: SchemaObjectKind,
    name: String,
    sql: String,
    original_order: usize,
    signature: Signature,
}

impl SchemaObject {
    pub fn new(
        kind: SchemaObjectKind,
        name: impl Into<String>,
        sql: impl Into<String>,
        original_order: usize,
    ) -> Self {
        let sql = sql.into();
        let signature = Signature::of(&sql);
        Self {
            kind,
            name: name.into(),
            sql,
            original_order,
            signature,
        }
    }

    #[must_use]
    pub fn kind(&self) -> SchemaObjectKind {
        self.kind
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[must_use]
    pub fn original_order(&self) -> usize {
        self.original_order
    }

    #[must_use]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    #[must_use]
    pub(crate) fn with_signature(mut self, signature: Signature) -> Self {
        self.signature = signature;
        self
    }

    #[must_use]
    pub(crate) fn with_order(mut self, original_order: usize) -> Self {
        self.original_order = original_order;
        self
    }

    /// Batches to send to the server, split on standalone `GO` lines.
    #[must_use]
    pub fn batches(&self) -> Vec<String> {
        split_batches(&self.sql)
    }
}

/// Line endings normalized to `\n`, surrounding whitespace trimmed.
#[must_use]
pub fn canonical_text(sql: &str) -> String {
    sql.replace("\r\n", "\n").trim().to_string()
}

/// Splits an object source stream into one chunk per object. A line that
/// holds only the batch separator ends the current chunk.
#[must_use]
pub fn split_objects(source: &str) -> Vec<String> {
    split_batches(source)
}

#[must_use]
pub fn split_batches(sql: &str) -> Vec<String> {
    let mut batches = Vec::new();
    let mut current = String::new();

    for line in sql.lines() {
        if is_separator_line(line) {
            push_batch(&mut batches, &mut current);
            continue;
        }
        current.push_str(line);
        current.push('\n');
    }
    push_batch(&mut batches, &mut current);

    batches
}

fn is_separator_line(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case(BATCH_SEPARATOR)
}

fn push_batch(batches: &mut Vec<String>, current: &mut String) {
    let batch = current.trim();
    if !batch.is_empty() {
        batches.push(batch.to_string());
    }
    current.clear();
}

#[cfg(test)]
mod tests {
    use super::{Signature, split_objects};

    #[test]
    fn signature_is_stable_and_sensitive() {
        let first = Signature::of("CREATE TABLE Beer (ID int)");
        let again = Signature::of("CREATE TABLE Beer (ID int)\r\n");
        let other = Signature::of("CREATE TABLE Beer (ID bigint)");

        assert!(first.matches(&again));
        assert!(!first.matches(&other));
        assert_eq!(first.as_str().len(), 64);
    }

    #[test]
    fn always_different_never_matches() {
        let marker = Signature::always_different();
        assert!(!marker.matches(&marker.clone()));
        assert!(!Signature::of("x").matches(&marker));
    }

    #[test]
    fn split_objects_uses_standalone_go_lines() {
        let source = "CREATE TABLE A (ID int)\nGO\n\ngo  \nCREATE VIEW V AS SELECT GOAL = 1\nGO";
        assert_eq!(
            split_objects(source),
            vec![
                "CREATE TABLE A (ID int)".to_string(),
                "CREATE VIEW V AS SELECT GOAL = 1".to_string(),
            ]
        );
    }
}
