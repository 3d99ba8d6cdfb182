//! Turns raw SQL units into typed, named schema objects.

mod rules;

pub use rules::{ClassifierRules, MatchTarget, Rule};

use regex::Captures;

use crate::{ParseError, SchemaObject, SchemaObjectKind, object::split_objects};

/// Kind, canonical name and match position of one SQL unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub kind: SchemaObjectKind,
    pub name: String,
    pub position: usize,
}

pub struct Classifier {
    rules: ClassifierRules,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::standard()
    }
}

impl Classifier {
    pub fn new(rules: ClassifierRules) -> Self {
        Self { rules }
    }

    #[must_use]
    pub fn standard() -> Self {
        Self::new(ClassifierRules::standard())
    }

    /// Picks the rule whose match starts earliest; ties go to the more
    /// foundational kind.
    pub fn classify(&self, sql: &str) -> Result<Classification, ParseError> {
        let masked = mask_comments_and_strings(sql);
        let mut best: Option<(usize, &Rule, Captures<'_>)> = None;

        for rule in &self.rules.rules {
            let text = match rule.target {
                MatchTarget::Masked => masked.as_str(),
                MatchTarget::Raw => sql,
            };
            let Some(captures) = rule.pattern.captures(text) else {
                continue;
            };
            let position = captures.get(0).map_or(0, |matched| matched.start());
            let better = match &best {
                None => true,
                Some((best_position, best_rule, _)) => {
                    (position, rule.kind) < (*best_position, best_rule.kind)
                }
            };
            if better {
                best = Some((position, rule, captures));
            }
        }

        let Some((position, rule, captures)) = best else {
            return Err(ParseError::Unrecognized {
                sql: sql.to_string(),
            });
        };
        let name = (rule.extract)(&captures)?;
        self.reject_anonymous_constraints(rule.kind, &name, sql, &masked)?;

        Ok(Classification {
            kind: rule.kind,
            name,
            position,
        })
    }

    pub fn parse_object(&self, sql: &str, original_order: usize) -> Result<SchemaObject, ParseError> {
        let classification = self.classify(sql)?;
        Ok(SchemaObject::new(
            classification.kind,
            classification.name,
            sql,
            original_order,
        ))
    }

    /// Splits a `GO`-separated source and classifies every chunk in order.
    pub fn parse_objects(&self, source: &str) -> Result<Vec<SchemaObject>, ParseError> {
        split_objects(source)
            .iter()
            .enumerate()
            .map(|(order, chunk)| self.parse_object(chunk, order))
            .collect()
    }

    fn reject_anonymous_constraints(
        &self,
        kind: SchemaObjectKind,
        name: &str,
        sql: &str,
        masked: &str,
    ) -> Result<(), ParseError> {
        use SchemaObjectKind as K;

        if !matches!(kind, K::Table | K::PrimaryKey | K::ForeignKey | K::Constraint) {
            return Ok(());
        }

        // Keywords spelled inside `[...]` or `"..."` are names, not clauses.
        let scanned = blank_identifiers(masked);
        let mut after_foreign_key = false;
        for captures in self.rules.constraint_keywords.captures_iter(&scanned) {
            let keyword = captures
                .name("keyword")
                .map(|matched| matched.as_str().to_ascii_uppercase())
                .unwrap_or_default();
            let construct = if keyword.starts_with("PRIMARY") {
                "PRIMARY KEY"
            } else if keyword.starts_with("FOREIGN") {
                "FOREIGN KEY"
            } else if keyword.starts_with("REFERENCES") {
                "REFERENCES"
            } else {
                "CHECK"
            };

            // REFERENCES continues the FOREIGN KEY clause before it.
            if construct == "REFERENCES" && after_foreign_key {
                after_foreign_key = false;
                continue;
            }
            after_foreign_key = construct == "FOREIGN KEY";

            if captures.name("named").is_none() {
                return Err(ParseError::AnonymousConstraint {
                    object: name.to_string(),
                    construct,
                    sql: sql.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Blanks comments and string literal contents with spaces, keeping every
/// byte offset and line break. Bracketed and double-quoted identifiers are
/// left alone.
#[must_use]
pub fn mask_comments_and_strings(sql: &str) -> String {
    let bytes = sql.as_bytes();
    let mut masked = bytes.to_vec();
    let len = bytes.len();
    let mut index = 0;

    while index < len {
        match bytes[index] {
            b'-' if bytes.get(index + 1) == Some(&b'-') => {
                let end = bytes[index..]
                    .iter()
                    .position(|byte| *byte == b'\n')
                    .map_or(len, |offset| index + offset);
                blank(&mut masked, index, end);
                index = end;
            }
            b'/' if bytes.get(index + 1) == Some(&b'*') => {
                let mut depth = 1;
                let mut cursor = index + 2;
                while cursor < len && depth > 0 {
                    match (bytes[cursor], bytes.get(cursor + 1)) {
                        (b'/', Some(b'*')) => {
                            depth += 1;
                            cursor += 2;
                        }
                        (b'*', Some(b'/')) => {
                            depth -= 1;
                            cursor += 2;
                        }
                        _ => cursor += 1,
                    }
                }
                let end = cursor.min(len);
                blank(&mut masked, index, end);
                index = end;
            }
            b'\'' => {
                let end = closing_quote(bytes, index + 1, b'\'');
                blank(&mut masked, index + 1, end);
                index = end + 1;
            }
            b'[' => index = closing_quote(bytes, index + 1, b']') + 1,
            b'"' => index = closing_quote(bytes, index + 1, b'"') + 1,
            _ => index += 1,
        }
    }

    String::from_utf8(masked).unwrap_or_else(|_| sql.to_string())
}

/// Blanks the contents of bracketed and double-quoted identifiers, keeping
/// the delimiters and every byte offset.
fn blank_identifiers(masked: &str) -> String {
    let bytes = masked.as_bytes();
    let mut blanked = bytes.to_vec();
    let mut index = 0;

    while index < bytes.len() {
        let quote = match bytes[index] {
            b'[' => b']',
            b'"' => b'"',
            _ => {
                index += 1;
                continue;
            }
        };
        let end = closing_quote(bytes, index + 1, quote);
        blank(&mut blanked, index + 1, end);
        index = end + 1;
    }

    String::from_utf8(blanked).unwrap_or_else(|_| masked.to_string())
}

/// Offset of the closing delimiter, skipping doubled escapes.
fn closing_quote(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut cursor = start;
    while cursor < bytes.len() {
        if bytes[cursor] == quote {
            if bytes.get(cursor + 1) == Some(&quote) {
                cursor += 2;
                continue;
            }
            return cursor;
        }
        cursor += 1;
    }
    bytes.len()
}

fn blank(masked: &mut [u8], start: usize, end: usize) {
    let end = end.min(masked.len());
    if start >= end {
        return;
    }
    for byte in &mut masked[start..end] {
        if *byte != b'\n' && *byte != b'\r' {
            *byte = b' ';
        }
    }
}
