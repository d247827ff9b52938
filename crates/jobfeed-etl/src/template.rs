//! Textual SQL template rendering.
//!
//! This is the single place where values are substituted into SQL *as
//! text*. Unlike driver-level parameter binding it can fill non-value
//! slots — table names, column lists, schema qualifiers — which is why
//! the SQL runner and the stage-table DDL both go through it.
//!
//! SECURITY: rendered values are spliced verbatim into the statement.
//! Callers must never pass untrusted input as a parameter value.

use std::collections::HashMap;

use crate::error::{EtlError, Result};

/// Render a `{slot}`-style template. `{{` and `}}` emit literal braces.
///
/// Fails on a slot with no matching parameter and on unbalanced braces;
/// both are usage errors, never retried.
pub fn render_template(template: &str, params: &HashMap<String, String>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' => {
                if chars.peek() == Some(&'{') {
                    chars.next();
                    out.push('{');
                    continue;
                }
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(inner) => name.push(inner),
                        None => {
                            return Err(EtlError::Template(
                                "unbalanced '{' in SQL template".into(),
                            ))
                        }
                    }
                }
                match params.get(&name) {
                    Some(value) => out.push_str(value),
                    None => {
                        return Err(EtlError::Template(format!(
                            "no parameter for template slot '{{{}}}'",
                            name
                        )))
                    }
                }
            }
            '}' => {
                if chars.peek() == Some(&'}') {
                    chars.next();
                    out.push('}');
                } else {
                    return Err(EtlError::Template(
                        "unbalanced '}' in SQL template".into(),
                    ));
                }
            }
            other => out.push(other),
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_renders_value_and_identifier_slots() {
        let sql = render_template(
            "DELETE FROM {table} WHERE jobdate < '{cutoff}'",
            &params(&[("table", "jobs_stage"), ("cutoff", "2024-01-01")]),
        )
        .unwrap();
        assert_eq!(sql, "DELETE FROM jobs_stage WHERE jobdate < '2024-01-01'");
    }

    #[test]
    fn test_double_braces_are_literal() {
        let sql = render_template("SELECT '{{}}' || {name}", &params(&[("name", "x")])).unwrap();
        assert_eq!(sql, "SELECT '{}' || x");
    }

    #[test]
    fn test_unknown_slot_is_error() {
        let result = render_template("ANALYZE {table}", &params(&[]));
        assert!(matches!(result, Err(EtlError::Template(_))));
    }

    #[test]
    fn test_unbalanced_braces_are_errors() {
        assert!(render_template("SELECT {open", &params(&[])).is_err());
        assert!(render_template("SELECT close}", &params(&[])).is_err());
    }

    #[test]
    fn test_no_slots_passes_through() {
        let sql = render_template("VACUUM", &params(&[])).unwrap();
        assert_eq!(sql, "VACUUM");
    }
}
