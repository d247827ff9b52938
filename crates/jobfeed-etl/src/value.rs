//! Scalar values and normalized rows.

use std::collections::HashMap;

/// One normalized output record: field name -> scalar value.
///
/// Every row a [`crate::Transformer`] emits carries exactly the field set
/// the transformer declares via `output_fields()`.
pub type Row = HashMap<String, FieldValue>;

/// A scalar field value in a normalized row.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    /// Convert a raw JSON value from a source record.
    ///
    /// Arrays and objects are flattened to their compact JSON text; the
    /// fixed job schema only carries scalars.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => FieldValue::Null,
            serde_json::Value::Bool(b) => FieldValue::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    FieldValue::Int(i)
                } else if let Some(f) = n.as_f64() {
                    FieldValue::Float(f)
                } else {
                    FieldValue::Text(n.to_string())
                }
            }
            serde_json::Value::String(s) => FieldValue::Text(s.clone()),
            other => FieldValue::Text(other.to_string()),
        }
    }

    /// Render the value as staging-artifact text. NULLs become the
    /// configured literal token so the COPY `NULL AS` clause matches.
    pub fn render(&self, null_token: &str) -> String {
        match self {
            FieldValue::Null => null_token.to_string(),
            FieldValue::Bool(b) => if *b { "true" } else { "false" }.to_string(),
            FieldValue::Int(i) => i.to_string(),
            FieldValue::Float(f) => f.to_string(),
            FieldValue::Text(s) => s.clone(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_scalars() {
        assert_eq!(FieldValue::from_json(&json!(null)), FieldValue::Null);
        assert_eq!(FieldValue::from_json(&json!(true)), FieldValue::Bool(true));
        assert_eq!(FieldValue::from_json(&json!(42)), FieldValue::Int(42));
        assert_eq!(FieldValue::from_json(&json!(30.27)), FieldValue::Float(30.27));
        assert_eq!(
            FieldValue::from_json(&json!("Data Engineer")),
            FieldValue::Text("Data Engineer".to_string())
        );
    }

    #[test]
    fn test_from_json_array_flattens() {
        let value = FieldValue::from_json(&json!(["north", "south"]));
        assert_eq!(value, FieldValue::Text("[\"north\",\"south\"]".to_string()));
    }

    #[test]
    fn test_render_null_uses_token() {
        assert_eq!(FieldValue::Null.render("NULL"), "NULL");
        assert_eq!(FieldValue::Null.render("\\N"), "\\N");
    }

    #[test]
    fn test_render_bool() {
        assert_eq!(FieldValue::Bool(true).render("NULL"), "true");
        assert_eq!(FieldValue::Bool(false).render("NULL"), "false");
    }
}
