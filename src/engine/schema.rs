//! Field schemas for message and query discovery.
//!
//! Each message and query type implements [`Describe`]. The provided
//! implementation serializes `Self::default()` and maps every JSON field to a
//! primitive type name, recursing into nested objects. A type whose default value
//! is not a JSON object (a tuple, a scalar, a sequence) has no field schema and is
//! rejected at registration.
//!
//! Types whose default value hides the shape of a field (an empty `Vec`, an
//! `Option` that defaults to `None`) can override [`Describe::describe`] to spell
//! the schema out.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

/// Type of one field in a [`FieldSchema`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldType {
    /// Primitive type name: `string`, `integer`, `number`, `boolean`, `array` or `null`.
    Primitive(String),
    /// Nested struct.
    Object(FieldSchema),
}

impl FieldType {
    /// Shorthand for a primitive field.
    pub fn primitive(name: &str) -> Self {
        FieldType::Primitive(name.to_string())
    }
}

/// Map from serialized field name to field type.
pub type FieldSchema = BTreeMap<String, FieldType>;

/// Discovery capability of message and query types.
pub trait Describe: Serialize + Default {
    /// Returns the field schema, or `None` if the type is not a struct.
    fn describe() -> Option<FieldSchema> {
        let value = serde_json::to_value(Self::default()).ok()?;
        schema_of_value(&value)
    }
}

/// Builds a schema from a JSON object. Returns `None` for non-objects.
pub fn schema_of_value(value: &Value) -> Option<FieldSchema> {
    let Value::Object(fields) = value else {
        return None;
    };

    let schema = fields
        .iter()
        .map(|(name, field)| (name.clone(), field_type_of(field)))
        .collect();
    Some(schema)
}

fn field_type_of(value: &Value) -> FieldType {
    match value {
        Value::Null => FieldType::primitive("null"),
        Value::Bool(_) => FieldType::primitive("boolean"),
        Value::Number(n) if n.is_i64() || n.is_u64() => FieldType::primitive("integer"),
        Value::Number(_) => FieldType::primitive("number"),
        Value::String(_) => FieldType::primitive("string"),
        Value::Array(_) => FieldType::primitive("array"),
        Value::Object(_) => match schema_of_value(value) {
            Some(nested) => FieldType::Object(nested),
            None => FieldType::primitive("object"),
        },
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Default, Serialize, Deserialize)]
    struct Inner {
        x: f64,
        y: f64,
    }

    #[derive(Default, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Attack {
        target_tag: String,
        damage: u32,
        critical: bool,
        at: Inner,
        tags: Vec<String>,
    }
    impl Describe for Attack {}

    #[derive(Default, Serialize)]
    struct NotAStruct(u8);
    impl Describe for NotAStruct {}

    #[test]
    fn struct_fields_map_to_primitive_names() {
        let schema = Attack::describe().expect("struct has a schema");
        assert_eq!(schema["targetTag"], FieldType::primitive("string"));
        assert_eq!(schema["damage"], FieldType::primitive("integer"));
        assert_eq!(schema["critical"], FieldType::primitive("boolean"));
        assert_eq!(schema["tags"], FieldType::primitive("array"));

        let FieldType::Object(at) = &schema["at"] else {
            panic!("nested struct should produce a nested schema");
        };
        assert_eq!(at["x"], FieldType::primitive("number"));
    }

    #[test]
    fn non_struct_has_no_schema() {
        assert!(NotAStruct::describe().is_none());
    }

    #[test]
    fn schema_serializes_as_plain_map() {
        let schema = Attack::describe().unwrap();
        let json = serde_json::to_value(&schema).unwrap();
        assert_eq!(json["damage"], "integer");
        assert_eq!(json["at"]["y"], "number");
    }
}
