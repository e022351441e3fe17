//! Message Schemas
//!
//! Every message name registered on the peer protocol carries an explicit
//! schema. Incoming payloads are accepted only when their shape matches it
//! exactly: same kind at the top level, and for arrays/objects the same
//! indices/keys with the same kinds one level down. Extra or missing fields
//! fail.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Value};

/// Kind of a JSON value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Kind {
    /// `null`
    Null,
    /// `true` / `false`
    Boolean,
    /// Any number.
    Number,
    /// Any string.
    String,
    /// An array.
    Array,
    /// An object.
    Object,
}

impl Kind {
    /// Kind of a value.
    pub fn of(value: &Value) -> Kind {
        match value {
            Value::Null => Kind::Null,
            Value::Bool(_) => Kind::Boolean,
            Value::Number(_) => Kind::Number,
            Value::String(_) => Kind::String,
            Value::Array(_) => Kind::Array,
            Value::Object(_) => Kind::Object,
        }
    }

    /// Simplest value of this kind.
    pub fn sample(self) -> Value {
        match self {
            Kind::Null => Value::Null,
            Kind::Boolean => Value::Bool(false),
            Kind::Number => Value::from(0),
            Kind::String => Value::String(String::new()),
            Kind::Array => Value::Array(Vec::new()),
            Kind::Object => Value::Object(Map::new()),
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Kind::Null => "null",
            Kind::Boolean => "boolean",
            Kind::Number => "number",
            Kind::String => "string",
            Kind::Array => "array",
            Kind::Object => "object",
        };
        f.write_str(name)
    }
}

/// Expected shape of a message payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Schema {
    /// A value of a single kind. `Array`/`Object` here means "empty".
    Scalar(Kind),
    /// A fixed-length array, element kinds by index.
    Array(Vec<Kind>),
    /// An object with exactly these keys.
    Object(BTreeMap<String, Kind>),
}

impl Schema {
    /// A scalar schema.
    pub const fn scalar(kind: Kind) -> Self {
        Schema::Scalar(kind)
    }

    /// An object schema from `(field, kind)` pairs.
    pub fn object<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Kind)>,
        K: Into<String>,
    {
        Schema::Object(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Derive a schema from an example value.
    pub fn from_sample(sample: &Value) -> Self {
        match sample {
            Value::Array(items) if !items.is_empty() => {
                Schema::Array(items.iter().map(Kind::of).collect())
            }
            Value::Object(fields) if !fields.is_empty() => Schema::Object(
                fields.iter().map(|(k, v)| (k.clone(), Kind::of(v))).collect(),
            ),
            other => Schema::Scalar(Kind::of(other)),
        }
    }

    /// Canonical example value, announced to the remote peer.
    pub fn sample(&self) -> Value {
        match self {
            Schema::Scalar(kind) => kind.sample(),
            Schema::Array(kinds) => Value::Array(kinds.iter().map(|k| k.sample()).collect()),
            Schema::Object(fields) => Value::Object(
                fields.iter().map(|(k, kind)| (k.clone(), kind.sample())).collect(),
            ),
        }
    }

    /// Top-level kind.
    pub fn kind(&self) -> Kind {
        match self {
            Schema::Scalar(kind) => *kind,
            Schema::Array(_) => Kind::Array,
            Schema::Object(_) => Kind::Object,
        }
    }

    /// Check a payload against this schema.
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (Schema::Scalar(Kind::Array), Value::Array(items)) => items.is_empty(),
            (Schema::Scalar(Kind::Object), Value::Object(fields)) => fields.is_empty(),
            (Schema::Scalar(kind), other) => Kind::of(other) == *kind,
            (Schema::Array(kinds), Value::Array(items)) => {
                kinds.len() == items.len()
                    && kinds.iter().zip(items).all(|(kind, item)| Kind::of(item) == *kind)
            }
            (Schema::Object(fields), Value::Object(values)) => {
                let matched = values
                    .iter()
                    .filter(|(key, value)| fields.get(*key) == Some(&Kind::of(value)))
                    .count();
                matched == values.len() && matched == fields.len()
            }
            _ => false,
        }
    }
}

impl From<Kind> for Schema {
    fn from(kind: Kind) -> Self {
        Schema::Scalar(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_object_exact_key_set() {
        let schema = Schema::from_sample(&json!({"a": 0, "b": ""}));

        assert!(schema.matches(&json!({"a": 1, "b": "x"})));
        assert!(!schema.matches(&json!({"a": 1, "b": "x", "c": true})));
        assert!(!schema.matches(&json!({"a": 1})));
        assert!(!schema.matches(&json!({"a": 1, "c": "x"})));
    }

    #[test]
    fn test_field_type_mismatch() {
        let schema = Schema::from_sample(&json!({"a": 0}));
        assert!(!schema.matches(&json!({"a": "1"})));
        assert!(!schema.matches(&json!({"a": null})));
    }

    #[test]
    fn test_array_rejected_against_non_array() {
        assert!(!Schema::from_sample(&json!({"a": 0})).matches(&json!([0])));
        assert!(!Schema::from_sample(&json!("")).matches(&json!(["x"])));
        assert!(!Schema::from_sample(&json!({})).matches(&json!([])));
    }

    #[test]
    fn test_arrays_are_structural() {
        let schema = Schema::from_sample(&json!([0, ""]));
        assert!(schema.matches(&json!([7, "seven"])));
        assert!(!schema.matches(&json!([7])));
        assert!(!schema.matches(&json!(["7", 7])));
        assert!(!schema.matches(&json!([7, "seven", 8])));
    }

    #[test]
    fn test_scalars() {
        assert!(Schema::scalar(Kind::String).matches(&json!("q")));
        assert!(!Schema::scalar(Kind::String).matches(&json!(1)));
        assert!(Schema::scalar(Kind::Number).matches(&json!(-3.5)));
        assert!(Schema::scalar(Kind::Null).matches(&Value::Null));
        assert!(!Schema::scalar(Kind::Null).matches(&json!(false)));
        assert!(Schema::scalar(Kind::Boolean).matches(&json!(true)));
    }

    #[test]
    fn test_nested_values_checked_one_level() {
        let schema = Schema::from_sample(&json!({"inner": {"x": 1}}));
        assert!(schema.matches(&json!({"inner": {"anything": "goes"}})));
        assert!(!schema.matches(&json!({"inner": [1]})));
    }

    #[test]
    fn test_sample_matches_own_schema() {
        let schemas = [
            Schema::scalar(Kind::Null),
            Schema::scalar(Kind::Number),
            Schema::Array(vec![Kind::Boolean, Kind::Object]),
            Schema::object([("word", Kind::String), ("count", Kind::Number)]),
        ];
        for schema in schemas {
            assert!(schema.matches(&schema.sample()), "{:?}", schema);
            assert_eq!(Schema::from_sample(&schema.sample()), schema);
        }
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(Kind::Object.to_string(), "object");
        assert_eq!(Schema::from_sample(&json!([1])).kind(), Kind::Array);
    }

    proptest! {
        #[test]
        fn prop_extra_key_always_fails(key in "[a-z]{1,8}", extra in "[A-Z]{1,8}") {
            let schema = Schema::object([(key.clone(), Kind::Number)]);
            let mut payload = Map::new();
            payload.insert(key, json!(1));
            prop_assert!(schema.matches(&Value::Object(payload.clone())));
            payload.insert(extra, json!(1));
            prop_assert!(!schema.matches(&Value::Object(payload)));
        }
    }
}
