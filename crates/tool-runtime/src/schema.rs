//! Input schemas and argument validation.
//!
//! A tool's raw JSON Schema is parsed into [`Schema`] once, at discovery.
//! Validation is a recursive structural match over `serde_json::Value`
//! covering the subset tool servers use in practice: `type`, `properties`,
//! `required`, `additionalProperties`, `enum`, string length bounds, numeric
//! bounds (both the numeric and the draft-4 boolean `exclusive*` forms), and
//! array `items` (single or positional).
//!
//! Parsing is lenient per keyword: a keyword whose value has a shape outside
//! this subset is skipped, and every keyword that did parse is enforced.
//! Boolean subschemas are honoured (`true` accepts anything, `false`
//! nothing).

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Value};

/// Name used for the arguments object itself in error messages.
const ROOT: &str = "arguments";

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaType {
    Single(String),
    Union(Vec<String>),
}

impl SchemaType {
    fn from_value(raw: &Value) -> Option<Self> {
        match raw {
            Value::String(name) => Some(SchemaType::Single(name.clone())),
            Value::Array(names) => {
                let names: Vec<String> = names.iter().filter_map(Value::as_str).map(str::to_string).collect();
                (!names.is_empty()).then_some(SchemaType::Union(names))
            }
            _ => None,
        }
    }

    fn names(&self) -> Vec<&str> {
        match self {
            SchemaType::Single(name) => vec![name.as_str()],
            SchemaType::Union(names) => names.iter().map(String::as_str).collect(),
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        self.names().into_iter().any(|name| type_matches(name, value))
    }

    fn is_object(&self) -> bool {
        self.names().contains(&"object")
    }
}

impl fmt::Display for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.names().join(" or "))
    }
}

/// `exclusiveMinimum` / `exclusiveMaximum`: a bound (draft 6+) or a flag
/// modifying `minimum` / `maximum` (draft 4).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExclusiveBound {
    Flag(bool),
    Bound(f64),
}

impl ExclusiveBound {
    fn from_value(raw: &Value) -> Option<Self> {
        match raw {
            Value::Bool(flag) => Some(ExclusiveBound::Flag(*flag)),
            Value::Number(n) => n.as_f64().map(ExclusiveBound::Bound),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdditionalProperties {
    Allowed(bool),
    Schema(Box<Schema>),
}

/// `items`: one schema for every element, or one per position.
#[derive(Debug, Clone, PartialEq)]
pub enum Items {
    Single(Box<Schema>),
    Positional(Vec<Schema>),
}

/// Raw schema is neither an object nor a boolean.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("input schema must be an object or a boolean, got {0}")]
pub struct SchemaError(pub &'static str);

/// Parsed input schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    pub schema_type: Option<SchemaType>,
    pub properties: Option<BTreeMap<String, Schema>>,
    pub required: Vec<String>,
    pub additional_properties: Option<AdditionalProperties>,
    pub enum_values: Option<Vec<Value>>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub exclusive_minimum: Option<ExclusiveBound>,
    pub exclusive_maximum: Option<ExclusiveBound>,
    pub items: Option<Items>,
    /// The `false` schema: no value is valid.
    pub rejects_all: bool,
}

/// Why an argument set was rejected. Every variant names the offending
/// parameter by its path (`filter.limit`, `tags[2]`).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing required parameter: {0}")]
    MissingRequired(String),

    #[error("unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("type mismatch for parameter '{param}': expected {expected}, got {actual}")]
    TypeMismatch {
        param: String,
        expected: String,
        actual: &'static str,
    },

    #[error("parameter '{param}' must be one of {allowed}")]
    NotInEnum { param: String, allowed: String },

    #[error("parameter '{param}' must be at least {min} characters, got {actual}")]
    TooShort { param: String, min: usize, actual: usize },

    #[error("parameter '{param}' must be at most {max} characters, got {actual}")]
    TooLong { param: String, max: usize, actual: usize },

    #[error("parameter '{param}' must be >= {bound}, got {actual}")]
    BelowMinimum { param: String, bound: f64, actual: f64 },

    #[error("parameter '{param}' must be <= {bound}, got {actual}")]
    AboveMaximum { param: String, bound: f64, actual: f64 },

    #[error("parameter '{param}' must be > {bound}, got {actual}")]
    NotAboveExclusiveMinimum { param: String, bound: f64, actual: f64 },

    #[error("parameter '{param}' must be < {bound}, got {actual}")]
    NotBelowExclusiveMaximum { param: String, bound: f64, actual: f64 },

    #[error("parameter '{0}' is not allowed")]
    NotAllowed(String),

    #[error("tool has an unusable input schema: {0}")]
    InvalidSchema(SchemaError),
}

impl ValidationError {
    /// Path of the parameter that failed.
    pub fn param(&self) -> &str {
        match self {
            ValidationError::MissingRequired(param)
            | ValidationError::UnknownParameter(param)
            | ValidationError::NotAllowed(param) => param,
            ValidationError::InvalidSchema(_) => ROOT,
            ValidationError::TypeMismatch { param, .. }
            | ValidationError::NotInEnum { param, .. }
            | ValidationError::TooShort { param, .. }
            | ValidationError::TooLong { param, .. }
            | ValidationError::BelowMinimum { param, .. }
            | ValidationError::AboveMaximum { param, .. }
            | ValidationError::NotAboveExclusiveMinimum { param, .. }
            | ValidationError::NotBelowExclusiveMaximum { param, .. } => param,
        }
    }
}

impl Schema {
    /// Parse a raw schema. `null` means the tool declared none.
    pub fn parse(raw: &Value) -> Result<Option<Schema>, SchemaError> {
        match raw {
            Value::Null => Ok(None),
            Value::Bool(_) | Value::Object(_) => Ok(Some(Schema::from_value(raw))),
            other => Err(SchemaError(json_type(other))),
        }
    }

    /// Lenient conversion of one (sub)schema. Keywords with unexpected
    /// shapes are left unset.
    fn from_value(raw: &Value) -> Schema {
        let obj = match raw {
            Value::Object(obj) => obj,
            Value::Bool(allowed) => {
                return Schema {
                    rejects_all: !allowed,
                    ..Schema::default()
                }
            }
            _ => return Schema::default(),
        };

        Schema {
            schema_type: obj.get("type").and_then(SchemaType::from_value),
            properties: obj.get("properties").and_then(Value::as_object).map(|props| {
                props
                    .iter()
                    .map(|(name, sub)| (name.clone(), Schema::from_value(sub)))
                    .collect()
            }),
            required: obj
                .get("required")
                .and_then(Value::as_array)
                .map(|names| names.iter().filter_map(Value::as_str).map(str::to_string).collect())
                .unwrap_or_default(),
            additional_properties: match obj.get("additionalProperties") {
                Some(Value::Bool(allowed)) => Some(AdditionalProperties::Allowed(*allowed)),
                Some(sub @ Value::Object(_)) => Some(AdditionalProperties::Schema(Box::new(Schema::from_value(sub)))),
                _ => None,
            },
            enum_values: obj.get("enum").and_then(Value::as_array).cloned(),
            min_length: obj.get("minLength").and_then(as_count),
            max_length: obj.get("maxLength").and_then(as_count),
            minimum: obj.get("minimum").and_then(Value::as_f64),
            maximum: obj.get("maximum").and_then(Value::as_f64),
            exclusive_minimum: obj.get("exclusiveMinimum").and_then(ExclusiveBound::from_value),
            exclusive_maximum: obj.get("exclusiveMaximum").and_then(ExclusiveBound::from_value),
            items: match obj.get("items") {
                Some(Value::Array(subs)) => Some(Items::Positional(subs.iter().map(Schema::from_value).collect())),
                Some(sub @ (Value::Object(_) | Value::Bool(_))) => Some(Items::Single(Box::new(Schema::from_value(sub)))),
                _ => None,
            },
            rejects_all: false,
        }
    }

    /// Validate a tool's arguments object.
    pub fn validate(&self, args: &Value) -> Result<(), ValidationError> {
        match args {
            Value::Object(map) if self.describes_object() => self.check_object(map, ""),
            _ if self.describes_object() => Err(ValidationError::TypeMismatch {
                param: ROOT.to_string(),
                expected: "object".to_string(),
                actual: json_type(args),
            }),
            _ => self.check_value(args, ROOT),
        }
    }

    fn describes_object(&self) -> bool {
        self.schema_type.as_ref().map_or(false, SchemaType::is_object)
            || self.properties.is_some()
            || !self.required.is_empty()
    }

    /// Required keys first, then unknown keys, then each present value.
    fn check_object(&self, map: &Map<String, Value>, path: &str) -> Result<(), ValidationError> {
        for name in &self.required {
            if !map.contains_key(name) {
                return Err(ValidationError::MissingRequired(join(path, name)));
            }
        }

        let closed = matches!(
            self.additional_properties,
            None | Some(AdditionalProperties::Allowed(false))
        );
        if let Some(properties) = &self.properties {
            if closed {
                if let Some(unknown) = map.keys().find(|k| !properties.contains_key(*k)) {
                    return Err(ValidationError::UnknownParameter(join(path, unknown)));
                }
            }
        }

        for (name, value) in map {
            let child = join(path, name);
            match self.properties.as_ref().and_then(|p| p.get(name)) {
                Some(schema) => schema.check_value(value, &child)?,
                None => {
                    if let Some(AdditionalProperties::Schema(schema)) = &self.additional_properties {
                        schema.check_value(value, &child)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn check_value(&self, value: &Value, path: &str) -> Result<(), ValidationError> {
        if self.rejects_all {
            return Err(ValidationError::NotAllowed(path.to_string()));
        }

        if let Some(expected) = &self.schema_type {
            if !expected.accepts(value) {
                return Err(ValidationError::TypeMismatch {
                    param: path.to_string(),
                    expected: expected.to_string(),
                    actual: json_type(value),
                });
            }
        }

        if let Some(allowed) = &self.enum_values {
            if !allowed.iter().any(|candidate| json_eq(candidate, value)) {
                return Err(ValidationError::NotInEnum {
                    param: path.to_string(),
                    allowed: Value::Array(allowed.clone()).to_string(),
                });
            }
        }

        match value {
            Value::String(s) => self.check_length(s, path)?,
            Value::Number(n) => {
                if let Some(actual) = n.as_f64() {
                    self.check_range(actual, path)?;
                }
            }
            Value::Object(map) if self.describes_object() => self.check_object(map, path)?,
            Value::Array(items) => match &self.items {
                Some(Items::Single(item_schema)) => {
                    for (i, item) in items.iter().enumerate() {
                        item_schema.check_value(item, &format!("{path}[{i}]"))?;
                    }
                }
                // Elements past the listed positions are unconstrained.
                Some(Items::Positional(schemas)) => {
                    for (i, (item, item_schema)) in items.iter().zip(schemas).enumerate() {
                        item_schema.check_value(item, &format!("{path}[{i}]"))?;
                    }
                }
                None => {}
            },
            _ => {}
        }
        Ok(())
    }

    fn check_length(&self, s: &str, path: &str) -> Result<(), ValidationError> {
        let actual = s.chars().count();
        if let Some(min) = self.min_length {
            if actual < min {
                return Err(ValidationError::TooShort {
                    param: path.to_string(),
                    min,
                    actual,
                });
            }
        }
        if let Some(max) = self.max_length {
            if actual > max {
                return Err(ValidationError::TooLong {
                    param: path.to_string(),
                    max,
                    actual,
                });
            }
        }
        Ok(())
    }

    fn check_range(&self, actual: f64, path: &str) -> Result<(), ValidationError> {
        let param = || path.to_string();

        if let Some(bound) = self.minimum {
            if self.exclusive_minimum == Some(ExclusiveBound::Flag(true)) {
                if actual <= bound {
                    return Err(ValidationError::NotAboveExclusiveMinimum { param: param(), bound, actual });
                }
            } else if actual < bound {
                return Err(ValidationError::BelowMinimum { param: param(), bound, actual });
            }
        }
        if let Some(bound) = self.maximum {
            if self.exclusive_maximum == Some(ExclusiveBound::Flag(true)) {
                if actual >= bound {
                    return Err(ValidationError::NotBelowExclusiveMaximum { param: param(), bound, actual });
                }
            } else if actual > bound {
                return Err(ValidationError::AboveMaximum { param: param(), bound, actual });
            }
        }
        if let Some(ExclusiveBound::Bound(bound)) = self.exclusive_minimum {
            if actual <= bound {
                return Err(ValidationError::NotAboveExclusiveMinimum { param: param(), bound, actual });
            }
        }
        if let Some(ExclusiveBound::Bound(bound)) = self.exclusive_maximum {
            if actual >= bound {
                return Err(ValidationError::NotBelowExclusiveMaximum { param: param(), bound, actual });
            }
        }
        Ok(())
    }
}

/// Non-negative whole number, written as an integer or a float like `5.0`.
fn as_count(raw: &Value) -> Option<usize> {
    if let Some(n) = raw.as_u64() {
        return usize::try_from(n).ok();
    }
    raw.as_f64()
        .filter(|f| f.is_finite() && *f >= 0.0 && f.fract() == 0.0)
        .map(|f| f as usize)
}

fn join(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{path}.{name}")
    }
}

fn is_integer(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.is_i64() || n.is_u64() || n.as_f64().map_or(false, |f| f.is_finite() && f.fract() == 0.0),
        _ => false,
    }
}

fn type_matches(name: &str, value: &Value) -> bool {
    match name {
        "string" => value.is_string(),
        "integer" => is_integer(value),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        // Unknown type names constrain nothing.
        _ => true,
    }
}

/// JSON type name of a value, reporting whole numbers as `integer`.
pub fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) if is_integer(value) => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Deep equality where numbers compare by value, so `1` equals `1.0`.
fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| json_eq(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).map_or(false, |y| json_eq(x, y)))
        }
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn search_schema() -> Schema {
        Schema::parse(&json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "minLength": 1, "maxLength": 5},
                "limit": {"type": "integer", "minimum": 1, "maximum": 100},
                "mode": {"enum": ["fast", "exact"]},
                "tags": {"type": "array", "items": {"type": "string"}},
                "filter": {
                    "type": "object",
                    "properties": {"owner": {"type": ["string", "null"]}},
                    "required": ["owner"]
                }
            },
            "required": ["query"]
        }))
        .unwrap()
        .unwrap()
    }

    fn message(result: Result<(), ValidationError>) -> String {
        result.unwrap_err().to_string()
    }

    #[test]
    fn accepts_valid_arguments() {
        let schema = search_schema();
        schema
            .validate(&json!({
                "query": "rust",
                "limit": 10,
                "mode": "fast",
                "tags": ["a", "b"],
                "filter": {"owner": null}
            }))
            .unwrap();
    }

    #[test]
    fn missing_required_parameter() {
        assert_eq!(
            message(search_schema().validate(&json!({"limit": 3}))),
            "missing required parameter: query"
        );
    }

    #[test]
    fn unknown_parameter() {
        assert_eq!(
            message(search_schema().validate(&json!({"query": "x", "bogus": 1}))),
            "unknown parameter: bogus"
        );
    }

    #[test]
    fn type_mismatch_names_both_types() {
        assert_eq!(
            message(search_schema().validate(&json!({"query": 42}))),
            "type mismatch for parameter 'query': expected string, got integer"
        );
        let err = search_schema()
            .validate(&json!({"query": "x", "limit": 2.5}))
            .unwrap_err();
        assert_eq!(err.param(), "limit");
        assert!(err.to_string().ends_with("expected integer, got number"));
    }

    #[test]
    fn rules_apply_in_order() {
        // Missing `query` wins over the unknown key and the bad type.
        let err = search_schema()
            .validate(&json!({"bogus": true, "limit": "many"}))
            .unwrap_err();
        assert_eq!(err, ValidationError::MissingRequired("query".to_string()));

        let err = search_schema()
            .validate(&json!({"query": "x", "bogus": true, "limit": "many"}))
            .unwrap_err();
        assert_eq!(err, ValidationError::UnknownParameter("bogus".to_string()));
    }

    #[test]
    fn whole_floats_are_integers() {
        search_schema().validate(&json!({"query": "x", "limit": 10.0})).unwrap();
    }

    #[test]
    fn enum_membership() {
        let err = search_schema()
            .validate(&json!({"query": "x", "mode": "slow"}))
            .unwrap_err();
        assert!(matches!(err, ValidationError::NotInEnum { ref param, .. } if param == "mode"));
        assert_eq!(err.to_string(), r#"parameter 'mode' must be one of ["fast","exact"]"#);

        let numeric = Schema::parse(&json!({"enum": [1, [1, 2]]})).unwrap().unwrap();
        numeric.validate(&json!(1.0)).unwrap();
        numeric.validate(&json!([1, 2])).unwrap();
        assert!(numeric.validate(&json!([2, 1])).is_err());
    }

    #[test]
    fn string_length_counts_characters() {
        let schema = search_schema();
        schema.validate(&json!({"query": "héllo"})).unwrap();
        assert!(matches!(
            schema.validate(&json!({"query": ""})),
            Err(ValidationError::TooShort { min: 1, actual: 0, .. })
        ));
        assert!(matches!(
            schema.validate(&json!({"query": "toolong"})),
            Err(ValidationError::TooLong { max: 5, actual: 7, .. })
        ));
    }

    #[test]
    fn numeric_bounds() {
        let schema = search_schema();
        assert!(matches!(
            schema.validate(&json!({"query": "x", "limit": 0})),
            Err(ValidationError::BelowMinimum { .. })
        ));
        assert_eq!(
            message(schema.validate(&json!({"query": "x", "limit": 101}))),
            "parameter 'limit' must be <= 100, got 101"
        );

        let exclusive = Schema::parse(&json!({"type": "number", "exclusiveMinimum": 0, "exclusiveMaximum": 1}))
            .unwrap()
            .unwrap();
        exclusive.validate(&json!(0.5)).unwrap();
        assert!(matches!(
            exclusive.validate(&json!(0)),
            Err(ValidationError::NotAboveExclusiveMinimum { .. })
        ));
        assert!(matches!(
            exclusive.validate(&json!(1)),
            Err(ValidationError::NotBelowExclusiveMaximum { .. })
        ));

        let draft4 = Schema::parse(&json!({"type": "number", "maximum": 10, "exclusiveMaximum": true}))
            .unwrap()
            .unwrap();
        draft4.validate(&json!(9.99)).unwrap();
        assert!(matches!(
            draft4.validate(&json!(10)),
            Err(ValidationError::NotBelowExclusiveMaximum { .. })
        ));
    }

    #[test]
    fn nested_paths() {
        let schema = search_schema();
        assert_eq!(
            message(schema.validate(&json!({"query": "x", "filter": {}}))),
            "missing required parameter: filter.owner"
        );
        assert_eq!(
            message(schema.validate(&json!({"query": "x", "filter": {"owner": 1}}))),
            "type mismatch for parameter 'filter.owner': expected string or null, got integer"
        );
        assert_eq!(
            message(schema.validate(&json!({"query": "x", "tags": ["ok", false]}))),
            "type mismatch for parameter 'tags[1]': expected string, got boolean"
        );
    }

    #[test]
    fn open_objects_accept_unknown_keys() {
        let no_properties = Schema::parse(&json!({"type": "object"})).unwrap().unwrap();
        no_properties.validate(&json!({"anything": 1})).unwrap();

        let open = Schema::parse(&json!({
            "type": "object",
            "properties": {"a": {"type": "string"}},
            "additionalProperties": true
        }))
        .unwrap()
        .unwrap();
        open.validate(&json!({"a": "x", "b": 2})).unwrap();

        let typed_extra = Schema::parse(&json!({
            "type": "object",
            "properties": {},
            "additionalProperties": {"type": "integer"}
        }))
        .unwrap()
        .unwrap();
        typed_extra.validate(&json!({"n": 3})).unwrap();
        assert!(typed_extra.validate(&json!({"n": "three"})).is_err());
    }

    #[test]
    fn non_object_arguments_are_rejected() {
        assert_eq!(
            message(search_schema().validate(&json!(["query"]))),
            "type mismatch for parameter 'arguments': expected object, got array"
        );
    }

    #[test]
    fn null_schema_parses_to_none() {
        assert!(Schema::parse(&Value::Null).unwrap().is_none());
        assert_eq!(
            Schema::parse(&json!("object")).unwrap_err().to_string(),
            "input schema must be an object or a boolean, got string"
        );
    }

    #[test]
    fn malformed_keyword_leaves_the_rest_enforced() {
        let schema = Schema::parse(&json!({
            "type": 7,
            "properties": {"query": {"type": "string"}},
            "required": ["query", 3]
        }))
        .unwrap()
        .unwrap();
        assert_eq!(schema.schema_type, None);
        assert_eq!(
            message(schema.validate(&json!({}))),
            "missing required parameter: query"
        );
        assert!(matches!(
            schema.validate(&json!({"query": 1})),
            Err(ValidationError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn boolean_subschemas() {
        let schema = Schema::parse(&json!({
            "type": "object",
            "properties": {"query": {"type": "string"}, "extra": true, "legacy": false},
            "required": ["query"]
        }))
        .unwrap()
        .unwrap();
        assert_eq!(
            message(schema.validate(&json!({}))),
            "missing required parameter: query"
        );
        schema.validate(&json!({"query": "x", "extra": [1, {"a": null}]})).unwrap();
        assert_eq!(
            schema.validate(&json!({"query": "x", "legacy": 1})),
            Err(ValidationError::NotAllowed("legacy".to_string()))
        );

        Schema::parse(&json!(true)).unwrap().unwrap().validate(&json!({"a": 1})).unwrap();
        let nothing = Schema::parse(&json!(false)).unwrap().unwrap();
        assert_eq!(nothing.validate(&json!({})).unwrap_err().param(), "arguments");
    }

    #[test]
    fn float_lengths_are_enforced() {
        let schema = Schema::parse(&json!({
            "type": "object",
            "properties": {"code": {"type": "string", "minLength": 2.0, "maxLength": 5.0}}
        }))
        .unwrap()
        .unwrap();
        schema.validate(&json!({"code": "abc"})).unwrap();
        assert!(matches!(
            schema.validate(&json!({"code": "abcdefgh"})),
            Err(ValidationError::TooLong { max: 5, actual: 8, .. })
        ));
        assert!(matches!(
            schema.validate(&json!({"code": "a"})),
            Err(ValidationError::TooShort { min: 2, .. })
        ));

        let fractional = Schema::parse(&json!({"maxLength": 2.5})).unwrap().unwrap();
        assert_eq!(fractional.max_length, None);
    }

    #[test]
    fn positional_items() {
        let schema = Schema::parse(&json!({
            "type": "object",
            "properties": {"point": {"type": "array", "items": [{"type": "number"}, {"type": "string"}]}}
        }))
        .unwrap()
        .unwrap();
        schema.validate(&json!({"point": [1.5, "label", true]})).unwrap();
        assert_eq!(
            message(schema.validate(&json!({"point": [1.5, 2]}))),
            "type mismatch for parameter 'point[1]': expected string, got integer"
        );
    }
}
