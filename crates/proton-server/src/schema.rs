//! Declarative record schema.
//!
//! One static table per entity describes each field's storage type, whether it
//! is ever sent back to clients, and whether clients may set it. The same
//! table drives both directions: [`parse_params`] turns request params into
//! typed [`Fields`], [`project`] turns a stored record into a wire object.

use base64::{Engine, engine::general_purpose::STANDARD};
use proton_proto::{Params, Record};
use serde_json::Value;
use thiserror::Error;

use crate::storage::{FieldValue, Fields, StoredRecord, Table};

/// Storage type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// Non-negative integer
    Integer,
    /// UTF-8 text
    Text,
    /// Bytes, base64 text on the wire
    Blob,
    /// Unix seconds
    Timestamp,
}

/// One column of a table schema.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    /// Column name
    pub name: &'static str,
    /// Storage type
    pub kind: FieldType,
    /// Never projected to the wire
    pub write_only: bool,
    /// Accepted from request params
    pub client_writable: bool,
}

impl FieldSpec {
    const fn visible(name: &'static str, kind: FieldType, client_writable: bool) -> Self {
        Self { name, kind, write_only: false, client_writable }
    }

    const fn hidden(name: &'static str, kind: FieldType, client_writable: bool) -> Self {
        Self { name, kind, write_only: true, client_writable }
    }
}

const USER: &[FieldSpec] = &[
    FieldSpec::visible("id", FieldType::Integer, false),
    FieldSpec::visible("username", FieldType::Text, true),
    FieldSpec::hidden("password", FieldType::Text, true),
];

const POST: &[FieldSpec] = &[
    FieldSpec::visible("id", FieldType::Integer, false),
    FieldSpec::visible("title", FieldType::Text, true),
    FieldSpec::visible("content", FieldType::Text, true),
    FieldSpec::visible("image", FieldType::Blob, true),
    FieldSpec::visible("user_id", FieldType::Integer, false),
];

const AUTH_TOKEN: &[FieldSpec] = &[
    FieldSpec::visible("id", FieldType::Integer, false),
    FieldSpec::hidden("token", FieldType::Text, false),
    FieldSpec::visible("user_id", FieldType::Integer, false),
    FieldSpec::hidden("expires", FieldType::Timestamp, false),
];

/// Column list of a table, in wire order.
pub fn schema(table: Table) -> &'static [FieldSpec] {
    match table {
        Table::User => USER,
        Table::Post => POST,
        Table::AuthToken => AUTH_TOKEN,
    }
}

/// Errors turning request params into fields.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// No such column
    #[error("unknown field '{field}' for {table}")]
    UnknownField {
        /// Table being written
        table: &'static str,
        /// Offending key
        field: String,
    },

    /// Column exists but clients may not set it
    #[error("field '{field}' of {table} is not writable")]
    NotWritable {
        /// Table being written
        table: &'static str,
        /// Offending key
        field: String,
    },

    /// JSON value has the wrong type for the column
    #[error("field '{field}' expects {expected}")]
    WrongType {
        /// Offending key
        field: String,
        /// What the column accepts
        expected: &'static str,
    },

    /// Blob column carried text that is not base64
    #[error("field '{field}' is not valid base64")]
    InvalidBase64 {
        /// Offending key
        field: String,
    },
}

/// Parse request params into typed fields for `table`.
///
/// Keys listed in `skip` are ignored (e.g. `id`, consumed by the caller).
///
/// # Errors
///
/// Unknown keys, keys clients may not write, JSON values of the wrong type
/// and undecodable base64 are all rejected.
pub fn parse_params(table: Table, params: &Params, skip: &[&str]) -> Result<Fields, SchemaError> {
    let columns = schema(table);
    let mut fields = Fields::new();

    for (key, value) in params {
        if skip.contains(&key.as_str()) {
            continue;
        }

        let Some(spec) = columns.iter().find(|spec| spec.name == key) else {
            return Err(SchemaError::UnknownField { table: table.name(), field: key.clone() });
        };

        if !spec.client_writable {
            return Err(SchemaError::NotWritable { table: table.name(), field: key.clone() });
        }

        fields.insert(key.clone(), parse_value(spec, value)?);
    }

    Ok(fields)
}

fn parse_value(spec: &FieldSpec, value: &Value) -> Result<FieldValue, SchemaError> {
    let wrong = |expected| SchemaError::WrongType { field: spec.name.to_string(), expected };

    match spec.kind {
        FieldType::Text => {
            value.as_str().map(|s| FieldValue::Text(s.to_string())).ok_or_else(|| wrong("a string"))
        },
        FieldType::Integer => {
            value.as_u64().map(FieldValue::Integer).ok_or_else(|| wrong("a non-negative integer"))
        },
        FieldType::Timestamp => {
            value.as_u64().map(FieldValue::Timestamp).ok_or_else(|| wrong("unix seconds"))
        },
        FieldType::Blob => {
            let text = value.as_str().ok_or_else(|| wrong("base64 text"))?;
            STANDARD
                .decode(text)
                .map(FieldValue::Blob)
                .map_err(|_| SchemaError::InvalidBase64 { field: spec.name.to_string() })
        },
    }
}

/// Project a stored record to its wire object.
///
/// `id` comes first, followed by visible columns in schema order. Write-only
/// columns and columns the record lacks are omitted.
pub fn project(table: Table, record: &StoredRecord) -> Record {
    let mut out = Record::new();

    for spec in schema(table) {
        if spec.write_only {
            continue;
        }

        if spec.name == "id" {
            out.insert("id".to_string(), Value::from(record.id));
            continue;
        }

        if let Some(value) = record.get(spec.name) {
            out.insert(spec.name.to_string(), wire_value(value));
        }
    }

    out
}

fn wire_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Integer(n) | FieldValue::Timestamp(n) => Value::from(*n),
        FieldValue::Text(s) => Value::from(s.as_str()),
        FieldValue::Blob(bytes) => Value::from(STANDARD.encode(bytes)),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::storage::fields;

    fn params(value: Value) -> Params {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn parses_post_params_with_image() {
        let parsed = parse_params(
            Table::Post,
            &params(json!({"title": "t", "content": "c", "image": "AAEC"})),
            &[],
        )
        .expect("parse failed");

        assert_eq!(parsed.get("title"), Some(&FieldValue::Text("t".to_string())));
        assert_eq!(parsed.get("image"), Some(&FieldValue::Blob(vec![0, 1, 2])));
    }

    #[test]
    fn skip_keys_are_ignored() {
        let parsed = parse_params(Table::Post, &params(json!({"id": 3, "title": "t"})), &["id"])
            .expect("parse failed");

        assert_eq!(parsed.len(), 1);
    }

    #[test]
    fn rejects_unknown_field() {
        let result = parse_params(Table::Post, &params(json!({"colour": "red"})), &[]);
        assert!(matches!(result, Err(SchemaError::UnknownField { .. })));
    }

    #[test]
    fn rejects_server_owned_field() {
        let result = parse_params(Table::Post, &params(json!({"user_id": 9})), &[]);
        assert!(matches!(result, Err(SchemaError::NotWritable { .. })));
    }

    #[test]
    fn rejects_wrong_type_and_bad_base64() {
        let result = parse_params(Table::Post, &params(json!({"title": 5})), &[]);
        assert!(matches!(result, Err(SchemaError::WrongType { .. })));

        let result = parse_params(Table::Post, &params(json!({"image": "not base64!"})), &[]);
        assert!(matches!(result, Err(SchemaError::InvalidBase64 { .. })));
    }

    #[test]
    fn projection_drops_write_only_fields() {
        let record = StoredRecord {
            id: 7,
            fields: fields([
                ("token", FieldValue::Text("secret".to_string())),
                ("user_id", FieldValue::Integer(2)),
                ("expires", FieldValue::Timestamp(100)),
            ]),
        };

        let projected = project(Table::AuthToken, &record);

        assert_eq!(Value::Object(projected), json!({"id": 7, "user_id": 2}));
    }

    #[test]
    fn projection_encodes_blobs_and_orders_id_first() {
        let record = StoredRecord {
            id: 1,
            fields: fields([
                ("title", FieldValue::Text("t".to_string())),
                ("image", FieldValue::Blob(vec![0, 1, 2])),
                ("user_id", FieldValue::Integer(4)),
            ]),
        };

        let projected = project(Table::Post, &record);
        let keys: Vec<&str> = projected.keys().map(String::as_str).collect();

        assert_eq!(keys.first(), Some(&"id"));
        assert_eq!(projected.get("image"), Some(&json!("AAEC")));
        assert!(!projected.contains_key("content"));
    }

    #[test]
    fn user_projection_never_contains_password() {
        let record = StoredRecord {
            id: 1,
            fields: fields([
                ("username", FieldValue::Text("alice".to_string())),
                ("password", FieldValue::Text("ciphertext".to_string())),
            ]),
        };

        let projected = Value::Object(project(Table::User, &record));
        assert_eq!(projected, json!({"id": 1, "username": "alice"}));
    }
}
