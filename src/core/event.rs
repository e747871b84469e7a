//! Purpose: Define the request filter and the opaque change-event record.
//! Exports: `FilterSpec`, `ListenRequest`, `ChangeEvent`, `DEFAULT_TABLE_EXPRESSION`.
//! Role: Value types passed between callers, the subscription, and the transport.
//! Invariants: The table expression is forwarded verbatim; the client never compiles it.
//! Invariants: Change events are handed to callers exactly as decoded from the wire.
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Matches every table.
pub const DEFAULT_TABLE_EXPRESSION: &str = ".*";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FilterSpec {
    table_expression: String,
}

impl FilterSpec {
    pub fn new(table_expression: impl Into<String>) -> Self {
        Self {
            table_expression: table_expression.into(),
        }
    }

    pub fn all_tables() -> Self {
        Self::new(DEFAULT_TABLE_EXPRESSION)
    }

    pub fn table_expression(&self) -> &str {
        &self.table_expression
    }

    pub fn to_request(&self) -> ListenRequest {
        ListenRequest {
            table_regexp: self.table_expression.clone(),
        }
    }
}

impl Default for FilterSpec {
    fn default() -> Self {
        Self::all_tables()
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ListenRequest {
    pub table_regexp: String,
}

/// One change detected by the service.
///
/// The record is opaque to the client. The accessors read the fields the
/// PQStream service is known to emit and return `None` when a field is absent
/// or has an unexpected type.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeEvent(Value);

impl ChangeEvent {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    pub fn schema(&self) -> Option<&str> {
        self.str_field("schema")
    }

    pub fn table(&self) -> Option<&str> {
        self.str_field("table")
    }

    pub fn op(&self) -> Option<&str> {
        self.str_field("op")
    }

    pub fn id(&self) -> Option<&str> {
        self.str_field("id")
    }

    pub fn payload(&self) -> Option<&Value> {
        self.0.get("payload")
    }

    pub fn changes(&self) -> Option<&Value> {
        self.0.get("changes")
    }

    fn str_field(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }
}

impl From<Value> for ChangeEvent {
    fn from(value: Value) -> Self {
        Self(value)
    }
}
