//! Minimal entity capability required by the sync layer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A record with a unique, immutable string identifier.
///
/// The sync core never interprets fields beyond `id`; `field` exists so the
/// filter matcher can evaluate constraints. `None` means the field is absent
/// from this entity.
pub trait Entity: Clone + Send + Sync + 'static {
    fn id(&self) -> &str;

    fn field(&self, column: &str) -> Option<Value>;
}

/// Schema-less entity: an `id` plus an open set of JSON fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct Record {
    id: String,
    fields: Map<String, Value>,
}

impl Record {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    /// Sets a field. Writes to `id` are ignored; identifiers are immutable.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let column = column.into();
        if column == "id" {
            return;
        }
        self.fields.insert(column, value.into());
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields.get(column)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}

impl Entity for Record {
    fn id(&self) -> &str {
        &self.id
    }

    fn field(&self, column: &str) -> Option<Value> {
        if column == "id" {
            return Some(Value::String(self.id.clone()));
        }
        self.fields.get(column).cloned()
    }
}

impl TryFrom<Map<String, Value>> for Record {
    type Error = String;

    fn try_from(mut fields: Map<String, Value>) -> Result<Self, Self::Error> {
        let id = match fields.remove("id") {
            Some(value) => id_from_value(&value).ok_or_else(|| {
                format!("Record id must be a string or number, got {}", value)
            })?,
            None => return Err("Record is missing 'id'".to_string()),
        };
        Ok(Self { id, fields })
    }
}

impl From<Record> for Map<String, Value> {
    fn from(record: Record) -> Self {
        let mut map = record.fields;
        map.insert("id".to_string(), Value::String(record.id));
        map
    }
}

/// Reads an identifier out of a JSON value. Numeric ids are stringified.
pub fn id_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(v) if !v.is_empty() => Some(v.clone()),
        Value::Number(v) => Some(v.to_string()),
        _ => None,
    }
}
