//! Raw change notifications and their normalized form.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::{id_from_value, Entity};
use crate::errors::{Error, Result};

/// Change notification as delivered by a change feed.
///
/// Shape follows the Postgres changes payload: an operation tag and the
/// row before (`old`) and after (`new`) the mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawChange {
    #[serde(alias = "table")]
    pub collection: String,
    pub event_type: String,
    #[serde(default)]
    pub new: Option<Value>,
    #[serde(default)]
    pub old: Option<Value>,
    #[serde(default)]
    pub commit_timestamp: Option<String>,
}

impl RawChange {
    pub fn insert(collection: impl Into<String>, new: Value) -> Self {
        Self::build(collection, "INSERT", Some(new), None)
    }

    pub fn update(collection: impl Into<String>, old: Option<Value>, new: Value) -> Self {
        Self::build(collection, "UPDATE", Some(new), old)
    }

    pub fn delete(collection: impl Into<String>, old: Value) -> Self {
        Self::build(collection, "DELETE", None, Some(old))
    }

    fn build(
        collection: impl Into<String>,
        event_type: &str,
        new: Option<Value>,
        old: Option<Value>,
    ) -> Self {
        Self {
            collection: collection.into(),
            event_type: event_type.to_string(),
            new,
            old,
            commit_timestamp: Some(chrono::Utc::now().to_rfc3339()),
        }
    }
}

/// Supported change operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
}

/// Parses an operation tag; accepts `INSERT`/`insert`/`create` style tags.
pub fn parse_change_operation(event_type: &str) -> Option<ChangeOperation> {
    match event_type.trim().to_ascii_lowercase().as_str() {
        "insert" | "create" | "created" => Some(ChangeOperation::Insert),
        "update" | "updated" => Some(ChangeOperation::Update),
        "delete" | "deleted" => Some(ChangeOperation::Delete),
        _ => None,
    }
}

/// Typed change event. `Updated` carries the full post-mutation entity.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent<E> {
    Created(E),
    Updated(E),
    Deleted(String),
}

impl<E: Entity> ChangeEvent<E> {
    pub fn id(&self) -> &str {
        match self {
            Self::Created(entity) | Self::Updated(entity) => entity.id(),
            Self::Deleted(id) => id,
        }
    }

    pub fn operation(&self) -> ChangeOperation {
        match self {
            Self::Created(_) => ChangeOperation::Insert,
            Self::Updated(_) => ChangeOperation::Update,
            Self::Deleted(_) => ChangeOperation::Delete,
        }
    }
}

/// Converts a raw notification into exactly one typed event.
///
/// Fails with `MalformedEvent` on an unknown operation tag, a missing or
/// non-object payload, a payload that does not decode as `E`, or a delete
/// without a usable id.
pub fn normalize<E>(raw: &RawChange) -> Result<ChangeEvent<E>>
where
    E: Entity + DeserializeOwned,
{
    let op = parse_change_operation(&raw.event_type).ok_or_else(|| {
        Error::malformed(format!(
            "unsupported event type '{}' on '{}'",
            raw.event_type, raw.collection
        ))
    })?;

    match op {
        ChangeOperation::Insert => decode_row(raw, raw.new.as_ref(), "new").map(ChangeEvent::Created),
        ChangeOperation::Update => decode_row(raw, raw.new.as_ref(), "new").map(ChangeEvent::Updated),
        ChangeOperation::Delete => {
            // Some feeds only populate the primary key of `old`; fall back to `new`.
            let id = [raw.old.as_ref(), raw.new.as_ref()]
                .into_iter()
                .flatten()
                .find_map(|row| row.get("id").and_then(id_from_value))
                .ok_or_else(|| {
                    Error::malformed(format!(
                        "delete on '{}' without an id in its payload",
                        raw.collection
                    ))
                })?;
            Ok(ChangeEvent::Deleted(id))
        }
    }
}

fn decode_row<E>(raw: &RawChange, row: Option<&Value>, side: &str) -> Result<E>
where
    E: Entity + DeserializeOwned,
{
    let row = match row {
        Some(value @ Value::Object(_)) => value,
        Some(other) => {
            return Err(Error::malformed(format!(
                "{} on '{}' has non-object '{}' payload: {}",
                raw.event_type, raw.collection, side, other
            )))
        }
        None => {
            return Err(Error::malformed(format!(
                "{} on '{}' is missing its '{}' payload",
                raw.event_type, raw.collection, side
            )))
        }
    };

    serde_json::from_value::<E>(row.clone()).map_err(|err| {
        Error::malformed(format!(
            "{} on '{}' could not be decoded: {}",
            raw.event_type, raw.collection, err
        ))
    })
}
