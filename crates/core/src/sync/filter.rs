//! Filter predicate matcher and canonical filter keys.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::entity::Entity;

/// A single `(column, value)` membership constraint.
///
/// - `null` requires the field to be null (or absent).
/// - an array requires the field to be an array containing every element.
/// - anything else requires equality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConstraint {
    pub column: String,
    pub value: Value,
}

impl FilterConstraint {
    pub fn new(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Evaluates the constraint against a field value (`None` = absent).
    pub fn accepts(&self, field: Option<&Value>) -> bool {
        match &self.value {
            Value::Null => matches!(field, None | Some(Value::Null)),
            Value::Array(required) => match field {
                Some(Value::Array(present)) => required.iter().all(|item| present.contains(item)),
                _ => false,
            },
            expected => field == Some(expected),
        }
    }
}

/// Conjunction of constraints. Empty matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterSet {
    constraints: Vec<FilterConstraint>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a constraint (builder style).
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.constraints.push(FilterConstraint::new(column, value));
        self
    }

    pub fn is_null(self, column: impl Into<String>) -> Self {
        self.eq(column, Value::Null)
    }

    pub fn contains_all<I, V>(self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect::<Vec<_>>();
        self.eq(column, Value::Array(values))
    }

    pub fn push(&mut self, constraint: FilterConstraint) {
        self.constraints.push(constraint);
    }

    pub fn constraints(&self) -> &[FilterConstraint] {
        &self.constraints
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn matches<E: Entity>(&self, entity: &E) -> bool {
        matches(entity, self)
    }

    /// Stable content hash of the filter set.
    ///
    /// Order of constraints, duplicate constraints and element order inside
    /// contains-all arrays do not affect the key.
    pub fn canonical_key(&self) -> String {
        let mut entries = self
            .constraints
            .iter()
            .map(|constraint| {
                let value = canonical_value(&constraint.value);
                (constraint.column.clone(), value.to_string())
            })
            .collect::<Vec<_>>();
        entries.sort();
        entries.dedup();

        let mut hasher = Sha256::new();
        for (column, value) in &entries {
            hasher.update(column.as_bytes());
            hasher.update([0u8]);
            hasher.update(value.as_bytes());
            hasher.update([0xffu8]);
        }
        format!("{:x}", hasher.finalize())
    }
}

impl From<Vec<FilterConstraint>> for FilterSet {
    fn from(constraints: Vec<FilterConstraint>) -> Self {
        Self { constraints }
    }
}

impl FromIterator<FilterConstraint> for FilterSet {
    fn from_iter<T: IntoIterator<Item = FilterConstraint>>(iter: T) -> Self {
        Self {
            constraints: iter.into_iter().collect(),
        }
    }
}

/// Decides whether `entity` satisfies every constraint of `filter`.
pub fn matches<E: Entity>(entity: &E, filter: &FilterSet) -> bool {
    filter
        .constraints
        .iter()
        .all(|constraint| constraint.accepts(entity.field(&constraint.column).as_ref()))
}

fn canonical_value(value: &Value) -> Value {
    match value {
        Value::Array(items) => {
            let mut items = items.iter().map(canonical_value).collect::<Vec<_>>();
            items.sort_by_key(|item| item.to_string());
            items.dedup();
            Value::Array(items)
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Record;
    use serde_json::json;

    fn session() -> Record {
        Record::new("s-1")
            .with("status", "ready")
            .with("teacher_id", "T1")
            .with("is_active", true)
            .with("room", Value::Null)
            .with("tags", json!(["math", "grade-5", "remedial"]))
            .with("capacity", 24)
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(matches(&session(), &FilterSet::new()));
        assert!(matches(&Record::new("bare"), &FilterSet::new()));
    }

    #[test]
    fn scalar_constraints_use_equality() {
        let entity = session();
        assert!(FilterSet::new().eq("status", "ready").matches(&entity));
        assert!(!FilterSet::new().eq("status", "building").matches(&entity));
        assert!(FilterSet::new().eq("is_active", true).matches(&entity));
        assert!(FilterSet::new().eq("capacity", 24).matches(&entity));
        assert!(!FilterSet::new().eq("capacity", "24").matches(&entity));
    }

    #[test]
    fn constraints_are_conjunctive() {
        let entity = session();
        let filter = FilterSet::new()
            .eq("teacher_id", "T1")
            .eq("is_active", true);
        assert!(filter.matches(&entity));

        let filter = FilterSet::new()
            .eq("teacher_id", "T1")
            .eq("is_active", false);
        assert!(!filter.matches(&entity));
    }

    #[test]
    fn null_constraint_accepts_null_or_missing_only() {
        let entity = session();
        assert!(FilterSet::new().is_null("room").matches(&entity));
        assert!(FilterSet::new().is_null("never_set").matches(&entity));
        assert!(!FilterSet::new().is_null("status").matches(&entity));
    }

    #[test]
    fn missing_field_never_matches_non_null_constraint() {
        let entity = Record::new("s-2");
        assert!(!FilterSet::new().eq("status", "ready").matches(&entity));
        assert!(!FilterSet::new()
            .contains_all("tags", ["math"])
            .matches(&entity));
    }

    #[test]
    fn array_constraint_is_contains_all() {
        let entity = session();
        assert!(FilterSet::new()
            .contains_all("tags", ["math", "remedial"])
            .matches(&entity));
        assert!(FilterSet::new()
            .contains_all("tags", Vec::<String>::new())
            .matches(&entity));
        assert!(!FilterSet::new()
            .contains_all("tags", ["math", "science"])
            .matches(&entity));
        // Field must itself be an array.
        assert!(!FilterSet::new()
            .contains_all("status", ["ready"])
            .matches(&entity));
    }

    #[test]
    fn canonical_key_ignores_order_and_duplicates() {
        let a = FilterSet::new()
            .eq("teacher_id", "T1")
            .eq("is_active", true)
            .contains_all("tags", ["a", "b"]);
        let b = FilterSet::new()
            .contains_all("tags", ["b", "a"])
            .eq("is_active", true)
            .eq("teacher_id", "T1")
            .eq("teacher_id", "T1");
        assert_eq!(a.canonical_key(), b.canonical_key());
    }

    #[test]
    fn canonical_key_distinguishes_values_and_types() {
        let a = FilterSet::new().eq("capacity", 24);
        let b = FilterSet::new().eq("capacity", "24");
        let c = FilterSet::new().eq("capacity", 25);
        assert_ne!(a.canonical_key(), b.canonical_key());
        assert_ne!(a.canonical_key(), c.canonical_key());
        assert_eq!(FilterSet::new().canonical_key().len(), 64);
    }
}
