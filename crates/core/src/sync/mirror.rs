//! Local mirror store: the in-memory contents of one view.

use indexmap::IndexMap;

use crate::entity::Entity;

use super::change::ChangeEvent;
use super::filter::{matches, FilterSet};

/// What `MirrorStore::apply` did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Entity was absent and now present.
    Admitted,
    /// Entity was present and replaced wholesale.
    Replaced,
    /// Entity no longer matches the filter and was removed.
    Evicted,
    /// Entity was deleted upstream and removed.
    Removed,
    /// Nothing changed.
    Ignored,
}

impl ApplyOutcome {
    pub fn changed(self) -> bool {
        !matches!(self, Self::Ignored)
    }
}

/// Ordered, unique-by-id collection of entities.
///
/// Insertion order is preserved; replacements keep their slot so consumers
/// do not see rows jump around.
#[derive(Debug, Clone)]
pub struct MirrorStore<E> {
    entries: IndexMap<String, E>,
}

impl<E> Default for MirrorStore<E> {
    fn default() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }
}

impl<E: Entity> MirrorStore<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the contents with the result of a fetch. Later duplicates of
    /// an id overwrite earlier ones in place.
    pub fn replace_all(&mut self, entities: Vec<E>) {
        self.entries.clear();
        for entity in entities {
            self.entries.insert(entity.id().to_string(), entity);
        }
    }

    /// Merges one change event against the view's filter.
    pub fn apply(&mut self, event: ChangeEvent<E>, filter: &FilterSet) -> ApplyOutcome {
        match event {
            // Created and Updated share upsert/evict semantics so duplicate
            // or out-of-order delivery stays idempotent.
            ChangeEvent::Created(entity) | ChangeEvent::Updated(entity) => {
                if matches(&entity, filter) {
                    self.upsert(entity)
                } else if self.remove(entity.id()) {
                    ApplyOutcome::Evicted
                } else {
                    ApplyOutcome::Ignored
                }
            }
            ChangeEvent::Deleted(id) => {
                if self.remove(&id) {
                    ApplyOutcome::Removed
                } else {
                    ApplyOutcome::Ignored
                }
            }
        }
    }

    fn upsert(&mut self, entity: E) -> ApplyOutcome {
        match self.entries.get_mut(entity.id()) {
            Some(slot) => {
                *slot = entity;
                ApplyOutcome::Replaced
            }
            None => {
                self.entries.insert(entity.id().to_string(), entity);
                ApplyOutcome::Admitted
            }
        }
    }

    fn remove(&mut self, id: &str) -> bool {
        self.entries.shift_remove(id).is_some()
    }

    pub fn get(&self, id: &str) -> Option<&E> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &E> {
        self.entries.values()
    }

    /// Current contents in insertion order.
    pub fn to_vec(&self) -> Vec<E> {
        self.entries.values().cloned().collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Record;

    fn session(id: &str, status: &str) -> Record {
        Record::new(id).with("status", status)
    }

    fn ready_filter() -> FilterSet {
        FilterSet::new().eq("status", "ready")
    }

    fn ready_store() -> MirrorStore<Record> {
        let mut store = MirrorStore::new();
        store.replace_all(vec![session("s-1", "ready"), session("s-2", "ready")]);
        store
    }

    #[test]
    fn update_that_stops_matching_evicts() {
        let mut store = ready_store();
        let outcome = store.apply(
            ChangeEvent::Updated(session("s-1", "building")),
            &ready_filter(),
        );
        assert_eq!(outcome, ApplyOutcome::Evicted);
        assert!(!store.contains("s-1"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn update_for_unseen_matching_entity_admits() {
        let mut store = ready_store();
        let outcome = store.apply(ChangeEvent::Updated(session("t-1", "ready")), &ready_filter());
        assert_eq!(outcome, ApplyOutcome::Admitted);
        assert!(store.contains("t-1"));
        assert_eq!(store.ids(), vec!["s-1", "s-2", "t-1"]);
    }

    #[test]
    fn update_for_unseen_non_matching_entity_is_ignored() {
        let mut store = ready_store();
        let outcome = store.apply(
            ChangeEvent::Updated(session("t-2", "scheduled")),
            &ready_filter(),
        );
        assert_eq!(outcome, ApplyOutcome::Ignored);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn duplicate_create_is_idempotent() {
        let mut store = MirrorStore::new();
        let filter = FilterSet::new();
        let event = ChangeEvent::Created(session("s-1", "scheduled"));
        assert_eq!(store.apply(event.clone(), &filter), ApplyOutcome::Admitted);
        assert_eq!(store.apply(event, &filter), ApplyOutcome::Replaced);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn create_that_does_not_match_is_ignored() {
        let mut store = ready_store();
        let outcome = store.apply(
            ChangeEvent::Created(session("s-3", "scheduled")),
            &ready_filter(),
        );
        assert_eq!(outcome, ApplyOutcome::Ignored);
        assert!(!store.contains("s-3"));
    }

    #[test]
    fn delete_of_unknown_id_is_a_no_op() {
        let mut store = ready_store();
        let outcome = store.apply(ChangeEvent::Deleted("never-seen".to_string()), &ready_filter());
        assert_eq!(outcome, ApplyOutcome::Ignored);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn delete_removes_and_preserves_order() {
        let mut store = MirrorStore::new();
        store.replace_all(vec![
            session("a", "ready"),
            session("b", "ready"),
            session("c", "ready"),
        ]);
        assert_eq!(
            store.apply(ChangeEvent::Deleted("b".to_string()), &ready_filter()),
            ApplyOutcome::Removed
        );
        assert_eq!(store.ids(), vec!["a", "c"]);
    }

    #[test]
    fn replacement_keeps_position() {
        let mut store = MirrorStore::new();
        store.replace_all(vec![session("a", "ready"), session("b", "ready")]);
        let updated = session("a", "ready").with("title", "Fractions");
        store.apply(ChangeEvent::Updated(updated), &ready_filter());
        assert_eq!(store.ids(), vec!["a", "b"]);
        assert_eq!(
            store.get("a").and_then(|r| r.get("title")).cloned(),
            Some(serde_json::json!("Fractions"))
        );
    }

    #[test]
    fn replace_all_deduplicates_ids() {
        let mut store = MirrorStore::new();
        store.replace_all(vec![
            session("a", "ready"),
            session("a", "building"),
            session("b", "ready"),
        ]);
        assert_eq!(store.len(), 2);
        assert_eq!(
            store.get("a").and_then(|r| r.get("status")).cloned(),
            Some(serde_json::json!("building"))
        );
    }
}
