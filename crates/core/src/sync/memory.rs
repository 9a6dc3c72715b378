//! In-process backend implementing the query, mutation and change-feed
//! contracts over JSON rows.
//!
//! Mutations are applied to the stored rows and then broadcast to every live
//! subscriber of the collection as Postgres-changes shaped notifications, so
//! views observe writes exactly the way they would against a real service.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use indexmap::IndexMap;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::entity::{id_from_value, Entity, Record};
use crate::errors::RemoteFailure;

use super::change::RawChange;
use super::filter::FilterSet;
use super::remote::{
    ChangeFeed, FeedSender, FeedSignal, FeedSubscription, RemoteMutation, RemoteQuery, Selection,
};

type Row = Map<String, Value>;

#[derive(Default)]
struct BackendState {
    collections: HashMap<String, IndexMap<String, Row>>,
    subscribers: HashMap<String, Vec<FeedSender>>,
    failing_fetches: HashMap<String, RemoteFailure>,
    failing_subscribes: HashMap<String, RemoteFailure>,
    fetch_counts: HashMap<String, usize>,
}

impl BackendState {
    fn broadcast(&mut self, change: RawChange) {
        if let Some(senders) = self.subscribers.get_mut(&change.collection) {
            senders.retain(|sender| sender.send(FeedSignal::Change(change.clone())));
        }
    }

    fn signal_all(&mut self, collection: &str, signal: FeedSignal) -> usize {
        match self.subscribers.get_mut(collection) {
            Some(senders) => {
                senders.retain(|sender| sender.send(signal.clone()));
                senders.len()
            }
            None => 0,
        }
    }
}

#[derive(Default)]
pub struct InMemoryBackend {
    state: Mutex<BackendState>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores rows without emitting change events. Rows that are not JSON
    /// objects with an id are skipped. Returns the number stored.
    pub fn seed<I>(&self, collection: &str, rows: I) -> usize
    where
        I: IntoIterator<Item = Value>,
    {
        let mut state = self.lock();
        let table = state.collections.entry(collection.to_string()).or_default();
        let mut stored = 0;
        for row in rows {
            let Value::Object(mut row) = row else {
                warn!("[Sync] seed on '{}' skipped non-object row", collection);
                continue;
            };
            let Some(id) = row.get("id").and_then(id_from_value) else {
                warn!("[Sync] seed on '{}' skipped row without id", collection);
                continue;
            };
            row.insert("id".to_string(), Value::String(id.clone()));
            table.insert(id, row);
            stored += 1;
        }
        stored
    }

    /// Current rows of a collection in insertion order.
    pub fn rows(&self, collection: &str) -> Vec<Value> {
        self.lock()
            .collections
            .get(collection)
            .map(|table| table.values().cloned().map(Value::Object).collect())
            .unwrap_or_default()
    }

    /// Delivers a raw notification to subscribers without touching stored
    /// rows (an external writer, or a hand-crafted malformed event).
    pub fn emit(&self, change: RawChange) {
        self.lock().broadcast(change);
    }

    /// Makes subsequent fetches of `collection` fail until cleared with `None`.
    pub fn fail_fetches(&self, collection: &str, failure: Option<RemoteFailure>) {
        let mut state = self.lock();
        match failure {
            Some(failure) => state.failing_fetches.insert(collection.to_string(), failure),
            None => state.failing_fetches.remove(collection),
        };
    }

    /// Makes subsequent subscribes to `collection` fail until cleared with `None`.
    pub fn fail_subscribes(&self, collection: &str, failure: Option<RemoteFailure>) {
        let mut state = self.lock();
        match failure {
            Some(failure) => state.failing_subscribes.insert(collection.to_string(), failure),
            None => state.failing_subscribes.remove(collection),
        };
    }

    /// Ends every open subscription of `collection` (transport drop).
    pub fn drop_subscribers(&self, collection: &str) -> usize {
        self.lock()
            .subscribers
            .remove(collection)
            .map(|senders| senders.len())
            .unwrap_or(0)
    }

    /// Sends `Interrupted` to every subscriber of `collection`.
    pub fn interrupt_subscribers(&self, collection: &str, failure: RemoteFailure) -> usize {
        self.lock()
            .signal_all(collection, FeedSignal::Interrupted(failure))
    }

    /// Sends `Live` to every subscriber of `collection`.
    pub fn resume_subscribers(&self, collection: &str) -> usize {
        self.lock().signal_all(collection, FeedSignal::Live)
    }

    /// Number of subscriptions still being listened to.
    pub fn subscriber_count(&self, collection: &str) -> usize {
        let mut state = self.lock();
        match state.subscribers.get_mut(collection) {
            Some(senders) => {
                senders.retain(|sender| !sender.is_closed());
                senders.len()
            }
            None => 0,
        }
    }

    pub fn fetch_count(&self, collection: &str) -> usize {
        self.lock()
            .fetch_counts
            .get(collection)
            .copied()
            .unwrap_or(0)
    }
}

fn decode<E: DeserializeOwned>(collection: &str, row: Row) -> Result<E, RemoteFailure> {
    serde_json::from_value(Value::Object(row)).map_err(|err| {
        RemoteFailure::new(format!("Failed to decode row from '{}': {}", collection, err))
    })
}

#[async_trait]
impl<E> RemoteQuery<E> for InMemoryBackend
where
    E: Entity + DeserializeOwned,
{
    async fn fetch(
        &self,
        collection: &str,
        filter: &FilterSet,
        selection: &Selection,
    ) -> Result<Vec<E>, RemoteFailure> {
        let rows = {
            let mut state = self.lock();
            *state.fetch_counts.entry(collection.to_string()).or_default() += 1;
            if let Some(failure) = state.failing_fetches.get(collection) {
                return Err(failure.clone());
            }
            state
                .collections
                .get(collection)
                .map(|table| {
                    table
                        .values()
                        .filter(|row| {
                            Record::try_from((*row).clone())
                                .map(|record| filter.matches(&record))
                                .unwrap_or(false)
                        })
                        .map(|row| selection.project(row))
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default()
        };
        debug!("[Sync] in-memory fetch '{}' -> {} rows", collection, rows.len());
        rows.into_iter().map(|row| decode(collection, row)).collect()
    }
}

#[async_trait]
impl<E> RemoteMutation<E> for InMemoryBackend
where
    E: Entity + DeserializeOwned,
{
    async fn insert(&self, collection: &str, mut fields: Row) -> Result<E, RemoteFailure> {
        let row = {
            let mut state = self.lock();
            let id = match fields.get("id") {
                Some(value) => id_from_value(value)
                    .ok_or_else(|| RemoteFailure::with_status(400, "id must be a string"))?,
                None => Uuid::new_v4().to_string(),
            };
            fields.insert("id".to_string(), Value::String(id.clone()));

            let table = state.collections.entry(collection.to_string()).or_default();
            if table.contains_key(&id) {
                return Err(RemoteFailure::with_status(
                    409,
                    format!("duplicate key value violates unique constraint: id={}", id),
                ));
            }
            table.insert(id, fields.clone());
            state.broadcast(RawChange::insert(collection, Value::Object(fields.clone())));
            fields
        };
        decode(collection, row)
    }

    async fn update(&self, collection: &str, id: &str, fields: Row) -> Result<E, RemoteFailure> {
        let row = {
            let mut state = self.lock();
            let Some(existing) = state
                .collections
                .get_mut(collection)
                .and_then(|table| table.get_mut(id))
            else {
                return Err(RemoteFailure::not_found(format!(
                    "No row in '{}' with id {}",
                    collection, id
                )));
            };
            let old = existing.clone();
            for (key, value) in fields {
                if key != "id" {
                    existing.insert(key, value);
                }
            }
            let new = existing.clone();
            state.broadcast(RawChange::update(
                collection,
                Some(Value::Object(old)),
                Value::Object(new.clone()),
            ));
            new
        };
        decode(collection, row)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<Option<E>, RemoteFailure> {
        let removed = {
            let mut state = self.lock();
            let removed = state
                .collections
                .get_mut(collection)
                .and_then(|table| table.shift_remove(id));
            if let Some(row) = &removed {
                state.broadcast(RawChange::delete(collection, Value::Object(row.clone())));
            }
            removed
        };
        removed.map(|row| decode(collection, row)).transpose()
    }
}

#[async_trait]
impl ChangeFeed for InMemoryBackend {
    async fn subscribe(&self, collection: &str) -> Result<FeedSubscription, RemoteFailure> {
        let mut state = self.lock();
        if let Some(failure) = state.failing_subscribes.get(collection) {
            return Err(failure.clone());
        }
        let (sender, subscription) = FeedSubscription::channel(collection);
        sender.send(FeedSignal::Live);
        state
            .subscribers
            .entry(collection.to_string())
            .or_default()
            .push(sender);
        debug!("[Sync] in-memory subscribe '{}'", collection);
        Ok(subscription)
    }
}
