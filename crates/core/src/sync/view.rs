//! Live, filtered views over remote collections.
//!
//! A view performs one filtered fetch into its mirror store and keeps it
//! current from a collection-wide change feed, evaluating every event against
//! the view's filter. Each view owns its subscription and its store; nothing
//! is shared between views, even over the same collection.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::SyncConfig;
use crate::entity::Entity;
use crate::errors::{Error, RemoteFailure, Result};

use super::change::{normalize, RawChange};
use super::crud::CrudFacade;
use super::filter::FilterSet;
use super::mirror::MirrorStore;
use super::reconnect::ReconnectPolicy;
use super::remote::{ChangeFeed, FeedSignal, FeedSubscription, RemoteMutation, RemoteQuery, Selection};

/// State of a view's change feed, reported separately from fetch errors so a
/// consumer can tell "live updates paused" from "no data".
#[derive(Debug, Clone, PartialEq)]
pub enum FeedStatus {
    Connecting,
    Live,
    /// Feed failed or dropped; the mirror is stale until it recovers.
    Degraded(Error),
    Closed,
}

impl FeedStatus {
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }
}

/// Point-in-time copy of a view.
#[derive(Debug, Clone)]
pub struct ViewSnapshot<E> {
    pub entities: Vec<E>,
    pub loading: bool,
    /// Last fetch failure, if the most recent load failed.
    pub error: Option<Error>,
    pub feed: FeedStatus,
    pub revision: u64,
}

/// Entry point for opening views and writing to collections.
pub struct SyncClient<E> {
    query: Arc<dyn RemoteQuery<E>>,
    mutation: Arc<dyn RemoteMutation<E>>,
    feed: Arc<dyn ChangeFeed>,
    config: SyncConfig,
}

impl<E> Clone for SyncClient<E> {
    fn clone(&self) -> Self {
        Self {
            query: Arc::clone(&self.query),
            mutation: Arc::clone(&self.mutation),
            feed: Arc::clone(&self.feed),
            config: self.config.clone(),
        }
    }
}

impl<E> SyncClient<E>
where
    E: Entity + DeserializeOwned,
{
    pub fn new(
        query: Arc<dyn RemoteQuery<E>>,
        mutation: Arc<dyn RemoteMutation<E>>,
        feed: Arc<dyn ChangeFeed>,
        config: SyncConfig,
    ) -> Self {
        Self {
            query,
            mutation,
            feed,
            config,
        }
    }

    /// Builds a client whose three collaborators are the same backend.
    pub fn from_backend<B>(backend: Arc<B>, config: SyncConfig) -> Self
    where
        B: RemoteQuery<E> + RemoteMutation<E> + ChangeFeed + 'static,
    {
        Self::new(backend.clone(), backend.clone(), backend, config)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn query(&self) -> Arc<dyn RemoteQuery<E>> {
        Arc::clone(&self.query)
    }

    pub fn facade(&self, collection: &str) -> CrudFacade<E> {
        CrudFacade::new(collection, Arc::clone(&self.mutation))
    }

    /// Opens a view: subscribes to the collection feed, fetches the rows
    /// matching `filter`, then keeps the mirror current until closed.
    ///
    /// Always returns a handle; load and feed failures are reported through
    /// the handle's snapshot.
    pub async fn open_view(
        &self,
        collection: &str,
        filter: FilterSet,
        selection: Selection,
    ) -> ViewHandle<E> {
        let filter_key = filter.canonical_key();
        let (revisions, _) = watch::channel(0);
        let inner = Arc::new(ViewInner {
            collection: collection.to_string(),
            query: Arc::clone(&self.query),
            feed: Arc::clone(&self.feed),
            config: self.config.clone(),
            state: RwLock::new(ViewState {
                filter,
                filter_key,
                selection,
                store: MirrorStore::new(),
                loading: true,
                error: None,
                feed: FeedStatus::Connecting,
            }),
            generation: AtomicU64::new(0),
            open: AtomicBool::new(true),
            revisions,
        });
        let handle = ViewHandle {
            inner,
            facade: self.facade(collection),
            pump: Mutex::new(None),
        };
        info!("[View] opening '{}'", collection);
        handle.start().await;
        handle
    }
}

struct ViewState<E> {
    filter: FilterSet,
    filter_key: String,
    selection: Selection,
    store: MirrorStore<E>,
    loading: bool,
    error: Option<Error>,
    feed: FeedStatus,
}

struct ViewInner<E> {
    collection: String,
    query: Arc<dyn RemoteQuery<E>>,
    feed: Arc<dyn ChangeFeed>,
    config: SyncConfig,
    state: RwLock<ViewState<E>>,
    /// Bumped on every (re)open and on close. Work started under an older
    /// generation is discarded.
    generation: AtomicU64,
    open: AtomicBool,
    revisions: watch::Sender<u64>,
}

impl<E> ViewInner<E>
where
    E: Entity + DeserializeOwned,
{
    fn read(&self) -> RwLockReadGuard<'_, ViewState<E>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ViewState<E>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.revisions.send_modify(|revision| *revision += 1);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.open.load(Ordering::SeqCst) && self.generation.load(Ordering::SeqCst) == generation
    }

    fn begin_generation(&self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut state = self.write();
            state.loading = true;
            state.error = None;
            state.feed = FeedStatus::Connecting;
        }
        self.bump();
        generation
    }

    /// Fetches the filtered rows and replaces the mirror. A result arriving
    /// after close or a filter change is dropped.
    async fn load(&self, generation: u64, initial: bool) -> Result<()> {
        let (filter, selection) = {
            let state = self.read();
            (state.filter.clone(), state.selection.clone())
        };
        let result = self
            .query
            .fetch(&self.collection, &filter, &selection)
            .await;

        let outcome = {
            let mut state = self.write();
            if !self.is_current(generation) {
                debug!(
                    "[View] discarding stale fetch for '{}' (generation {})",
                    self.collection, generation
                );
                return Ok(());
            }
            state.loading = false;
            match result {
                Ok(entities) => {
                    debug!(
                        "[View] loaded {} rows from '{}'",
                        entities.len(),
                        self.collection
                    );
                    state.store.replace_all(entities);
                    state.error = None;
                    Ok(())
                }
                Err(failure) => {
                    warn!("[View] fetch from '{}' failed: {}", self.collection, failure);
                    if initial {
                        state.store.replace_all(Vec::new());
                    }
                    let err = Error::fetch(self.collection.clone(), failure);
                    state.error = Some(err.clone());
                    Err(err)
                }
            }
        };
        self.bump();
        outcome
    }

    fn apply_raw(&self, generation: u64, raw: &RawChange) {
        if raw.collection != self.collection {
            debug!(
                "[View] ignoring change for '{}' on '{}' view",
                raw.collection, self.collection
            );
            return;
        }
        let event = match normalize::<E>(raw) {
            Ok(event) => event,
            Err(err) => {
                warn!("[View] dropping event on '{}': {}", self.collection, err);
                return;
            }
        };

        let outcome = {
            let mut guard = self.write();
            if !self.is_current(generation) {
                return;
            }
            let state = &mut *guard;
            state.store.apply(event, &state.filter)
        };
        debug!("[View] '{}' applied change: {:?}", self.collection, outcome);
        if outcome.changed() {
            self.bump();
        }
    }

    fn mark_degraded(&self, generation: u64, failure: RemoteFailure) {
        {
            let mut state = self.write();
            if !self.is_current(generation) {
                return;
            }
            warn!(
                "[View] live updates for '{}' paused: {}",
                self.collection, failure
            );
            state.feed = FeedStatus::Degraded(Error::subscription(self.collection.clone(), failure));
        }
        self.bump();
    }

    fn mark_connecting(&self, generation: u64) {
        {
            let mut state = self.write();
            if !self.is_current(generation) {
                return;
            }
            state.feed = FeedStatus::Connecting;
        }
        self.bump();
    }

    /// Returns true when the feed was degraded before this signal.
    fn mark_live(&self, generation: u64) -> bool {
        let was_degraded = {
            let mut state = self.write();
            if !self.is_current(generation) {
                return false;
            }
            let was_degraded = matches!(state.feed, FeedStatus::Degraded(_));
            state.feed = FeedStatus::Live;
            was_degraded
        };
        if was_degraded {
            info!("[View] live updates for '{}' resumed", self.collection);
        }
        self.bump();
        was_degraded
    }
}

/// Drains one subscription into the mirror, one signal at a time, and
/// re-subscribes with backoff when the feed drops.
async fn run_pump<E>(
    inner: Arc<ViewInner<E>>,
    generation: u64,
    mut subscription: Option<FeedSubscription>,
) where
    E: Entity + DeserializeOwned,
{
    let mut policy = ReconnectPolicy::from_config(&inner.config);
    loop {
        if !inner.is_current(generation) {
            return;
        }

        let Some(active) = subscription.as_mut() else {
            let Some(delay) = policy.next_delay() else {
                warn!(
                    "[View] giving up on live updates for '{}' after {} attempts",
                    inner.collection,
                    policy.attempts()
                );
                return;
            };
            debug!(
                "[View] reconnecting '{}' in {:?} (attempt {})",
                inner.collection,
                delay,
                policy.attempts()
            );
            tokio::time::sleep(delay).await;
            if !inner.is_current(generation) {
                return;
            }
            match inner.feed.subscribe(&inner.collection).await {
                Ok(resubscribed) => {
                    info!("[View] re-subscribed to '{}'", inner.collection);
                    subscription = Some(resubscribed);
                    inner.mark_connecting(generation);
                    // Changes may have been missed while disconnected.
                    let _ = inner.load(generation, false).await;
                }
                Err(failure) => inner.mark_degraded(generation, failure),
            }
            continue;
        };

        let signal = active.next().await;
        match signal {
            Some(FeedSignal::Change(raw)) => inner.apply_raw(generation, &raw),
            Some(FeedSignal::Live) => {
                policy.reset();
                if inner.mark_live(generation) {
                    let _ = inner.load(generation, false).await;
                }
            }
            Some(FeedSignal::Interrupted(failure)) => inner.mark_degraded(generation, failure),
            None => {
                inner.mark_degraded(
                    generation,
                    RemoteFailure::new("change feed closed by transport"),
                );
                subscription = None;
            }
        }
    }
}

/// Owned handle to an open view. Dropping it closes the view.
pub struct ViewHandle<E: Entity + DeserializeOwned> {
    inner: Arc<ViewInner<E>>,
    facade: CrudFacade<E>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl<E> ViewHandle<E>
where
    E: Entity + DeserializeOwned,
{
    fn lock_pump(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.pump.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn abort_pump(&self) {
        if let Some(handle) = self.lock_pump().take() {
            handle.abort();
        }
    }

    async fn start(&self) {
        let generation = self.inner.begin_generation();
        self.abort_pump();

        // Subscribe before fetching: changes committed while the fetch is in
        // flight queue up in the subscription and are replayed afterwards.
        let subscription = match self.inner.feed.subscribe(&self.inner.collection).await {
            Ok(subscription) => Some(subscription),
            Err(failure) => {
                self.inner.mark_degraded(generation, failure);
                None
            }
        };
        let _ = self.inner.load(generation, true).await;

        let mut pump = self.lock_pump();
        if !self.inner.is_current(generation) {
            debug!(
                "[View] '{}' superseded before its feed started",
                self.inner.collection
            );
            return;
        }
        *pump = Some(tokio::spawn(run_pump(
            Arc::clone(&self.inner),
            generation,
            subscription,
        )));
    }

    pub fn collection(&self) -> &str {
        &self.inner.collection
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    pub fn filter(&self) -> FilterSet {
        self.inner.read().filter.clone()
    }

    pub fn filter_key(&self) -> String {
        self.inner.read().filter_key.clone()
    }

    pub fn snapshot(&self) -> ViewSnapshot<E> {
        let state = self.inner.read();
        ViewSnapshot {
            entities: state.store.to_vec(),
            loading: state.loading,
            error: state.error.clone(),
            feed: state.feed.clone(),
            revision: *self.inner.revisions.borrow(),
        }
    }

    pub fn entities(&self) -> Vec<E> {
        self.inner.read().store.to_vec()
    }

    pub fn get(&self, id: &str) -> Option<E> {
        self.inner.read().store.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().store.contains(id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().store.is_empty()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.read().loading
    }

    pub fn error(&self) -> Option<Error> {
        self.inner.read().error.clone()
    }

    pub fn feed_status(&self) -> FeedStatus {
        self.inner.read().feed.clone()
    }

    /// Revision counter bumped on every visible change; await `changed()` on
    /// the receiver to re-render.
    pub fn revisions(&self) -> watch::Receiver<u64> {
        self.inner.revisions.subscribe()
    }

    /// Re-fetches with the current filter, keeping the subscription.
    pub async fn refresh(&self) -> Result<()> {
        if !self.is_open() {
            return Ok(());
        }
        let generation = self.inner.generation.load(Ordering::SeqCst);
        {
            self.inner.write().loading = true;
        }
        self.inner.bump();
        self.inner.load(generation, false).await
    }

    /// Swaps the filter. Re-fetches and re-subscribes only when the filter's
    /// canonical key differs from the current one. Returns whether it did.
    pub async fn set_filter(&self, filter: FilterSet) -> bool {
        if !self.is_open() {
            return false;
        }
        let key = filter.canonical_key();
        {
            let mut state = self.inner.write();
            if state.filter_key == key {
                return false;
            }
            state.filter = filter;
            state.filter_key = key;
        }
        info!("[View] filter changed on '{}', re-opening", self.inner.collection);
        self.start().await;
        true
    }

    pub async fn create(&self, fields: Map<String, Value>) -> Result<E> {
        self.facade.create(fields).await
    }

    pub async fn update(&self, id: &str, fields: Map<String, Value>) -> Result<E> {
        self.facade.update(id, fields).await
    }

    pub async fn remove(&self, id: &str) -> Result<Option<E>> {
        self.facade.remove(id).await
    }

    pub fn facade(&self) -> &CrudFacade<E> {
        &self.facade
    }

    /// Stops applying changes and releases the subscription. The last
    /// snapshot stays readable.
    pub fn close(&self) {
        if !self.inner.open.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.abort_pump();
        {
            let mut state = self.inner.write();
            state.loading = false;
            state.feed = FeedStatus::Closed;
        }
        self.inner.bump();
        info!("[View] closed '{}'", self.inner.collection);
    }
}

impl<E> Drop for ViewHandle<E>
where
    E: Entity + DeserializeOwned,
{
    fn drop(&mut self) {
        self.close();
    }
}
