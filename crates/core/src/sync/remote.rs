//! Contracts for the remote collaborators the sync layer depends on.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::errors::RemoteFailure;

use super::change::RawChange;
use super::filter::FilterSet;

/// Field selection for a fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Selection {
    #[default]
    All,
    Columns(Vec<String>),
}

impl Selection {
    pub fn columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Columns(columns.into_iter().map(Into::into).collect())
    }

    /// Value for a `select=` query parameter.
    pub fn to_select_param(&self) -> String {
        match self {
            Self::All => "*".to_string(),
            Self::Columns(columns) if columns.is_empty() => "*".to_string(),
            Self::Columns(columns) => columns.join(","),
        }
    }

    /// Projects a row onto the selected columns. `id` is always kept.
    pub fn project(&self, row: &Map<String, Value>) -> Map<String, Value> {
        match self {
            Self::All => row.clone(),
            Self::Columns(columns) if columns.is_empty() => row.clone(),
            Self::Columns(columns) => row
                .iter()
                .filter(|(key, _)| key.as_str() == "id" || columns.iter().any(|c| c == *key))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        }
    }
}

/// Remote query interface: filtered, server-side fetch of a collection.
///
/// Implementations must apply the same filter semantics as the client-side
/// matcher (equality, null, array contains-all).
#[async_trait]
pub trait RemoteQuery<E>: Send + Sync {
    async fn fetch(
        &self,
        collection: &str,
        filter: &FilterSet,
        selection: &Selection,
    ) -> Result<Vec<E>, RemoteFailure>;
}

/// Remote write interface. Each call is one round trip returning the
/// server's authoritative row.
#[async_trait]
pub trait RemoteMutation<E>: Send + Sync {
    async fn insert(&self, collection: &str, fields: Map<String, Value>)
        -> Result<E, RemoteFailure>;

    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<E, RemoteFailure>;

    /// Returns the deleted row, or `None` when no row matched.
    async fn delete(&self, collection: &str, id: &str) -> Result<Option<E>, RemoteFailure>;
}

/// Signals delivered by a change-feed subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedSignal {
    /// One raw change notification.
    Change(RawChange),
    /// Transport is (again) delivering changes.
    Live,
    /// Transport hit a transient failure; changes may be missed until the
    /// next `Live`.
    Interrupted(RemoteFailure),
}

/// Remote change-feed interface. Feeds are per collection, never filtered.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, collection: &str) -> Result<FeedSubscription, RemoteFailure>;
}

/// An open change-feed subscription.
///
/// Dropping the subscription unsubscribes: producers observe the closed
/// channel and stop delivering.
#[derive(Debug)]
pub struct FeedSubscription {
    collection: String,
    receiver: mpsc::UnboundedReceiver<FeedSignal>,
}

impl FeedSubscription {
    /// Creates a subscription and the sender its producer delivers through.
    pub fn channel(collection: impl Into<String>) -> (FeedSender, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            FeedSender { sender },
            Self {
                collection: collection.into(),
                receiver,
            },
        )
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Next signal; `None` once the producer has ended the stream.
    pub async fn next(&mut self) -> Option<FeedSignal> {
        self.receiver.recv().await
    }

    /// Stops delivery. Signals already queued are discarded.
    pub fn unsubscribe(mut self) {
        self.receiver.close();
    }
}

/// Producer side of a `FeedSubscription`.
#[derive(Debug, Clone)]
pub struct FeedSender {
    sender: mpsc::UnboundedSender<FeedSignal>,
}

impl FeedSender {
    /// Delivers a signal. Returns false once the subscriber has gone away.
    pub fn send(&self, signal: FeedSignal) -> bool {
        self.sender.send(signal).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Resolves when the subscriber unsubscribes or is dropped.
    pub async fn closed(&self) {
        self.sender.closed().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn selection_renders_select_param() {
        assert_eq!(Selection::All.to_select_param(), "*");
        assert_eq!(
            Selection::columns(["id", "status", "session_date"]).to_select_param(),
            "id,status,session_date"
        );
        assert_eq!(Selection::Columns(Vec::new()).to_select_param(), "*");
    }

    #[test]
    fn projection_keeps_id() {
        let row = json!({ "id": "s-1", "status": "ready", "notes": "long text" });
        let row = row.as_object().cloned().unwrap_or_default();
        let projected = Selection::columns(["status"]).project(&row);
        assert_eq!(
            Value::Object(projected),
            json!({ "id": "s-1", "status": "ready" })
        );
    }

    #[tokio::test]
    async fn dropping_subscription_closes_sender() {
        let (sender, mut subscription) = FeedSubscription::channel("sessions");
        assert!(sender.send(FeedSignal::Live));
        assert_eq!(subscription.next().await, Some(FeedSignal::Live));

        subscription.unsubscribe();
        assert!(sender.is_closed());
        assert!(!sender.send(FeedSignal::Live));
    }

    #[tokio::test]
    async fn stream_ends_when_producer_drops() {
        let (sender, mut subscription) = FeedSubscription::channel("sessions");
        drop(sender);
        assert_eq!(subscription.collection(), "sessions");
        assert_eq!(subscription.next().await, None);
    }
}
