//! Change feed backed by polling a collection's change log.
//!
//! Each subscription starts at the log head, so only changes committed after
//! `subscribe` returns are delivered. The poll task stops as soon as the
//! subscriber goes away.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};

use schoolops_core::errors::{RemoteFailure, RetryClass};
use schoolops_core::sync::{backoff_with_jitter, ChangeFeed, FeedSender, FeedSignal, FeedSubscription};
use schoolops_core::SyncConfig;

use crate::client::RestClient;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct PollingChangeFeed {
    client: RestClient,
    retry_base: Duration,
    retry_max: Duration,
}

impl PollingChangeFeed {
    /// Polls with `client`'s interval; failed polls back off using the
    /// reconnect delays of `sync`.
    pub fn new(client: RestClient, sync: &SyncConfig) -> Self {
        Self {
            client,
            retry_base: sync.reconnect_base_delay,
            retry_max: sync.reconnect_max_delay,
        }
    }
}

#[async_trait]
impl ChangeFeed for PollingChangeFeed {
    async fn subscribe(&self, collection: &str) -> std::result::Result<FeedSubscription, RemoteFailure> {
        let head = self.client.change_cursor(collection).await?;
        debug!(
            "[Feed] subscribing to '{}' from cursor {}",
            collection, head.cursor
        );
        let (sender, subscription) = FeedSubscription::channel(collection);
        tokio::spawn(run_poll_loop(
            self.clone(),
            collection.to_string(),
            head.cursor,
            sender,
        ));
        Ok(subscription)
    }
}

/// Pages through the log until it is drained. Returns false once the
/// subscriber has gone away.
async fn drain(
    client: &RestClient,
    collection: &str,
    cursor: &mut i64,
    sender: &FeedSender,
) -> Result<bool> {
    loop {
        let page = client
            .changes_since(collection, *cursor, Some(client.config().page_limit))
            .await?;
        if !page.changes.is_empty() {
            debug!(
                "[Feed] '{}' received {} changes after cursor {}",
                collection,
                page.changes.len(),
                cursor
            );
        }
        for change in page.changes {
            if !sender.send(FeedSignal::Change(change)) {
                return Ok(false);
            }
        }
        *cursor = page.next_cursor;
        if !page.has_more {
            return Ok(true);
        }
    }
}

async fn run_poll_loop(feed: PollingChangeFeed, collection: String, mut cursor: i64, sender: FeedSender) {
    let poll_interval = feed.client.config().poll_interval;
    let mut live = false;
    let mut failures: u32 = 0;

    loop {
        let outcome = tokio::select! {
            _ = sender.closed() => break,
            outcome = drain(&feed.client, &collection, &mut cursor, &sender) => outcome,
        };

        let delay = match outcome {
            Ok(false) => break,
            Ok(true) => {
                if failures > 0 {
                    info!(
                        "[Feed] '{}' recovered after {} failed polls",
                        collection, failures
                    );
                }
                failures = 0;
                if !live {
                    if !sender.send(FeedSignal::Live) {
                        break;
                    }
                    live = true;
                }
                poll_interval
            }
            Err(err) => match err.retry_class() {
                RetryClass::Retryable => {
                    failures = failures.saturating_add(1);
                    warn!(
                        "[Feed] poll of '{}' failed (attempt {}): {}",
                        collection, failures, err
                    );
                    if failures == 1 {
                        live = false;
                        if !sender.send(FeedSignal::Interrupted(err.into())) {
                            break;
                        }
                    }
                    backoff_with_jitter(failures, feed.retry_base, feed.retry_max)
                }
                RetryClass::Permanent | RetryClass::ReauthRequired => {
                    warn!(
                        "[Feed] ending change feed for '{}': {}",
                        collection, err
                    );
                    break;
                }
            },
        };

        tokio::select! {
            _ = sender.closed() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    debug!("[Feed] poll loop for '{}' stopped", collection);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RemoteConfig;
    use crate::test_support::spawn_server;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn feed(base_url: &str) -> PollingChangeFeed {
        let config = RemoteConfig {
            poll_interval: Duration::from_millis(10),
            ..RemoteConfig::new(base_url)
        };
        let sync = SyncConfig {
            reconnect_base_delay: Duration::from_millis(5),
            reconnect_max_delay: Duration::from_millis(20),
            max_reconnect_attempts: None,
        };
        PollingChangeFeed::new(RestClient::new(config).expect("client"), &sync)
    }

    async fn next(subscription: &mut FeedSubscription) -> Option<FeedSignal> {
        tokio::time::timeout(Duration::from_secs(3), subscription.next())
            .await
            .expect("signal in time")
    }

    const INSERT_PAGE: &str = r#"{"changes":[{"table":"sessions","eventType":"INSERT","new":{"id":"s-1","status":"scheduled"}}],"nextCursor":11,"hasMore":false}"#;
    const EMPTY_PAGE: &str = r#"{"changes":[],"nextCursor":11,"hasMore":false}"#;

    #[tokio::test]
    async fn delivers_changes_after_head_then_goes_live() {
        let base = spawn_server(|_, target| {
            if target.starts_with("/changes/v1/sessions/cursor") {
                (200, r#"{"cursor":10}"#.to_string())
            } else if target.contains("since=10") {
                (200, INSERT_PAGE.to_string())
            } else {
                (200, EMPTY_PAGE.to_string())
            }
        })
        .await;

        let mut subscription = feed(&base).subscribe("sessions").await.expect("subscribe");
        match next(&mut subscription).await {
            Some(FeedSignal::Change(change)) => {
                assert_eq!(change.event_type, "INSERT");
                assert_eq!(change.collection, "sessions");
            }
            other => panic!("expected change, got {:?}", other),
        }
        assert_eq!(next(&mut subscription).await, Some(FeedSignal::Live));
    }

    #[tokio::test]
    async fn transient_failure_interrupts_then_recovers() {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&polls);
        let base = spawn_server(move |_, target| {
            if target.starts_with("/changes/v1/sessions/cursor") {
                return (200, r#"{"cursor":10}"#.to_string());
            }
            match counter.fetch_add(1, Ordering::SeqCst) {
                0 => (
                    503,
                    r#"{"code":"503","message":"upstream unavailable"}"#.to_string(),
                ),
                _ => (200, EMPTY_PAGE.to_string()),
            }
        })
        .await;

        let mut subscription = feed(&base).subscribe("sessions").await.expect("subscribe");
        match next(&mut subscription).await {
            Some(FeedSignal::Interrupted(failure)) => assert_eq!(failure.status, Some(503)),
            other => panic!("expected interruption, got {:?}", other),
        }
        assert_eq!(next(&mut subscription).await, Some(FeedSignal::Live));
        assert!(polls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn permanent_failure_ends_the_stream() {
        let base = spawn_server(|_, target| {
            if target.starts_with("/changes/v1/sessions/cursor") {
                (200, r#"{"cursor":0}"#.to_string())
            } else {
                (404, r#"{"message":"relation does not exist"}"#.to_string())
            }
        })
        .await;

        let mut subscription = feed(&base).subscribe("sessions").await.expect("subscribe");
        assert_eq!(next(&mut subscription).await, None);
    }

    #[tokio::test]
    async fn subscribe_reports_cursor_failure() {
        let base = spawn_server(|_, _| (401, r#"{"message":"JWT expired"}"#.to_string())).await;
        let result = feed(&base).subscribe("sessions").await;
        let failure = result.err().expect("subscribe should fail");
        assert_eq!(failure.status, Some(401));
        assert_eq!(failure.retry_class(), RetryClass::ReauthRequired);
    }
}
