//! HTTP implementations of the sync layer's remote contracts: a REST client
//! for queries and mutations, and a change feed that polls the change log.

pub mod client;
pub mod config;
pub mod error;
pub mod feed;
pub mod types;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use serde::de::DeserializeOwned;

use schoolops_core::sync::SyncClient;
use schoolops_core::{Entity, SyncConfig};

pub use client::RestClient;
pub use config::RemoteConfig;
pub use error::{RemoteError, Result};
pub use feed::PollingChangeFeed;

/// Builds a sync client talking to the data API.
pub fn connect<E>(remote: RemoteConfig, sync: SyncConfig) -> Result<SyncClient<E>>
where
    E: Entity + DeserializeOwned,
{
    let client = Arc::new(RestClient::new(remote)?);
    let feed = Arc::new(PollingChangeFeed::new(client.as_ref().clone(), &sync));
    Ok(SyncClient::new(client.clone(), client, feed, sync))
}
