//! REST client for the school data API.
//!
//! Collections are exposed under `/rest/v1/{collection}` with filters passed
//! as `column=op.value` query parameters; the change log lives under
//! `/changes/v1/{collection}`.

use async_trait::async_trait;
use log::{debug, error};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use schoolops_core::errors::RemoteFailure;
use schoolops_core::sync::{FilterConstraint, FilterSet, RemoteMutation, RemoteQuery, Selection};
use schoolops_core::Entity;

use crate::config::RemoteConfig;
use crate::error::{RemoteError, Result};
use crate::types::{ApiErrorResponse, ChangeCursorResponse, ChangePage};

const MAX_LOG_BODY_CHARS: usize = 512;
const APIKEY_HEADER: &str = "apikey";
const PREFER_HEADER: &str = "prefer";
const RETURN_REPRESENTATION: &str = "return=representation";

/// Renders a filter value in the API's `op.value` query syntax.
pub fn encode_filter_value(value: &Value) -> String {
    match value {
        Value::Null => "is.null".to_string(),
        Value::Array(items) => {
            let items = items.iter().map(encode_array_item).collect::<Vec<_>>();
            format!("cs.{{{}}}", items.join(","))
        }
        Value::String(text) => format!("eq.{}", text),
        other => format!("eq.{}", other),
    }
}

fn encode_array_item(item: &Value) -> String {
    match item {
        Value::String(text) => {
            let needs_quotes = text.is_empty()
                || text
                    .chars()
                    .any(|c| matches!(c, ',' | '{' | '}' | '"' | '\\') || c.is_whitespace());
            if needs_quotes {
                format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
            } else {
                text.clone()
            }
        }
        Value::Null => "NULL".to_string(),
        other => other.to_string(),
    }
}

/// Query parameters for a filtered select.
pub fn query_params(filter: &FilterSet, selection: &Selection) -> Vec<(String, String)> {
    let select = match selection {
        Selection::Columns(columns)
            if !columns.is_empty() && !columns.iter().any(|c| c == "id") =>
        {
            format!("id,{}", selection.to_select_param())
        }
        _ => selection.to_select_param(),
    };
    let mut params = vec![("select".to_string(), select)];
    params.extend(filter.constraints().iter().map(|FilterConstraint { column, value }| {
        (column.clone(), encode_filter_value(value))
    }));
    params
}

fn id_param(id: &str) -> Result<[(&'static str, String); 1]> {
    let id = id.trim();
    if id.is_empty() {
        return Err(RemoteError::invalid_request("Row id must not be empty"));
    }
    Ok([("id", format!("eq.{}", id))])
}

fn api_error(status: u16, body: &str) -> RemoteError {
    match serde_json::from_str::<ApiErrorResponse>(body) {
        Ok(error) => RemoteError::api(status, error.describe()),
        Err(_) => RemoteError::api(status, format!("Request failed: {}", body)),
    }
}

fn decode_rows<E: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<E>> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(RemoteError::from))
        .collect()
}

/// Client for the collection and change-log endpoints.
#[derive(Debug, Clone)]
pub struct RestClient {
    client: reqwest::Client,
    config: RemoteConfig,
}

impl RestClient {
    fn log_response(status: reqwest::StatusCode, body: &str) {
        if status.is_success() {
            debug!("[Remote] response status: {}", status);
            return;
        }

        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("[Remote] response error ({}): {}", status, preview);
    }

    pub fn new(config: RemoteConfig) -> Result<Self> {
        config.validate()?;
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    fn collection_url(&self, collection: &str) -> Result<String> {
        if collection.trim().is_empty() {
            return Err(RemoteError::invalid_request("Collection name must not be empty"));
        }
        Ok(format!(
            "{}/rest/v1/{}",
            self.config.api_url,
            urlencoding::encode(collection)
        ))
    }

    fn changes_url(&self, collection: &str) -> String {
        format!(
            "{}/changes/v1/{}",
            self.config.api_url,
            urlencoding::encode(collection)
        )
    }

    /// Create headers for an API request.
    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        if let Some(key) = self.config.api_key.as_deref() {
            let value = HeaderValue::from_str(key)
                .map_err(|_| RemoteError::auth("Invalid API key format"))?;
            headers.insert(HeaderName::from_static(APIKEY_HEADER), value);
        }
        if let Some(token) = self.config.bearer() {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| RemoteError::auth("Invalid access token format"))?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }

    fn write_headers(&self) -> Result<HeaderMap> {
        let mut headers = self.headers()?;
        headers.insert(
            HeaderName::from_static(PREFER_HEADER),
            HeaderValue::from_static(RETURN_REPRESENTATION),
        );
        Ok(headers)
    }

    /// Parse a JSON response body.
    async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;
        Self::log_response(status, &body);

        if !status.is_success() {
            return Err(api_error(status.as_u16(), &body));
        }

        serde_json::from_str(&body).map_err(|e| {
            error!(
                "[Remote] failed to deserialize response. Body: {}, Error: {}",
                body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>(),
                e
            );
            RemoteError::api(status.as_u16(), format!("Failed to parse response: {}", e))
        })
    }

    /// GET /rest/v1/{collection}?select=...&column=op.value
    pub async fn select_rows(
        &self,
        collection: &str,
        filter: &FilterSet,
        selection: &Selection,
    ) -> Result<Vec<Value>> {
        let url = self.collection_url(collection)?;
        debug!(
            "[Remote] select from '{}' with {} constraints",
            collection,
            filter.constraints().len()
        );
        let response = self
            .client
            .get(&url)
            .headers(self.headers()?)
            .query(&query_params(filter, selection))
            .send()
            .await?;
        Self::parse_response(response).await
    }

    /// POST /rest/v1/{collection}
    pub async fn insert_row(&self, collection: &str, fields: Map<String, Value>) -> Result<Value> {
        let url = self.collection_url(collection)?;
        let response = self
            .client
            .post(&url)
            .headers(self.write_headers()?)
            .json(&Value::Object(fields))
            .send()
            .await?;
        let mut rows: Vec<Value> = Self::parse_response(response).await?;
        if rows.is_empty() {
            return Err(RemoteError::invalid_request(format!(
                "Insert into '{}' returned no row",
                collection
            )));
        }
        Ok(rows.swap_remove(0))
    }

    /// PATCH /rest/v1/{collection}?id=eq.{id}
    pub async fn update_row(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<Value> {
        let url = self.collection_url(collection)?;
        let response = self
            .client
            .patch(&url)
            .headers(self.write_headers()?)
            .query(&id_param(id)?)
            .json(&Value::Object(fields))
            .send()
            .await?;
        let mut rows: Vec<Value> = Self::parse_response(response).await?;
        if rows.is_empty() {
            return Err(RemoteError::api(
                404,
                format!("No row in '{}' with id {}", collection, id),
            ));
        }
        Ok(rows.swap_remove(0))
    }

    /// DELETE /rest/v1/{collection}?id=eq.{id}
    pub async fn delete_row(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let url = self.collection_url(collection)?;
        let response = self
            .client
            .delete(&url)
            .headers(self.write_headers()?)
            .query(&id_param(id)?)
            .send()
            .await?;
        let rows: Vec<Value> = Self::parse_response(response).await?;
        Ok(rows.into_iter().next())
    }

    /// Current head of a collection's change log.
    ///
    /// GET /changes/v1/{collection}/cursor
    pub async fn change_cursor(&self, collection: &str) -> Result<ChangeCursorResponse> {
        let url = format!("{}/cursor", self.changes_url(collection));
        let response = self
            .client
            .get(&url)
            .headers(self.headers()?)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    /// Changes committed after `since`.
    ///
    /// GET /changes/v1/{collection}?since=&limit=
    pub async fn changes_since(
        &self,
        collection: &str,
        since: i64,
        limit: Option<u32>,
    ) -> Result<ChangePage> {
        let url = self.changes_url(collection);
        let mut query: Vec<(&str, String)> = vec![("since", since.to_string())];
        if let Some(value) = limit {
            query.push(("limit", value.to_string()));
        }
        let response = self
            .client
            .get(&url)
            .headers(self.headers()?)
            .query(&query)
            .send()
            .await?;
        Self::parse_response(response).await
    }
}

#[async_trait]
impl<E> RemoteQuery<E> for RestClient
where
    E: Entity + DeserializeOwned,
{
    async fn fetch(
        &self,
        collection: &str,
        filter: &FilterSet,
        selection: &Selection,
    ) -> std::result::Result<Vec<E>, RemoteFailure> {
        let rows = self.select_rows(collection, filter, selection).await?;
        debug!("[Remote] fetched {} rows from '{}'", rows.len(), collection);
        Ok(decode_rows(rows)?)
    }
}

#[async_trait]
impl<E> RemoteMutation<E> for RestClient
where
    E: Entity + DeserializeOwned,
{
    async fn insert(
        &self,
        collection: &str,
        fields: Map<String, Value>,
    ) -> std::result::Result<E, RemoteFailure> {
        let row = self.insert_row(collection, fields).await?;
        Ok(serde_json::from_value(row).map_err(RemoteError::from)?)
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> std::result::Result<E, RemoteFailure> {
        let row = self.update_row(collection, id, fields).await?;
        Ok(serde_json::from_value(row).map_err(RemoteError::from)?)
    }

    async fn delete(
        &self,
        collection: &str,
        id: &str,
    ) -> std::result::Result<Option<E>, RemoteFailure> {
        match self.delete_row(collection, id).await? {
            Some(row) => Ok(Some(serde_json::from_value(row).map_err(RemoteError::from)?)),
            None => Ok(None),
        }
    }
}
