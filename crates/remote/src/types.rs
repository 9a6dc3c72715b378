//! Wire types of the data API.

use schoolops_core::sync::RawChange;
use serde::{Deserialize, Serialize};

/// Error body returned by the REST endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub hint: Option<String>,
}

impl ApiErrorResponse {
    /// One-line rendering for logs and error messages.
    pub fn describe(&self) -> String {
        let mut text = match &self.code {
            Some(code) => format!("{}: {}", code, self.message),
            None => self.message.clone(),
        };
        if let Some(details) = self.details.as_deref().filter(|d| !d.is_empty()) {
            text.push_str(&format!(" ({})", details));
        }
        if let Some(hint) = self.hint.as_deref().filter(|h| !h.is_empty()) {
            text.push_str(&format!(" hint: {}", hint));
        }
        text
    }
}

/// GET /changes/v1/{collection}/cursor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeCursorResponse {
    pub cursor: i64,
}

/// GET /changes/v1/{collection}?since=&limit=
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePage {
    #[serde(default)]
    pub changes: Vec<RawChange>,
    pub next_cursor: i64,
    #[serde(default)]
    pub has_more: bool,
}
