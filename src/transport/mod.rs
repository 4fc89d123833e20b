//! Boundary to the document API. The upload manager only depends on
//! [`DocumentTransport`]; [`HttpTransport`] is the production implementation.

mod credentials;
mod http;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use crate::upload::{DocumentType, FileRef, ProgressReporter, UploadTarget};

pub use credentials::{CredentialProvider, StaticCredentials};
pub use http::HttpTransport;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// 400 / 422 with the server's explanation
    #[error("{0}")]
    Validation(String),

    #[error("Server error: status code {status}, message: {message}")]
    Server {
        status: u16,
        message: String,
    },

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Upload cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TransportError {
    pub fn server_error(status: u16, message: impl Into<String>) -> Self {
        Self::Server {
            status,
            message: message.into(),
        }
    }

    /// Classify a non-success HTTP response.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = extract_message(body);
        match status {
            401 => Self::Unauthorized,
            403 => Self::Forbidden(message.unwrap_or_else(|| "Access denied".to_string())),
            404 => Self::NotFound(message.unwrap_or_else(|| "Resource not found".to_string())),
            400 | 422 => Self::Validation(
                message.unwrap_or_else(|| "Please check your input and try again.".to_string()),
            ),
            _ => Self::server_error(
                status,
                message.unwrap_or_else(|| format!("Request failed with status {}", status)),
            ),
        }
    }

    /// Transient failures worth another attempt. A plain 500 is treated as
    /// a deterministic server fault.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout => true,
            Self::Server { status, .. } => matches!(status, 502..=504),
            _ => false,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::Network(_) => {
                "Unable to connect to the server. Please check your internet connection.".to_string()
            }
            Self::Timeout => "The request timed out. Please try again.".to_string(),
            Self::Unauthorized => "Your session has expired. Please log in again.".to_string(),
            Self::Forbidden(_) => "You do not have permission to perform this action.".to_string(),
            Self::NotFound(_) => "The requested resource was not found.".to_string(),
            Self::Validation(message) => message.clone(),
            Self::Server { .. } => "A server error occurred. Please try again later.".to_string(),
            Self::Decode(_) | Self::Io(_) | Self::Internal(_) => {
                "An unexpected error occurred. Please try again.".to_string()
            }
            Self::Cancelled => "Upload cancelled".to_string(),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Pull a human readable message out of an error body: `{"message": ..}`,
/// `{"errors": {field: [..]}}` or the raw text.
fn extract_message(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(message) = value.get("message").and_then(|m| m.as_str()) {
            return Some(message.to_string());
        }
        if let Some(errors) = value.get("errors").and_then(|e| e.as_object()) {
            let joined = errors
                .values()
                .flat_map(|v| match v {
                    serde_json::Value::Array(items) => items.iter().filter_map(|i| i.as_str()).map(String::from).collect(),
                    serde_json::Value::String(s) => vec![s.clone()],
                    _ => Vec::new(),
                })
                .collect::<Vec<_>>()
                .join(", ");
            if !joined.is_empty() {
                return Some(joined);
            }
        }
        if let Some(text) = value.as_str() {
            return Some(text.to_string());
        }
    }

    Some(body.to_string())
}

/// Error alias
pub type Result<T, E = TransportError> = std::result::Result<T, E>;

/// Server-side record of a stored document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    pub id: String,
    pub file_name: String,
    /// Human readable, e.g. "2 MB"
    pub file_size: String,
    pub document_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub uploaded_by: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub uploaded_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}

#[cfg(test)]
impl DocumentRecord {
    pub(crate) fn test_record(id: &str, file_name: &str) -> Self {
        Self {
            id: id.to_string(),
            file_name: file_name.to_string(),
            file_size: "1 KB".to_string(),
            document_type: DocumentType::default().to_string(),
            description: None,
            uploaded_by: "tester".to_string(),
            uploaded_at: Utc::now(),
            download_url: None,
        }
    }
}

// The API emits both offset-qualified and bare UTC timestamps.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadMetadata {
    pub document_type: DocumentType,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub document_type: Option<DocumentType>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl ListFilter {
    /// Query parameters, omitting unset ones.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(document_type) = self.document_type {
            pairs.push(("documentType", document_type.to_string()));
        }
        if let Some(page) = self.page {
            pairs.push(("page", page.to_string()));
        }
        if let Some(page_size) = self.page_size {
            pairs.push(("pageSize", page_size.to_string()));
        }
        pairs
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentPage {
    pub records: Vec<DocumentRecord>,
    pub total_count: u64,
}

/// Network operations against the document API.
#[async_trait]
pub trait DocumentTransport: Send + Sync {
    /// Upload `file` to the endpoint of `target`. Progress must be reported
    /// with non-decreasing byte counts.
    async fn upload(
        &self,
        target: &UploadTarget,
        file: &FileRef,
        metadata: &UploadMetadata,
        progress: ProgressReporter,
    ) -> Result<DocumentRecord>;

    async fn get(&self, document_id: &str) -> Result<DocumentRecord>;

    async fn download(&self, document_id: &str) -> Result<Bytes>;

    async fn list(&self, patient_id: &str, filter: &ListFilter) -> Result<DocumentPage>;

    async fn delete(&self, document_id: &str) -> Result<()>;
}
