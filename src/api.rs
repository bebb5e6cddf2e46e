//! JSON wire types shared by the HTTP server and the sync client.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiStatus {
    Ok,
    Error,
}

/// `{status, data?, error?}` wrapper around every API response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub status: ApiStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            status: ApiStatus::Ok,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: ApiStatus::Error,
            data: None,
            error: Some(message.into()),
        }
    }
}

impl Envelope<()> {
    pub fn empty() -> Self {
        Self {
            status: ApiStatus::Ok,
            data: None,
            error: None,
        }
    }
}

fn default_ratio() -> f64 {
    100.0
}

/// Body of `POST /api/books`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookRequest {
    pub template_id: String,
    pub name: String,
    /// Percentage (0..=100) of the template's words copied into the new book.
    #[serde(default = "default_ratio")]
    pub words_ratio: f64,
}

/// Payload of a successful `POST /api/books/:id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatedBook {
    pub id: String,
}
