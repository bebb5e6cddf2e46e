//! HTTP client for the word-book server.
//!
//! Every pulled document runs through [`normalize`] before it is handed out,
//! so callers only ever see current-schema books.

use crate::api::{ApiStatus, CreateBookRequest, Envelope, UpdatedBook};
use crate::error::DocumentError;
use crate::migrate::normalize;
use crate::model::{WordBook, WordBookOverview, sort_overviews};
use crate::state::WordBookState;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server answered {status}: {message}")]
    Status { status: u16, message: String },

    #[error("server reported an error: {0}")]
    Remote(String),

    #[error("undecodable response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Document(#[from] DocumentError),
}

impl SyncError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::Status { status: 404, .. })
    }
}

#[derive(Debug, Clone)]
pub struct SyncClient {
    http: Client,
    base_url: String,
}

impl SyncClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(http: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn ping(&self) -> Result<String, SyncError> {
        let response = self.http.get(self.url("/api/ping")).send().await?;
        required(read_envelope::<String>(response).await?)
    }

    /// All books on the server, newest first.
    pub async fn list_overviews(&self) -> Result<Vec<WordBookOverview>, SyncError> {
        let response = self.http.get(self.url("/api/books")).send().await?;
        let mut rows: Vec<WordBookOverview> = required(read_envelope(response).await?)?;
        sort_overviews(&mut rows);
        Ok(rows)
    }

    /// Fetches one book and upgrades it to the current schema.
    pub async fn pull(&self, book_id: &str) -> Result<WordBook, SyncError> {
        let response = self.http.get(self.book_url(book_id)).send().await?;
        let raw: Value = required(read_envelope(response).await?)?;
        let mut book = normalize(raw)?;
        if book.id.is_empty() {
            book.id = book_id.to_string();
        }
        debug!(book_id, words = book.words.len(), "pulled book");
        Ok(book)
    }

    /// Sends the whole book, keyed by its id.
    pub async fn push(&self, book: &WordBook) -> Result<(), SyncError> {
        let response = self
            .http
            .post(self.book_url(&book.id))
            .json(book)
            .send()
            .await?;
        let updated: Option<UpdatedBook> = read_envelope(response).await?;
        debug!(book_id = %book.id, confirmed = ?updated.map(|u| u.id), "pushed book");
        Ok(())
    }

    /// Pushes the state's book and clears its dirty flag on success. On
    /// failure the book stays dirty so a later push can retry.
    pub async fn push_state(&self, state: &mut WordBookState) -> Result<(), SyncError> {
        match self.push(state.book()).await {
            Ok(()) => {
                state.mark_clean();
                Ok(())
            }
            Err(err) => {
                warn!(book_id = %state.book().id, error = %err, "push failed, book left dirty");
                Err(err)
            }
        }
    }

    pub async fn create(
        &self,
        template_id: &str,
        name: &str,
        sample_ratio_percent: f64,
    ) -> Result<WordBookOverview, SyncError> {
        let request = CreateBookRequest {
            template_id: template_id.to_string(),
            name: name.to_string(),
            words_ratio: sample_ratio_percent,
        };
        let response = self
            .http
            .post(self.url("/api/books"))
            .json(&request)
            .send()
            .await?;
        let created: WordBookOverview = required(read_envelope(response).await?)?;
        info!(book_id = %created.id, template = template_id, "created book");
        Ok(created)
    }

    pub async fn remove(&self, book_id: &str) -> Result<(), SyncError> {
        let response = self.http.delete(self.book_url(book_id)).send().await?;
        read_envelope::<Value>(response).await?;
        Ok(())
    }

    /// Reads the single-document `/api/state` store.
    pub async fn pull_legacy(&self) -> Result<WordBook, SyncError> {
        let response = self.http.get(self.url("/api/state")).send().await?;
        let raw: Value = required(read_envelope(response).await?)?;
        Ok(normalize(raw)?)
    }

    pub async fn push_legacy(&self, book: &WordBook) -> Result<(), SyncError> {
        let response = self
            .http
            .post(self.url("/api/state"))
            .json(book)
            .send()
            .await?;
        read_envelope::<Value>(response).await?;
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn book_url(&self, book_id: &str) -> String {
        let encoded = utf8_percent_encode(book_id, NON_ALPHANUMERIC);
        format!("{}/api/books/{}", self.base_url, encoded)
    }
}

async fn read_envelope<T: DeserializeOwned>(response: Response) -> Result<Option<T>, SyncError> {
    let status = response.status();
    let bytes = response.bytes().await?;
    if !status.is_success() {
        let message = serde_json::from_slice::<Envelope<Value>>(&bytes)
            .ok()
            .and_then(|envelope| envelope.error)
            .unwrap_or_else(|| String::from_utf8_lossy(&bytes).into_owned());
        return Err(SyncError::Status {
            status: status.as_u16(),
            message,
        });
    }
    let envelope: Envelope<T> = serde_json::from_slice(&bytes)?;
    match envelope.status {
        ApiStatus::Ok => Ok(envelope.data),
        ApiStatus::Error => Err(SyncError::Remote(envelope.error.unwrap_or_default())),
    }
}

fn required<T>(data: Option<T>) -> Result<T, SyncError> {
    data.ok_or_else(|| SyncError::Remote("response carried no data".to_string()))
}
