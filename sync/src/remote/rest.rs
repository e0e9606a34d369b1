//! HTTP/JSON remote channel.
//!
//! Maps the channel contract onto a REST collection resource:
//!
//! | call            | request                  |
//! |-----------------|--------------------------|
//! | read            | `GET {base}?field=value` |
//! | save (create)   | `POST {base}`            |
//! | save (update)   | `PUT {base}/{id}`        |
//! | remove          | `DELETE {base}/{id}`     |

use super::{documents_from_value, echoed_document, RemoteChannel, SaveKind, SaveRequest};
use crate::config::Config;
use crate::error::RemoteError;
use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde_json::Value;
use std::time::Duration;
use tidepool_engine::{Document, RecordId};

/// Remote channel speaking JSON over HTTP.
#[derive(Debug, Clone)]
pub struct RestChannel {
    client: Client,
    base: Url,
    id_field: String,
}

impl RestChannel {
    /// Create a channel for the collection at `base_url`.
    pub fn new(
        base_url: &str,
        id_field: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let base = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| RemoteError::Transport(format!("invalid base url: {}", e)))?;
        if base.cannot_be_a_base() {
            return Err(RemoteError::Transport(format!(
                "invalid base url: {}",
                base_url
            )));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base,
            id_field: id_field.into(),
        })
    }

    /// Create a channel from loaded configuration.
    pub fn from_config(config: &Config) -> Result<Self, crate::SyncError> {
        let url = config.require_remote_url()?;
        Ok(Self::new(url, config.id_field.clone(), config.request_timeout)?)
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn record_url(&self, id: &RecordId) -> Result<Url, RemoteError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::Transport("base url cannot hold a path".into()))?
            .pop_if_empty()
            .push(&id.to_string());
        Ok(url)
    }
}

/// Read a response body as JSON, mapping non-2xx statuses to errors.
/// Empty bodies decode to `Value::Null`.
async fn decode(response: Response) -> Result<Value, RemoteError> {
    let status = response.status();
    let body = response.text().await.map_err(transport)?;

    if !status.is_success() {
        return Err(RemoteError::Status {
            status: status.as_u16(),
            body,
        });
    }
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body).map_err(|e| RemoteError::Decode(e.to_string()))
}

fn transport(err: reqwest::Error) -> RemoteError {
    RemoteError::Transport(err.to_string())
}

/// Query parameters: strings as-is, everything else as JSON text.
fn query_pairs(query: &Document) -> Vec<(String, String)> {
    query
        .iter()
        .map(|(field, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (field.clone(), value)
        })
        .collect()
}

#[async_trait]
impl RemoteChannel for RestChannel {
    async fn read(&self, query: Option<&Document>) -> Result<Vec<Document>, RemoteError> {
        let mut request = self.client.get(self.base.clone());
        if let Some(query) = query {
            request = request.query(&query_pairs(query));
        }

        let response = request.send().await.map_err(transport)?;
        match decode(response).await? {
            Value::Null => Ok(Vec::new()),
            value => documents_from_value(value),
        }
    }

    async fn save(&self, request: SaveRequest) -> Result<Document, RemoteError> {
        let builder = match request.kind {
            SaveKind::Create => self.client.post(self.base.clone()),
            SaveKind::Update => {
                let id = request
                    .remote_id(&self.id_field)
                    .unwrap_or_else(|| request.local_id.clone());
                self.client.put(self.record_url(&id)?)
            }
        };

        tracing::debug!(
            kind = ?request.kind,
            request_token = %request.request_token,
            id = %request.local_id,
            "sending save"
        );

        let response = builder
            .header("x-request-token", request.request_token.to_string())
            .json(&request.body)
            .send()
            .await
            .map_err(transport)?;

        match decode(response).await? {
            // Nothing echoed: the server accepted the body as sent
            Value::Null => Ok(request.body),
            value => echoed_document(value),
        }
    }

    async fn remove(&self, id: &RecordId) -> Result<(), RemoteError> {
        let response = self
            .client
            .delete(self.record_url(id)?)
            .send()
            .await
            .map_err(transport)?;
        decode(response).await.map(|_| ())
    }
}
