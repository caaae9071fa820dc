//! HTTP adapter for the remote authority.
//!
//! Endpoints:
//! - `GET    {api}/{table}` lists a collection
//! - `POST   {api}/chat_messages` sends a message
//! - `POST   {api}/events/{id}/signups` signs up for an event
//! - `POST   {api}/{table}`, `PATCH|DELETE {api}/{table}/{id}` for admin actions
//! - `GET    {api}/health` connectivity probe

use async_trait::async_trait;
use clubsync_core::{
    ActionPayload, AdminOperation, Announcement, ChatMessage, Collection, Event, Records,
    RemoteError,
};
use reqwest::{Client, RequestBuilder, Response, Url};

use super::RemoteAuthority;
use crate::config::OfflineConfig;
use crate::network::ConnectivityProbe;

/// Map a non-success HTTP status to the remote error contract.
///
/// - 404/410 → `NotFound` (missing record, table or schema)
/// - 401, 408, 425, 429 and 5xx → `Transient`
/// - every other 4xx → `Rejected`
/// - anything else unexpected → `Transient`
pub fn classify_status(status: u16, body: &str) -> RemoteError {
    let detail = if body.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {body}")
    };

    match status {
        404 | 410 => RemoteError::not_found(detail),
        401 | 408 | 425 | 429 => RemoteError::transient(detail),
        400..=499 => RemoteError::rejected(detail),
        _ => RemoteError::transient(detail),
    }
}

/// Remote authority spoken to over HTTP/JSON.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    api_url: String,
    token: Option<String>,
    client: Client,
}

impl HttpRemote {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: None,
            client: Client::new(),
        }
    }

    pub fn with_token(api_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..Self::new(api_url)
        }
    }

    pub fn from_config(config: &OfflineConfig) -> Self {
        match &config.auth_token {
            Some(token) => Self::with_token(&config.api_url, token),
            None => Self::new(&config.api_url),
        }
    }

    /// `{api_url}/{segments...}`, each segment percent-encoded.
    fn url(&self, segments: &[&str]) -> Result<Url, RemoteError> {
        if let Some(bad) = segments.iter().find(|s| s.is_empty() || **s == "." || **s == "..") {
            return Err(RemoteError::rejected(format!("invalid path segment '{bad}'")));
        }

        let mut url = Url::parse(&self.api_url)
            .map_err(|e| RemoteError::rejected(format!("invalid api url '{}': {e}", self.api_url)))?;
        url.path_segments_mut()
            .map_err(|_| RemoteError::rejected(format!("api url '{}' cannot take a path", self.api_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, RemoteError> {
        let resp = self
            .authorized(req)
            .send()
            .await
            .map_err(|e| RemoteError::transient(format!("network error: {e}")))?;

        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }

    fn request_for(&self, payload: &ActionPayload) -> Result<RequestBuilder, RemoteError> {
        let req = match payload {
            ActionPayload::SendMessage(msg) => self.client.post(self.url(&["chat_messages"])?).json(msg),
            ActionPayload::EventSignup(signup) => self
                .client
                .post(self.url(&["events", signup.event_id.as_str(), "signups"])?)
                .json(signup),
            ActionPayload::AdminAction(admin) => {
                let record_path = || match admin.record_id.as_deref() {
                    Some(id) if !id.is_empty() => self.url(&[admin.table.as_str(), id]),
                    _ => Err(RemoteError::rejected(format!(
                        "{:?} on {} without a record_id",
                        admin.operation, admin.table
                    ))),
                };
                match admin.operation {
                    AdminOperation::Insert => self.client.post(self.url(&[admin.table.as_str()])?).json(&admin.data),
                    AdminOperation::Update => self.client.patch(record_path()?).json(&admin.data),
                    AdminOperation::Delete => self.client.delete(record_path()?),
                }
            }
        };
        Ok(req)
    }
}

#[async_trait]
impl RemoteAuthority for HttpRemote {
    async fn list(&self, collection: Collection) -> Result<Records, RemoteError> {
        let resp = self
            .send(self.client.get(self.url(&[collection.table_name()])?))
            .await?;

        let parse_err = |e: reqwest::Error| {
            RemoteError::rejected(format!("invalid {collection} response: {e}"))
        };
        let records = match collection {
            Collection::Events => Records::Events(resp.json::<Vec<Event>>().await.map_err(parse_err)?),
            Collection::Announcements => {
                Records::Announcements(resp.json::<Vec<Announcement>>().await.map_err(parse_err)?)
            }
            Collection::ChatMessages => {
                Records::ChatMessages(resp.json::<Vec<ChatMessage>>().await.map_err(parse_err)?)
            }
        };

        Ok(records)
    }

    async fn apply(&self, payload: &ActionPayload) -> Result<(), RemoteError> {
        let req = self.request_for(payload)?;
        self.send(req).await?;
        tracing::debug!(kind = payload.kind().as_str(), target = payload.target(), "remote accepted action");
        Ok(())
    }
}

/// Connectivity probe hitting the API health endpoint.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    health_url: String,
    client: Client,
}

impl HttpProbe {
    pub fn new(api_url: &str) -> Self {
        Self {
            health_url: format!("{}/health", api_url.trim_end_matches('/')),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn probe(&self) -> anyhow::Result<()> {
        // Any HTTP answer means the server is reachable.
        self.client.get(&self.health_url).send().await?;
        Ok(())
    }
}
