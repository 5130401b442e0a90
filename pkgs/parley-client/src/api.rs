//! REST collaborator
//!
//! Persistence, accounts and image storage live behind the REST API. The
//! client only consumes it through [`ChatApi`]; [`RestApi`] is the HTTP
//! implementation.

use async_trait::async_trait;
use parley_protocol::{Message, MessageId, OutgoingMessage, UserId};
use reqwest::header::COOKIE;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::{ClientError, Result};

/// An account listed in the contacts sidebar
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    #[serde(rename = "_id")]
    pub id: UserId,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub profile_pic: Option<String>,
}

impl Contact {
    pub fn new(id: impl Into<UserId>) -> Self {
        Self {
            id: id.into(),
            full_name: None,
            email: None,
            profile_pic: None,
        }
    }
}

/// REST operations consumed by the live layer. All calls act on behalf of
/// the authenticated user.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// `GET /messages/users`
    async fn list_users(&self) -> Result<Vec<Contact>>;
    /// `GET /messages/:peerId`
    async fn get_messages(&self, peer: &UserId) -> Result<Vec<Message>>;
    /// `POST /messages/send/:peerId`
    async fn send_message(&self, peer: &UserId, body: &OutgoingMessage) -> Result<Message>;
    /// `PATCH /messages/mark-read/:peerId`
    async fn mark_read(&self, peer: &UserId) -> Result<()>;
    /// `GET /messages/unread-count/:peerId`
    async fn unread_count(&self, peer: &UserId) -> Result<u64>;
    /// `GET /messages/last-message/:peerId`; `None` when the conversation is empty
    async fn last_message(&self, peer: &UserId) -> Result<Option<Message>>;
    /// `PATCH /messages/edit/:id`
    async fn edit_message(&self, id: &MessageId, text: &str) -> Result<Message>;
    /// `DELETE /messages/:id`
    async fn delete_message(&self, id: &MessageId) -> Result<()>;
    /// `GET /messages/download-image/:id`, returns the stored image URL
    async fn download_image(&self, id: &MessageId) -> Result<String>;
    /// `POST /messages/forward-message/:peerId`
    async fn forward_message(&self, peer: &UserId, body: &OutgoingMessage) -> Result<Message>;
    /// `POST /messages/search-message/:peerId`
    async fn search_messages(&self, peer: &UserId, query: &str) -> Result<Vec<Message>>;
}

#[derive(Deserialize)]
struct CountBody {
    #[serde(default)]
    count: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageBody {
    image_url: String,
}

#[derive(Deserialize, Default)]
struct ErrorBody {
    message: Option<String>,
    error: Option<String>,
}

#[derive(Serialize)]
struct EditBody<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchBody<'a> {
    search_query: &'a str,
}

/// HTTP implementation of [`ChatApi`]
#[derive(Debug, Clone)]
pub struct RestApi {
    client: reqwest::Client,
    base: Url,
    auth_token: Option<String>,
}

impl RestApi {
    pub fn new(base_url: &str, auth_token: Option<String>) -> Result<Self> {
        let base = Url::parse(base_url)?;
        if base.cannot_be_a_base() {
            return Err(ClientError::InvalidConfig(format!(
                "API URL cannot be a base: {}",
                base_url
            )));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base,
            auth_token,
        })
    }

    /// `base` + `messages/<segments...>`, each segment percent-encoded
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidConfig("API URL cannot be a base".to_string()))?
            .pop_if_empty()
            .push("messages")
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.header(COOKIE, format!("jwt={}", token)),
            None => request,
        }
    }

    async fn execute(&self, request: RequestBuilder) -> Result<reqwest::Response> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body: ErrorBody = response.json().await.unwrap_or_default();
        Err(ClientError::ApiError {
            status: status.as_u16(),
            message: body
                .message
                .or(body.error)
                .unwrap_or_else(|| status.to_string()),
        })
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        Ok(self.execute(request).await?.json().await?)
    }
}

#[async_trait]
impl ChatApi for RestApi {
    async fn list_users(&self) -> Result<Vec<Contact>> {
        let url = self.endpoint(&["users"])?;
        self.fetch(self.client.get(url)).await
    }

    async fn get_messages(&self, peer: &UserId) -> Result<Vec<Message>> {
        let url = self.endpoint(&[peer.as_str()])?;
        self.fetch(self.client.get(url)).await
    }

    async fn send_message(&self, peer: &UserId, body: &OutgoingMessage) -> Result<Message> {
        let url = self.endpoint(&["send", peer.as_str()])?;
        self.fetch(self.client.post(url).json(body)).await
    }

    async fn mark_read(&self, peer: &UserId) -> Result<()> {
        let url = self.endpoint(&["mark-read", peer.as_str()])?;
        self.execute(self.client.patch(url)).await?;
        Ok(())
    }

    async fn unread_count(&self, peer: &UserId) -> Result<u64> {
        let url = self.endpoint(&["unread-count", peer.as_str()])?;
        let body: CountBody = self.fetch(self.client.get(url)).await?;
        Ok(body.count)
    }

    async fn last_message(&self, peer: &UserId) -> Result<Option<Message>> {
        let url = self.endpoint(&["last-message", peer.as_str()])?;
        match self.fetch(self.client.get(url)).await {
            Ok(message) => Ok(Some(message)),
            Err(ClientError::ApiError { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                debug!("No messages yet with {}", peer);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn edit_message(&self, id: &MessageId, text: &str) -> Result<Message> {
        let url = self.endpoint(&["edit", id.as_str()])?;
        self.fetch(self.client.patch(url).json(&EditBody { text }))
            .await
    }

    async fn delete_message(&self, id: &MessageId) -> Result<()> {
        let url = self.endpoint(&[id.as_str()])?;
        self.execute(self.client.delete(url)).await?;
        Ok(())
    }

    async fn download_image(&self, id: &MessageId) -> Result<String> {
        let url = self.endpoint(&["download-image", id.as_str()])?;
        let body: ImageBody = self.fetch(self.client.get(url)).await?;
        Ok(body.image_url)
    }

    async fn forward_message(&self, peer: &UserId, body: &OutgoingMessage) -> Result<Message> {
        let url = self.endpoint(&["forward-message", peer.as_str()])?;
        self.fetch(self.client.post(url).json(body)).await
    }

    async fn search_messages(&self, peer: &UserId, query: &str) -> Result<Vec<Message>> {
        let url = self.endpoint(&["search-message", peer.as_str()])?;
        self.fetch(
            self.client
                .post(url)
                .json(&SearchBody {
                    search_query: query,
                }),
        )
        .await
    }
}
