//! HTTP implementation of the REST collaborator.
//!
//! Speaks the three JSON endpoints the engine needs and attaches the
//! session credential as a `token` header on every call. The token is set
//! by the auth layer after login and cleared on logout; this transport
//! never inspects it.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use std::sync::RwLock;

use super::{RestError, RestTransport};
use chat_types::{Message, MessageBody, User, UserId};

/// REST transport over HTTP, backed by `reqwest`.
pub struct HttpRest {
    base_url: String,
    client: Client,
    token: RwLock<Option<String>>,
}

impl HttpRest {
    /// Create a transport rooted at the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            client: Client::new(),
            token: RwLock::new(None),
        }
    }

    /// Attach the session credential to all subsequent requests.
    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = Some(token.into());
    }

    /// Drop the session credential (logout).
    pub fn clear_token(&self) {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = self.client.request(method, url);
        let token = self
            .token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        match token {
            Some(token) => builder.header("token", token),
            None => builder,
        }
    }

    fn check_status(response: Response) -> Result<Response, RestError> {
        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(RestError::Unauthorized),
            status => Err(RestError::Status(status.as_u16())),
        }
    }
}

#[async_trait]
impl RestTransport for HttpRest {
    async fn contacts(&self) -> Result<Vec<User>, RestError> {
        let response = self
            .request(Method::GET, "/contacts")
            .send()
            .await
            .map_err(|e| RestError::Network(e.to_string()))?;
        Self::check_status(response)?
            .json()
            .await
            .map_err(|e| RestError::Decode(e.to_string()))
    }

    async fn history(&self, counterpart: &UserId) -> Result<Vec<Message>, RestError> {
        let response = self
            .request(Method::GET, &format!("/messages/{}", counterpart))
            .send()
            .await
            .map_err(|e| RestError::Network(e.to_string()))?;
        Self::check_status(response)?
            .json()
            .await
            .map_err(|e| RestError::Decode(e.to_string()))
    }

    async fn send(&self, recipient: &UserId, body: &MessageBody) -> Result<Message, RestError> {
        let response = self
            .request(Method::POST, &format!("/messages/{}", recipient))
            .json(body)
            .send()
            .await
            .map_err(|e| RestError::Network(e.to_string()))?;
        Self::check_status(response)?
            .json()
            .await
            .map_err(|e| RestError::Decode(e.to_string()))
    }
}
