//! REST implementation of the Backend Gateway.

use async_trait::async_trait;
use parley_session::{
    BackendGateway, Conversation, ConversationId, Credentials, GatewayError, MessagePage, User,
    UserId,
};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::ServerConfig;

/// Connect failures mean the backend is not there; everything else is
/// reported as-is.
pub fn from_reqwest(err: reqwest::Error) -> GatewayError {
    if err.is_connect() || err.is_timeout() {
        GatewayError::Unavailable
    } else if err.is_decode() {
        GatewayError::Decode(err.to_string())
    } else {
        GatewayError::Other(err.to_string())
    }
}

#[derive(Deserialize)]
struct UnreadCount {
    count: u64,
}

pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGateway {
    pub fn new(config: &ServerConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(from_reqwest)?;
        Ok(Self {
            client,
            base_url: config.api_url.clone(),
        })
    }

    fn request(&self, method: Method, path: &str, credentials: &Credentials) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header(reqwest::header::AUTHORIZATION, credentials.authorization())
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, GatewayError> {
        let response = request.send().await.map_err(from_reqwest)?;
        let status = response.status();
        debug!(url = %response.url(), status = status.as_u16(), "gateway response");
        match status {
            s if s.is_success() => Ok(response),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(GatewayError::Unauthorized),
            s => {
                let message = response.text().await.unwrap_or_default();
                Err(GatewayError::Status {
                    status: s.as_u16(),
                    message,
                })
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        credentials: &Credentials,
    ) -> Result<T, GatewayError> {
        let response = self
            .send(self.request(Method::GET, path, credentials))
            .await?;
        response.json::<T>().await.map_err(from_reqwest)
    }
}

#[async_trait]
impl BackendGateway for HttpGateway {
    async fn current_user(&self, credentials: &Credentials) -> Result<User, GatewayError> {
        self.get_json("/api/user/me", credentials).await
    }

    async fn conversations(
        &self,
        credentials: &Credentials,
    ) -> Result<Vec<Conversation>, GatewayError> {
        self.get_json("/api/chat/conversations", credentials).await
    }

    async fn conversation_for_user(
        &self,
        credentials: &Credentials,
        user: &UserId,
    ) -> Result<Conversation, GatewayError> {
        self.get_json(&format!("/api/chat/conversations/user/{user}"), credentials)
            .await
    }

    async fn messages(
        &self,
        credentials: &Credentials,
        conversation: &ConversationId,
        page: u32,
        page_size: u32,
    ) -> Result<MessagePage, GatewayError> {
        let request = self
            .request(
                Method::GET,
                &format!("/api/chat/conversations/{conversation}/messages"),
                credentials,
            )
            .query(&[("page", page), ("size", page_size)]);
        let response = self.send(request).await?;
        response.json().await.map_err(from_reqwest)
    }

    async fn mark_read(
        &self,
        credentials: &Credentials,
        conversation: &ConversationId,
    ) -> Result<(), GatewayError> {
        self.send(self.request(
            Method::PUT,
            &format!("/api/chat/conversations/{conversation}/read"),
            credentials,
        ))
        .await?;
        Ok(())
    }

    async fn unread_count(&self, credentials: &Credentials) -> Result<u64, GatewayError> {
        let unread: UnreadCount = self
            .get_json("/api/chat/messages/unread/count", credentials)
            .await?;
        Ok(unread.count)
    }
}
