use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use duet_types::api::{
    AuthResponse, DeleteMessageRequest, LoginRequest, MessagesResponse, SendMessageRequest,
    SendMessageResponse, SidebarResponse, SignupRequest, StatusResponse, UpdateProfileRequest,
    UserResponse,
};

use crate::error::ClientError;

/// Thin typed wrapper over the Duet REST surface.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn set_token(&mut self, token: Option<String>) {
        self.token = token;
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, ClientError> {
        let mut req = self.http.request(method.clone(), format!("{}{}", self.base_url, path));
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }

        let resp = req.send().await?;
        let status = resp.status().as_u16();
        let value: Value = resp.json().await?;
        debug!("{} {} -> {}", method, path, status);
        decode_envelope(status, value)
    }

    // -- Auth --

    pub async fn signup(&self, req: &SignupRequest) -> Result<AuthResponse, ClientError> {
        self.request(Method::POST, "/api/auth/signup", Some(serde_json::to_value(req)?)).await
    }

    pub async fn login(&self, req: &LoginRequest) -> Result<AuthResponse, ClientError> {
        self.request(Method::POST, "/api/auth/login", Some(serde_json::to_value(req)?)).await
    }

    pub async fn check(&self) -> Result<UserResponse, ClientError> {
        self.request(Method::GET, "/api/auth/check", None).await
    }

    pub async fn update_profile(&self, req: &UpdateProfileRequest) -> Result<UserResponse, ClientError> {
        self.request(Method::PUT, "/api/auth/update-profile", Some(serde_json::to_value(req)?))
            .await
    }

    pub async fn delete_user(&self, user_id: Uuid) -> Result<StatusResponse, ClientError> {
        self.request(Method::DELETE, &format!("/api/auth/delete/{}", user_id), None).await
    }

    // -- Messages --

    pub async fn users(&self) -> Result<SidebarResponse, ClientError> {
        self.request(Method::GET, "/api/messages/users", None).await
    }

    pub async fn messages(&self, partner: Uuid) -> Result<MessagesResponse, ClientError> {
        self.request(Method::GET, &format!("/api/messages/{}", partner), None).await
    }

    pub async fn mark_seen(&self, message_id: Uuid) -> Result<StatusResponse, ClientError> {
        self.request(Method::PUT, &format!("/api/messages/mark/{}", message_id), None).await
    }

    pub async fn send(
        &self,
        receiver: Uuid,
        req: &SendMessageRequest,
    ) -> Result<SendMessageResponse, ClientError> {
        self.request(
            Method::POST,
            &format!("/api/messages/send/{}", receiver),
            Some(serde_json::to_value(req)?),
        )
        .await
    }

    pub async fn delete_all(&self, partner: Uuid) -> Result<StatusResponse, ClientError> {
        self.request(Method::DELETE, &format!("/api/messages/delete-messages/{}", partner), None)
            .await
    }

    pub async fn delete_message(
        &self,
        message_id: Uuid,
        user_id: Uuid,
    ) -> Result<StatusResponse, ClientError> {
        let body = DeleteMessageRequest { user_id: Some(user_id) };
        self.request(
            Method::DELETE,
            &format!("/api/messages/delete-message/{}", message_id),
            Some(serde_json::to_value(&body)?),
        )
        .await
    }
}

/// Every response is `{success, ...}`; `success: false` carries a message.
fn decode_envelope<T: DeserializeOwned>(status: u16, value: Value) -> Result<T, ClientError> {
    if value.get("success").and_then(Value::as_bool) != Some(true) {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Request failed")
            .to_string();
        return Err(ClientError::Rejected { status, message });
    }
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn soft_failures_become_rejections() {
        let err = decode_envelope::<StatusResponse>(
            200,
            json!({"success": false, "message": "Message must contain text or an image"}),
        )
        .unwrap_err();
        match err {
            ClientError::Rejected { status, message } => {
                assert_eq!(status, 200);
                assert_eq!(message, "Message must contain text or an image");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn successful_envelope_decodes_payload() {
        let resp: StatusResponse =
            decode_envelope(200, json!({"success": true, "message": "All messages deleted."}))
                .unwrap();
        assert_eq!(resp.message.as_deref(), Some("All messages deleted."));
    }

    #[test]
    fn base_url_is_normalized() {
        let client = ApiClient::new("http://localhost:5000/");
        assert_eq!(client.base_url(), "http://localhost:5000");
        assert!(client.token().is_none());
    }
}
