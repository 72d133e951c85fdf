use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use duet_types::api::{LoginRequest, SignupRequest, UpdateProfileRequest};
use duet_types::events::GatewayEvent;
use duet_types::models::User;

use crate::api::ApiClient;
use crate::error::ClientError;
use crate::socket::{Socket, SocketSender};

pub enum Credentials {
    Signup(SignupRequest),
    Login(LoginRequest),
}

/// Token, current user and the online list, plus the socket tied to the session.
pub struct AuthContext {
    api: ApiClient,
    user: Option<User>,
    online_users: Vec<Uuid>,
    socket: Option<Socket>,
}

impl AuthContext {
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            user: None,
            online_users: Vec::new(),
            socket: None,
        }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn online_users(&self) -> &[Uuid] {
        &self.online_users
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.online_users.contains(&user_id)
    }

    /// Validate a stored token. Returns the user and opens the socket on success.
    pub async fn check(&mut self, token: String) -> Result<&User, ClientError> {
        self.api.set_token(Some(token));
        match self.api.check().await {
            Ok(resp) => {
                self.connect_socket().await;
                Ok(self.user.insert(resp.user))
            }
            Err(e) => {
                self.api.set_token(None);
                Err(e)
            }
        }
    }

    /// Sign up or log in. Returns the server's greeting.
    pub async fn login(&mut self, credentials: Credentials) -> Result<String, ClientError> {
        let resp = match &credentials {
            Credentials::Signup(req) => self.api.signup(req).await?,
            Credentials::Login(req) => self.api.login(req).await?,
        };
        info!("Logged in as {} ({})", resp.user_data.full_name, resp.user_data.id);

        self.api.set_token(Some(resp.token));
        self.user = Some(resp.user_data);
        self.connect_socket().await;
        Ok(resp.message)
    }

    pub fn logout(&mut self) {
        self.api.set_token(None);
        self.user = None;
        self.online_users.clear();
        if let Some(socket) = self.socket.take() {
            socket.disconnect();
        }
    }

    pub async fn update_profile(&mut self, req: &UpdateProfileRequest) -> Result<&User, ClientError> {
        let resp = self.api.update_profile(req).await?;
        Ok(self.user.insert(resp.user))
    }

    /// Delete the logged-in account and end the session.
    pub async fn delete_account(&mut self) -> Result<String, ClientError> {
        let id = self.user.as_ref().ok_or(ClientError::NotAuthenticated)?.id;
        let resp = self.api.delete_user(id).await?;
        self.logout();
        Ok(resp.message.unwrap_or_else(|| "User deleted successfully".into()))
    }

    pub fn socket_sender(&self) -> Option<SocketSender> {
        self.socket.as_ref().map(Socket::sender)
    }

    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<GatewayEvent>> {
        self.socket.as_mut().and_then(Socket::take_events)
    }

    /// Keeps the online list current; other events belong to the chat context.
    pub fn handle_event(&mut self, event: &GatewayEvent) {
        if let GatewayEvent::GetOnlineUsers(ids) = event {
            self.online_users = ids.clone();
        }
    }

    async fn connect_socket(&mut self) {
        if self.socket.is_some() {
            return;
        }
        let Some(token) = self.api.token() else { return };
        match Socket::connect(self.api.base_url(), token).await {
            Ok(socket) => self.socket = Some(socket),
            // REST still works; live updates resume on the next login
            Err(e) => warn!("Could not open gateway socket: {}", e),
        }
    }
}
