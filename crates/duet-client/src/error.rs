use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Socket error: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Bad response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// The server answered `{success: false, message}`
    #[error("{message}")]
    Rejected { status: u16, message: String },

    #[error("Not logged in")]
    NotAuthenticated,

    #[error("No conversation selected")]
    NoConversation,

    #[error("{0}")]
    Invalid(String),
}
