//! Client side of Duet: a REST client, a socket client, and the two contexts
//! (auth and chat) that keep a local mirror of server state in sync.

pub mod api;
pub mod auth;
pub mod chat;
pub mod error;
pub mod socket;
pub mod ui;

/// Transient message for the user, the terminal equivalent of a toast.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Info(String),
    Error(String),
}

impl From<&error::ClientError> for Notice {
    fn from(err: &error::ClientError) -> Self {
        Notice::Error(err.to_string())
    }
}
