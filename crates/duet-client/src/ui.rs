//! Terminal chat view: parses input lines into actions and renders state.

use std::fmt::Write as _;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use uuid::Uuid;

use duet_types::models::Message;

use crate::auth::AuthContext;
use crate::chat::ChatState;
use crate::error::ClientError;

pub const HELP: &str = "\
commands:
  /users                refresh the sidebar
  /open <n>             open conversation with user n
  /close                leave the open conversation
  /image <path>         send an image file
  /delete <n>           delete your message n in the open conversation
  /clear                delete the whole conversation
  /bio <text>           update your bio
  /delete-account yes   delete your account for good
  /logout               end the session
  /quit                 exit
anything else is sent as a text message";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Users,
    Open(usize),
    Close,
    Image(String),
    Delete(usize),
    Clear,
    Bio(String),
    DeleteAccount,
    Logout,
    Quit,
    Help,
    Text(String),
}

impl Command {
    /// Parse one input line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>, ClientError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Some(Self::Text(line.to_string())));
        };

        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };
        let index = |arg: &str| {
            arg.parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| ClientError::Invalid(format!("/{} needs a number from the list", name)))
        };

        let cmd = match name {
            "users" => Self::Users,
            "open" => Self::Open(index(arg)?),
            "close" => Self::Close,
            "image" if !arg.is_empty() => Self::Image(arg.to_string()),
            "image" => return Err(ClientError::Invalid("/image needs a file path".into())),
            "delete" => Self::Delete(index(arg)?),
            "clear" => Self::Clear,
            "bio" => Self::Bio(arg.to_string()),
            "delete-account" if arg == "yes" => Self::DeleteAccount,
            "delete-account" => {
                return Err(ClientError::Invalid(
                    "this cannot be undone, type /delete-account yes to confirm".into(),
                ));
            }
            "logout" => Self::Logout,
            "quit" | "exit" => Self::Quit,
            "help" => Self::Help,
            other => return Err(ClientError::Invalid(format!("unknown command /{}", other))),
        };
        Ok(Some(cmd))
    }
}

/// Read an image file into a data URL, as the browser's file reader would.
pub async fn image_data_url(path: &Path) -> Result<String, ClientError> {
    let mime = match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => return Err(ClientError::Invalid("select an image file".into())),
    };
    let bytes = tokio::fs::read(path).await?;
    Ok(format!("data:{};base64,{}", mime, B64.encode(bytes)))
}

pub fn render_sidebar(auth: &AuthContext, chat: &ChatState) -> String {
    let mut out = String::from("-- conversations --\n");
    if chat.users().is_empty() {
        out.push_str("  (nobody else here yet)\n");
    }
    for (i, user) in chat.users().iter().enumerate() {
        let online = if auth.is_online(user.id) { "*" } else { " " };
        let unseen = match chat.unseen(user.id) {
            0 => String::new(),
            n => format!(" ({} new)", n),
        };
        let _ = writeln!(out, "{:>3}. {} {}{}", i + 1, online, user.full_name, unseen);
    }
    out
}

pub fn render_message(me: Uuid, index: usize, message: &Message) -> String {
    let who = if message.sender_id == me { "you" } else { "them" };
    let body = match (&message.text, &message.image) {
        (Some(text), _) => text.clone(),
        (None, Some(url)) => format!("[image] {}", url),
        (None, None) => String::new(),
    };
    let seen = if message.sender_id == me && message.seen { " ✓" } else { "" };
    format!(
        "{:>3}. [{}] {}: {}{}",
        index + 1,
        message.created_at.format("%H:%M"),
        who,
        body,
        seen
    )
}

pub fn render_conversation(auth: &AuthContext, chat: &ChatState) -> String {
    let Some(partner) = chat.selected() else {
        return "no conversation open, /open <n> to start\n".into();
    };
    let online = if auth.is_online(partner.id) { " (online)" } else { "" };
    let mut out = format!("-- {}{} --\n", partner.full_name, online);
    for (i, message) in chat.messages().iter().enumerate() {
        out.push_str(&render_message(chat.me(), i, message));
        out.push('\n');
    }
    out
}
