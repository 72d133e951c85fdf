//! Terminal front end for Duet.
//!
//! Usage: `duet-chat login <email> <password>` or
//! `duet-chat signup <email> <password> <full name...>`.
//! With `DUET_TOKEN` set, the stored session is reused instead.

use std::path::Path;

use anyhow::{Context, bail};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::debug;

use duet_client::Notice;
use duet_client::api::ApiClient;
use duet_client::auth::{AuthContext, Credentials};
use duet_client::chat::{ChatContext, Ticket};
use duet_client::error::ClientError;
use duet_client::ui::{self, Command};
use duet_types::api::{LoginRequest, SendMessageRequest, SignupRequest, UpdateProfileRequest};
use duet_types::models::Message;

type FetchResult = (Ticket, Result<Vec<Message>, ClientError>);

fn show(notice: Notice) {
    match notice {
        Notice::Info(msg) => println!("» {}", msg),
        Notice::Error(msg) => println!("! {}", msg),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let server = std::env::var("DUET_SERVER_URL").unwrap_or_else(|_| "http://localhost:5000".into());
    let mut auth = AuthContext::new(ApiClient::new(server));

    let args: Vec<String> = std::env::args().skip(1).collect();
    match (args.first().map(String::as_str), std::env::var("DUET_TOKEN")) {
        (None, Ok(token)) => {
            auth.check(token).await.context("stored session is no longer valid")?;
        }
        (Some("login"), _) if args.len() == 3 => {
            let greeting = auth
                .login(Credentials::Login(LoginRequest {
                    email: args[1].clone(),
                    password: args[2].clone(),
                }))
                .await?;
            show(Notice::Info(greeting));
        }
        (Some("signup"), _) if args.len() >= 4 => {
            let greeting = auth
                .login(Credentials::Signup(SignupRequest {
                    email: args[1].clone(),
                    password: args[2].clone(),
                    full_name: args[3..].join(" "),
                    bio: String::new(),
                }))
                .await?;
            show(Notice::Info(greeting));
        }
        _ => bail!("usage: duet-chat login <email> <password> | signup <email> <password> <full name>"),
    }

    let me = auth.user().context("no user after login")?.clone();
    debug!("signed in as {}", me.id);
    println!("signed in as {}, /help for commands", me.full_name);

    let mut chat = ChatContext::new(auth.api().clone(), me.id, auth.socket_sender());
    let mut events = auth.take_events();
    let (fetch_tx, mut fetch_rx) = mpsc::unbounded_channel::<FetchResult>();

    if let Err(e) = chat.get_users().await {
        show(Notice::from(&e));
    }
    print!("{}", ui::render_sidebar(&auth, chat.state()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let cmd = match Command::parse(&line) {
                    Ok(Some(cmd)) => cmd,
                    Ok(None) => continue,
                    Err(e) => {
                        show(Notice::from(&e));
                        continue;
                    }
                };
                match run_command(cmd, &mut auth, &mut chat, &fetch_tx).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => show(Notice::from(&e)),
                }
            }
            Some(event) = recv_event(&mut events) => {
                auth.handle_event(&event);
                if let Err(e) = chat.handle_event(&event).await {
                    show(Notice::from(&e));
                }
                print!("{}", ui::render_conversation(&auth, chat.state()));
            }
            Some((ticket, result)) = fetch_rx.recv() => {
                match chat.finish_fetch(ticket, result) {
                    Ok(true) => print!("{}", ui::render_conversation(&auth, chat.state())),
                    Ok(false) => {}
                    Err(e) => show(Notice::from(&e)),
                }
            }
        }
    }

    auth.logout();
    Ok(())
}

/// Pending forever once the socket is gone, so the select loop keeps serving stdin.
async fn recv_event(
    events: &mut Option<mpsc::UnboundedReceiver<duet_types::events::GatewayEvent>>,
) -> Option<duet_types::events::GatewayEvent> {
    match events {
        Some(rx) => match rx.recv().await {
            Some(event) => Some(event),
            None => {
                *events = None;
                std::future::pending().await
            }
        },
        None => std::future::pending().await,
    }
}

/// Returns Ok(false) when the session should end.
async fn run_command(
    cmd: Command,
    auth: &mut AuthContext,
    chat: &mut ChatContext,
    fetch_tx: &mpsc::UnboundedSender<FetchResult>,
) -> Result<bool, ClientError> {
    match cmd {
        Command::Help => println!("{}", ui::HELP),
        Command::Users => {
            chat.get_users().await?;
            print!("{}", ui::render_sidebar(auth, chat.state()));
        }
        Command::Open(n) => {
            let partner = chat
                .state()
                .users()
                .get(n - 1)
                .map(|u| u.id)
                .ok_or_else(|| ClientError::Invalid(format!("no user {}", n)))?;
            if let Some(fetch) = chat.select_user(Some(partner)) {
                let tx = fetch_tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(fetch.await);
                });
            }
        }
        Command::Close => {
            let _ = chat.select_user(None);
            print!("{}", ui::render_sidebar(auth, chat.state()));
        }
        Command::Text(text) => {
            chat.send_message(SendMessageRequest { text: Some(text), image: None }).await?;
            print!("{}", ui::render_conversation(auth, chat.state()));
        }
        Command::Image(path) => {
            let image = ui::image_data_url(Path::new(&path)).await?;
            chat.send_message(SendMessageRequest { text: None, image: Some(image) }).await?;
            print!("{}", ui::render_conversation(auth, chat.state()));
        }
        Command::Delete(n) => {
            let message = chat
                .state()
                .messages()
                .get(n - 1)
                .cloned()
                .ok_or_else(|| ClientError::Invalid(format!("no message {}", n)))?;
            if message.sender_id != chat.state().me() {
                return Err(ClientError::Invalid("you can only delete your own messages".into()));
            }
            chat.delete_message_by_id(message.id).await?;
            print!("{}", ui::render_conversation(auth, chat.state()));
        }
        Command::Clear => {
            chat.delete_all_messages().await?;
            show(Notice::Info("conversation cleared".into()));
        }
        Command::Bio(bio) => {
            let user = auth
                .update_profile(&UpdateProfileRequest { bio: Some(bio), ..Default::default() })
                .await?;
            show(Notice::Info(format!("profile updated: {}", user.bio)));
        }
        Command::DeleteAccount => {
            let message = auth.delete_account().await?;
            show(Notice::Info(message));
            return Ok(false);
        }
        Command::Logout => {
            auth.logout();
            show(Notice::Info("Logged out successfully".into()));
            return Ok(false);
        }
        Command::Quit => return Ok(false),
    }
    Ok(true)
}
