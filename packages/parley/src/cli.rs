//! Subcommand handlers and the interactive chat loop.

use std::sync::Arc;

use anyhow::{Context, Result};
use parley_session::{
    BackendGateway, ChatSession, ConversationId, Credentials, GatewayError, QueryError, SendError,
    SessionEvent, SwitchError, UserId,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::console::{self, ConsoleSink};
use crate::gateway::HttpGateway;
use crate::stomp::StompTransport;
use crate::{Settings, config};

/// Which conversation to open when the chat loop starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatTarget {
    None,
    User(UserId),
    Conversation(ConversationId),
}

/// One line typed at the chat prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Empty,
    Chat(String),
    Broadcast(String),
    Switch(ConversationId),
    With(UserId),
    List,
    History(u32),
    Unread,
    Help,
    Quit,
    Unknown(String),
}

pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Chat(line.to_string());
    };

    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };
    match (name, arg) {
        ("quit" | "exit", _) => Input::Quit,
        ("help", _) => Input::Help,
        ("list", _) => Input::List,
        ("unread", _) => Input::Unread,
        ("history", "") => Input::History(0),
        ("history", page) => match page.parse() {
            Ok(page) => Input::History(page),
            Err(_) => Input::Unknown(line.to_string()),
        },
        ("switch", id) if !id.is_empty() => Input::Switch(ConversationId::new(id)),
        ("with", id) if !id.is_empty() => Input::With(UserId::new(id)),
        ("all", text) if !text.is_empty() => Input::Broadcast(text.to_string()),
        _ => Input::Unknown(line.to_string()),
    }
}

const HELP: &str = "\
  <text>             send to the active conversation
  /all <text>        send to everyone
  /switch <id>       make conversation <id> active
  /with <userId>     open (or create) the conversation with a user
  /list              list your conversations
  /history [page]    show history of the active conversation
  /unread            total unread messages
  /quit              leave";

fn http_gateway(settings: &Settings) -> Result<Arc<HttpGateway>> {
    let server = config::ServerConfig::from_file(&settings.file.server);
    Ok(Arc::new(
        HttpGateway::new(&server).context("Failed to build HTTP client")?,
    ))
}

fn report(err: impl std::fmt::Display) {
    eprintln!("[parley: {err}]");
}

/// `parley chat`: connect, optionally open a conversation, then read lines
/// until `/quit`, EOF or Ctrl-C.
pub async fn chat_command(settings: &Settings, target: ChatTarget) -> Result<()> {
    let server = config::ServerConfig::from_file(&settings.file.server);
    let stomp = config::StompConfig::from_file(&settings.file.stomp);
    let transport = Arc::new(StompTransport::new(server.ws_url.clone(), stomp));
    let session = ChatSession::new(
        transport,
        http_gateway(settings)?,
        Arc::new(ConsoleSink),
        config::session_config(&settings.file.session),
    );

    let mut events = session.events();
    let me = match session.connect(settings.credentials.clone()).await {
        Ok(me) => me,
        Err(e) => {
            // An identity failure leaves the channel open.
            session.disconnect().await;
            return Err(e).context("Failed to connect");
        }
    };
    println!("connected as {} ({})", me.display_name, me.id);

    if let Err(e) = session.directory().load_conversations().await {
        warn!(error = %e, "could not load conversations");
    }
    match target {
        ChatTarget::None => println!("no active conversation; /list, /switch <id> or /with <userId>"),
        ChatTarget::User(user) => open_with(&session, &user).await,
        ChatTarget::Conversation(id) => switch(&session, id).await,
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                debug!("interrupted");
                break;
            }
            event = events.recv() => {
                if ends_chat(&event) {
                    report("connection closed");
                    break;
                }
                continue;
            }
            line = lines.next_line() => line.context("Failed to read stdin")?,
        };
        let Some(line) = line else {
            break;
        };
        if !handle_input(&session, parse_input(&line)).await {
            break;
        }
    }

    session.disconnect().await;
    Ok(())
}

/// Whether a lifecycle event means the chat loop has nothing left to drive.
fn ends_chat(event: &Result<SessionEvent, RecvError>) -> bool {
    match event {
        Ok(SessionEvent::Disconnected) | Err(RecvError::Closed) => true,
        Ok(_) | Err(RecvError::Lagged(_)) => false,
    }
}

/// Returns false when the loop should end.
async fn handle_input(session: &ChatSession, input: Input) -> bool {
    match input {
        Input::Empty => {}
        Input::Quit => return false,
        Input::Help => println!("{HELP}"),
        Input::Chat(text) => match session.send_chat(&text).await {
            Ok(_) => {}
            Err(SendError::NoActiveConversation) => {
                report("no active conversation; use /switch <id> or /with <userId>")
            }
            Err(e) => report(e),
        },
        Input::Broadcast(text) => {
            if let Err(e) = session.send_broadcast(&text).await {
                report(e);
            }
        }
        Input::Switch(id) => switch(session, id).await,
        Input::With(user) => open_with(session, &user).await,
        Input::List => match session.directory().load_conversations().await {
            Ok(conversations) => {
                let me = session.status().identity.map(|u| u.id);
                for conversation in &conversations {
                    println!("{}", console::conversation_summary(conversation, me.as_ref()));
                }
            }
            Err(e) => report(e),
        },
        Input::History(page) => match session.active_conversation() {
            Some(id) => match session.directory().load_messages(&id, page, None).await {
                Ok(page) => console::print_page(&page),
                Err(e) => report(e),
            },
            None => report("no active conversation"),
        },
        Input::Unread => match session.directory().unread_total().await {
            Ok(count) => println!("{count} unread"),
            Err(e) => report(e),
        },
        Input::Unknown(line) => report(format!("unknown command {line:?}; /help lists commands")),
    }
    true
}

async fn switch(session: &ChatSession, id: ConversationId) {
    match session.switch_to(id).await {
        Ok(active) => println!("now chatting in {}", active.conversation_id),
        Err(SwitchError::Superseded) => {}
        Err(e) => report(e),
    }
}

async fn open_with(session: &ChatSession, user: &UserId) {
    let conversation = match session.directory().open_conversation_with(user).await {
        Ok(conversation) => conversation,
        Err(e) => return report(e),
    };
    match session.select(conversation).await {
        Ok(active) => println!("now chatting in {}", active.conversation_id),
        Err(SwitchError::Superseded) => {}
        Err(e) => report(e),
    }
}

fn unavailable_hint(err: GatewayError, settings: &Settings) -> anyhow::Error {
    match err {
        GatewayError::Unavailable => anyhow::anyhow!(
            "backend unavailable at {}",
            settings.file.server.api_url
        ),
        other => QueryError::Gateway(other).into(),
    }
}

/// `parley conversations`
pub async fn conversations_command(settings: &Settings) -> Result<()> {
    let gateway = http_gateway(settings)?;
    let creds: &Credentials = &settings.credentials;
    let me = gateway
        .current_user(creds)
        .await
        .map_err(|e| unavailable_hint(e, settings))?;
    let conversations = gateway
        .conversations(creds)
        .await
        .map_err(|e| unavailable_hint(e, settings))?;
    if conversations.is_empty() {
        println!("no conversations");
    }
    for conversation in &conversations {
        println!("{}", console::conversation_summary(conversation, Some(&me.id)));
    }
    Ok(())
}

/// `parley history <conversation>`
pub async fn history_command(
    settings: &Settings,
    conversation: ConversationId,
    page: u32,
    size: Option<u32>,
) -> Result<()> {
    let gateway = http_gateway(settings)?;
    let size = size.unwrap_or(settings.file.session.page_size).max(1);
    let page = gateway
        .messages(&settings.credentials, &conversation, page, size)
        .await
        .map_err(|e| unavailable_hint(e, settings))?;
    console::print_page(&page);
    Ok(())
}

/// `parley unread`
pub async fn unread_command(settings: &Settings) -> Result<()> {
    let gateway = http_gateway(settings)?;
    let count = gateway
        .unread_count(&settings.credentials)
        .await
        .map_err(|e| unavailable_hint(e, settings))?;
    println!("{count} unread");
    Ok(())
}
