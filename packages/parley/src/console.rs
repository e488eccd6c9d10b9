//! Terminal rendering of inbound traffic and directory listings.

use parley_session::{ChatAction, ChatSink, Conversation, MessagePage, UserId};

/// Prints everything the dispatcher routes to stdout, one line per action.
pub struct ConsoleSink;

impl ChatSink for ConsoleSink {
    fn presence(&self, notice: &str, _action: &ChatAction) {
        println!("{}", presence_line(notice));
    }

    fn broadcast_message(&self, action: &ChatAction) {
        println!("{}", broadcast_line(action));
    }

    fn conversation_message(&self, action: &ChatAction) {
        println!("{}", conversation_line(action));
    }
}

pub fn presence_line(notice: &str) -> String {
    format!("* {notice}")
}

pub fn broadcast_line(action: &ChatAction) -> String {
    format!("[all] {}: {}", action.sender_name, action.content_str())
}

pub fn conversation_line(action: &ChatAction) -> String {
    let stamp = action
        .timestamp
        .as_deref()
        .map(|t| format!("{t} "))
        .unwrap_or_default();
    match &action.conversation_id {
        Some(id) => format!("{stamp}[{id}] {}: {}", action.sender_name, action.content_str()),
        None => format!("{stamp}{}: {}", action.sender_name, action.content_str()),
    }
}

/// One line per conversation: id, counterpart names, unread count.
pub fn conversation_summary(conversation: &Conversation, me: Option<&UserId>) -> String {
    let names: Vec<&str> = match me {
        Some(me) => conversation
            .counterparts(me)
            .map(|u| u.display_name.as_str())
            .collect(),
        None => conversation
            .participants
            .iter()
            .map(|u| u.display_name.as_str())
            .collect(),
    };
    let mut line = format!(
        "{:<12} {}",
        conversation.conversation_id.as_str(),
        names.join(", ")
    );
    if conversation.unread_count > 0 {
        line.push_str(&format!(" ({} unread)", conversation.unread_count));
    }
    line
}

pub fn print_page(page: &MessagePage) {
    for action in &page.messages {
        println!("{}", conversation_line(action));
    }
    let more = if page.has_more() { ", more available" } else { "" };
    println!(
        "-- page {} of {} ({} messages{more}) --",
        page.current_page + 1,
        page.total_pages.max(1),
        page.total_items
    );
}
