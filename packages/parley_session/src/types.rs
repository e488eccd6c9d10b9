//! Wire and domain types shared by every component of the session.
//!
//! `ChatAction` is the flat payload carried on every topic. The backend this
//! client talks to uses numeric ids, so identifiers accept either JSON numbers
//! or strings and are normalized to strings.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Name of the single public broadcast topic.
pub const PUBLIC_TOPIC: &str = "public.broadcast";

/// Prefix of every private conversation topic.
pub const CONVERSATION_TOPIC_PREFIX: &str = "conversation.";

// --- Identifiers ---

/// Accepts `"42"` or `42` on the wire.
fn id_from_wire<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Signed(i64),
        Unsigned(u64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Signed(n) => n.to_string(),
        Raw::Unsigned(n) => n.to_string(),
    })
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                id_from_wire(deserializer).map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Backend identifier of a user.
    UserId
);

string_id!(
    /// Backend identifier of a 1:1 conversation (also names its private topic).
    ConversationId
);

// --- Users and conversations ---

/// The authenticated user, or a conversation participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    #[serde(
        rename = "fullName",
        alias = "displayName",
        alias = "senderName",
        default,
        deserialize_with = "null_as_empty"
    )]
    pub display_name: String,
}

impl User {
    pub fn new(id: impl Into<UserId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn null_as_zero<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    Ok(Option::<u64>::deserialize(deserializer)?.unwrap_or(0))
}

/// A conversation as listed by the backend. Owned by the UI layer; the core
/// only reads the id and the participant set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub conversation_id: ConversationId,
    #[serde(default)]
    pub participants: Vec<User>,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub unread_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
}

impl Conversation {
    pub fn new(conversation_id: impl Into<ConversationId>, participants: Vec<User>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            participants,
            unread_count: 0,
            last_message: None,
        }
    }

    /// Participants other than `me`.
    pub fn counterparts<'a>(&'a self, me: &'a UserId) -> impl Iterator<Item = &'a User> + 'a {
        self.participants.iter().filter(move |p| &p.id != me)
    }
}

// --- Wire payload ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    Join,
    Leave,
    #[default]
    Chat,
}

/// Persisted messages come back with `type` missing or null; those are chat.
fn null_as_chat<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ActionKind, D::Error> {
    Ok(Option::<ActionKind>::deserialize(deserializer)?.unwrap_or_default())
}

impl ActionKind {
    pub fn is_presence(self) -> bool {
        matches!(self, Self::Join | Self::Leave)
    }
}

/// The flat payload published on every topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatAction {
    #[serde(rename = "type", default, deserialize_with = "null_as_chat")]
    pub kind: ActionKind,
    pub sender_id: UserId,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub sender_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,

    // Server-assigned fields on persisted messages; carried through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_read: Option<bool>,
}

impl ChatAction {
    fn from_sender(kind: ActionKind, sender: &User) -> Self {
        Self {
            kind,
            sender_id: sender.id.clone(),
            sender_name: sender.display_name.clone(),
            content: None,
            receiver_id: None,
            conversation_id: None,
            id: None,
            receiver_name: None,
            timestamp: None,
            is_read: None,
        }
    }

    pub fn join(sender: &User) -> Self {
        Self {
            content: Some(format!("{} joined the chat", sender.display_name)),
            ..Self::from_sender(ActionKind::Join, sender)
        }
    }

    pub fn leave(sender: &User) -> Self {
        Self::from_sender(ActionKind::Leave, sender)
    }

    /// Chat on the public topic: no receiver, no conversation.
    pub fn broadcast(sender: &User, content: &str) -> Self {
        Self {
            content: Some(content.to_string()),
            ..Self::from_sender(ActionKind::Chat, sender)
        }
    }

    pub fn chat(
        sender: &User,
        receiver: &UserId,
        conversation: &ConversationId,
        content: &str,
    ) -> Self {
        Self {
            content: Some(content.to_string()),
            receiver_id: Some(receiver.clone()),
            conversation_id: Some(conversation.clone()),
            ..Self::from_sender(ActionKind::Chat, sender)
        }
    }

    pub fn content_str(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}

/// One page of conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    #[serde(default)]
    pub messages: Vec<ChatAction>,
    #[serde(default)]
    pub current_page: u32,
    #[serde(default)]
    pub total_items: u64,
    #[serde(default)]
    pub total_pages: u32,
}

impl MessagePage {
    pub fn has_more(&self) -> bool {
        self.current_page.saturating_add(1) < self.total_pages
    }
}

// --- Topics ---

/// A named publish/subscribe channel on the transport.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic(String);

impl Topic {
    pub fn public() -> Self {
        Self(PUBLIC_TOPIC.to_string())
    }

    pub fn conversation(id: &ConversationId) -> Self {
        Self(format!("{CONVERSATION_TOPIC_PREFIX}{id}"))
    }

    /// A topic by its raw name, as a transport reports it.
    pub fn from_wire(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn is_public(&self) -> bool {
        self.0 == PUBLIC_TOPIC
    }

    /// The conversation this topic belongs to, if it is a private topic.
    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.0
            .strip_prefix(CONVERSATION_TOPIC_PREFIX)
            .filter(|id| !id.is_empty())
            .map(ConversationId::from)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Topic({})", self.0)
    }
}

/// Capability for one live subscription, issued by a transport.
///
/// Deliberately not `Clone`: whoever subscribed owns the handle and gives it
/// back through `Transport::unsubscribe`.
#[derive(Debug, PartialEq, Eq)]
pub struct TopicHandle {
    id: u64,
    topic: Topic,
}

impl TopicHandle {
    pub fn new(id: u64, topic: Topic) -> Self {
        Self { id, topic }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }
}

// --- Credentials ---

/// Bearer credential attached to the transport connect and every gateway call.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    token: String,
}

impl Credentials {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Value for an `Authorization` header.
    pub fn authorization(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credentials(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_accept_numbers_and_strings() {
        let a: UserId = serde_json::from_str("42").unwrap();
        let b: UserId = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(a, b);
        assert_eq!(serde_json::to_string(&a).unwrap(), "\"42\"");
    }

    #[test]
    fn user_reads_full_name() {
        let user: User =
            serde_json::from_str(r#"{"id":7,"username":"al","fullName":"Alice","email":"a@x"}"#)
                .unwrap();
        assert_eq!(user, User::new("7", "Alice"));
    }

    #[test]
    fn conversation_tolerates_null_unread_count() {
        let conv: Conversation = serde_json::from_str(
            r#"{"id":1,"conversationId":"c1","participants":[{"id":1,"fullName":"A"}],"unreadCount":null}"#,
        )
        .unwrap();
        assert_eq!(conv.unread_count, 0);
        assert_eq!(conv.participants.len(), 1);
    }

    #[test]
    fn chat_action_serializes_flat() {
        let alice = User::new("u1", "Alice");
        let action = ChatAction::chat(&alice, &"u2".into(), &"c42".into(), "hi");
        let json: serde_json::Value = serde_json::to_value(&action).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "CHAT",
                "senderId": "u1",
                "senderName": "Alice",
                "content": "hi",
                "receiverId": "u2",
                "conversationId": "c42",
            })
        );
    }

    #[test]
    fn join_announces_display_name() {
        let action = ChatAction::join(&User::new("u1", "Alice"));
        assert_eq!(action.kind, ActionKind::Join);
        assert_eq!(action.content_str(), "Alice joined the chat");
        assert!(action.receiver_id.is_none());
    }

    #[test]
    fn persisted_message_fields_survive() {
        let action: ChatAction = serde_json::from_str(
            r#"{"id":9,"senderId":2,"senderName":"Bob","receiverId":1,"receiverName":"Alice",
                "content":"yo","timestamp":"2024-05-01T10:00:00","isRead":false,
                "conversationId":"c42","type":"CHAT","extra":"ignored"}"#,
        )
        .unwrap();
        assert_eq!(action.receiver_id, Some(UserId::new("1")));
        assert_eq!(action.is_read, Some(false));
        assert_eq!(action.timestamp.as_deref(), Some("2024-05-01T10:00:00"));
    }

    #[test]
    fn untyped_persisted_messages_are_chat() {
        let null_type: ChatAction = serde_json::from_str(
            r#"{"id":9,"senderId":2,"senderName":"Bob","receiverId":1,"receiverName":"Alice",
                "content":"yo","timestamp":"2024-05-01T10:00:00","isRead":false,
                "conversationId":"10","type":null}"#,
        )
        .unwrap();
        assert_eq!(null_type.kind, ActionKind::Chat);

        let missing: ChatAction =
            serde_json::from_str(r#"{"senderId":2,"senderName":"Bob","content":"yo"}"#).unwrap();
        assert_eq!(missing.kind, ActionKind::Chat);

        assert!(
            serde_json::from_str::<ChatAction>(
                r#"{"type":"TYPING","senderId":2,"senderName":"Bob"}"#
            )
            .is_err()
        );
    }

    #[test]
    fn null_names_decode_as_empty() {
        let conv: Conversation = serde_json::from_str(
            r#"{"conversationId":"1_2","participants":[{"id":1,"fullName":"Alice"},{"id":2,"fullName":null}]}"#,
        )
        .unwrap();
        assert_eq!(conv.participants[1], User::new("2", ""));

        let action: ChatAction =
            serde_json::from_str(r#"{"senderId":2,"senderName":null,"content":"yo"}"#).unwrap();
        assert_eq!(action.sender_name, "");
    }

    #[test]
    fn topic_names() {
        let id = ConversationId::new("c42");
        let topic = Topic::conversation(&id);
        assert_eq!(topic.as_str(), "conversation.c42");
        assert_eq!(topic.conversation_id(), Some(id));
        assert!(Topic::public().is_public());
        assert_eq!(Topic::public().conversation_id(), None);
    }

    #[test]
    fn counterparts_exclude_self() {
        let me = UserId::new("u1");
        let conv = Conversation::new(
            "c1",
            vec![User::new("u1", "Alice"), User::new("u2", "Bob")],
        );
        let others: Vec<_> = conv.counterparts(&me).map(|u| u.id.as_str()).collect();
        assert_eq!(others, vec!["u2"]);
    }

    #[test]
    fn message_page_has_more() {
        let page = MessagePage {
            messages: vec![],
            current_page: 0,
            total_items: 45,
            total_pages: 3,
        };
        assert!(page.has_more());
        let last = MessagePage {
            current_page: 2,
            ..page
        };
        assert!(!last.has_more());

        let runaway = MessagePage {
            current_page: u32::MAX,
            total_pages: u32::MAX,
            ..last
        };
        assert!(!runaway.has_more());
    }

    #[test]
    fn credentials_debug_is_redacted() {
        let creds = Credentials::bearer("tok1");
        assert_eq!(format!("{creds:?}"), "Credentials(<redacted>)");
        assert_eq!(creds.authorization(), "Bearer tok1");
    }
}
