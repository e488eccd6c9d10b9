//! Error taxonomy for the session core.
//!
//! User-initiated operations (`connect`, `switch_to`, `send_chat`, directory
//! queries) return these as explicit results. Background work (read receipts,
//! LEAVE on disconnect, teardown unsubscribes) only logs them.

use crate::types::Topic;

/// Failure reported by a Transport Channel implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport unreachable: {0}")]
    Unreachable(String),

    #[error("connection rejected: {0}")]
    Rejected(String),

    #[error("transport is not connected")]
    NotConnected,

    #[error("transport connection closed")]
    Closed,

    #[error("transport protocol error: {0}")]
    Protocol(String),
}

/// Failure reported by a Backend Gateway implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("backend is unavailable")]
    Unavailable,

    #[error("credential rejected by backend")]
    Unauthorized,

    #[error("backend returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("malformed backend response: {0}")]
    Decode(String),

    #[error("{0}")]
    Other(String),
}

/// Why `connect` did not reach `Ready`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    /// The transport could not be opened. The session is `Disconnected`.
    #[error("connection failed: {reason}")]
    Connection { reason: String },

    /// Connected, but the current user could not be fetched. The session
    /// stays `Connected` and no JOIN was published.
    #[error("identity unavailable: {reason}")]
    IdentityUnavailable { reason: String },
}

impl ConnectError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::Connection { .. } => "connection_error",
            Self::IdentityUnavailable { .. } => "identity_unavailable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SwitchError {
    #[error("session is not ready")]
    NotReady,

    #[error("subscribe rejected: {0}")]
    Subscription(TransportError),

    /// A later `switch_to` was issued before this one committed.
    #[error("switch superseded by a later request")]
    Superseded,
}

impl SwitchError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::NotReady => "not_ready",
            Self::Subscription(_) => "subscription_error",
            Self::Superseded => "superseded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("session is not ready")]
    NotReady,

    #[error("no active conversation")]
    NoActiveConversation,

    #[error("message is empty")]
    EmptyContent,

    #[error("conversation must have exactly one counterpart, found {counterparts}")]
    AmbiguousReceiver { counterparts: usize },

    #[error("publish failed: {0}")]
    Publish(TransportError),
}

impl SendError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::NotReady => "not_ready",
            Self::NoActiveConversation => "no_active_conversation",
            Self::EmptyContent => "empty_content",
            Self::AmbiguousReceiver { .. } => "ambiguous_receiver",
            Self::Publish(_) => "publish_error",
        }
    }
}

/// Failure of a request/response call made on behalf of the UI.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("no session credentials; connect first")]
    NotConnected,

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// An inbound frame that did not parse as a `ChatAction`. Logged and dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed frame on {topic}: {reason}")]
pub struct MalformedFrame {
    pub topic: Topic,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_error_display() {
        let err = ConnectError::Connection {
            reason: "refused".into(),
        };
        assert_eq!(err.to_string(), "connection failed: refused");
        assert_eq!(err.error_code(), "connection_error");
    }

    #[test]
    fn send_error_codes_are_distinct() {
        let codes = [
            SendError::NotReady.error_code(),
            SendError::NoActiveConversation.error_code(),
            SendError::EmptyContent.error_code(),
            SendError::AmbiguousReceiver { counterparts: 2 }.error_code(),
            SendError::Publish(TransportError::Closed).error_code(),
        ];
        let unique: std::collections::HashSet<_> = codes.iter().collect();
        assert_eq!(unique.len(), codes.len());
    }

    #[test]
    fn query_error_is_transparent_over_gateway() {
        let err: QueryError = GatewayError::Unauthorized.into();
        assert_eq!(err.to_string(), "credential rejected by backend");
    }

    #[test]
    fn malformed_frame_names_topic() {
        let err = MalformedFrame {
            topic: Topic::public(),
            reason: "missing field `type`".into(),
        };
        assert_eq!(
            err.to_string(),
            "malformed frame on public.broadcast: missing field `type`"
        );
    }
}
