use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{conversation::conversation_dto::MessageResponse, error::AppError};

// Server-to-client events
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    UserJoined(MembershipPayload),
    UserLeft(MembershipPayload),
    MessageReceived(MessageResponse),
    MessageEdited(MessageResponse),
    MessageDeleted(MessageResponse),
    UserTyping(MembershipPayload),
    UserStoppedTyping(MembershipPayload),
    ConversationRead(ReadReceiptPayload),
    Error(ErrorPayload),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MembershipPayload {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReadReceiptPayload {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

impl ServerEvent {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorPayload {
            code: code.to_string(),
            message: message.into(),
        })
    }

    /// Caller-facing error event; internal failures are reported generically.
    pub fn from_app_error(err: &AppError, fallback: &str) -> Self {
        if err.is_client_error() {
            Self::error(err.code(), err.to_string())
        } else {
            Self::error(err.code(), fallback)
        }
    }
}

// Client-to-server messages
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    JoinConversation { conversation_id: Uuid },
    LeaveConversation { conversation_id: Uuid },
    SendMessage { conversation_id: Uuid, content: String },
    UserTyping { conversation_id: Uuid },
    UserStoppedTyping { conversation_id: Uuid },
    MarkRead { conversation_id: Uuid },
}
