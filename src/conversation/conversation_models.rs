use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Conversation {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub subject: String,
    pub description: Option<String>,
    pub application_id: Option<Uuid>,
    pub is_active: bool,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
    pub archived_by: Option<Uuid>,
}

impl Conversation {
    pub fn is_archived(&self) -> bool {
        !self.is_active || self.archived_at.is_some()
    }
}

/// A conversation row together with the time of its latest message.
#[derive(Debug, Clone, FromRow)]
pub struct ConversationActivity {
    #[sqlx(flatten)]
    pub conversation: Conversation,
    pub last_message_at: Option<DateTime<Utc>>,
}

impl ConversationActivity {
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_message_at
            .map(|at| at.max(self.conversation.updated_at))
            .unwrap_or(self.conversation.updated_at)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ConversationParticipant {
    pub conversation_id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub joined_at: DateTime<Utc>,
    pub last_read_at: Option<DateTime<Utc>>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub has_left: bool,
    pub left_at: Option<DateTime<Utc>>,
}

impl ConversationParticipant {
    pub fn is_active(&self) -> bool {
        !self.has_left
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub tenant_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub sent_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub edited_by: Option<Uuid>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Rating {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub tenant_id: Uuid,
    pub rater_id: Uuid,
    pub score: i16,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of adding a user to a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantChange {
    Added,
    Rejoined,
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct NewConversation {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub subject: String,
    pub description: Option<String>,
    pub application_id: Option<Uuid>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub tenant_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewRating {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub tenant_id: Uuid,
    pub rater_id: Uuid,
    pub score: i16,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn conversation(updated_at: DateTime<Utc>) -> Conversation {
        Conversation {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            subject: "Interview Scheduling".to_string(),
            description: None,
            application_id: None,
            is_active: true,
            created_by: Uuid::new_v4(),
            created_at: updated_at,
            updated_at,
            archived_at: None,
            archived_by: None,
        }
    }

    #[test]
    fn test_last_activity_prefers_latest_timestamp() {
        let now = Utc::now();
        let quiet = ConversationActivity {
            conversation: conversation(now),
            last_message_at: None,
        };
        assert_eq!(quiet.last_activity(), now);

        let busy = ConversationActivity {
            conversation: conversation(now),
            last_message_at: Some(now + Duration::minutes(5)),
        };
        assert_eq!(busy.last_activity(), now + Duration::minutes(5));
    }

    #[test]
    fn test_archived_flag() {
        let mut c = conversation(Utc::now());
        assert!(!c.is_archived());
        c.is_active = false;
        assert!(c.is_archived());
    }
}
