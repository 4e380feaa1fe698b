use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::conversation_models::{
    Conversation, ConversationActivity, ConversationParticipant, Message, Rating,
};

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const DEFAULT_MESSAGE_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateConversationRequest {
    #[validate(length(min = 1, max = 200))]
    pub subject: String,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    pub application_id: Option<Uuid>,
    #[serde(default)]
    pub participant_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct SendMessageRequest {
    #[validate(length(min = 1, max = 4000))]
    pub content: String,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct EditMessageRequest {
    #[validate(length(min = 1, max = 4000))]
    pub content: String,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct AddParticipantsRequest {
    #[validate(length(min = 1, max = 100))]
    pub user_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateRatingRequest {
    #[validate(range(min = 1, max = 5))]
    pub score: i16,
    #[validate(length(max = 2000))]
    pub comment: Option<String>,
}

/// Query string accepted by list endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    #[serde(rename = "pageNumber")]
    pub page_number: Option<u32>,
    #[serde(rename = "pageSize")]
    pub page_size: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
}

impl Pagination {
    pub fn new(page: Option<u32>, page_size: Option<u32>, default_size: u32) -> Self {
        let page = page.filter(|p| *p > 0).unwrap_or(1);
        let page_size = page_size
            .filter(|s| *s > 0)
            .unwrap_or(default_size)
            .min(MAX_PAGE_SIZE);
        Self { page, page_size }
    }

    pub fn conversations(query: &PageQuery) -> Self {
        Self::new(query.page_number, query.page_size, DEFAULT_PAGE_SIZE)
    }

    pub fn messages(query: &PageQuery) -> Self {
        Self::new(query.page_number, query.page_size, DEFAULT_MESSAGE_PAGE_SIZE)
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.page_size)
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.page_size)
    }
}

#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
}

impl<T> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, total: i64, pagination: Pagination) -> Self {
        let total_pages = ((total.max(0) as f64) / f64::from(pagination.page_size)).ceil() as u32;
        Self {
            data,
            total,
            page: pagination.page,
            page_size: pagination.page_size,
            total_pages,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConversationResponse {
    pub id: Uuid,
    pub subject: String,
    pub description: Option<String>,
    pub application_id: Option<Uuid>,
    pub is_active: bool,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
    pub archived_by: Option<Uuid>,
    pub last_message_at: Option<DateTime<Utc>>,
}

impl From<Conversation> for ConversationResponse {
    fn from(conversation: Conversation) -> Self {
        Self {
            id: conversation.id,
            subject: conversation.subject,
            description: conversation.description,
            application_id: conversation.application_id,
            is_active: conversation.is_active,
            created_by: conversation.created_by,
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
            archived_at: conversation.archived_at,
            archived_by: conversation.archived_by,
            last_message_at: None,
        }
    }
}

impl From<ConversationActivity> for ConversationResponse {
    fn from(activity: ConversationActivity) -> Self {
        let last_message_at = activity.last_message_at;
        Self {
            last_message_at,
            ..Self::from(activity.conversation)
        }
    }
}

/// Message view; deleted messages are tombstoned with their content withheld.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: Option<String>,
    pub sent_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub edited_by: Option<Uuid>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl From<Message> for MessageResponse {
    fn from(message: Message) -> Self {
        let content = if message.is_deleted {
            None
        } else {
            Some(message.content)
        };
        Self {
            id: message.id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            content,
            sent_at: message.sent_at,
            edited_at: message.edited_at,
            edited_by: message.edited_by,
            is_deleted: message.is_deleted,
            deleted_at: message.deleted_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ParticipantResponse {
    pub user_id: Uuid,
    pub joined_at: DateTime<Utc>,
    pub last_read_at: Option<DateTime<Utc>>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub has_left: bool,
    pub left_at: Option<DateTime<Utc>>,
}

impl From<ConversationParticipant> for ParticipantResponse {
    fn from(participant: ConversationParticipant) -> Self {
        Self {
            user_id: participant.user_id,
            joined_at: participant.joined_at,
            last_read_at: participant.last_read_at,
            last_seen_at: participant.last_seen_at,
            has_left: participant.has_left,
            left_at: participant.left_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RatingResponse {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub rater_id: Uuid,
    pub score: i16,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Rating> for RatingResponse {
    fn from(rating: Rating) -> Self {
        Self {
            id: rating.id,
            conversation_id: rating.conversation_id,
            rater_id: rating.rater_id,
            score: rating.score,
            comment: rating.comment,
            created_at: rating.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MarkReadResponse {
    pub conversation_id: Uuid,
    pub last_read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConversationUnread {
    pub conversation_id: Uuid,
    pub unread_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UnreadCountResponse {
    pub total: i64,
    pub conversations: Vec<ConversationUnread>,
}

impl UnreadCountResponse {
    pub fn for_conversation(&self, conversation_id: Uuid) -> i64 {
        self.conversations
            .iter()
            .find(|c| c.conversation_id == conversation_id)
            .map(|c| c.unread_count)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_defaults_and_clamp() {
        let query = PageQuery::default();
        assert_eq!(Pagination::conversations(&query), Pagination { page: 1, page_size: 10 });
        assert_eq!(Pagination::messages(&query), Pagination { page: 1, page_size: 20 });

        let oversized = PageQuery {
            page_number: Some(0),
            page_size: Some(10_000),
        };
        let pagination = Pagination::messages(&oversized);
        assert_eq!(pagination.page, 1);
        assert_eq!(pagination.page_size, MAX_PAGE_SIZE);
        assert_eq!(pagination.offset(), 0);

        let third = Pagination::new(Some(3), Some(25), DEFAULT_PAGE_SIZE);
        assert_eq!(third.offset(), 50);
        assert_eq!(third.limit(), 25);
    }

    #[test]
    fn test_page_query_uses_camel_case_names() {
        let query: PageQuery = serde_json::from_str(r#"{"pageNumber":2,"pageSize":5}"#).unwrap();
        assert_eq!(query.page_number, Some(2));
        assert_eq!(query.page_size, Some(5));
    }

    #[test]
    fn test_total_pages() {
        let page = PaginatedResponse::new(vec![1, 2, 3], 21, Pagination::new(None, None, 10));
        assert_eq!(page.total_pages, 3);
        let empty: PaginatedResponse<u8> = PaginatedResponse::new(vec![], 0, Pagination::new(None, None, 10));
        assert_eq!(empty.total_pages, 0);
    }

    #[test]
    fn test_rating_score_range() {
        let ok = CreateRatingRequest { score: 5, comment: None };
        assert!(ok.validate().is_ok());
        let low = CreateRatingRequest { score: 0, comment: None };
        assert!(low.validate().is_err());
        let high = CreateRatingRequest { score: 6, comment: None };
        assert!(high.validate().is_err());
    }
}
