use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;

use super::conversation_models::{
    Conversation, ConversationActivity, ConversationParticipant, Message, NewConversation,
    NewMessage, NewRating, ParticipantChange, Rating,
};

/// Persistence gateway for conversations, participants, messages and ratings.
///
/// Every lookup is tenant-scoped. Implementations are responsible for
/// serializing conflicting writes; callers treat each call as independent.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Inserts the conversation and one participant row per id in a single transaction.
    async fn insert_conversation_with_participants(
        &self,
        conversation: NewConversation,
        participant_ids: &[Uuid],
    ) -> Result<Conversation>;

    async fn find_conversation(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Option<Conversation>>;

    /// Page of conversations ordered by latest message time (falling back to
    /// `updated_at`), newest first, plus the tenant's total.
    async fn find_conversations_by_recent_activity(
        &self,
        tenant_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ConversationActivity>, i64)>;

    async fn archive_conversation(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        archived_by: Uuid,
        archived_at: DateTime<Utc>,
    ) -> Result<Option<Conversation>>;

    async fn find_participant(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<ConversationParticipant>>;

    async fn find_participants_by_conversation(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Vec<ConversationParticipant>>;

    /// Adds the user, clears `has_left` for a departed participant, or does nothing.
    async fn upsert_participant(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        user_id: Uuid,
        joined_at: DateTime<Utc>,
    ) -> Result<ParticipantChange>;

    async fn mark_participant_left(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        user_id: Uuid,
        left_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Sets both `last_read_at` and `last_seen_at`. Returns false when the
    /// user is not an active participant.
    async fn update_participant_last_read(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        user_id: Uuid,
        read_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Stores the message only while its conversation is active; `None` otherwise.
    async fn insert_message(&self, message: NewMessage) -> Result<Option<Message>>;

    async fn find_message(&self, tenant_id: Uuid, message_id: Uuid) -> Result<Option<Message>>;

    async fn update_message_content(
        &self,
        tenant_id: Uuid,
        message_id: Uuid,
        content: &str,
        edited_by: Uuid,
        edited_at: DateTime<Utc>,
    ) -> Result<Option<Message>>;

    async fn soft_delete_message(
        &self,
        tenant_id: Uuid,
        message_id: Uuid,
        deleted_by: Uuid,
        deleted_at: DateTime<Utc>,
    ) -> Result<Option<Message>>;

    /// The `offset`/`limit` window counted from the newest message, returned
    /// in ascending `sent_at` order, plus the conversation's total.
    async fn find_messages_by_conversation_ordered_by_sent_at(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Message>, i64)>;

    /// Unread (not own, not deleted, after `last_read_at`) message counts per
    /// conversation the user is an active participant of. Zero counts are omitted.
    async fn count_unread_messages_by_conversation(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<(Uuid, i64)>>;

    async fn insert_rating(&self, rating: NewRating) -> Result<Rating>;

    async fn find_ratings_by_conversation(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Vec<Rating>>;
}
