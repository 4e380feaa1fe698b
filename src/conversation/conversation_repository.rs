use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;

use super::{
    conversation_models::{
        Conversation, ConversationActivity, ConversationParticipant, Message, NewConversation,
        NewMessage, NewRating, ParticipantChange, Rating,
    },
    conversation_store::ConversationStore,
};

#[derive(Clone)]
pub struct PgConversationStore {
    pool: PgPool,
}

impl PgConversationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationStore for PgConversationStore {
    async fn insert_conversation_with_participants(
        &self,
        conversation: NewConversation,
        participant_ids: &[Uuid],
    ) -> Result<Conversation> {
        let mut tx = self.pool.begin().await?;

        let created = sqlx::query_as::<_, Conversation>(
            "INSERT INTO conversations
                (id, tenant_id, subject, description, application_id, created_by, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
             RETURNING *",
        )
        .bind(conversation.id)
        .bind(conversation.tenant_id)
        .bind(&conversation.subject)
        .bind(&conversation.description)
        .bind(conversation.application_id)
        .bind(conversation.created_by)
        .bind(conversation.created_at)
        .fetch_one(&mut *tx)
        .await?;

        for user_id in participant_ids {
            sqlx::query(
                "INSERT INTO conversation_participants (conversation_id, tenant_id, user_id, joined_at)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (conversation_id, user_id) DO NOTHING",
            )
            .bind(created.id)
            .bind(created.tenant_id)
            .bind(user_id)
            .bind(conversation.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn find_conversation(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Option<Conversation>> {
        let conversation = sqlx::query_as::<_, Conversation>(
            "SELECT * FROM conversations WHERE id = $1 AND tenant_id = $2",
        )
        .bind(conversation_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(conversation)
    }

    async fn find_conversations_by_recent_activity(
        &self,
        tenant_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ConversationActivity>, i64)> {
        let conversations = sqlx::query_as::<_, ConversationActivity>(
            "SELECT c.*, lm.last_message_at
             FROM conversations c
             LEFT JOIN LATERAL (
                SELECT MAX(m.sent_at) AS last_message_at
                FROM messages m
                WHERE m.conversation_id = c.id
             ) lm ON true
             WHERE c.tenant_id = $1
             ORDER BY GREATEST(COALESCE(lm.last_message_at, c.updated_at), c.updated_at) DESC, c.id
             LIMIT $2 OFFSET $3",
        )
        .bind(tenant_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conversations WHERE tenant_id = $1")
            .bind(tenant_id)
            .fetch_one(&self.pool)
            .await?;

        Ok((conversations, total))
    }

    async fn archive_conversation(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        archived_by: Uuid,
        archived_at: DateTime<Utc>,
    ) -> Result<Option<Conversation>> {
        let conversation = sqlx::query_as::<_, Conversation>(
            "UPDATE conversations
             SET is_active = false, archived_at = $1, archived_by = $2, updated_at = $1
             WHERE id = $3 AND tenant_id = $4 AND is_active = true
             RETURNING *",
        )
        .bind(archived_at)
        .bind(archived_by)
        .bind(conversation_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(conversation)
    }

    async fn find_participant(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<ConversationParticipant>> {
        let participant = sqlx::query_as::<_, ConversationParticipant>(
            "SELECT * FROM conversation_participants
             WHERE conversation_id = $1 AND user_id = $2 AND tenant_id = $3",
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(participant)
    }

    async fn find_participants_by_conversation(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Vec<ConversationParticipant>> {
        let participants = sqlx::query_as::<_, ConversationParticipant>(
            "SELECT * FROM conversation_participants
             WHERE conversation_id = $1 AND tenant_id = $2
             ORDER BY joined_at, user_id",
        )
        .bind(conversation_id)
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(participants)
    }

    async fn upsert_participant(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        user_id: Uuid,
        joined_at: DateTime<Utc>,
    ) -> Result<ParticipantChange> {
        let inserted = sqlx::query(
            "INSERT INTO conversation_participants (conversation_id, tenant_id, user_id, joined_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (conversation_id, user_id) DO NOTHING",
        )
        .bind(conversation_id)
        .bind(tenant_id)
        .bind(user_id)
        .bind(joined_at)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() > 0 {
            return Ok(ParticipantChange::Added);
        }

        let rejoined = sqlx::query(
            "UPDATE conversation_participants
             SET has_left = false, left_at = NULL, joined_at = $1
             WHERE conversation_id = $2 AND user_id = $3 AND tenant_id = $4 AND has_left = true",
        )
        .bind(joined_at)
        .bind(conversation_id)
        .bind(user_id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;

        if rejoined.rows_affected() > 0 {
            Ok(ParticipantChange::Rejoined)
        } else {
            Ok(ParticipantChange::Unchanged)
        }
    }

    async fn mark_participant_left(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        user_id: Uuid,
        left_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE conversation_participants
             SET has_left = true, left_at = $1
             WHERE conversation_id = $2 AND user_id = $3 AND tenant_id = $4 AND has_left = false",
        )
        .bind(left_at)
        .bind(conversation_id)
        .bind(user_id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_participant_last_read(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        user_id: Uuid,
        read_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE conversation_participants
             SET last_read_at = $1, last_seen_at = $1
             WHERE conversation_id = $2 AND user_id = $3 AND tenant_id = $4 AND has_left = false",
        )
        .bind(read_at)
        .bind(conversation_id)
        .bind(user_id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Option<Message>> {
        let message = sqlx::query_as::<_, Message>(
            "INSERT INTO messages (id, conversation_id, tenant_id, sender_id, content, sent_at)
             SELECT $1, c.id, c.tenant_id, $4, $5, $6
             FROM conversations c
             WHERE c.id = $2 AND c.tenant_id = $3 AND c.is_active = true
             RETURNING *",
        )
        .bind(message.id)
        .bind(message.conversation_id)
        .bind(message.tenant_id)
        .bind(message.sender_id)
        .bind(&message.content)
        .bind(message.sent_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(message)
    }

    async fn find_message(&self, tenant_id: Uuid, message_id: Uuid) -> Result<Option<Message>> {
        let message = sqlx::query_as::<_, Message>(
            "SELECT * FROM messages WHERE id = $1 AND tenant_id = $2",
        )
        .bind(message_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(message)
    }

    async fn update_message_content(
        &self,
        tenant_id: Uuid,
        message_id: Uuid,
        content: &str,
        edited_by: Uuid,
        edited_at: DateTime<Utc>,
    ) -> Result<Option<Message>> {
        let message = sqlx::query_as::<_, Message>(
            "UPDATE messages
             SET content = $1, edited_by = $2, edited_at = $3
             WHERE id = $4 AND tenant_id = $5 AND is_deleted = false
             RETURNING *",
        )
        .bind(content)
        .bind(edited_by)
        .bind(edited_at)
        .bind(message_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(message)
    }

    async fn soft_delete_message(
        &self,
        tenant_id: Uuid,
        message_id: Uuid,
        deleted_by: Uuid,
        deleted_at: DateTime<Utc>,
    ) -> Result<Option<Message>> {
        let message = sqlx::query_as::<_, Message>(
            "UPDATE messages
             SET is_deleted = true, deleted_by = $1, deleted_at = $2
             WHERE id = $3 AND tenant_id = $4 AND is_deleted = false
             RETURNING *",
        )
        .bind(deleted_by)
        .bind(deleted_at)
        .bind(message_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(message)
    }

    async fn find_messages_by_conversation_ordered_by_sent_at(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Message>, i64)> {
        let messages = sqlx::query_as::<_, Message>(
            "SELECT * FROM (
                SELECT * FROM messages
                WHERE conversation_id = $1 AND tenant_id = $2
                ORDER BY sent_at DESC, id DESC
                LIMIT $3 OFFSET $4
             ) page
             ORDER BY sent_at ASC, id ASC",
        )
        .bind(conversation_id)
        .bind(tenant_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = $1 AND tenant_id = $2",
        )
        .bind(conversation_id)
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await?;

        Ok((messages, total))
    }

    async fn count_unread_messages_by_conversation(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<(Uuid, i64)>> {
        let counts = sqlx::query_as::<_, (Uuid, i64)>(
            "SELECT m.conversation_id, COUNT(*) AS unread_count
             FROM messages m
             JOIN conversation_participants p
               ON p.conversation_id = m.conversation_id AND p.user_id = $2
             WHERE m.tenant_id = $1
               AND p.tenant_id = $1
               AND p.has_left = false
               AND m.sender_id <> $2
               AND m.is_deleted = false
               AND (p.last_read_at IS NULL OR m.sent_at > p.last_read_at)
             GROUP BY m.conversation_id
             ORDER BY m.conversation_id",
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(counts)
    }

    async fn insert_rating(&self, rating: NewRating) -> Result<Rating> {
        let rating = sqlx::query_as::<_, Rating>(
            "INSERT INTO conversation_ratings
                (id, conversation_id, tenant_id, rater_id, score, comment, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING *",
        )
        .bind(rating.id)
        .bind(rating.conversation_id)
        .bind(rating.tenant_id)
        .bind(rating.rater_id)
        .bind(rating.score)
        .bind(&rating.comment)
        .bind(rating.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(rating)
    }

    async fn find_ratings_by_conversation(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Vec<Rating>> {
        let ratings = sqlx::query_as::<_, Rating>(
            "SELECT * FROM conversation_ratings
             WHERE conversation_id = $1 AND tenant_id = $2
             ORDER BY created_at",
        )
        .bind(conversation_id)
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ratings)
    }
}
