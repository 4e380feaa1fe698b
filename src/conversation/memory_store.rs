use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Result;

use super::{
    conversation_models::{
        Conversation, ConversationActivity, ConversationParticipant, Message, NewConversation,
        NewMessage, NewRating, ParticipantChange, Rating,
    },
    conversation_store::ConversationStore,
};

#[derive(Default)]
struct Tables {
    conversations: HashMap<Uuid, Conversation>,
    participants: HashMap<(Uuid, Uuid), ConversationParticipant>,
    messages: HashMap<Uuid, Message>,
    // Insertion order per conversation; breaks ties between equal timestamps.
    message_log: HashMap<Uuid, Vec<Uuid>>,
    ratings: Vec<Rating>,
}

impl Tables {
    fn conversation(&self, tenant_id: Uuid, conversation_id: Uuid) -> Option<&Conversation> {
        self.conversations
            .get(&conversation_id)
            .filter(|c| c.tenant_id == tenant_id)
    }

    fn messages_in(&self, conversation_id: Uuid) -> Vec<&Message> {
        let mut messages: Vec<&Message> = self
            .message_log
            .get(&conversation_id)
            .map(|ids| ids.iter().filter_map(|id| self.messages.get(id)).collect())
            .unwrap_or_default();
        messages.sort_by_key(|m| m.sent_at);
        messages
    }
}

/// Store backed by id-keyed maps, one lock for all tables so every call is atomic.
#[derive(Default)]
pub struct InMemoryConversationStore {
    tables: RwLock<Tables>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn insert_conversation_with_participants(
        &self,
        conversation: NewConversation,
        participant_ids: &[Uuid],
    ) -> Result<Conversation> {
        let mut tables = self.tables.write().await;

        let created = Conversation {
            id: conversation.id,
            tenant_id: conversation.tenant_id,
            subject: conversation.subject,
            description: conversation.description,
            application_id: conversation.application_id,
            is_active: true,
            created_by: conversation.created_by,
            created_at: conversation.created_at,
            updated_at: conversation.created_at,
            archived_at: None,
            archived_by: None,
        };
        tables.conversations.insert(created.id, created.clone());

        for user_id in participant_ids {
            tables
                .participants
                .entry((created.id, *user_id))
                .or_insert_with(|| ConversationParticipant {
                    conversation_id: created.id,
                    tenant_id: created.tenant_id,
                    user_id: *user_id,
                    joined_at: created.created_at,
                    last_read_at: None,
                    last_seen_at: None,
                    has_left: false,
                    left_at: None,
                });
        }

        Ok(created)
    }

    async fn find_conversation(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Option<Conversation>> {
        let tables = self.tables.read().await;
        Ok(tables.conversation(tenant_id, conversation_id).cloned())
    }

    async fn find_conversations_by_recent_activity(
        &self,
        tenant_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ConversationActivity>, i64)> {
        let tables = self.tables.read().await;

        let mut activity: Vec<ConversationActivity> = tables
            .conversations
            .values()
            .filter(|c| c.tenant_id == tenant_id)
            .map(|c| ConversationActivity {
                conversation: c.clone(),
                last_message_at: tables.messages_in(c.id).last().map(|m| m.sent_at),
            })
            .collect();

        activity.sort_by(|a, b| {
            b.last_activity()
                .cmp(&a.last_activity())
                .then_with(|| a.conversation.id.cmp(&b.conversation.id))
        });

        let total = activity.len() as i64;
        let page = activity
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();

        Ok((page, total))
    }

    async fn archive_conversation(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        archived_by: Uuid,
        archived_at: DateTime<Utc>,
    ) -> Result<Option<Conversation>> {
        let mut tables = self.tables.write().await;

        let Some(conversation) = tables
            .conversations
            .get_mut(&conversation_id)
            .filter(|c| c.tenant_id == tenant_id && c.is_active)
        else {
            return Ok(None);
        };

        conversation.is_active = false;
        conversation.archived_at = Some(archived_at);
        conversation.archived_by = Some(archived_by);
        conversation.updated_at = archived_at;

        Ok(Some(conversation.clone()))
    }

    async fn find_participant(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<ConversationParticipant>> {
        let tables = self.tables.read().await;
        Ok(tables
            .participants
            .get(&(conversation_id, user_id))
            .filter(|p| p.tenant_id == tenant_id)
            .cloned())
    }

    async fn find_participants_by_conversation(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Vec<ConversationParticipant>> {
        let tables = self.tables.read().await;

        let mut participants: Vec<ConversationParticipant> = tables
            .participants
            .values()
            .filter(|p| p.conversation_id == conversation_id && p.tenant_id == tenant_id)
            .cloned()
            .collect();
        participants.sort_by(|a, b| {
            a.joined_at
                .cmp(&b.joined_at)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });

        Ok(participants)
    }

    async fn upsert_participant(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        user_id: Uuid,
        joined_at: DateTime<Utc>,
    ) -> Result<ParticipantChange> {
        let mut guard = self.tables.write().await;
        let tables = &mut *guard;

        match tables.participants.get_mut(&(conversation_id, user_id)) {
            Some(existing) if existing.has_left => {
                existing.has_left = false;
                existing.left_at = None;
                existing.joined_at = joined_at;
                Ok(ParticipantChange::Rejoined)
            }
            Some(_) => Ok(ParticipantChange::Unchanged),
            None => {
                tables.participants.insert(
                    (conversation_id, user_id),
                    ConversationParticipant {
                        conversation_id,
                        tenant_id,
                        user_id,
                        joined_at,
                        last_read_at: None,
                        last_seen_at: None,
                        has_left: false,
                        left_at: None,
                    },
                );
                Ok(ParticipantChange::Added)
            }
        }
    }

    async fn mark_participant_left(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        user_id: Uuid,
        left_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tables = self.tables.write().await;

        match tables
            .participants
            .get_mut(&(conversation_id, user_id))
            .filter(|p| p.tenant_id == tenant_id && !p.has_left)
        {
            Some(participant) => {
                participant.has_left = true;
                participant.left_at = Some(left_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_participant_last_read(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        user_id: Uuid,
        read_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tables = self.tables.write().await;

        match tables
            .participants
            .get_mut(&(conversation_id, user_id))
            .filter(|p| p.tenant_id == tenant_id && !p.has_left)
        {
            Some(participant) => {
                participant.last_read_at = Some(read_at);
                participant.last_seen_at = Some(read_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Option<Message>> {
        let mut tables = self.tables.write().await;

        let accepting = tables
            .conversation(message.tenant_id, message.conversation_id)
            .is_some_and(|c| c.is_active);
        if !accepting {
            return Ok(None);
        }

        let stored = Message {
            id: message.id,
            conversation_id: message.conversation_id,
            tenant_id: message.tenant_id,
            sender_id: message.sender_id,
            content: message.content,
            sent_at: message.sent_at,
            edited_at: None,
            edited_by: None,
            is_deleted: false,
            deleted_at: None,
            deleted_by: None,
        };
        tables.messages.insert(stored.id, stored.clone());
        tables
            .message_log
            .entry(stored.conversation_id)
            .or_default()
            .push(stored.id);

        Ok(Some(stored))
    }

    async fn find_message(&self, tenant_id: Uuid, message_id: Uuid) -> Result<Option<Message>> {
        let tables = self.tables.read().await;
        Ok(tables
            .messages
            .get(&message_id)
            .filter(|m| m.tenant_id == tenant_id)
            .cloned())
    }

    async fn update_message_content(
        &self,
        tenant_id: Uuid,
        message_id: Uuid,
        content: &str,
        edited_by: Uuid,
        edited_at: DateTime<Utc>,
    ) -> Result<Option<Message>> {
        let mut tables = self.tables.write().await;

        Ok(tables
            .messages
            .get_mut(&message_id)
            .filter(|m| m.tenant_id == tenant_id && !m.is_deleted)
            .map(|message| {
                message.content = content.to_string();
                message.edited_by = Some(edited_by);
                message.edited_at = Some(edited_at);
                message.clone()
            }))
    }

    async fn soft_delete_message(
        &self,
        tenant_id: Uuid,
        message_id: Uuid,
        deleted_by: Uuid,
        deleted_at: DateTime<Utc>,
    ) -> Result<Option<Message>> {
        let mut tables = self.tables.write().await;

        Ok(tables
            .messages
            .get_mut(&message_id)
            .filter(|m| m.tenant_id == tenant_id && !m.is_deleted)
            .map(|message| {
                message.is_deleted = true;
                message.deleted_by = Some(deleted_by);
                message.deleted_at = Some(deleted_at);
                message.clone()
            }))
    }

    async fn find_messages_by_conversation_ordered_by_sent_at(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Message>, i64)> {
        let tables = self.tables.read().await;

        if tables.conversation(tenant_id, conversation_id).is_none() {
            return Ok((Vec::new(), 0));
        }

        let ascending = tables.messages_in(conversation_id);
        let total = ascending.len();
        let offset = (offset.max(0) as usize).min(total);
        let limit = limit.max(0) as usize;

        // Window counted from the newest message, kept in ascending order.
        let end = total - offset;
        let start = end.saturating_sub(limit);
        let page = ascending[start..end].iter().map(|m| (*m).clone()).collect();

        Ok((page, total as i64))
    }

    async fn count_unread_messages_by_conversation(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<(Uuid, i64)>> {
        let tables = self.tables.read().await;

        let mut counts: Vec<(Uuid, i64)> = tables
            .participants
            .values()
            .filter(|p| p.user_id == user_id && p.tenant_id == tenant_id && !p.has_left)
            .filter_map(|participant| {
                let unread = tables
                    .messages_in(participant.conversation_id)
                    .into_iter()
                    .filter(|m| m.tenant_id == tenant_id)
                    .filter(|m| m.sender_id != user_id && !m.is_deleted)
                    .filter(|m| participant.last_read_at.map_or(true, |read| m.sent_at > read))
                    .count() as i64;
                (unread > 0).then_some((participant.conversation_id, unread))
            })
            .collect();
        counts.sort_by_key(|(conversation_id, _)| *conversation_id);

        Ok(counts)
    }

    async fn insert_rating(&self, rating: NewRating) -> Result<Rating> {
        let mut tables = self.tables.write().await;

        let stored = Rating {
            id: rating.id,
            conversation_id: rating.conversation_id,
            tenant_id: rating.tenant_id,
            rater_id: rating.rater_id,
            score: rating.score,
            comment: rating.comment,
            created_at: rating.created_at,
        };
        tables.ratings.push(stored.clone());

        Ok(stored)
    }

    async fn find_ratings_by_conversation(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Vec<Rating>> {
        let tables = self.tables.read().await;
        Ok(tables
            .ratings
            .iter()
            .filter(|r| r.conversation_id == conversation_id && r.tenant_id == tenant_id)
            .cloned()
            .collect())
    }
}
