use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, Result};

use super::{
    audit::{AuditAction, AuditRecord, AuditSink},
    conversation_dto::{
        ConversationResponse, ConversationUnread, CreateConversationRequest, CreateRatingRequest,
        EditMessageRequest, MessageResponse, PaginatedResponse, Pagination, ParticipantResponse,
        RatingResponse, SendMessageRequest, UnreadCountResponse,
    },
    conversation_models::{
        Conversation, ConversationParticipant, Message, NewConversation, NewMessage, NewRating,
        ParticipantChange,
    },
    conversation_store::ConversationStore,
    eligibility::{EligibilityChecker, SendAttempt},
};

/// Authoritative conversation and message operations, shared by the HTTP
/// API and the real-time hub.
#[derive(Clone)]
pub struct ConversationService {
    store: Arc<dyn ConversationStore>,
    eligibility: Arc<dyn EligibilityChecker>,
    audit: Arc<dyn AuditSink>,
}

impl ConversationService {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        eligibility: Arc<dyn EligibilityChecker>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store,
            eligibility,
            audit,
        }
    }

    pub async fn create_conversation(
        &self,
        tenant_id: Uuid,
        payload: CreateConversationRequest,
        creator_id: Uuid,
    ) -> Result<ConversationResponse> {
        payload.validate()?;

        let subject = payload.subject.trim();
        if subject.is_empty() {
            return Err(AppError::Validation("Subject is required".to_string()));
        }
        let description = payload
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);

        let mut participant_ids = vec![creator_id];
        for user_id in payload.participant_ids {
            if !participant_ids.contains(&user_id) {
                participant_ids.push(user_id);
            }
        }

        let conversation = self
            .store
            .insert_conversation_with_participants(
                NewConversation {
                    id: Uuid::new_v4(),
                    tenant_id,
                    subject: subject.to_string(),
                    description,
                    application_id: payload.application_id,
                    created_by: creator_id,
                    created_at: Utc::now(),
                },
                &participant_ids,
            )
            .await?;

        tracing::info!(
            "Conversation {} created by {} with {} participants",
            conversation.id,
            creator_id,
            participant_ids.len()
        );

        self.audit(
            AuditRecord::new(tenant_id, creator_id, AuditAction::ConversationCreated, conversation.id)
                .with_details(json!({
                    "subject": conversation.subject,
                    "application_id": conversation.application_id,
                    "participant_ids": participant_ids,
                })),
        )
        .await;

        Ok(ConversationResponse::from(conversation))
    }

    /// Returns `None` for unknown ids and for conversations of other tenants.
    pub async fn get_conversation(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Option<ConversationResponse>> {
        Ok(self
            .store
            .find_conversation(tenant_id, conversation_id)
            .await?
            .map(ConversationResponse::from))
    }

    pub async fn list_conversations(
        &self,
        tenant_id: Uuid,
        pagination: Pagination,
    ) -> Result<PaginatedResponse<ConversationResponse>> {
        let (conversations, total) = self
            .store
            .find_conversations_by_recent_activity(
                tenant_id,
                pagination.limit(),
                pagination.offset(),
            )
            .await?;

        let data = conversations
            .into_iter()
            .map(ConversationResponse::from)
            .collect();

        Ok(PaginatedResponse::new(data, total, pagination))
    }

    pub async fn send_message(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        payload: SendMessageRequest,
        sender_id: Uuid,
    ) -> Result<MessageResponse> {
        let content = validated_content(payload.content, |content| SendMessageRequest { content })?;

        let conversation = self.load_conversation(tenant_id, conversation_id).await?;
        if conversation.is_archived() {
            return Err(AppError::Conflict("Conversation is archived".to_string()));
        }

        let participant = self
            .store
            .find_participant(tenant_id, conversation_id, sender_id)
            .await?;

        let attempt = SendAttempt {
            tenant_id,
            conversation: &conversation,
            participant: participant.as_ref(),
            sender_id,
        };
        if let Err(e) = self.eligibility.check_send(&attempt).await {
            tracing::warn!(
                "Message from {} to conversation {} rejected: {}",
                sender_id,
                conversation_id,
                e
            );
            return Err(e);
        }

        let inserted = self
            .store
            .insert_message(NewMessage {
                id: Uuid::new_v4(),
                conversation_id,
                tenant_id,
                sender_id,
                content,
                sent_at: Utc::now(),
            })
            .await;

        let message = match inserted {
            Ok(Some(message)) => message,
            Ok(None) => {
                self.eligibility.release_send(tenant_id, sender_id);
                return Err(AppError::Conflict("Conversation is archived".to_string()));
            }
            Err(e) => {
                self.eligibility.release_send(tenant_id, sender_id);
                return Err(e);
            }
        };

        tracing::debug!("Message {} stored in conversation {}", message.id, conversation_id);

        self.audit(AuditRecord::new(
            tenant_id,
            sender_id,
            AuditAction::MessageSent,
            message.id,
        )
        .with_details(json!({ "conversation_id": conversation_id })))
        .await;

        Ok(MessageResponse::from(message))
    }

    pub async fn edit_message(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        message_id: Uuid,
        payload: EditMessageRequest,
        editor_id: Uuid,
    ) -> Result<MessageResponse> {
        let content = validated_content(payload.content, |content| EditMessageRequest { content })?;

        let message = self
            .load_message(tenant_id, conversation_id, message_id)
            .await?;
        if message.sender_id != editor_id {
            return Err(AppError::Forbidden(
                "Only the sender can edit this message".to_string(),
            ));
        }
        if message.is_deleted {
            return Err(AppError::Conflict("Message has been deleted".to_string()));
        }

        let edited = self
            .store
            .update_message_content(tenant_id, message_id, &content, editor_id, Utc::now())
            .await?
            .ok_or_else(|| AppError::Conflict("Message has been deleted".to_string()))?;

        self.audit(AuditRecord::new(
            tenant_id,
            editor_id,
            AuditAction::MessageEdited,
            message_id,
        )
        .with_details(json!({ "conversation_id": conversation_id })))
        .await;

        Ok(MessageResponse::from(edited))
    }

    /// Soft delete. Deleting an already deleted message returns its tombstone.
    pub async fn delete_message(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        message_id: Uuid,
        deleter_id: Uuid,
    ) -> Result<MessageResponse> {
        let message = self
            .load_message(tenant_id, conversation_id, message_id)
            .await?;
        if message.sender_id != deleter_id {
            return Err(AppError::Forbidden(
                "Only the sender can delete this message".to_string(),
            ));
        }
        if message.is_deleted {
            return Ok(MessageResponse::from(message));
        }

        let deleted = match self
            .store
            .soft_delete_message(tenant_id, message_id, deleter_id, Utc::now())
            .await?
        {
            Some(deleted) => deleted,
            None => self.load_message(tenant_id, conversation_id, message_id).await?,
        };

        self.audit(AuditRecord::new(
            tenant_id,
            deleter_id,
            AuditAction::MessageDeleted,
            message_id,
        )
        .with_details(json!({ "conversation_id": conversation_id })))
        .await;

        Ok(MessageResponse::from(deleted))
    }

    /// Pages are counted from the newest message; each page is in ascending
    /// `sent_at` order. Deleted messages appear as tombstones.
    pub async fn list_messages(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        pagination: Pagination,
    ) -> Result<PaginatedResponse<MessageResponse>> {
        self.load_conversation(tenant_id, conversation_id).await?;

        let (messages, total) = self
            .store
            .find_messages_by_conversation_ordered_by_sent_at(
                tenant_id,
                conversation_id,
                pagination.limit(),
                pagination.offset(),
            )
            .await?;

        let data = messages.into_iter().map(MessageResponse::from).collect();
        Ok(PaginatedResponse::new(data, total, pagination))
    }

    pub async fn add_participants(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        user_ids: Vec<Uuid>,
        acting_user_id: Uuid,
    ) -> Result<Vec<ParticipantResponse>> {
        if user_ids.is_empty() {
            return Err(AppError::Validation(
                "At least one user id is required".to_string(),
            ));
        }

        self.load_conversation(tenant_id, conversation_id).await?;
        self.require_active_participant(tenant_id, conversation_id, acting_user_id)
            .await?;

        let now = Utc::now();
        let mut added = Vec::new();
        let mut rejoined = Vec::new();
        for user_id in user_ids {
            if added.contains(&user_id) || rejoined.contains(&user_id) {
                continue;
            }
            match self
                .store
                .upsert_participant(tenant_id, conversation_id, user_id, now)
                .await?
            {
                ParticipantChange::Added => added.push(user_id),
                ParticipantChange::Rejoined => rejoined.push(user_id),
                ParticipantChange::Unchanged => {}
            }
        }

        if !added.is_empty() || !rejoined.is_empty() {
            self.audit(
                AuditRecord::new(
                    tenant_id,
                    acting_user_id,
                    AuditAction::ParticipantsAdded,
                    conversation_id,
                )
                .with_details(json!({ "added": added, "rejoined": rejoined })),
            )
            .await;
        }

        self.get_participants(tenant_id, conversation_id).await
    }

    pub async fn get_participants(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Vec<ParticipantResponse>> {
        self.load_conversation(tenant_id, conversation_id).await?;

        Ok(self
            .store
            .find_participants_by_conversation(tenant_id, conversation_id)
            .await?
            .into_iter()
            .map(ParticipantResponse::from)
            .collect())
    }

    /// The participant leaves the conversation; they can be re-added later.
    pub async fn leave_conversation(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<()> {
        self.load_conversation(tenant_id, conversation_id).await?;

        let left = self
            .store
            .mark_participant_left(tenant_id, conversation_id, user_id, Utc::now())
            .await?;
        if !left {
            return Err(not_a_participant());
        }

        self.audit(AuditRecord::new(
            tenant_id,
            user_id,
            AuditAction::ParticipantLeft,
            conversation_id,
        ))
        .await;

        Ok(())
    }

    pub async fn archive_conversation(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        acting_user_id: Uuid,
    ) -> Result<ConversationResponse> {
        let conversation = self.load_conversation(tenant_id, conversation_id).await?;
        if conversation.is_archived() {
            return Err(AppError::Conflict(
                "Conversation is already archived".to_string(),
            ));
        }
        self.require_active_participant(tenant_id, conversation_id, acting_user_id)
            .await?;

        let archived = self
            .store
            .archive_conversation(tenant_id, conversation_id, acting_user_id, Utc::now())
            .await?
            .ok_or_else(|| AppError::Conflict("Conversation is already archived".to_string()))?;

        tracing::info!("Conversation {} archived by {}", conversation_id, acting_user_id);

        self.audit(AuditRecord::new(
            tenant_id,
            acting_user_id,
            AuditAction::ConversationArchived,
            conversation_id,
        ))
        .await;

        Ok(ConversationResponse::from(archived))
    }

    pub async fn mark_conversation_as_read(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<DateTime<Utc>> {
        self.load_conversation(tenant_id, conversation_id).await?;

        let read_at = Utc::now();
        let updated = self
            .store
            .update_participant_last_read(tenant_id, conversation_id, user_id, read_at)
            .await?;
        if !updated {
            return Err(not_a_participant());
        }

        Ok(read_at)
    }

    pub async fn get_unread_count(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<UnreadCountResponse> {
        let counts = self
            .store
            .count_unread_messages_by_conversation(tenant_id, user_id)
            .await?;

        let total = counts.iter().map(|(_, count)| count).sum();
        let conversations = counts
            .into_iter()
            .map(|(conversation_id, unread_count)| ConversationUnread {
                conversation_id,
                unread_count,
            })
            .collect();

        Ok(UnreadCountResponse {
            total,
            conversations,
        })
    }

    pub async fn rate_conversation(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        payload: CreateRatingRequest,
        rater_id: Uuid,
    ) -> Result<RatingResponse> {
        payload.validate()?;

        self.load_conversation(tenant_id, conversation_id).await?;
        if self
            .store
            .find_participant(tenant_id, conversation_id, rater_id)
            .await?
            .is_none()
        {
            return Err(not_a_participant());
        }

        let comment = payload
            .comment
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);

        let rating = self
            .store
            .insert_rating(NewRating {
                id: Uuid::new_v4(),
                conversation_id,
                tenant_id,
                rater_id,
                score: payload.score,
                comment,
                created_at: Utc::now(),
            })
            .await?;

        self.audit(
            AuditRecord::new(tenant_id, rater_id, AuditAction::ConversationRated, conversation_id)
                .with_details(json!({ "rating_id": rating.id, "score": rating.score })),
        )
        .await;

        Ok(RatingResponse::from(rating))
    }

    pub async fn list_ratings(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Vec<RatingResponse>> {
        self.load_conversation(tenant_id, conversation_id).await?;

        Ok(self
            .store
            .find_ratings_by_conversation(tenant_id, conversation_id)
            .await?
            .into_iter()
            .map(RatingResponse::from)
            .collect())
    }

    async fn load_conversation(&self, tenant_id: Uuid, conversation_id: Uuid) -> Result<Conversation> {
        self.store
            .find_conversation(tenant_id, conversation_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Conversation not found".to_string()))
    }

    async fn load_message(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        message_id: Uuid,
    ) -> Result<Message> {
        self.store
            .find_message(tenant_id, message_id)
            .await?
            .filter(|m| m.conversation_id == conversation_id)
            .ok_or_else(|| AppError::NotFound("Message not found".to_string()))
    }

    async fn require_active_participant(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<ConversationParticipant> {
        self.store
            .find_participant(tenant_id, conversation_id, user_id)
            .await?
            .filter(ConversationParticipant::is_active)
            .ok_or_else(not_a_participant)
    }

    async fn audit(&self, record: AuditRecord) {
        let action = record.action;
        if let Err(e) = self.audit.record(record).await {
            tracing::warn!("Failed to write audit record {}: {}", action.as_str(), e);
        }
    }
}

fn not_a_participant() -> AppError {
    AppError::Forbidden("You are not a participant in this conversation".to_string())
}

/// Trims message content and applies the request's validation rules.
fn validated_content<T, F>(raw: String, build: F) -> Result<String>
where
    T: Validate,
    F: FnOnce(String) -> T,
{
    let content = raw.trim().to_string();
    if content.is_empty() {
        return Err(AppError::Validation(
            "Message content cannot be empty".to_string(),
        ));
    }
    build(content.clone()).validate()?;
    Ok(content)
}
