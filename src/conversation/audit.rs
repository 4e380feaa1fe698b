use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    ConversationCreated,
    ConversationArchived,
    ParticipantsAdded,
    ParticipantLeft,
    MessageSent,
    MessageEdited,
    MessageDeleted,
    ConversationRated,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::ConversationCreated => "conversation.created",
            AuditAction::ConversationArchived => "conversation.archived",
            AuditAction::ParticipantsAdded => "conversation.participants_added",
            AuditAction::ParticipantLeft => "conversation.participant_left",
            AuditAction::MessageSent => "message.sent",
            AuditAction::MessageEdited => "message.edited",
            AuditAction::MessageDeleted => "message.deleted",
            AuditAction::ConversationRated => "conversation.rated",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub tenant_id: Uuid,
    pub actor_id: Uuid,
    pub action: AuditAction,
    pub entity_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub details: Value,
}

impl AuditRecord {
    pub fn new(tenant_id: Uuid, actor_id: Uuid, action: AuditAction, entity_id: Uuid) -> Self {
        Self {
            tenant_id,
            actor_id,
            action,
            entity_id,
            occurred_at: Utc::now(),
            details: Value::Null,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// Receives structured records of conversation and message mutations.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: AuditRecord) -> Result<()>;
}

/// Emits audit records as `tracing` events under the `audit` target.
#[derive(Debug, Clone, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, record: AuditRecord) -> Result<()> {
        tracing::info!(
            target: "audit",
            tenant_id = %record.tenant_id,
            actor_id = %record.actor_id,
            action = record.action.as_str(),
            entity_id = %record.entity_id,
            occurred_at = %record.occurred_at.to_rfc3339(),
            details = %record.details,
            "audit record"
        );
        Ok(())
    }
}
