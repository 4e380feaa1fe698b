// Declare submodules
pub mod audit;
pub mod conversation_dto;
pub mod conversation_handlers;
pub mod conversation_models;
pub mod conversation_repository;
pub mod conversation_service;
pub mod conversation_store;
pub mod eligibility;
pub mod memory_store;
pub mod rate_limit_sweeper;

// Re-export public items
pub use audit::TracingAuditSink;
pub use conversation_repository::PgConversationStore;
pub use conversation_service::ConversationService;
pub use conversation_store::ConversationStore;
pub use eligibility::{ParticipantEligibility, SendRateLimiter};
pub use memory_store::InMemoryConversationStore;
pub use rate_limit_sweeper::start_rate_limit_sweeper;

#[cfg(test)]
pub(crate) mod test_support {
    use async_trait::async_trait;
    use std::{sync::Arc, time::Duration};
    use uuid::Uuid;

    use super::{
        audit::{AuditAction, AuditRecord, AuditSink},
        conversation_dto::CreateConversationRequest,
        ConversationService, InMemoryConversationStore, ParticipantEligibility, SendRateLimiter,
    };
    use crate::error::Result;

    /// Keeps every audit record for later inspection.
    #[derive(Default)]
    pub struct RecordingAuditSink {
        records: std::sync::Mutex<Vec<AuditRecord>>,
    }

    impl RecordingAuditSink {
        pub fn actions(&self) -> Vec<AuditAction> {
            self.records
                .lock()
                .map(|records| records.iter().map(|r| r.action).collect())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl AuditSink for RecordingAuditSink {
        async fn record(&self, record: AuditRecord) -> Result<()> {
            if let Ok(mut records) = self.records.lock() {
                records.push(record);
            }
            Ok(())
        }
    }

    pub struct TestContext {
        pub tenant_id: Uuid,
        pub service: ConversationService,
        pub audit: Arc<RecordingAuditSink>,
        pub limiter: SendRateLimiter,
    }

    impl TestContext {
        pub fn new() -> Self {
            Self::with_rate_limit(1_000)
        }

        pub fn with_rate_limit(max_messages: u32) -> Self {
            let limiter = SendRateLimiter::new(max_messages, Duration::from_secs(60));
            let audit = Arc::new(RecordingAuditSink::default());
            let service = ConversationService::new(
                Arc::new(InMemoryConversationStore::new()),
                Arc::new(ParticipantEligibility::new(limiter.clone())),
                audit.clone(),
            );
            Self {
                tenant_id: Uuid::new_v4(),
                service,
                audit,
                limiter,
            }
        }

        /// Creates a conversation owned by `creator` with the given members.
        pub async fn conversation_with(&self, creator: Uuid, others: &[Uuid]) -> Uuid {
            self.service
                .create_conversation(
                    self.tenant_id,
                    CreateConversationRequest {
                        subject: "Line cook interview".to_string(),
                        description: None,
                        application_id: Some(Uuid::new_v4()),
                        participant_ids: others.to_vec(),
                    },
                    creator,
                )
                .await
                .expect("conversation is created")
                .id
        }
    }
}
