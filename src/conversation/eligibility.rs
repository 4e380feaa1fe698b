use async_trait::async_trait;
use dashmap::DashMap;
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{AppError, Result};

use super::conversation_models::{Conversation, ConversationParticipant};

/// Everything the policy needs to decide whether a send may proceed.
pub struct SendAttempt<'a> {
    pub tenant_id: Uuid,
    pub conversation: &'a Conversation,
    pub participant: Option<&'a ConversationParticipant>,
    pub sender_id: Uuid,
}

/// Decides whether a user may post into a conversation.
///
/// Rejections must be `AppError::Forbidden` or `AppError::RateLimited`.
#[async_trait]
pub trait EligibilityChecker: Send + Sync {
    async fn check_send(&self, attempt: &SendAttempt<'_>) -> Result<()>;

    /// Called when an approved send was not stored, so it does not count.
    fn release_send(&self, _tenant_id: Uuid, _sender_id: Uuid) {}
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window message counter keyed by (tenant, user).
#[derive(Clone)]
pub struct SendRateLimiter {
    windows: Arc<DashMap<(Uuid, Uuid), Window>>,
    max_messages: u32,
    window: Duration,
}

impl SendRateLimiter {
    pub fn new(max_messages: u32, window: Duration) -> Self {
        Self {
            windows: Arc::new(DashMap::new()),
            max_messages,
            window,
        }
    }

    /// Counts one message. On rejection returns how long until the window resets.
    pub fn try_acquire(&self, tenant_id: Uuid, user_id: Uuid) -> std::result::Result<(), Duration> {
        let now = Instant::now();
        let mut entry = self
            .windows
            .entry((tenant_id, user_id))
            .or_insert(Window { started: now, count: 0 });

        if now.duration_since(entry.started) >= self.window {
            *entry = Window { started: now, count: 0 };
        }

        if entry.count >= self.max_messages {
            return Err(self.window.saturating_sub(now.duration_since(entry.started)));
        }

        entry.count += 1;
        Ok(())
    }

    /// Gives back one message counted in the current window.
    pub fn release(&self, tenant_id: Uuid, user_id: Uuid) {
        if let Some(mut entry) = self.windows.get_mut(&(tenant_id, user_id)) {
            entry.count = entry.count.saturating_sub(1);
        }
    }

    /// Drops windows that have fully elapsed. Returns how many were removed.
    pub fn prune_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows
            .retain(|_, w| now.duration_since(w.started) < self.window);
        before.saturating_sub(self.windows.len())
    }

    pub fn tracked_senders(&self) -> usize {
        self.windows.len()
    }
}

/// Default policy: active participants only, throttled by [`SendRateLimiter`].
#[derive(Clone)]
pub struct ParticipantEligibility {
    limiter: SendRateLimiter,
}

impl ParticipantEligibility {
    pub fn new(limiter: SendRateLimiter) -> Self {
        Self { limiter }
    }
}

#[async_trait]
impl EligibilityChecker for ParticipantEligibility {
    async fn check_send(&self, attempt: &SendAttempt<'_>) -> Result<()> {
        match attempt.participant {
            Some(p) if p.is_active() && p.conversation_id == attempt.conversation.id => {}
            _ => {
                return Err(AppError::Forbidden(
                    "You are not a participant in this conversation".to_string(),
                ))
            }
        }

        self.limiter
            .try_acquire(attempt.tenant_id, attempt.sender_id)
            .map_err(|retry_after| {
                AppError::RateLimited(format!(
                    "You are sending messages too quickly; try again in {}s",
                    retry_after.as_secs().max(1)
                ))
            })
    }

    fn release_send(&self, tenant_id: Uuid, sender_id: Uuid) {
        self.limiter.release(tenant_id, sender_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test(start_paused = true)]
    async fn test_window_resets_after_elapsed() {
        let limiter = SendRateLimiter::new(2, Duration::from_secs(60));
        let tenant = Uuid::new_v4();
        let user = Uuid::new_v4();

        assert!(limiter.try_acquire(tenant, user).is_ok());
        assert!(limiter.try_acquire(tenant, user).is_ok());
        let retry = limiter.try_acquire(tenant, user).unwrap_err();
        assert!(retry <= Duration::from_secs(60));

        // Other senders have their own window
        assert!(limiter.try_acquire(tenant, Uuid::new_v4()).is_ok());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(limiter.try_acquire(tenant, user).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_returns_a_slot() {
        let limiter = SendRateLimiter::new(1, Duration::from_secs(60));
        let tenant = Uuid::new_v4();
        let user = Uuid::new_v4();

        limiter.try_acquire(tenant, user).unwrap();
        assert!(limiter.try_acquire(tenant, user).is_err());

        limiter.release(tenant, user);
        assert!(limiter.try_acquire(tenant, user).is_ok());

        // Releasing an unknown sender is a no-op
        limiter.release(tenant, Uuid::new_v4());
        assert_eq!(limiter.tracked_senders(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_expired() {
        let limiter = SendRateLimiter::new(5, Duration::from_secs(10));
        limiter.try_acquire(Uuid::new_v4(), Uuid::new_v4()).unwrap();
        limiter.try_acquire(Uuid::new_v4(), Uuid::new_v4()).unwrap();
        assert_eq!(limiter.prune_expired(), 0);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(limiter.prune_expired(), 2);
        assert_eq!(limiter.tracked_senders(), 0);
    }

    #[tokio::test]
    async fn test_non_participant_is_forbidden() {
        let checker = ParticipantEligibility::new(SendRateLimiter::new(10, Duration::from_secs(60)));
        let tenant_id = Uuid::new_v4();
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            tenant_id,
            subject: "Front desk".to_string(),
            description: None,
            application_id: None,
            is_active: true,
            created_by: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            archived_at: None,
            archived_by: None,
        };
        let departed = ConversationParticipant {
            conversation_id: conversation.id,
            tenant_id,
            user_id: Uuid::new_v4(),
            joined_at: now,
            last_read_at: None,
            last_seen_at: None,
            has_left: true,
            left_at: Some(now),
        };

        let outsider = SendAttempt {
            tenant_id,
            conversation: &conversation,
            participant: None,
            sender_id: Uuid::new_v4(),
        };
        assert!(matches!(
            checker.check_send(&outsider).await,
            Err(AppError::Forbidden(_))
        ));

        let left = SendAttempt {
            tenant_id,
            conversation: &conversation,
            participant: Some(&departed),
            sender_id: departed.user_id,
        };
        assert!(matches!(checker.check_send(&left).await, Err(AppError::Forbidden(_))));
    }
}
