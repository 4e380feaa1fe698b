use uuid::Uuid;

use crate::{
    conversation::{conversation_dto::SendMessageRequest, ConversationService},
    error::{AppError, Result},
};

use super::{
    connection::{ConnectionId, ConnectionManager, EventSender, GroupKey},
    types::{ClientMessage, MembershipPayload, ReadReceiptPayload, ServerEvent},
};

/// One authenticated WebSocket connection. Identity comes from the token
/// presented at upgrade time, never from client frames.
#[derive(Clone)]
pub struct HubConnection {
    pub id: ConnectionId,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    sender: EventSender,
}

impl HubConnection {
    fn group(&self, conversation_id: Uuid) -> GroupKey {
        GroupKey::new(self.tenant_id, conversation_id)
    }

    /// Caller-only delivery.
    pub fn send(&self, event: ServerEvent) {
        let _ = self.sender.send(event);
    }
}

/// Real-time fan-out of conversation activity, backed by the messaging service.
#[derive(Clone)]
pub struct ChatHub {
    connections: ConnectionManager,
    service: ConversationService,
}

impl ChatHub {
    pub fn new(service: ConversationService) -> Self {
        Self {
            connections: ConnectionManager::new(),
            service,
        }
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    pub fn connect(&self, tenant_id: Uuid, user_id: Uuid, sender: EventSender) -> HubConnection {
        let connection = HubConnection {
            id: Uuid::new_v4(),
            tenant_id,
            user_id,
            sender,
        };
        tracing::info!(
            "User {} connected via WebSocket (connection {})",
            user_id,
            connection.id
        );
        connection
    }

    /// Dispatches one client frame. Failures are reported to the caller only.
    pub async fn handle(&self, connection: &HubConnection, message: ClientMessage) {
        let (result, fallback) = match message {
            ClientMessage::JoinConversation { conversation_id } => (
                self.join_conversation(connection, conversation_id).await,
                "Failed to join conversation",
            ),
            ClientMessage::LeaveConversation { conversation_id } => {
                self.leave_conversation(connection, conversation_id);
                (Ok(()), "")
            }
            ClientMessage::SendMessage {
                conversation_id,
                content,
            } => (
                self.send_message(connection, conversation_id, content).await,
                "Failed to send message",
            ),
            ClientMessage::UserTyping { conversation_id } => {
                self.typing(connection, conversation_id, true);
                (Ok(()), "")
            }
            ClientMessage::UserStoppedTyping { conversation_id } => {
                self.typing(connection, conversation_id, false);
                (Ok(()), "")
            }
            ClientMessage::MarkRead { conversation_id } => (
                self.mark_read(connection, conversation_id).await,
                "Failed to mark conversation as read",
            ),
        };

        if let Err(e) = result {
            if e.is_client_error() {
                tracing::warn!(
                    "Hub request from user {} (connection {}) rejected: {}",
                    connection.user_id,
                    connection.id,
                    e
                );
            } else {
                tracing::error!(
                    "Hub request from user {} (connection {}) failed: {:?}",
                    connection.user_id,
                    connection.id,
                    e
                );
            }
            connection.send(ServerEvent::from_app_error(&e, fallback));
        }
    }

    /// Marks the conversation read for the caller, then subscribes the
    /// connection. Only a connection new to the group is announced, and never
    /// to the joining user's own connections.
    pub async fn join_conversation(
        &self,
        connection: &HubConnection,
        conversation_id: Uuid,
    ) -> Result<()> {
        self.service
            .mark_conversation_as_read(connection.tenant_id, conversation_id, connection.user_id)
            .await?;

        let key = connection.group(conversation_id);
        let added = self.connections.join(
            key,
            connection.id,
            connection.user_id,
            connection.sender.clone(),
        );
        if !added {
            return Ok(());
        }
        tracing::debug!("Connection {} joined group {}", connection.id, key);

        self.connections.send_to_group_except_user(
            &key,
            connection.user_id,
            ServerEvent::UserJoined(MembershipPayload {
                conversation_id,
                user_id: connection.user_id,
            }),
        );
        Ok(())
    }

    pub fn leave_conversation(&self, connection: &HubConnection, conversation_id: Uuid) {
        let key = connection.group(conversation_id);
        if !self.connections.leave(key, connection.id) {
            return;
        }
        tracing::debug!("Connection {} left group {}", connection.id, key);

        self.connections.send_to_group(
            &key,
            ServerEvent::UserLeft(MembershipPayload {
                conversation_id,
                user_id: connection.user_id,
            }),
        );
    }

    /// Persists the message and broadcasts it to every member, the sender's
    /// connections included. Both steps run in a detached task so a dropped
    /// connection cannot cancel them halfway.
    pub async fn send_message(
        &self,
        connection: &HubConnection,
        conversation_id: Uuid,
        content: String,
    ) -> Result<()> {
        let service = self.service.clone();
        let connections = self.connections.clone();
        let tenant_id = connection.tenant_id;
        let sender_id = connection.user_id;

        let handle = tokio::spawn(async move {
            let message = service
                .send_message(
                    tenant_id,
                    conversation_id,
                    SendMessageRequest { content },
                    sender_id,
                )
                .await?;

            let key = GroupKey::new(tenant_id, conversation_id);
            let delivered = connections.send_to_group(&key, ServerEvent::MessageReceived(message));
            tracing::debug!("Message broadcast to {} connections in {}", delivered, key);
            Ok::<_, AppError>(())
        });

        handle.await?
    }

    fn typing(&self, connection: &HubConnection, conversation_id: Uuid, is_typing: bool) {
        let key = connection.group(conversation_id);
        if !self.connections.is_member(&key, connection.id) {
            tracing::debug!(
                "Dropping typing event from connection {} outside group {}",
                connection.id,
                key
            );
            return;
        }

        let payload = MembershipPayload {
            conversation_id,
            user_id: connection.user_id,
        };
        let event = if is_typing {
            ServerEvent::UserTyping(payload)
        } else {
            ServerEvent::UserStoppedTyping(payload)
        };
        self.connections.send_to_group_except(&key, connection.id, event);
    }

    /// Read receipt: updates the caller's read state and tells the other members.
    pub async fn mark_read(&self, connection: &HubConnection, conversation_id: Uuid) -> Result<()> {
        let read_at = self
            .service
            .mark_conversation_as_read(connection.tenant_id, conversation_id, connection.user_id)
            .await?;

        self.connections.send_to_group_except(
            &connection.group(conversation_id),
            connection.id,
            ServerEvent::ConversationRead(ReadReceiptPayload {
                conversation_id,
                user_id: connection.user_id,
                read_at,
            }),
        );
        Ok(())
    }

    /// Publishes an event raised outside the hub, e.g. by an HTTP request.
    pub fn publish(&self, tenant_id: Uuid, conversation_id: Uuid, event: ServerEvent) -> usize {
        self.connections
            .send_to_group(&GroupKey::new(tenant_id, conversation_id), event)
    }

    pub fn disconnect(&self, connection: &HubConnection) {
        let groups = self.connections.remove_connection(connection.id);
        tracing::info!(
            "User {} disconnected from WebSocket (connection {}, {} groups)",
            connection.user_id,
            connection.id,
            groups.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{conversation_dto::Pagination, test_support::TestContext};
    use futures::FutureExt;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    struct Client {
        connection: HubConnection,
        events: UnboundedReceiver<ServerEvent>,
    }

    impl Client {
        fn drain(&mut self) -> Vec<ServerEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                events.push(event);
            }
            events
        }
    }

    fn connect(hub: &ChatHub, tenant_id: Uuid, user_id: Uuid) -> Client {
        let (tx, rx) = mpsc::unbounded_channel();
        Client {
            connection: hub.connect(tenant_id, user_id, tx),
            events: rx,
        }
    }

    fn join(conversation_id: Uuid) -> ClientMessage {
        ClientMessage::JoinConversation { conversation_id }
    }

    #[tokio::test]
    async fn test_each_member_receives_one_copy() {
        let ctx = TestContext::new();
        let hub = ChatHub::new(ctx.service.clone());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let conversation = ctx.conversation_with(a, &[b]).await;

        let mut alice = connect(&hub, ctx.tenant_id, a);
        let mut bob = connect(&hub, ctx.tenant_id, b);
        hub.handle(&alice.connection, join(conversation)).await;
        hub.handle(&bob.connection, join(conversation)).await;

        // Alice is told Bob arrived; Bob is not told about himself
        let alice_events = alice.drain();
        assert!(matches!(
            alice_events.as_slice(),
            [ServerEvent::UserJoined(p)] if p.user_id == b
        ));
        assert!(bob.drain().is_empty());

        hub.handle(
            &alice.connection,
            ClientMessage::SendMessage {
                conversation_id: conversation,
                content: "Can you start Monday?".to_string(),
            },
        )
        .await;

        for client in [&mut alice, &mut bob] {
            let received: Vec<_> = client
                .drain()
                .into_iter()
                .filter_map(|e| match e {
                    ServerEvent::MessageReceived(m) => Some(m),
                    _ => None,
                })
                .collect();
            assert_eq!(received.len(), 1);
            assert_eq!(received[0].content.as_deref(), Some("Can you start Monday?"));
            assert_eq!(received[0].sender_id, a);
        }
    }

    #[tokio::test]
    async fn test_typing_excludes_caller() {
        let ctx = TestContext::new();
        let hub = ChatHub::new(ctx.service.clone());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let conversation = ctx.conversation_with(a, &[b]).await;

        let mut alice = connect(&hub, ctx.tenant_id, a);
        let mut bob = connect(&hub, ctx.tenant_id, b);
        hub.handle(&alice.connection, join(conversation)).await;
        hub.handle(&bob.connection, join(conversation)).await;
        alice.drain();

        hub.handle(
            &alice.connection,
            ClientMessage::UserTyping {
                conversation_id: conversation,
            },
        )
        .await;
        hub.handle(
            &alice.connection,
            ClientMessage::UserStoppedTyping {
                conversation_id: conversation,
            },
        )
        .await;

        assert!(alice.drain().is_empty());
        let bob_events = bob.drain();
        assert_eq!(bob_events.len(), 2);
        assert!(matches!(&bob_events[0], ServerEvent::UserTyping(p) if p.user_id == a));
        assert!(matches!(&bob_events[1], ServerEvent::UserStoppedTyping(p) if p.user_id == a));
    }

    #[tokio::test]
    async fn test_errors_go_to_caller_only() {
        let ctx = TestContext::new();
        let hub = ChatHub::new(ctx.service.clone());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let conversation = ctx.conversation_with(a, &[b]).await;

        let mut alice = connect(&hub, ctx.tenant_id, a);
        let mut bob = connect(&hub, ctx.tenant_id, b);
        let mut mallory = connect(&hub, ctx.tenant_id, Uuid::new_v4());
        hub.handle(&alice.connection, join(conversation)).await;
        hub.handle(&bob.connection, join(conversation)).await;
        alice.drain();

        // Not a participant: cannot join or send
        hub.handle(&mallory.connection, join(conversation)).await;
        hub.handle(
            &mallory.connection,
            ClientMessage::SendMessage {
                conversation_id: conversation,
                content: "spam".to_string(),
            },
        )
        .await;

        let errors = mallory.drain();
        assert_eq!(errors.len(), 2);
        for event in errors {
            match event {
                ServerEvent::Error(payload) => assert_eq!(payload.code, "permission_denied"),
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert!(alice.drain().is_empty());
        assert!(bob.drain().is_empty());
        assert_eq!(hub.connections().group_size(&GroupKey::new(ctx.tenant_id, conversation)), 2);

        // Empty content is a validation error, also caller-only
        hub.handle(
            &alice.connection,
            ClientMessage::SendMessage {
                conversation_id: conversation,
                content: "   ".to_string(),
            },
        )
        .await;
        assert!(matches!(
            alice.drain().as_slice(),
            [ServerEvent::Error(p)] if p.code == "validation_error"
        ));
        assert!(bob.drain().is_empty());
    }

    #[tokio::test]
    async fn test_rate_limited_sender_is_told_and_group_is_not() {
        let ctx = TestContext::with_rate_limit(1);
        let hub = ChatHub::new(ctx.service.clone());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let conversation = ctx.conversation_with(a, &[b]).await;

        let mut alice = connect(&hub, ctx.tenant_id, a);
        let mut bob = connect(&hub, ctx.tenant_id, b);
        hub.handle(&alice.connection, join(conversation)).await;
        hub.handle(&bob.connection, join(conversation)).await;
        alice.drain();

        for content in ["first", "second"] {
            hub.handle(
                &alice.connection,
                ClientMessage::SendMessage {
                    conversation_id: conversation,
                    content: content.to_string(),
                },
            )
            .await;
        }

        let alice_events = alice.drain();
        assert_eq!(alice_events.len(), 2);
        assert!(matches!(&alice_events[0], ServerEvent::MessageReceived(_)));
        assert!(matches!(&alice_events[1], ServerEvent::Error(p) if p.code == "rate_limit_exceeded"));

        let bob_events = bob.drain();
        assert_eq!(bob_events.len(), 1);
        assert!(matches!(&bob_events[0], ServerEvent::MessageReceived(_)));
    }

    #[tokio::test]
    async fn test_join_marks_conversation_read() {
        let ctx = TestContext::new();
        let hub = ChatHub::new(ctx.service.clone());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let conversation = ctx.conversation_with(a, &[b]).await;

        ctx.service
            .send_message(
                ctx.tenant_id,
                conversation,
                SendMessageRequest {
                    content: "Uniform sizes?".to_string(),
                },
                a,
            )
            .await
            .unwrap();
        assert_eq!(ctx.service.get_unread_count(ctx.tenant_id, b).await.unwrap().total, 1);

        let bob = connect(&hub, ctx.tenant_id, b);
        hub.handle(&bob.connection, join(conversation)).await;
        assert_eq!(ctx.service.get_unread_count(ctx.tenant_id, b).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_mark_read_sends_receipt_to_others() {
        let ctx = TestContext::new();
        let hub = ChatHub::new(ctx.service.clone());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let conversation = ctx.conversation_with(a, &[b]).await;

        let mut alice = connect(&hub, ctx.tenant_id, a);
        let mut bob = connect(&hub, ctx.tenant_id, b);
        hub.handle(&alice.connection, join(conversation)).await;
        hub.handle(&bob.connection, join(conversation)).await;
        alice.drain();

        hub.handle(
            &bob.connection,
            ClientMessage::MarkRead {
                conversation_id: conversation,
            },
        )
        .await;

        assert!(bob.drain().is_empty());
        assert!(matches!(
            alice.drain().as_slice(),
            [ServerEvent::ConversationRead(p)] if p.user_id == b && p.conversation_id == conversation
        ));
    }

    #[tokio::test]
    async fn test_leave_and_disconnect() {
        let ctx = TestContext::new();
        let hub = ChatHub::new(ctx.service.clone());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let conversation = ctx.conversation_with(a, &[b]).await;
        let key = GroupKey::new(ctx.tenant_id, conversation);

        let mut alice = connect(&hub, ctx.tenant_id, a);
        let mut bob = connect(&hub, ctx.tenant_id, b);
        hub.handle(&alice.connection, join(conversation)).await;
        hub.handle(&bob.connection, join(conversation)).await;
        alice.drain();

        hub.handle(
            &bob.connection,
            ClientMessage::LeaveConversation {
                conversation_id: conversation,
            },
        )
        .await;
        assert!(matches!(
            alice.drain().as_slice(),
            [ServerEvent::UserLeft(p)] if p.user_id == b
        ));
        assert!(bob.drain().is_empty());
        assert_eq!(hub.connections().group_size(&key), 1);

        hub.disconnect(&alice.connection);
        assert_eq!(hub.connections().group_size(&key), 0);
        assert_eq!(hub.connections().connection_count(), 0);
    }

    #[tokio::test]
    async fn test_groups_are_isolated_by_tenant() {
        let ctx = TestContext::new();
        let hub = ChatHub::new(ctx.service.clone());
        let a = Uuid::new_v4();
        let conversation = ctx.conversation_with(a, &[]).await;

        let mut alice = connect(&hub, ctx.tenant_id, a);
        hub.handle(&alice.connection, join(conversation)).await;

        // Same user and conversation id under another tenant
        let mut intruder = connect(&hub, Uuid::new_v4(), a);
        hub.handle(&intruder.connection, join(conversation)).await;
        assert!(matches!(
            intruder.drain().as_slice(),
            [ServerEvent::Error(p)] if p.code == "not_found"
        ));

        let delivered = hub.publish(Uuid::new_v4(), conversation, ServerEvent::error("x", "y"));
        assert_eq!(delivered, 0);
        assert!(alice.drain().is_empty());
    }

    #[tokio::test]
    async fn test_repeated_join_is_announced_once() {
        let ctx = TestContext::new();
        let hub = ChatHub::new(ctx.service.clone());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let conversation = ctx.conversation_with(a, &[b]).await;

        let mut alice = connect(&hub, ctx.tenant_id, a);
        let mut bob = connect(&hub, ctx.tenant_id, b);
        hub.handle(&alice.connection, join(conversation)).await;
        hub.handle(&bob.connection, join(conversation)).await;
        hub.handle(&bob.connection, join(conversation)).await;

        let joined: Vec<_> = alice
            .drain()
            .into_iter()
            .filter(|e| matches!(e, ServerEvent::UserJoined(_)))
            .collect();
        assert_eq!(joined.len(), 1);
        assert!(bob.drain().is_empty());
        assert_eq!(hub.connections().group_size(&GroupKey::new(ctx.tenant_id, conversation)), 2);
    }

    #[tokio::test]
    async fn test_second_device_is_not_announced_to_same_user() {
        let ctx = TestContext::new();
        let hub = ChatHub::new(ctx.service.clone());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let conversation = ctx.conversation_with(a, &[b]).await;

        let mut phone = connect(&hub, ctx.tenant_id, a);
        let mut bob = connect(&hub, ctx.tenant_id, b);
        hub.handle(&phone.connection, join(conversation)).await;
        hub.handle(&bob.connection, join(conversation)).await;
        phone.drain();

        let mut laptop = connect(&hub, ctx.tenant_id, a);
        hub.handle(&laptop.connection, join(conversation)).await;

        assert!(phone.drain().is_empty());
        assert!(laptop.drain().is_empty());
        assert!(matches!(
            bob.drain().as_slice(),
            [ServerEvent::UserJoined(p)] if p.user_id == a
        ));
    }

    #[tokio::test]
    async fn test_send_survives_sender_disconnect() {
        let ctx = TestContext::new();
        let hub = ChatHub::new(ctx.service.clone());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let conversation = ctx.conversation_with(a, &[b]).await;

        let Client {
            connection: alice,
            events: alice_events,
        } = connect(&hub, ctx.tenant_id, a);
        let mut bob = connect(&hub, ctx.tenant_id, b);
        hub.handle(&alice, join(conversation)).await;
        hub.handle(&bob.connection, join(conversation)).await;

        // Start the send, then drop it and the socket before it completes
        let send = hub.handle(
            &alice,
            ClientMessage::SendMessage {
                conversation_id: conversation,
                content: "Leaving the tunnel now".to_string(),
            },
        );
        assert!(send.now_or_never().is_none());
        drop(alice_events);
        hub.disconnect(&alice);

        let mut received = Vec::new();
        for _ in 0..50 {
            received.extend(bob.drain());
            if !received.is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(matches!(
            received.as_slice(),
            [ServerEvent::MessageReceived(m)] if m.sender_id == a
        ));

        let stored = ctx
            .service
            .list_messages(ctx.tenant_id, conversation, Pagination::new(Some(1), Some(20), 20))
            .await
            .unwrap();
        assert_eq!(stored.total, 1);
        assert_eq!(stored.data[0].content.as_deref(), Some("Leaving the tunnel now"));
    }
}
