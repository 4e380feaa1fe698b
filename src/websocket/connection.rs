use dashmap::DashMap;
use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::Arc,
};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::types::ServerEvent;

pub type ConnectionId = Uuid;
pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

/// Broadcast group of one conversation within one tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub tenant_id: Uuid,
    pub conversation_id: Uuid,
}

impl GroupKey {
    pub fn new(tenant_id: Uuid, conversation_id: Uuid) -> Self {
        Self {
            tenant_id,
            conversation_id,
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tenant_id, self.conversation_id)
    }
}

#[derive(Clone)]
struct Member {
    user_id: Uuid,
    sender: EventSender,
}

/// Registry of live connections grouped by conversation.
#[derive(Clone, Default)]
pub struct ConnectionManager {
    groups: Arc<DashMap<GroupKey, HashMap<ConnectionId, Member>>>,
    memberships: Arc<DashMap<ConnectionId, HashSet<GroupKey>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a group. Returns false if it was already a member.
    pub fn join(
        &self,
        key: GroupKey,
        connection_id: ConnectionId,
        user_id: Uuid,
        sender: EventSender,
    ) -> bool {
        let added = self
            .groups
            .entry(key)
            .or_default()
            .insert(connection_id, Member { user_id, sender })
            .is_none();
        self.memberships.entry(connection_id).or_default().insert(key);
        added
    }

    /// Remove a connection from one group. Returns false if it was not a member.
    pub fn leave(&self, key: GroupKey, connection_id: ConnectionId) -> bool {
        let removed = self
            .groups
            .get_mut(&key)
            .map(|mut members| members.remove(&connection_id).is_some())
            .unwrap_or(false);
        self.groups.remove_if(&key, |_, members| members.is_empty());

        if let Some(mut joined) = self.memberships.get_mut(&connection_id) {
            joined.remove(&key);
        }
        self.memberships
            .remove_if(&connection_id, |_, joined| joined.is_empty());

        removed
    }

    /// Remove a connection from every group it joined. Returns those groups.
    pub fn remove_connection(&self, connection_id: ConnectionId) -> Vec<GroupKey> {
        let Some((_, joined)) = self.memberships.remove(&connection_id) else {
            return Vec::new();
        };

        for key in &joined {
            if let Some(mut members) = self.groups.get_mut(key) {
                members.remove(&connection_id);
            }
            self.groups.remove_if(key, |_, members| members.is_empty());
        }

        joined.into_iter().collect()
    }

    pub fn is_member(&self, key: &GroupKey, connection_id: ConnectionId) -> bool {
        self.groups
            .get(key)
            .map(|members| members.contains_key(&connection_id))
            .unwrap_or(false)
    }

    pub fn group_size(&self, key: &GroupKey) -> usize {
        self.groups.get(key).map(|members| members.len()).unwrap_or(0)
    }

    /// Deliver an event to every connection in the group. Returns how many accepted it.
    pub fn send_to_group(&self, key: &GroupKey, event: ServerEvent) -> usize {
        self.deliver(key, event, |_, _| true)
    }

    /// Deliver an event to every connection in the group except one.
    pub fn send_to_group_except(
        &self,
        key: &GroupKey,
        except: ConnectionId,
        event: ServerEvent,
    ) -> usize {
        self.deliver(key, event, |id, _| *id != except)
    }

    /// Deliver an event to the group, skipping every connection owned by `user_id`.
    pub fn send_to_group_except_user(
        &self,
        key: &GroupKey,
        user_id: Uuid,
        event: ServerEvent,
    ) -> usize {
        self.deliver(key, event, |_, member| member.user_id != user_id)
    }

    pub fn connection_count(&self) -> usize {
        self.memberships.len()
    }

    fn deliver<F>(&self, key: &GroupKey, event: ServerEvent, include: F) -> usize
    where
        F: Fn(&ConnectionId, &Member) -> bool,
    {
        let senders: Vec<EventSender> = match self.groups.get(key) {
            Some(members) => members
                .iter()
                .filter(|(id, member)| include(id, member))
                .map(|(_, member)| member.sender.clone())
                .collect(),
            None => return 0,
        };

        senders
            .into_iter()
            .filter(|sender| sender.send(event.clone()).is_ok())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member() -> (ConnectionId, EventSender, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Uuid::new_v4(), tx, rx)
    }

    #[test]
    fn test_group_name_format() {
        let tenant = Uuid::new_v4();
        let conversation = Uuid::new_v4();
        let key = GroupKey::new(tenant, conversation);
        assert_eq!(key.to_string(), format!("{}:{}", tenant, conversation));
    }

    #[test]
    fn test_join_is_idempotent_and_leave_cleans_up() {
        let manager = ConnectionManager::new();
        let key = GroupKey::new(Uuid::new_v4(), Uuid::new_v4());
        let (id, tx, _rx) = member();

        assert!(manager.join(key, id, Uuid::new_v4(), tx.clone()));
        assert!(!manager.join(key, id, Uuid::new_v4(), tx));
        assert_eq!(manager.group_size(&key), 1);

        assert!(manager.leave(key, id));
        assert!(!manager.leave(key, id));
        assert_eq!(manager.group_size(&key), 0);
        assert_eq!(manager.connection_count(), 0);
    }

    #[test]
    fn test_send_except_skips_caller() {
        let manager = ConnectionManager::new();
        let key = GroupKey::new(Uuid::new_v4(), Uuid::new_v4());
        let (a, a_tx, mut a_rx) = member();
        let (b, b_tx, mut b_rx) = member();
        manager.join(key, a, Uuid::new_v4(), a_tx);
        manager.join(key, b, Uuid::new_v4(), b_tx);

        let delivered = manager.send_to_group_except(&key, a, ServerEvent::error("x", "y"));
        assert_eq!(delivered, 1);
        assert!(a_rx.try_recv().is_err());
        assert!(b_rx.try_recv().is_ok());

        assert_eq!(manager.send_to_group(&key, ServerEvent::error("x", "y")), 2);
    }

    #[test]
    fn test_remove_connection_leaves_every_group() {
        let manager = ConnectionManager::new();
        let tenant = Uuid::new_v4();
        let first = GroupKey::new(tenant, Uuid::new_v4());
        let second = GroupKey::new(tenant, Uuid::new_v4());
        let (a, a_tx, _a_rx) = member();
        let (b, b_tx, _b_rx) = member();

        manager.join(first, a, Uuid::new_v4(), a_tx.clone());
        manager.join(second, a, Uuid::new_v4(), a_tx);
        manager.join(first, b, Uuid::new_v4(), b_tx);

        let mut left = manager.remove_connection(a);
        left.sort_by_key(|k| k.conversation_id);
        let mut expected = vec![first, second];
        expected.sort_by_key(|k| k.conversation_id);
        assert_eq!(left, expected);

        assert!(!manager.is_member(&first, a));
        assert!(manager.is_member(&first, b));
        assert_eq!(manager.group_size(&second), 0);
        assert!(manager.remove_connection(a).is_empty());
    }

    #[test]
    fn test_send_except_user_skips_all_their_connections() {
        let manager = ConnectionManager::new();
        let key = GroupKey::new(Uuid::new_v4(), Uuid::new_v4());
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let (phone, phone_tx, mut phone_rx) = member();
        let (laptop, laptop_tx, mut laptop_rx) = member();
        let (b, b_tx, mut b_rx) = member();
        manager.join(key, phone, alice, phone_tx);
        manager.join(key, laptop, alice, laptop_tx);
        manager.join(key, b, bob, b_tx);

        let delivered = manager.send_to_group_except_user(&key, alice, ServerEvent::error("x", "y"));
        assert_eq!(delivered, 1);
        assert!(phone_rx.try_recv().is_err());
        assert!(laptop_rx.try_recv().is_err());
        assert!(b_rx.try_recv().is_ok());
    }
}
