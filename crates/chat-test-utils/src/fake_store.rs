use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chat_core::error::StoreError;
use chat_core::membership::MembershipOracle;
use chat_core::model::{ConversationRow, Message, MessageStatus, NewMessage, RecipientClass};
use chat_core::store::MessageStore;
use chat_protocol::{GroupId, MessageId, UserId};

/// In-memory `MessageStore` for unit tests. Ids are assigned sequentially
/// starting at 1; `timestamp` is the insertion order, not wall-clock time,
/// which is all ordering tests need.
#[derive(Default)]
pub struct FakeMessageStore {
    messages: Mutex<Vec<Message>>,
}

impl FakeMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageStore for FakeMessageStore {
    async fn persist(
        &self,
        message: NewMessage,
        status: MessageStatus,
    ) -> Result<Message, StoreError> {
        let mut messages = self.messages.lock().unwrap();
        let id = messages.len() as MessageId + 1;
        let stored = Message {
            id,
            sender: message.sender,
            recipient: message.recipient,
            kind: message.kind,
            content: message.content,
            media_url: message.media_url,
            timestamp: id,
            status,
        };
        messages.push(stored.clone());
        Ok(stored)
    }

    async fn mark_delivered(&self, ids: &[MessageId]) -> Result<(), StoreError> {
        let mut messages = self.messages.lock().unwrap();
        for message in messages.iter_mut() {
            if ids.contains(&message.id) {
                message.status = MessageStatus::Delivered;
            }
        }
        Ok(())
    }

    async fn pending_for(&self, user: UserId) -> Result<Vec<Message>, StoreError> {
        let messages = self.messages.lock().unwrap();
        Ok(messages
            .iter()
            .filter(|m| m.recipient == user && m.status == MessageStatus::Pending)
            .cloned()
            .collect())
    }

    async fn p2p_history(
        &self,
        a: UserId,
        b: UserId,
        limit: i64,
        before_id: Option<MessageId>,
    ) -> Result<Vec<Message>, StoreError> {
        let messages = self.messages.lock().unwrap();
        let mut matched: Vec<Message> = messages
            .iter()
            .filter(|m| {
                (m.sender == a && m.recipient == b) || (m.sender == b && m.recipient == a)
            })
            .filter(|m| before_id.is_none_or(|before| m.id < before))
            .cloned()
            .collect();
        matched.sort_by(|x, y| y.id.cmp(&x.id));
        matched.truncate(limit.max(0) as usize);
        Ok(matched)
    }

    async fn group_history(
        &self,
        group: i64,
        limit: i64,
        before_id: Option<MessageId>,
    ) -> Result<Vec<Message>, StoreError> {
        let messages = self.messages.lock().unwrap();
        let mut matched: Vec<Message> = messages
            .iter()
            .filter(|m| m.recipient == group)
            .filter(|m| before_id.is_none_or(|before| m.id < before))
            .cloned()
            .collect();
        matched.sort_by(|x, y| y.id.cmp(&x.id));
        matched.truncate(limit.max(0) as usize);
        Ok(matched)
    }

    async fn recent_conversations(&self, user: UserId) -> Result<Vec<ConversationRow>, StoreError> {
        let messages = self.messages.lock().unwrap();
        let mut by_peer: HashMap<i64, Message> = HashMap::new();
        for message in messages.iter() {
            let peer = if message.sender == user {
                Some(message.recipient)
            } else if message.recipient == user {
                Some(message.sender)
            } else {
                None
            };
            let Some(peer) = peer else { continue };
            by_peer
                .entry(peer)
                .and_modify(|existing| {
                    if message.id > existing.id {
                        *existing = message.clone();
                    }
                })
                .or_insert_with(|| message.clone());
        }
        let mut rows: Vec<ConversationRow> = by_peer
            .into_iter()
            .map(|(peer_id, last_message)| ConversationRow {
                peer_id,
                is_group: false,
                last_message,
            })
            .collect();
        rows.sort_by(|a, b| b.last_message.id.cmp(&a.last_message.id));
        Ok(rows)
    }
}

/// In-memory `MembershipOracle`. Any recipient id registered as a group via
/// [`Self::add_group`] classifies as `Group`; everything else is a `User`.
#[derive(Default)]
pub struct FakeMembershipOracle {
    groups: Mutex<HashMap<GroupId, Vec<UserId>>>,
    users: Mutex<Vec<UserId>>,
}

impl FakeMembershipOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user: UserId) {
        self.users.lock().unwrap().push(user);
    }

    pub fn add_group(&self, group: GroupId, members: Vec<UserId>) {
        self.groups.lock().unwrap().insert(group, members);
    }
}

#[async_trait]
impl MembershipOracle for FakeMembershipOracle {
    async fn classify(&self, recipient: i64) -> RecipientClass {
        match self.groups.lock().unwrap().get(&recipient) {
            Some(members) => RecipientClass::Group {
                members: members.clone(),
            },
            None => RecipientClass::User,
        }
    }

    async fn is_member(&self, user: UserId, group: GroupId) -> bool {
        self.groups
            .lock()
            .unwrap()
            .get(&group)
            .is_some_and(|members| members.contains(&user))
    }

    async fn user_exists(&self, user: UserId) -> bool {
        self.users.lock().unwrap().contains(&user)
    }
}
