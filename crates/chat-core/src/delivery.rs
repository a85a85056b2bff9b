use std::sync::Arc;

use chat_protocol::{GroupId, MessageId, UserId};

use crate::error::DeliveryError;
use crate::hub::HubHandle;
use crate::membership::MembershipOracle;
use crate::model::{ConversationRow, Message, MessageKind, MessageStatus, NewMessage, RecipientClass};
use crate::store::MessageStore;

/// Thin service layer over the `MessageStore` with membership-aware policy.
/// This is the entry point HTTP send/history handlers use; P2P sends route
/// through the Hub's `persist_p2p` so the REST path shares the same
/// online-recipient check the WS broadcast path uses, while group sends
/// persist directly here (group messages are always `sent`) and only use
/// the Hub for its fan-out-only `deliver_group`.
pub struct DeliveryService {
    store: Arc<dyn MessageStore>,
    membership: Arc<dyn MembershipOracle>,
    hub: HubHandle,
}

impl DeliveryService {
    pub fn new(
        store: Arc<dyn MessageStore>,
        membership: Arc<dyn MembershipOracle>,
        hub: HubHandle,
    ) -> Self {
        Self {
            store,
            membership,
            hub,
        }
    }

    pub async fn send_p2p(
        &self,
        sender: UserId,
        recipient: UserId,
        content: String,
        media_url: Option<String>,
    ) -> Result<Message, DeliveryError> {
        if sender == recipient {
            return Err(DeliveryError::Validation(
                "cannot send a P2P message to yourself".to_owned(),
            ));
        }
        if !self.membership.user_exists(recipient).await {
            return Err(DeliveryError::NotFound(format!(
                "user {recipient} does not exist"
            )));
        }
        let new_message = build_new_message(sender, recipient, content, media_url)?;
        Ok(self.hub.persist_p2p(new_message).await?)
    }

    pub async fn send_group(
        &self,
        sender: UserId,
        group: GroupId,
        content: String,
        media_url: Option<String>,
    ) -> Result<Message, DeliveryError> {
        if !self.membership.is_member(sender, group).await {
            return Err(DeliveryError::Forbidden(format!(
                "user {sender} is not a member of group {group}"
            )));
        }
        let new_message = build_new_message(sender, group, content, media_url)?;
        let message = self.store.persist(new_message, MessageStatus::Sent).await?;

        let members = match self.membership.classify(group).await {
            RecipientClass::Group { members } => members,
            RecipientClass::User => Vec::new(),
        };
        self.hub.deliver_group(message.clone(), members).await;
        Ok(message)
    }

    pub async fn p2p_history(
        &self,
        viewer: UserId,
        peer: UserId,
        limit: i64,
        before_id: Option<MessageId>,
    ) -> Result<Vec<Message>, DeliveryError> {
        Ok(self.store.p2p_history(viewer, peer, limit, before_id).await?)
    }

    pub async fn group_history(
        &self,
        viewer: UserId,
        group: GroupId,
        limit: i64,
        before_id: Option<MessageId>,
    ) -> Result<Vec<Message>, DeliveryError> {
        if !self.membership.is_member(viewer, group).await {
            return Err(DeliveryError::Forbidden(format!(
                "user {viewer} is not a member of group {group}"
            )));
        }
        Ok(self.store.group_history(group, limit, before_id).await?)
    }

    pub async fn recent_conversations(
        &self,
        user: UserId,
    ) -> Result<Vec<ConversationRow>, DeliveryError> {
        Ok(self.store.recent_conversations(user).await?)
    }
}

fn build_new_message(
    sender: UserId,
    recipient: i64,
    content: String,
    media_url: Option<String>,
) -> Result<NewMessage, DeliveryError> {
    let kind = if media_url.as_deref().is_some_and(|u| !u.is_empty()) {
        MessageKind::Image
    } else {
        MessageKind::Text
    };
    let message = NewMessage {
        sender,
        recipient,
        kind,
        content,
        media_url,
    };
    if !message.validate() {
        return Err(DeliveryError::Validation(
            "content and media_url cannot both be empty".to_owned(),
        ));
    }
    Ok(message)
}
