//! Direct conversations
//!
//! Both the HTTP handlers and inbound realtime frames send through
//! [`ConversationManager::send`], so the two paths persist and publish
//! identically. Pushes happen only after the message is stored.

use crate::core::error::{Error, Result};
use crate::core::models::{IdentityClaim, IdentitySummary, Message, MAX_MESSAGE_CHARS};
use crate::core::store::Store;
use crate::social::broker::{EventPublisher, ServerEvent};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Inbox entry: latest message and unread count per counterpart
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub counterpart: IdentitySummary,
    pub last_message: Message,
    pub unread_count: i64,
}

pub struct ConversationManager {
    store: Arc<Store>,
    events: Arc<dyn EventPublisher>,
}

impl ConversationManager {
    pub fn new(store: Arc<Store>, events: Arc<dyn EventPublisher>) -> Self {
        Self { store, events }
    }

    /// Persist a message, then push it to the recipient
    pub async fn send(
        &self,
        sender: &IdentityClaim,
        recipient_id: &str,
        content: &str,
    ) -> Result<Message> {
        let content = content.trim();
        if content.is_empty() {
            return Err(Error::EmptyContent);
        }
        if content.chars().count() > MAX_MESSAGE_CHARS {
            return Err(Error::ContentTooLong {
                max: MAX_MESSAGE_CHARS,
            });
        }
        if sender.id == recipient_id {
            return Err(Error::BadRequest("cannot message yourself".into()));
        }
        if self.store.find_identity(recipient_id).await?.is_none() {
            return Err(Error::RecipientNotFound(recipient_id.to_string()));
        }

        let message = Message::new(&sender.id, recipient_id, content);
        self.store.insert_message(&message).await?;
        info!("[Messages] {} -> {} ({})", sender.id, recipient_id, message.id);

        self.events.publish(
            recipient_id,
            ServerEvent::ReceiveMessage {
                message_id: message.id.clone(),
                sender_id: sender.id.clone(),
                sender_name: sender.display_name.clone(),
                recipient_id: recipient_id.to_string(),
                content: message.content.clone(),
                created_at: message.created_at,
            },
        );
        // The message is durable from here on; the badge update is optional
        match self.store.unread_count(recipient_id).await {
            Ok(unread_count) => {
                self.events.publish(
                    recipient_id,
                    ServerEvent::NewUnreadMessage {
                        message_id: message.id.clone(),
                        sender_id: sender.id.clone(),
                        sender_name: sender.display_name.clone(),
                        unread_count,
                    },
                );
            }
            Err(e) => warn!(
                "[Messages] Unread count for {} unavailable after {}: {}",
                recipient_id, message.id, e
            ),
        }

        Ok(message)
    }

    /// Messages with `other_id` visible to the caller, oldest first.
    /// Opening the conversation marks what the caller received as read.
    pub async fn list_conversation(
        &self,
        caller: &IdentityClaim,
        other_id: &str,
    ) -> Result<Vec<Message>> {
        if self.store.find_identity(other_id).await?.is_none() {
            return Err(Error::NotFound("user"));
        }

        let read_ids = self.store.mark_read(&caller.id, other_id).await?;
        let messages = self.store.conversation(&caller.id, other_id).await?;

        if !read_ids.is_empty() {
            debug!(
                "[Messages] {} read {} messages from {}",
                caller.id,
                read_ids.len(),
                other_id
            );
            self.events.publish(
                other_id,
                ServerEvent::MessagesRead {
                    reader_id: caller.id.clone(),
                    reader_name: caller.display_name.clone(),
                    message_ids: read_ids,
                    read_at: Utc::now(),
                },
            );
        }

        Ok(messages)
    }

    /// One entry per counterpart, newest conversation first
    pub async fn list_conversations(&self, user_id: &str) -> Result<Vec<ConversationSummary>> {
        let messages = self.store.messages_involving(user_id).await?;

        let mut order: Vec<String> = Vec::new();
        let mut latest: HashMap<String, Message> = HashMap::new();
        let mut unread: HashMap<String, i64> = HashMap::new();

        for message in messages {
            let other = message.counterpart_of(user_id).to_string();
            if message.recipient_id == user_id && !message.read {
                *unread.entry(other.clone()).or_default() += 1;
            }
            if !latest.contains_key(&other) {
                order.push(other.clone());
                latest.insert(other, message);
            }
        }

        let mut summaries = Vec::with_capacity(order.len());
        for other in order {
            let Some(last_message) = latest.remove(&other) else {
                continue;
            };
            let counterpart = match self.store.find_identity(&other).await? {
                Some(identity) => identity.summary(),
                None => IdentitySummary {
                    display_name: other.clone(),
                    id: other.clone(),
                },
            };
            summaries.push(ConversationSummary {
                counterpart,
                last_message,
                unread_count: unread.get(&other).copied().unwrap_or(0),
            });
        }
        Ok(summaries)
    }

    pub async fn unread_count(&self, user_id: &str) -> Result<i64> {
        self.store.unread_count(user_id).await
    }

    /// Hide a message the caller sent, from the caller's side
    pub async fn delete_message(&self, caller: &IdentityClaim, message_id: &str) -> Result<()> {
        let message = self
            .store
            .find_message(message_id)
            .await?
            .filter(|m| !m.hidden_for.contains(&caller.id))
            .ok_or(Error::NotFound("message"))?;

        if message.sender_id != caller.id {
            return Err(Error::Forbidden("only the sender can delete a message"));
        }

        if !self.store.hide_message(&message.id, &caller.id).await? {
            return Err(Error::NotFound("message"));
        }
        info!("[Messages] {} deleted {}", caller.id, message.id);

        self.events.publish(
            &message.recipient_id,
            ServerEvent::MessageDeleted {
                message_id: message.id.clone(),
                sender_id: caller.id.clone(),
            },
        );
        Ok(())
    }

    /// Hide every message with `other_id` from the caller's side.
    /// Returns how many messages were hidden.
    pub async fn delete_conversation(&self, caller: &IdentityClaim, other_id: &str) -> Result<u64> {
        let hidden = self.store.hide_conversation(&caller.id, other_id).await?;
        if hidden == 0 {
            return Err(Error::NotFound("conversation"));
        }
        info!(
            "[Messages] {} cleared conversation with {} ({} messages)",
            caller.id, other_id, hidden
        );
        Ok(hidden)
    }

    /// Relay a typing indicator; nothing is stored
    pub fn typing(&self, sender: &IdentityClaim, recipient_id: &str, is_typing: bool) -> usize {
        self.events.publish(
            recipient_id,
            ServerEvent::Typing {
                sender_id: sender.id.clone(),
                sender_name: sender.display_name.clone(),
                is_typing,
                at: Utc::now(),
            },
        )
    }
}
