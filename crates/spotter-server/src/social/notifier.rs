//! Outbound notification seam
//!
//! Email delivery lives outside this service. Notices are handed over after
//! the state change is durable, so a failing notifier never undoes it.

use crate::core::error::{Error, Result};
use crate::core::models::IdentitySummary;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Something worth telling a user about out of band
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    FriendRequestReceived {
        recipient_id: String,
        sender: IdentitySummary,
    },
    FriendRequestAccepted {
        recipient_id: String,
        friend: IdentitySummary,
    },
}

impl Notice {
    pub fn recipient_id(&self) -> &str {
        match self {
            Notice::FriendRequestReceived { recipient_id, .. }
            | Notice::FriendRequestAccepted { recipient_id, .. } => recipient_id,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notice: Notice) -> Result<()>;
}

/// Default notifier: records what would have been sent
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, notice: Notice) -> Result<()> {
        match &notice {
            Notice::FriendRequestReceived {
                recipient_id,
                sender,
            } => info!(
                "[Notify] would email {}: friend request from {}",
                recipient_id, sender.display_name
            ),
            Notice::FriendRequestAccepted {
                recipient_id,
                friend,
            } => info!(
                "[Notify] would email {}: {} accepted your request",
                recipient_id, friend.display_name
            ),
        }
        Ok(())
    }
}

/// Deliver a notice, logging instead of failing
pub async fn notify_best_effort(notifier: &Arc<dyn Notifier>, notice: Notice) {
    let recipient = notice.recipient_id().to_string();
    if let Err(e) = notifier.notify(notice).await {
        let e = match e {
            Error::TransientDependency(_) => e,
            other => Error::TransientDependency(other.to_string()),
        };
        warn!("[Notify] Failed to notify {}: {}", recipient, e);
    }
}
