//! Confirmation gate for commands broadcast to every hub client.
//!
//! A `!!command i_confirm_all_client <cmd>` does not go out directly. The
//! bridge parks it under `(user, group)`, asks the sender to confirm, and
//! only publishes it once the same user replies with an affirm token in the
//! same group within [`CONFIRMATION_TTL_SECS`].
//!
//! ```text
//!   request ──► Pending ──affirm (fresh)──► published broadcast, removed
//!                  │ ──affirm (stale)───► expiry notice, removed
//!                  │ ──cancel───────────► cancel notice, removed
//!                  └ ──sweep (stale)────► expiry notice, removed
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::bridge::formatter::{CANCELLED_NOTICE, CONFIRMED_NOTICE, EXPIRED_NOTICE, Formatter};
use crate::channels::{GroupSender, HubPublisher};
use crate::protocol::CanonicalMessage;

/// Age after which a pending confirmation is void.
pub const CONFIRMATION_TTL_SECS: i64 = 300;

/// How often the orchestrator sweeps stale confirmations.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Origin stamped on confirmed broadcasts.
pub const CONFIRMED_ORIGIN: &str = "QQ";

/// Sender stamped on confirmed broadcasts.
pub const CONFIRMED_SENDER: &str = "QQ用户确认执行";

const AFFIRM_TOKENS: [&str; 4] = ["yes", "y", "确认", "是"];
const CANCEL_TOKENS: [&str; 3] = ["cancel", "no", "取消"];

/// `(user_id, group_id)`.
type ConfirmationKey = (i64, i64);

#[derive(Debug, Clone)]
struct PendingConfirmation {
    command: String,
    original_text: String,
    sender: String,
    created_at: DateTime<Utc>,
}

impl PendingConfirmation {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at > chrono::Duration::seconds(CONFIRMATION_TTL_SECS)
    }
}

/// Tracks commands waiting for a confirming reply.
pub struct ConfirmationManager {
    pending: Mutex<HashMap<ConfirmationKey, PendingConfirmation>>,
    formatter: Formatter,
    im: Arc<dyn GroupSender>,
    hub: Arc<dyn HubPublisher>,
}

impl ConfirmationManager {
    pub fn new(formatter: Formatter, im: Arc<dyn GroupSender>, hub: Arc<dyn HubPublisher>) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            formatter,
            im,
            hub,
        }
    }

    /// Park `command` for `(user_id, group_id)` and prompt the sender.
    /// Replaces any earlier pending command for the same key.
    pub async fn request_confirmation(
        &self,
        user_id: i64,
        group_id: i64,
        sender: &str,
        command: &str,
        original_text: &str,
    ) {
        self.request_confirmation_at(user_id, group_id, sender, command, original_text, Utc::now())
            .await;
    }

    pub async fn request_confirmation_at(
        &self,
        user_id: i64,
        group_id: i64,
        sender: &str,
        command: &str,
        original_text: &str,
        now: DateTime<Utc>,
    ) {
        let replaced = self.pending.lock().await.insert(
            (user_id, group_id),
            PendingConfirmation {
                command: command.to_string(),
                original_text: original_text.to_string(),
                sender: sender.to_string(),
                created_at: now,
            },
        );
        if let Some(old) = replaced {
            tracing::debug!(user_id, group_id, previous = %old.command, "Pending command replaced");
        }
        tracing::debug!(user_id, group_id, command, "Command awaiting confirmation");

        let prompt = self.formatter.confirmation_prompt(sender, command);
        self.notify(group_id, &prompt).await;
    }

    /// Treat `text` as a possible reply to a pending confirmation.
    ///
    /// Returns `true` when the text was consumed: a cancel that removed an
    /// entry, or an affirm that published the command. An affirm on a stale
    /// entry removes it and sends the expiry notice but returns `false`, so
    /// the text continues as ordinary chat.
    pub async fn try_resolve_reply(&self, user_id: i64, group_id: i64, text: &str) -> bool {
        self.try_resolve_reply_at(user_id, group_id, text, Utc::now())
            .await
    }

    pub async fn try_resolve_reply_at(
        &self,
        user_id: i64,
        group_id: i64,
        text: &str,
        now: DateTime<Utc>,
    ) -> bool {
        let reply = text.trim().to_lowercase();
        let key = (user_id, group_id);

        if CANCEL_TOKENS.contains(&reply.as_str()) {
            let removed = self.pending.lock().await.remove(&key);
            return match removed {
                Some(pending) => {
                    tracing::debug!(
                        user_id,
                        group_id,
                        command = %pending.command,
                        "Pending command cancelled"
                    );
                    self.notify(group_id, CANCELLED_NOTICE).await;
                    true
                }
                None => false,
            };
        }

        if !AFFIRM_TOKENS.contains(&reply.as_str()) {
            return false;
        }

        let Some(pending) = self.pending.lock().await.remove(&key) else {
            return false;
        };

        if pending.is_expired(now) {
            tracing::debug!(user_id, group_id, "Confirmation arrived after expiry");
            self.notify(group_id, EXPIRED_NOTICE).await;
            return false;
        }

        tracing::debug!(
            user_id,
            group_id,
            sender = %pending.sender,
            original = %pending.original_text,
            "Command confirmed"
        );

        let broadcast =
            CanonicalMessage::command(CONFIRMED_ORIGIN, CONFIRMED_SENDER, &pending.command);
        match self.hub.publish(&broadcast).await {
            Ok(()) => tracing::info!(
                command = %pending.command,
                "Broadcast confirmed command to all clients"
            ),
            Err(e) => tracing::error!(
                command = %pending.command,
                error = %e,
                "Failed to publish confirmed command"
            ),
        }
        self.notify(group_id, CONFIRMED_NOTICE).await;
        true
    }

    /// Drop every stale entry and send each an expiry notice.
    pub async fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Utc::now()).await
    }

    pub async fn sweep_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut expired = Vec::new();
        self.pending.lock().await.retain(|&(user_id, group_id), pending| {
            if pending.is_expired(now) {
                expired.push((user_id, group_id));
                false
            } else {
                true
            }
        });

        for &(user_id, group_id) in &expired {
            tracing::debug!(user_id, group_id, "Expired pending command removed");
            self.notify(group_id, EXPIRED_NOTICE).await;
        }
        expired.len()
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    async fn notify(&self, group_id: i64, text: &str) {
        if let Err(e) = self.im.send_group_message(group_id, text).await {
            tracing::warn!(group_id, error = %e, "Failed to send notice to group");
        }
    }
}
