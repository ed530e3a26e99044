//! Local 渠道 - 应用内通知列表
//!
//! 投递目标就是收件箱 store；拒绝重复未读键，容量策略由 store 负责。

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::notification::channel::ChannelSender;
use crate::notification::model::{DispatchResult, Notification};
use crate::notification::store::InboxStore;

/// Local 渠道
pub struct LocalSender {
    inbox: Arc<InboxStore>,
}

impl LocalSender {
    pub fn new(inbox: Arc<InboxStore>) -> Self {
        Self { inbox }
    }
}

#[async_trait]
impl ChannelSender for LocalSender {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn send(&self, notification: &Notification) -> DispatchResult {
        match self.inbox.insert(notification.clone()) {
            Ok(()) => {
                debug!(
                    channel = "local",
                    recipient = %notification.recipient_id,
                    dedup_key = %notification.dedup_key,
                    "Notification stored in inbox"
                );
                DispatchResult::sent("local", &notification.id)
            }
            Err(e) => {
                warn!(
                    channel = "local",
                    recipient = %notification.recipient_id,
                    error = %e,
                    "Inbox insert refused"
                );
                DispatchResult::failed("local", e.to_string(), &notification.id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::model::Category;

    #[tokio::test]
    async fn test_local_sender_appends_to_inbox() {
        let inbox = Arc::new(InboxStore::new());
        let sender = LocalSender::new(inbox.clone());
        let n = Notification::draft("alice", Category::MealReminder, "t", "b", "k1");

        let result = sender.send(&n).await;
        assert!(result.success);
        assert_eq!(result.channel, "local");
        assert_eq!(inbox.unread_count("alice"), 1);
    }

    #[tokio::test]
    async fn test_local_sender_converts_rejection_to_failed_result() {
        let inbox = Arc::new(InboxStore::new());
        let sender = LocalSender::new(inbox.clone());
        let n = Notification::draft("alice", Category::MealReminder, "t", "b", "k1");

        assert!(sender.send(&n).await.success);
        // 同键未读仍在：拒绝转换为失败结果，而不是 panic / Err
        let second = sender.send(&n).await;
        assert!(!second.success);
        assert!(second.message.contains("duplicate"));
    }
}
