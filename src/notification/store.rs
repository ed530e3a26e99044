//! 应用内通知收件箱 - 每接收者的有序列表
//!
//! 同时是 local 渠道的投递目标和分发器去重守卫查询的存储。
//! 不变量：同一 (recipient, dedup_key) 最多一条未读通知。

use dashmap::DashMap;
use thiserror::Error;

use crate::notification::model::Notification;

/// 默认收件箱容量（超出后优先丢弃最旧的已读条目）
pub const DEFAULT_INBOX_CAP: usize = 200;

/// 插入被拒绝的原因
#[derive(Debug, Error, PartialEq)]
pub enum InboxRejection {
    /// 同键未读通知已存在
    #[error("duplicate unread notification for dedup key {0}")]
    DuplicateUnread(String),
    /// 已满且没有可以丢弃的已读条目
    #[error("inbox full for recipient {0}")]
    Full(String),
}

/// 收件箱存储
pub struct InboxStore {
    entries: DashMap<String, Vec<Notification>>,
    cap: usize,
}

impl InboxStore {
    pub fn new() -> Self {
        Self::with_cap(DEFAULT_INBOX_CAP)
    }

    pub fn with_cap(cap: usize) -> Self {
        Self {
            entries: DashMap::new(),
            cap: cap.max(1),
        }
    }

    /// 是否存在同键未读通知
    pub fn has_unread(&self, recipient_id: &str, dedup_key: &str) -> bool {
        self.entries
            .get(recipient_id)
            .map(|list| list.iter().any(|n| !n.read && n.dedup_key == dedup_key))
            .unwrap_or(false)
    }

    /// 追加通知
    ///
    /// 拒绝重复未读键；容量不足时先丢弃最旧的已读条目，
    /// 全部未读时放弃（best-effort）。
    pub fn insert(&self, notification: Notification) -> Result<(), InboxRejection> {
        let mut list = self
            .entries
            .entry(notification.recipient_id.clone())
            .or_default();

        if list
            .iter()
            .any(|n| !n.read && n.dedup_key == notification.dedup_key)
        {
            return Err(InboxRejection::DuplicateUnread(notification.dedup_key));
        }

        if list.len() >= self.cap {
            match list.iter().position(|n| n.read) {
                Some(oldest_read) => {
                    list.remove(oldest_read);
                }
                None => return Err(InboxRejection::Full(notification.recipient_id)),
            }
        }

        list.push(notification);
        Ok(())
    }

    /// 幂等插入：同键未读已存在时什么都不做
    ///
    /// 分发器的 "持久化为已发送" 步骤使用；local 渠道可能已经写入过。
    pub fn insert_if_absent(&self, notification: Notification) -> Result<bool, InboxRejection> {
        match self.insert(notification) {
            Ok(()) => Ok(true),
            Err(InboxRejection::DuplicateUnread(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// 标记单条已读
    pub fn mark_read(&self, recipient_id: &str, notification_id: &str) -> bool {
        let Some(mut list) = self.entries.get_mut(recipient_id) else {
            return false;
        };
        for n in list.iter_mut() {
            if n.id == notification_id {
                n.read = true;
                return true;
            }
        }
        false
    }

    /// 清除所有已读条目，返回清除数量
    pub fn clear_read(&self, recipient_id: &str) -> usize {
        let Some(mut list) = self.entries.get_mut(recipient_id) else {
            return 0;
        };
        let before = list.len();
        list.retain(|n| !n.read);
        before - list.len()
    }

    /// 最近 n 条（按插入顺序，最旧在前）
    pub fn recent(&self, recipient_id: &str, n: usize) -> Vec<Notification> {
        self.entries
            .get(recipient_id)
            .map(|list| {
                let start = list.len().saturating_sub(n);
                list[start..].to_vec()
            })
            .unwrap_or_default()
    }

    /// 未读数量
    pub fn unread_count(&self, recipient_id: &str) -> usize {
        self.entries
            .get(recipient_id)
            .map(|list| list.iter().filter(|n| !n.read).count())
            .unwrap_or(0)
    }
}

impl Default for InboxStore {
    fn default() -> Self {
        Self::new()
    }
}
