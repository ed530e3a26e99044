//! 通知数据模型 - 通知、类别与分发结果

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 通知类别
///
/// Wire 名称沿用产品既有的 snake_case 标识（`stock_bas` 为历史命名，保留）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// 库存偏低
    StockBas,
    /// 库存严重不足
    StockCritical,
    /// 即将过期
    ExpiryAlert,
    /// 已过期或当天过期
    ExpiryCritical,
    /// 用餐提醒
    MealReminder,
    /// 共享清单更新
    SharedListUpdate,
    /// 家庭活动提醒
    ActivityReminder,
    /// 里程碑提醒
    MilestoneReminder,
    /// 每日摘要
    DailyDigest,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::StockBas => "stock_bas",
            Category::StockCritical => "stock_critical",
            Category::ExpiryAlert => "expiry_alert",
            Category::ExpiryCritical => "expiry_critical",
            Category::MealReminder => "meal_reminder",
            Category::SharedListUpdate => "shared_list_update",
            Category::ActivityReminder => "activity_reminder",
            Category::MilestoneReminder => "milestone_reminder",
            Category::DailyDigest => "daily_digest",
        }
    }

    /// 默认优先级（1-5，与 topic broker 的刻度一致）
    pub fn default_priority(&self) -> u8 {
        match self {
            Category::StockCritical | Category::ExpiryCritical => 5,
            Category::StockBas | Category::ExpiryAlert => 4,
            Category::MealReminder
            | Category::ActivityReminder
            | Category::MilestoneReminder => 3,
            Category::SharedListUpdate | Category::DailyDigest => 2,
        }
    }

    /// Topic broker 的默认 tags
    pub fn default_tags(&self) -> &'static str {
        match self {
            Category::StockBas | Category::StockCritical => "package,warning",
            Category::ExpiryAlert | Category::ExpiryCritical => "hourglass,warning",
            Category::MealReminder => "fork_and_knife",
            Category::SharedListUpdate => "shopping_cart",
            Category::ActivityReminder => "calendar",
            Category::MilestoneReminder => "tada",
            Category::DailyDigest => "newspaper",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 通知上的可选动作（渠道以各自的方式渲染）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationAction {
    /// 动作标识
    pub action: String,
    /// 展示标题
    pub title: String,
    /// 点击跳转 URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// 通知
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// 通知 ID (uuid v4)
    pub id: String,
    /// 类别
    pub category: Category,
    /// 标题
    pub title: String,
    /// 正文
    pub body: String,
    /// 优先级（1-5）
    pub priority: u8,
    /// 去重键（同一主体的未读通知最多一条）
    pub dedup_key: String,
    /// 动作列表
    #[serde(default)]
    pub actions: Vec<NotificationAction>,
    /// 图标提示
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 接收者 ID
    pub recipient_id: String,
    /// 已读标记
    #[serde(default)]
    pub read: bool,
}

impl Notification {
    /// 创建通知草稿（catalog 使用）
    pub fn draft(
        recipient_id: impl Into<String>,
        category: Category,
        title: impl Into<String>,
        body: impl Into<String>,
        dedup_key: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            category,
            title: title.into(),
            body: body.into(),
            priority: category.default_priority(),
            dedup_key: dedup_key.into(),
            actions: Vec::new(),
            icon: None,
            created_at: Utc::now(),
            recipient_id: recipient_id.into(),
            read: false,
        }
    }

    /// 覆盖默认优先级
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// 附加动作
    pub fn with_action(mut self, action: NotificationAction) -> Self {
        self.actions.push(action);
        self
    }

    /// 设置图标提示
    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }
}

/// 单次分发的结果
///
/// 成功、传输失败、策略拒绝与重复都通过同一结构返回，调用方可以区分
/// "出错了" 与 "没有出错，只是被抑制了"。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchResult {
    /// 是否成功送达（至少一个渠道）
    pub success: bool,
    /// 渠道名（聚合成功时为逗号连接的成功渠道）
    pub channel: String,
    /// 消息或拒绝原因
    pub message: String,
    /// 通知 ID
    pub notification_id: String,
}

/// 策略拒绝与去重使用的原因码
pub mod reason {
    pub const DISABLED: &str = "disabled";
    pub const QUIET_HOURS: &str = "quiet_hours";
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const DUPLICATE: &str = "duplicate";
}

impl DispatchResult {
    pub fn sent(channel: impl Into<String>, notification_id: impl Into<String>) -> Self {
        Self {
            success: true,
            channel: channel.into(),
            message: String::new(),
            notification_id: notification_id.into(),
        }
    }

    pub fn failed(
        channel: impl Into<String>,
        message: impl Into<String>,
        notification_id: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            channel: channel.into(),
            message: message.into(),
            notification_id: notification_id.into(),
        }
    }

    /// 策略拒绝：不是错误，channel 固定为 "policy"
    pub fn denied(reason: &'static str, notification_id: impl Into<String>) -> Self {
        Self {
            success: false,
            channel: "policy".to_string(),
            message: reason.to_string(),
            notification_id: notification_id.into(),
        }
    }

    /// 去重守卫命中
    pub fn duplicate(notification_id: impl Into<String>) -> Self {
        Self {
            success: false,
            channel: "dedup".to_string(),
            message: reason::DUPLICATE.to_string(),
            notification_id: notification_id.into(),
        }
    }

    /// 是否为 "被抑制" 而非 "出错"
    pub fn is_suppressed(&self) -> bool {
        !self.success
            && matches!(
                self.message.as_str(),
                reason::DISABLED | reason::QUIET_HOURS | reason::RATE_LIMITED | reason::DUPLICATE
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_wire_names() {
        assert_eq!(
            serde_json::to_string(&Category::StockBas).unwrap(),
            "\"stock_bas\""
        );
        assert_eq!(
            serde_json::to_string(&Category::ExpiryCritical).unwrap(),
            "\"expiry_critical\""
        );
        let parsed: Category = serde_json::from_str("\"shared_list_update\"").unwrap();
        assert_eq!(parsed, Category::SharedListUpdate);
    }

    #[test]
    fn test_default_priorities_stay_on_broker_scale() {
        for category in [
            Category::StockBas,
            Category::StockCritical,
            Category::ExpiryAlert,
            Category::ExpiryCritical,
            Category::MealReminder,
            Category::SharedListUpdate,
            Category::ActivityReminder,
            Category::MilestoneReminder,
            Category::DailyDigest,
        ] {
            let p = category.default_priority();
            assert!((1..=5).contains(&p), "{category} priority {p} out of range");
        }
        assert_eq!(Category::StockCritical.default_priority(), 5);
        assert!(Category::StockBas.default_priority() < 5);
    }

    #[test]
    fn test_dispatch_result_suppressed_vs_failed() {
        let denied = DispatchResult::denied(reason::QUIET_HOURS, "n-1");
        assert!(denied.is_suppressed());
        assert!(!denied.success);

        let dup = DispatchResult::duplicate("n-1");
        assert!(dup.is_suppressed());

        let failed = DispatchResult::failed("topic_push", "HTTP 503", "n-1");
        assert!(!failed.is_suppressed());

        let sent = DispatchResult::sent("local", "n-1");
        assert!(!sent.is_suppressed());
        assert!(sent.success);
    }

    #[test]
    fn test_draft_builder_sets_defaults() {
        let n = Notification::draft("alice", Category::StockCritical, "t", "b", "alice:stock_critical:milk");
        assert_eq!(n.priority, 5);
        assert!(!n.read);
        assert!(n.actions.is_empty());
        assert_eq!(n.recipient_id, "alice");
    }
}
