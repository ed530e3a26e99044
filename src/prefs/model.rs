//! 订阅与偏好数据模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::notification::Category;

/// 设备推送订阅
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subscription {
    /// 接收者 ID
    pub recipient_id: String,
    /// 推送服务 endpoint（必须为 https）
    pub endpoint: String,
    /// 客户端 P-256 公钥（base64url）
    pub p256dh: String,
    /// 客户端 auth secret（base64url）
    pub auth: String,
    /// 是否有效（provider 返回 gone/not-found 时软删除）
    pub active: bool,
    /// 最近一次成功投递时间
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
}

/// 客户端注册文档（wire 格式）
///
/// ```json
/// {"endpoint": "https://...", "keys": {"p256dh": "...", "auth": "..."}}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionRegistration {
    pub endpoint: String,
    pub keys: SubscriptionKeys,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

impl SubscriptionRegistration {
    /// 转换为待持久化的订阅（校验在 store 边界进行）
    pub fn into_subscription(self, recipient_id: impl Into<String>) -> Subscription {
        Subscription {
            recipient_id: recipient_id.into(),
            endpoint: self.endpoint,
            p256dh: self.keys.p256dh,
            auth: self.keys.auth,
            active: true,
            last_used: None,
        }
    }
}

/// 每个接收者的通知偏好
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Preferences {
    /// 接收者 ID
    pub recipient_id: String,
    /// 库存提醒开关（stock_bas + stock_critical）
    pub stock_alerts: bool,
    /// 过期提醒开关（expiry_alert + expiry_critical）
    pub expiry_alerts: bool,
    /// 用餐提醒开关
    pub meal_reminders: bool,
    /// 共享清单更新开关
    pub list_updates: bool,
    /// 活动提醒开关
    pub activity_reminders: bool,
    /// 里程碑提醒开关
    pub milestone_reminders: bool,
    /// 免打扰开始小时（0-23，null 表示无免打扰）
    #[serde(default)]
    pub quiet_hours_start: Option<u8>,
    /// 免打扰结束小时（0-23）
    #[serde(default)]
    pub quiet_hours_end: Option<u8>,
    /// 每小时最多通知条数（>= 1）
    pub max_per_hour: u32,
    /// 摘要模式：不逐条推送，改为每日一条汇总
    #[serde(default)]
    pub digest_mode: bool,
}

impl Preferences {
    /// 某接收者的默认偏好：全部开启、无免打扰、每小时 10 条
    pub fn default_for(recipient_id: impl Into<String>) -> Self {
        Self {
            recipient_id: recipient_id.into(),
            stock_alerts: true,
            expiry_alerts: true,
            meal_reminders: true,
            list_updates: true,
            activity_reminders: true,
            milestone_reminders: true,
            quiet_hours_start: None,
            quiet_hours_end: None,
            max_per_hour: 10,
            digest_mode: false,
        }
    }

    /// 类别是否开启
    ///
    /// 每日摘要不受单项开关控制（摘要本身就是音量控制手段）。
    pub fn category_enabled(&self, category: Category) -> bool {
        match category {
            Category::StockBas | Category::StockCritical => self.stock_alerts,
            Category::ExpiryAlert | Category::ExpiryCritical => self.expiry_alerts,
            Category::MealReminder => self.meal_reminders,
            Category::SharedListUpdate => self.list_updates,
            Category::ActivityReminder => self.activity_reminders,
            Category::MilestoneReminder => self.milestone_reminders,
            Category::DailyDigest => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_wire_format() {
        let json = r#"{"endpoint":"https://push.example.org/send/abc","keys":{"p256dh":"pk","auth":"ak"}}"#;
        let reg: SubscriptionRegistration = serde_json::from_str(json).unwrap();
        let sub = reg.into_subscription("alice");
        assert_eq!(sub.recipient_id, "alice");
        assert_eq!(sub.endpoint, "https://push.example.org/send/abc");
        assert_eq!(sub.p256dh, "pk");
        assert_eq!(sub.auth, "ak");
        assert!(sub.active);
        assert!(sub.last_used.is_none());
    }

    #[test]
    fn test_category_toggles() {
        let mut prefs = Preferences::default_for("alice");
        prefs.stock_alerts = false;
        assert!(!prefs.category_enabled(Category::StockBas));
        assert!(!prefs.category_enabled(Category::StockCritical));
        assert!(prefs.category_enabled(Category::ExpiryAlert));
        // 摘要永远可投递
        assert!(prefs.category_enabled(Category::DailyDigest));
    }
}
