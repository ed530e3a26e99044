//! 写入校验 - 订阅与偏好的入库门禁
//!
//! 校验失败收集全部原因后一次性拒绝，不持久化任何内容。

use tracing::warn;
use url::Url;

use crate::error::{Error, Result};
use crate::prefs::model::{Preferences, Subscription};

/// max_per_hour 超过该值视为疑似配置错误（只告警，不拒绝）
const MAX_PER_HOUR_SANITY: u32 = 100;

/// 校验订阅文档
///
/// endpoint 必须是合法 URL 且使用 https，两个凭据键都必须非空。
pub fn validate_subscription(sub: &Subscription) -> Result<()> {
    let mut reasons = Vec::new();

    match Url::parse(&sub.endpoint) {
        Ok(url) => {
            if url.scheme() != "https" {
                reasons.push(format!(
                    "endpoint must use https, got {}",
                    url.scheme()
                ));
            }
        }
        Err(e) => reasons.push(format!("endpoint is not a valid URL: {e}")),
    }

    if sub.p256dh.trim().is_empty() {
        reasons.push("p256dh key is empty".to_string());
    }
    if sub.auth.trim().is_empty() {
        reasons.push("auth key is empty".to_string());
    }
    if sub.recipient_id.trim().is_empty() {
        reasons.push("recipient_id is empty".to_string());
    }

    if reasons.is_empty() {
        Ok(())
    } else {
        Err(Error::validation(reasons))
    }
}

/// 校验偏好文档
///
/// 小时字段在 [0,23] 或为空；max_per_hour >= 1。超过 100 接受但告警。
pub fn validate_preferences(prefs: &Preferences) -> Result<()> {
    let mut reasons = Vec::new();

    for (field, value) in [
        ("quiet_hours_start", prefs.quiet_hours_start),
        ("quiet_hours_end", prefs.quiet_hours_end),
    ] {
        if let Some(hour) = value {
            if hour > 23 {
                reasons.push(format!("{field} must be in 0..=23, got {hour}"));
            }
        }
    }

    if prefs.max_per_hour < 1 {
        reasons.push("max_per_hour must be >= 1".to_string());
    } else if prefs.max_per_hour > MAX_PER_HOUR_SANITY {
        warn!(
            recipient = %prefs.recipient_id,
            max_per_hour = prefs.max_per_hour,
            "max_per_hour unusually high, likely a misconfiguration"
        );
    }

    if prefs.recipient_id.trim().is_empty() {
        reasons.push("recipient_id is empty".to_string());
    }

    if reasons.is_empty() {
        Ok(())
    } else {
        Err(Error::validation(reasons))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_subscription() -> Subscription {
        Subscription {
            recipient_id: "alice".to_string(),
            endpoint: "https://push.example.org/send/abc123".to_string(),
            p256dh: "BJx1".to_string(),
            auth: "sekrit".to_string(),
            active: true,
            last_used: None,
        }
    }

    #[test]
    fn test_valid_subscription_passes() {
        assert!(validate_subscription(&valid_subscription()).is_ok());
    }

    #[test]
    fn test_insecure_endpoint_rejected() {
        let mut sub = valid_subscription();
        sub.endpoint = "http://push.example.org/send/abc123".to_string();
        let err = validate_subscription(&sub).unwrap_err();
        assert!(err.to_string().contains("https"));
    }

    #[test]
    fn test_all_reasons_are_itemized() {
        let mut sub = valid_subscription();
        sub.endpoint = "http://push.example.org/x".to_string();
        sub.p256dh = String::new();
        sub.auth = "  ".to_string();

        let Error::Validation { reasons } = validate_subscription(&sub).unwrap_err() else {
            panic!("expected validation error");
        };
        assert_eq!(reasons.len(), 3);
    }

    #[test]
    fn test_garbage_endpoint_rejected() {
        let mut sub = valid_subscription();
        sub.endpoint = "not a url".to_string();
        assert!(validate_subscription(&sub).is_err());
    }

    #[test]
    fn test_preferences_hour_bounds() {
        let mut prefs = Preferences::default_for("alice");
        prefs.quiet_hours_start = Some(24);
        let err = validate_preferences(&prefs).unwrap_err();
        assert!(err.to_string().contains("quiet_hours_start"));

        prefs.quiet_hours_start = Some(23);
        prefs.quiet_hours_end = Some(0);
        assert!(validate_preferences(&prefs).is_ok());

        prefs.quiet_hours_start = None;
        prefs.quiet_hours_end = None;
        assert!(validate_preferences(&prefs).is_ok());
    }

    #[test]
    fn test_max_per_hour_zero_rejected() {
        let mut prefs = Preferences::default_for("alice");
        prefs.max_per_hour = 0;
        assert!(validate_preferences(&prefs).is_err());
    }

    #[test]
    fn test_max_per_hour_above_sanity_accepted() {
        // 疑似错误配置：告警但不拒绝
        let mut prefs = Preferences::default_for("alice");
        prefs.max_per_hour = 500;
        assert!(validate_preferences(&prefs).is_ok());
    }
}
