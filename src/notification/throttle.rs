//! 限流计数器 - 每接收者每小时的桶计数
//!
//! 桶键 = 接收者 ID + `YYYY-MM-DD-HH`。默认实现为进程内存，
//! 多实例部署可以通过 trait 换成共享后端。

use chrono::{DateTime, Local};
use dashmap::DashMap;

/// 限流桶键
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketKey {
    /// 接收者 ID
    pub recipient_id: String,
    /// 小时桶，格式 `YYYY-MM-DD-HH`
    pub hour_bucket: String,
}

impl BucketKey {
    /// 从本地时间生成当前小时的桶键
    pub fn at(recipient_id: impl Into<String>, now: DateTime<Local>) -> Self {
        Self {
            recipient_id: recipient_id.into(),
            hour_bucket: now.format("%Y-%m-%d-%H").to_string(),
        }
    }
}

impl std::fmt::Display for BucketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.recipient_id, self.hour_bucket)
    }
}

/// 限流计数器接口
pub trait ThrottleCounter: Send + Sync {
    /// 当前桶的计数（桶翻转后视为 0）
    fn count(&self, key: &BucketKey) -> u32;

    /// 递增并返回新计数；检测到小时桶翻转时先清零
    fn increment(&self, key: &BucketKey) -> u32;
}

/// 每个接收者最近使用的小时桶
#[derive(Debug, Clone)]
struct HourWindow {
    hour_bucket: String,
    count: u32,
}

/// 进程内存限流计数器
///
/// 按接收者分片，不跨进程持久化。
#[derive(Debug, Default)]
pub struct InMemoryThrottle {
    windows: DashMap<String, HourWindow>,
}

impl InMemoryThrottle {
    pub fn new() -> Self {
        Self {
            windows: DashMap::new(),
        }
    }
}

impl ThrottleCounter for InMemoryThrottle {
    fn count(&self, key: &BucketKey) -> u32 {
        match self.windows.get(&key.recipient_id) {
            Some(window) if window.hour_bucket == key.hour_bucket => window.count,
            _ => 0,
        }
    }

    fn increment(&self, key: &BucketKey) -> u32 {
        let mut entry = self
            .windows
            .entry(key.recipient_id.clone())
            .or_insert_with(|| HourWindow {
                hour_bucket: key.hour_bucket.clone(),
                count: 0,
            });

        if entry.hour_bucket != key.hour_bucket {
            // 小时桶翻转，旧桶被取代
            entry.hour_bucket = key.hour_bucket.clone();
            entry.count = 0;
        }

        entry.count += 1;
        entry.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn key(recipient: &str, bucket: &str) -> BucketKey {
        BucketKey {
            recipient_id: recipient.to_string(),
            hour_bucket: bucket.to_string(),
        }
    }

    #[test]
    fn test_first_increment_starts_at_one() {
        let throttle = InMemoryThrottle::new();
        let k = key("alice", "2026-08-06-14");
        assert_eq!(throttle.count(&k), 0);
        assert_eq!(throttle.increment(&k), 1);
        assert_eq!(throttle.increment(&k), 2);
        assert_eq!(throttle.count(&k), 2);
    }

    #[test]
    fn test_hour_rollover_resets_count() {
        let throttle = InMemoryThrottle::new();
        let h14 = key("alice", "2026-08-06-14");
        let h15 = key("alice", "2026-08-06-15");

        for _ in 0..5 {
            throttle.increment(&h14);
        }
        assert_eq!(throttle.count(&h14), 5);

        // 新小时桶：计数清零后再递增
        assert_eq!(throttle.count(&h15), 0);
        assert_eq!(throttle.increment(&h15), 1);

        // 旧桶已被取代
        assert_eq!(throttle.count(&h14), 0);
    }

    #[test]
    fn test_recipients_are_independent() {
        let throttle = InMemoryThrottle::new();
        let alice = key("alice", "2026-08-06-14");
        let bob = key("bob", "2026-08-06-14");

        throttle.increment(&alice);
        throttle.increment(&alice);
        assert_eq!(throttle.count(&alice), 2);
        assert_eq!(throttle.count(&bob), 0);
    }

    #[test]
    fn test_bucket_key_formatting() {
        let now = Local.with_ymd_and_hms(2026, 8, 6, 14, 35, 0).unwrap();
        let k = BucketKey::at("alice", now);
        assert_eq!(k.hour_bucket, "2026-08-06-14");
        assert_eq!(k.to_string(), "alice:2026-08-06-14");
    }

    #[test]
    fn test_day_boundary_is_a_distinct_bucket() {
        // 23 点与次日 0 点是不同的桶
        let throttle = InMemoryThrottle::new();
        let late = key("alice", "2026-08-06-23");
        let midnight = key("alice", "2026-08-07-00");

        throttle.increment(&late);
        assert_eq!(throttle.count(&midnight), 0);
        assert_eq!(throttle.increment(&midnight), 1);
    }
}
