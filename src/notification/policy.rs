//! 策略评估器 - 偏好开关、免打扰窗口与限流的纯决策函数

use crate::notification::model::{reason, Category};
use crate::prefs::Preferences;

/// 可以穿透免打扰窗口的类别
///
/// 显式策略表：只有这两个 critical 类别可以在免打扰时段送达。
/// 调整穿透集合时改这里，不要依赖类别命名。
pub const QUIET_HOURS_OVERRIDES: &[Category] =
    &[Category::StockCritical, Category::ExpiryCritical];

/// 策略决策
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyDecision {
    /// 是否允许发送
    pub allowed: bool,
    /// 拒绝原因码（允许时为空）
    pub reason: &'static str,
}

impl PolicyDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: "",
        }
    }

    fn deny(reason: &'static str) -> Self {
        Self {
            allowed: false,
            reason,
        }
    }
}

/// 评估一条候选通知此刻是否可以发送
///
/// 评估顺序固定：
/// 1. 类别被偏好关闭 -> `disabled`
/// 2. 当前小时在免打扰窗口内且类别不在穿透表中 -> `quiet_hours`
/// 3. 当前小时桶计数已达 max_per_hour -> `rate_limited`
/// 4. 允许
pub fn evaluate(
    category: Category,
    prefs: &Preferences,
    current_hour: u8,
    bucket_count: u32,
) -> PolicyDecision {
    if !prefs.category_enabled(category) {
        return PolicyDecision::deny(reason::DISABLED);
    }

    if in_quiet_hours(prefs.quiet_hours_start, prefs.quiet_hours_end, current_hour)
        && !QUIET_HOURS_OVERRIDES.contains(&category)
    {
        return PolicyDecision::deny(reason::QUIET_HOURS);
    }

    if bucket_count >= prefs.max_per_hour {
        return PolicyDecision::deny(reason::RATE_LIMITED);
    }

    PolicyDecision::allow()
}

/// 免打扰窗口成员判断
///
/// start S、end E、hour h 均为 0..=23：
/// - S 或 E 缺失、或 S == E 时窗口不生效
/// - S < E：S <= h < E
/// - S > E（跨午夜）：h >= S 或 h < E
pub fn in_quiet_hours(start: Option<u8>, end: Option<u8>, hour: u8) -> bool {
    let (Some(s), Some(e)) = (start, end) else {
        return false;
    };
    if s == e {
        return false;
    }
    if s < e {
        s <= hour && hour < e
    } else {
        hour >= s || hour < e
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 暴力法：把窗口展开为 {S, S+1, ..., E-1} mod 24 再查成员
    fn brute_force_member(s: u8, e: u8, h: u8) -> bool {
        if s == e {
            return false;
        }
        let mut cursor = s;
        while cursor != e {
            if cursor == h {
                return true;
            }
            cursor = (cursor + 1) % 24;
        }
        false
    }

    #[test]
    fn test_quiet_hours_matches_brute_force_for_all_pairs() {
        for s in 0u8..24 {
            for e in 0u8..24 {
                for h in 0u8..24 {
                    assert_eq!(
                        in_quiet_hours(Some(s), Some(e), h),
                        brute_force_member(s, e, h),
                        "mismatch at S={s} E={e} h={h}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_quiet_hours_rotation_invariance() {
        // 同步旋转 S、E、h 不改变成员关系
        for s in 0u8..24 {
            for e in 0u8..24 {
                for h in 0u8..24 {
                    let base = in_quiet_hours(Some(s), Some(e), h);
                    for k in 1u8..24 {
                        let rotated = in_quiet_hours(
                            Some((s + k) % 24),
                            Some((e + k) % 24),
                            (h + k) % 24,
                        );
                        assert_eq!(base, rotated, "rotation broke at S={s} E={e} h={h} k={k}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_quiet_hours_null_or_equal_never_applies() {
        for h in 0u8..24 {
            assert!(!in_quiet_hours(None, None, h));
            assert!(!in_quiet_hours(Some(8), None, h));
            assert!(!in_quiet_hours(None, Some(8), h));
            assert!(!in_quiet_hours(Some(8), Some(8), h));
        }
    }

    fn night_owl_prefs() -> Preferences {
        let mut prefs = Preferences::default_for("alice");
        prefs.quiet_hours_start = Some(22);
        prefs.quiet_hours_end = Some(7);
        prefs.max_per_hour = 5;
        prefs
    }

    #[test]
    fn test_disabled_category_denied_first() {
        let mut prefs = night_owl_prefs();
        prefs.stock_alerts = false;
        // 即使同时也在免打扰窗口，disabled 优先
        let decision = evaluate(Category::StockBas, &prefs, 23, 0);
        assert!(!decision.allowed);
        assert_eq!(decision.reason, reason::DISABLED);
    }

    #[test]
    fn test_wraparound_window_denies_non_override_category() {
        let prefs = night_owl_prefs();
        let decision = evaluate(Category::StockBas, &prefs, 23, 0);
        assert!(!decision.allowed);
        assert_eq!(decision.reason, reason::QUIET_HOURS);
    }

    #[test]
    fn test_override_category_passes_quiet_hours() {
        let prefs = night_owl_prefs();
        let decision = evaluate(Category::ExpiryCritical, &prefs, 23, 0);
        assert!(decision.allowed);
        assert_eq!(decision.reason, "");
    }

    #[test]
    fn test_rate_limit_applies_after_quiet_hours() {
        let prefs = night_owl_prefs();
        // 白天，窗口外
        let decision = evaluate(Category::StockBas, &prefs, 12, 5);
        assert!(!decision.allowed);
        assert_eq!(decision.reason, reason::RATE_LIMITED);

        let under = evaluate(Category::StockBas, &prefs, 12, 4);
        assert!(under.allowed);
    }

    #[test]
    fn test_override_category_still_rate_limited() {
        // 穿透只豁免免打扰，不豁免限流
        let prefs = night_owl_prefs();
        let decision = evaluate(Category::ExpiryCritical, &prefs, 23, 5);
        assert!(!decision.allowed);
        assert_eq!(decision.reason, reason::RATE_LIMITED);
    }

    #[test]
    fn test_override_table_is_exactly_the_critical_pair() {
        assert!(QUIET_HOURS_OVERRIDES.contains(&Category::StockCritical));
        assert!(QUIET_HOURS_OVERRIDES.contains(&Category::ExpiryCritical));
        assert_eq!(QUIET_HOURS_OVERRIDES.len(), 2);
    }
}
