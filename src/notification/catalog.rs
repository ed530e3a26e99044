//! 通知目录 - 把领域事实转换为通知草稿的纯构建函数
//!
//! 所有构建函数都是确定性的：相同输入产生相同的去重键。
//! id 与 created_at 每次生成，不参与去重。

use chrono::NaiveDate;

use crate::notification::model::{Category, Notification, NotificationAction};

/// 去重键：`recipient:category:subject-slug`
fn dedup_key(recipient: &str, category: Category, subject: &str) -> String {
    format!("{}:{}:{}", recipient, category.as_str(), slug(subject))
}

/// 主体标识归一化：小写、非字母数字折叠为 '-'
fn slug(subject: &str) -> String {
    let mut out = String::with_capacity(subject.len());
    let mut last_dash = true;
    for c in subject.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// 数量显示：整数去掉小数点
fn fmt_qty(q: f64) -> String {
    if (q - q.trunc()).abs() < f64::EPSILON {
        format!("{}", q as i64)
    } else {
        format!("{}", q)
    }
}

/// 库存提醒
///
/// 数量低于最低阈值的一半 -> `stock_critical`；低于阈值 -> `stock_bas`；
/// 否则不产生草稿。
pub fn stock_alert(
    recipient: &str,
    item_name: &str,
    quantity: f64,
    minimum: f64,
) -> Option<Notification> {
    if quantity >= minimum {
        return None;
    }

    let (category, title, body) = if quantity < minimum * 0.5 {
        (
            Category::StockCritical,
            format!("Stock critical: {item_name}"),
            format!(
                "Only {} of {} left (minimum {}). Add it to the shopping list.",
                fmt_qty(quantity),
                item_name,
                fmt_qty(minimum)
            ),
        )
    } else {
        (
            Category::StockBas,
            format!("Stock low: {item_name}"),
            format!(
                "{} of {} left, below the minimum of {}.",
                fmt_qty(quantity),
                item_name,
                fmt_qty(minimum)
            ),
        )
    };

    Some(
        Notification::draft(
            recipient,
            category,
            title,
            body,
            dedup_key(recipient, category, item_name),
        )
        .with_action(NotificationAction {
            action: "view_inventory".to_string(),
            title: "Open pantry".to_string(),
            url: Some("/inventory".to_string()),
        }),
    )
}

/// 过期提醒
///
/// `days_until_expiry <= 0` -> `expiry_critical`（"expired" 措辞）；
/// 恰好 1 天 -> "tomorrow" 措辞；其余 -> "in N days"。
/// 上游负责提醒窗口（默认只对 <= 7 天的条目调用）。
pub fn expiry_alert(recipient: &str, item_name: &str, days_until_expiry: i64) -> Notification {
    let (category, title, body) = if days_until_expiry < 0 {
        let days = -days_until_expiry;
        (
            Category::ExpiryCritical,
            format!("Expired: {item_name}"),
            format!(
                "{item_name} expired {days} day{} ago. Check before using it.",
                plural(days)
            ),
        )
    } else if days_until_expiry == 0 {
        (
            Category::ExpiryCritical,
            format!("Expired: {item_name}"),
            format!("{item_name} expires today. Use it now or throw it out."),
        )
    } else if days_until_expiry == 1 {
        (
            Category::ExpiryAlert,
            format!("{item_name} expires tomorrow"),
            format!("{item_name} expires tomorrow. Plan a meal around it."),
        )
    } else {
        (
            Category::ExpiryAlert,
            format!("{item_name} expires soon"),
            format!("{item_name} expires in {days_until_expiry} days."),
        )
    };

    Notification::draft(
        recipient,
        category,
        title,
        body,
        dedup_key(recipient, category, item_name),
    )
    .with_action(NotificationAction {
        action: "view_item".to_string(),
        title: "Open pantry".to_string(),
        url: Some("/inventory".to_string()),
    })
}

/// 用餐提醒
pub fn meal_reminder(recipient: &str, meal_name: &str, scheduled_for: &str) -> Notification {
    Notification::draft(
        recipient,
        Category::MealReminder,
        format!("Meal reminder: {meal_name}"),
        format!("{meal_name} is planned for {scheduled_for}."),
        dedup_key(recipient, Category::MealReminder, meal_name),
    )
    .with_action(NotificationAction {
        action: "view_meal_plan".to_string(),
        title: "Open meal plan".to_string(),
        url: Some("/meals".to_string()),
    })
}

/// 共享清单更新
pub fn shared_list_update(
    recipient: &str,
    list_name: &str,
    change_summary: &str,
) -> Notification {
    Notification::draft(
        recipient,
        Category::SharedListUpdate,
        format!("List updated: {list_name}"),
        change_summary.to_string(),
        dedup_key(recipient, Category::SharedListUpdate, list_name),
    )
    .with_action(NotificationAction {
        action: "view_list".to_string(),
        title: "Open list".to_string(),
        url: Some("/lists".to_string()),
    })
}

/// 紧急采购：高优先级且尚未购买的清单条目
pub fn shopping_urgent(recipient: &str, item_name: &str, list_name: &str) -> Notification {
    Notification::draft(
        recipient,
        Category::SharedListUpdate,
        format!("Still to buy: {item_name}"),
        format!("{item_name} on \"{list_name}\" is high priority and not purchased yet."),
        dedup_key(recipient, Category::SharedListUpdate, item_name),
    )
    .with_priority(4)
    .with_action(NotificationAction {
        action: "view_list".to_string(),
        title: "Open list".to_string(),
        url: Some("/lists".to_string()),
    })
}

/// 家庭活动提醒
pub fn activity_reminder(recipient: &str, activity_name: &str, when: &str) -> Notification {
    Notification::draft(
        recipient,
        Category::ActivityReminder,
        format!("Upcoming: {activity_name}"),
        format!("{activity_name} is scheduled for {when}."),
        dedup_key(recipient, Category::ActivityReminder, activity_name),
    )
}

/// 例行任务逾期
pub fn task_overdue(recipient: &str, task_name: &str, days_late: i64) -> Notification {
    Notification::draft(
        recipient,
        Category::ActivityReminder,
        format!("Overdue: {task_name}"),
        format!(
            "{task_name} was due {days_late} day{} ago.",
            plural(days_late)
        ),
        dedup_key(recipient, Category::ActivityReminder, task_name),
    )
    .with_priority(4)
}

/// 今天到期的任务
pub fn task_due_today(recipient: &str, task_name: &str) -> Notification {
    Notification::draft(
        recipient,
        Category::ActivityReminder,
        format!("Due today: {task_name}"),
        format!("{task_name} is due today."),
        dedup_key(recipient, Category::ActivityReminder, task_name),
    )
}

/// 里程碑提醒（生日、纪念日等）
pub fn milestone_reminder(recipient: &str, person: &str, milestone: &str) -> Notification {
    let subject = format!("{person} {milestone}");
    Notification::draft(
        recipient,
        Category::MilestoneReminder,
        format!("Milestone: {milestone}"),
        format!("{person} — {milestone}."),
        dedup_key(recipient, Category::MilestoneReminder, &subject),
    )
}

/// 每日摘要：跨类别计数汇总为一条通知
///
/// 去重键包含日期，同一天最多一条摘要。
pub fn daily_digest(
    recipient: &str,
    date: NaiveDate,
    counts: &[(Category, usize)],
) -> Notification {
    let total: usize = counts.iter().map(|(_, n)| n).sum();
    let mut parts: Vec<String> = Vec::new();
    for (category, n) in counts {
        if *n > 0 {
            parts.push(format!("{} {}", n, digest_label(*category)));
        }
    }
    let body = if parts.is_empty() {
        "Nothing needs your attention today.".to_string()
    } else {
        parts.join(" · ")
    };

    Notification::draft(
        recipient,
        Category::DailyDigest,
        format!("Daily summary: {total} item{}", plural(total as i64)),
        body,
        format!(
            "{}:{}:{}",
            recipient,
            Category::DailyDigest.as_str(),
            date.format("%Y-%m-%d")
        ),
    )
}

fn digest_label(category: Category) -> &'static str {
    match category {
        Category::StockBas => "low stock",
        Category::StockCritical => "critical stock",
        Category::ExpiryAlert => "expiring soon",
        Category::ExpiryCritical => "expired",
        Category::MealReminder => "meal reminders",
        Category::SharedListUpdate => "list updates",
        Category::ActivityReminder => "tasks due",
        Category::MilestoneReminder => "milestones",
        Category::DailyDigest => "summaries",
    }
}

fn plural(n: i64) -> &'static str {
    if n == 1 { "" } else { "s" }
}
