//! 调度器 - 定时轮询协作方并把事实转成通知
//!
//! 状态机 Idle -> Running -> Stopped（终态）。一次 tick 查询三类事实
//! （逾期任务、今日到期任务、紧急采购条目），经 catalog 生成草稿后
//! 通过有界并发的 worker 池提交给分发器，收集全部结果返回。
//!
//! 摘要模式的接收者不参与逐条 tick，由独立的 digest tick 每日汇总。
//! 循环用 CancellationToken 停止：阻止下一次 tick 开始，在一个
//! tick 间隔内退出，不等待超过单次 tick 自身的超时。

pub mod collaborators;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate};
use futures::stream::{self, StreamExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::notification::catalog;
use crate::notification::model::{Category, DispatchResult, Notification};
use crate::notification::Dispatcher;
use crate::prefs::PreferenceStore;

pub use collaborators::{DomainQueries, HttpDomainQueries, ShoppingFact, TaskFact};

/// 调度器配置
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// tick 间隔
    pub tick_interval: Duration,
    /// 单次 tick 内的分发并发上限
    pub concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(300),
            concurrency: 8,
        }
    }
}

/// 调度器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    /// 终态：停止后不再启动
    Stopped,
}

const STATE_IDLE: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPED: u8 = 2;

/// 调度器
pub struct Scheduler {
    dispatcher: Arc<Dispatcher>,
    prefs: Arc<PreferenceStore>,
    queries: Arc<dyn DomainQueries>,
    config: SchedulerConfig,
    state: AtomicU8,
}

impl Scheduler {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        prefs: Arc<PreferenceStore>,
        queries: Arc<dyn DomainQueries>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            dispatcher,
            prefs,
            queries,
            config,
            state: AtomicU8::new(STATE_IDLE),
        }
    }

    pub fn state(&self) -> SchedulerState {
        match self.state.load(Ordering::SeqCst) {
            STATE_RUNNING => SchedulerState::Running,
            STATE_STOPPED => SchedulerState::Stopped,
            _ => SchedulerState::Idle,
        }
    }

    /// 查询协作方并生成通知草稿；单个查询失败只丢弃该来源
    async fn collect_drafts(&self, today: NaiveDate) -> Vec<Notification> {
        let mut drafts = Vec::new();

        match self.queries.overdue_tasks(today).await {
            Ok(facts) => {
                for fact in facts {
                    let days_late = (today - fact.due_date).num_days().max(1);
                    drafts.push(catalog::task_overdue(
                        &fact.recipient_id,
                        &fact.name,
                        days_late,
                    ));
                }
            }
            Err(e) => warn!(error = %e, "Overdue task query failed, skipping source"),
        }

        match self.queries.tasks_due_today(today).await {
            Ok(facts) => {
                for fact in facts {
                    drafts.push(catalog::task_due_today(&fact.recipient_id, &fact.name));
                }
            }
            Err(e) => warn!(error = %e, "Due-today task query failed, skipping source"),
        }

        match self.queries.urgent_shopping_items().await {
            Ok(facts) => {
                for fact in facts {
                    drafts.push(catalog::shopping_urgent(
                        &fact.recipient_id,
                        &fact.name,
                        &fact.list_name,
                    ));
                }
            }
            Err(e) => warn!(error = %e, "Urgent shopping query failed, skipping source"),
        }

        drafts
    }

    /// 接收者是否处于摘要模式（偏好读取失败按默认偏好处理）
    async fn digest_mode(&self, recipient_id: &str) -> bool {
        match self.prefs.preferences(recipient_id).await {
            Ok(prefs) => prefs.digest_mode,
            Err(e) => {
                warn!(recipient = %recipient_id, error = %e, "Preference load failed in tick");
                false
            }
        }
    }

    /// 同步单次 tick（测试或外部 cron 触发）
    pub async fn run_tick(&self) -> Vec<DispatchResult> {
        self.run_tick_at(Local::now()).await
    }

    /// 以指定时刻执行一次 tick
    pub async fn run_tick_at(&self, now: DateTime<Local>) -> Vec<DispatchResult> {
        let today = now.date_naive();
        let drafts = self.collect_drafts(today).await;

        let mut per_item = Vec::with_capacity(drafts.len());
        for draft in drafts {
            if self.digest_mode(&draft.recipient_id).await {
                // 摘要模式成员由 digest tick 服务
                continue;
            }
            per_item.push(draft);
        }

        debug!(count = per_item.len(), "Tick dispatching notifications");
        stream::iter(per_item)
            .map(|draft| self.dispatcher.dispatch_at(draft, now))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await
    }

    /// 每日摘要 tick：摘要模式的接收者各得到一条汇总通知
    pub async fn run_digest_tick(&self) -> Vec<DispatchResult> {
        self.run_digest_tick_at(Local::now()).await
    }

    pub async fn run_digest_tick_at(&self, now: DateTime<Local>) -> Vec<DispatchResult> {
        let today = now.date_naive();
        let drafts = self.collect_drafts(today).await;

        // recipient -> category -> count
        let mut per_recipient: HashMap<String, HashMap<Category, usize>> = HashMap::new();
        for draft in drafts {
            if !self.digest_mode(&draft.recipient_id).await {
                continue;
            }
            *per_recipient
                .entry(draft.recipient_id)
                .or_default()
                .entry(draft.category)
                .or_insert(0) += 1;
        }

        let digests: Vec<Notification> = per_recipient
            .into_iter()
            .map(|(recipient, counts)| {
                let mut counts: Vec<(Category, usize)> = counts.into_iter().collect();
                counts.sort_by_key(|(category, _)| category.as_str());
                catalog::daily_digest(&recipient, today, &counts)
            })
            .collect();

        info!(count = digests.len(), "Digest tick dispatching summaries");
        stream::iter(digests)
            .map(|draft| self.dispatcher.dispatch_at(draft, now))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await
    }

    /// 启动定时循环；Idle 状态才允许启动
    pub fn spawn(self: &Arc<Self>) -> Result<SchedulerHandle> {
        let transition =
            self.state
                .compare_exchange(STATE_IDLE, STATE_RUNNING, Ordering::SeqCst, Ordering::SeqCst);
        if transition.is_err() {
            return Err(Error::Other(format!(
                "scheduler cannot start from state {:?}",
                self.state()
            )));
        }

        let token = CancellationToken::new();
        let loop_token = token.clone();
        let scheduler = Arc::clone(self);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(scheduler.config.tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!(
                interval_secs = scheduler.config.tick_interval.as_secs(),
                "Scheduler loop started"
            );

            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = interval.tick() => {
                        let results = scheduler.run_tick().await;
                        let delivered = results.iter().filter(|r| r.success).count();
                        debug!(total = results.len(), delivered, "Tick complete");
                    }
                }
            }

            scheduler.state.store(STATE_STOPPED, Ordering::SeqCst);
            info!("Scheduler loop stopped");
        });

        Ok(SchedulerHandle { token, task })
    }
}

/// 运行中调度循环的句柄
pub struct SchedulerHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// 发出停止信号：阻止下一次 tick 开始
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// 等待循环退出
    pub async fn stopped(self) {
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::channel::ChannelSender;
    use crate::notification::store::InboxStore;
    use crate::notification::throttle::InMemoryThrottle;
    use crate::prefs::{MemoryRepository, Preferences};
    use async_trait::async_trait;
    use chrono::TimeZone;

    struct AcceptAllChannel;

    #[async_trait]
    impl ChannelSender for AcceptAllChannel {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn send(&self, notification: &Notification) -> DispatchResult {
            DispatchResult::sent("mock", &notification.id)
        }
    }

    struct FixedQueries {
        overdue: Vec<TaskFact>,
        due_today: Vec<TaskFact>,
        shopping: Vec<ShoppingFact>,
    }

    #[async_trait]
    impl DomainQueries for FixedQueries {
        async fn overdue_tasks(&self, _as_of: NaiveDate) -> Result<Vec<TaskFact>> {
            Ok(self.overdue.clone())
        }

        async fn tasks_due_today(&self, _date: NaiveDate) -> Result<Vec<TaskFact>> {
            Ok(self.due_today.clone())
        }

        async fn urgent_shopping_items(&self) -> Result<Vec<ShoppingFact>> {
            Ok(self.shopping.clone())
        }
    }

    fn task(recipient: &str, name: &str, due: NaiveDate) -> TaskFact {
        TaskFact {
            recipient_id: recipient.to_string(),
            name: name.to_string(),
            due_date: due,
        }
    }

    fn scheduler_with(
        queries: Arc<dyn DomainQueries>,
    ) -> (Arc<Scheduler>, Arc<PreferenceStore>, Arc<InboxStore>) {
        let inbox = Arc::new(InboxStore::new());
        let prefs = Arc::new(PreferenceStore::new(Arc::new(MemoryRepository::new())));
        let mut dispatcher = Dispatcher::new(
            inbox.clone(),
            prefs.clone(),
            Arc::new(InMemoryThrottle::new()),
        );
        dispatcher.register_channel(Arc::new(AcceptAllChannel));
        let scheduler = Arc::new(Scheduler::new(
            Arc::new(dispatcher),
            prefs.clone(),
            queries,
            SchedulerConfig {
                tick_interval: Duration::from_millis(20),
                concurrency: 4,
            },
        ));
        (scheduler, prefs, inbox)
    }

    fn noon() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 8, 6, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_tick_dispatches_one_notification_per_fact() {
        let today = noon().date_naive();
        let queries = Arc::new(FixedQueries {
            overdue: vec![task("alice", "Water the plants", today - chrono::Days::new(2))],
            due_today: vec![task("bob", "Take out recycling", today)],
            shopping: vec![ShoppingFact {
                recipient_id: "alice".to_string(),
                name: "Diapers".to_string(),
                list_name: "Groceries".to_string(),
            }],
        });
        let (scheduler, _prefs, inbox) = scheduler_with(queries);

        let results = scheduler.run_tick_at(noon()).await;
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.success));
        assert_eq!(inbox.unread_count("alice"), 2);
        assert_eq!(inbox.unread_count("bob"), 1);
    }

    #[tokio::test]
    async fn test_second_tick_reports_duplicates() {
        let today = noon().date_naive();
        let queries = Arc::new(FixedQueries {
            overdue: vec![task("alice", "Water the plants", today - chrono::Days::new(1))],
            due_today: vec![],
            shopping: vec![],
        });
        let (scheduler, _prefs, inbox) = scheduler_with(queries);

        let first = scheduler.run_tick_at(noon()).await;
        assert!(first[0].success);

        // 事实仍然成立，但未读通知已存在
        let second = scheduler.run_tick_at(noon()).await;
        assert!(!second[0].success);
        assert!(second[0].is_suppressed());
        assert_eq!(inbox.unread_count("alice"), 1);
    }

    #[tokio::test]
    async fn test_digest_mode_recipient_skipped_in_item_tick() {
        let today = noon().date_naive();
        let queries = Arc::new(FixedQueries {
            overdue: vec![
                task("alice", "Water the plants", today - chrono::Days::new(1)),
                task("bob", "Clean the garage", today - chrono::Days::new(3)),
            ],
            due_today: vec![],
            shopping: vec![],
        });
        let (scheduler, prefs, inbox) = scheduler_with(queries);

        let mut alice = Preferences::default_for("alice");
        alice.digest_mode = true;
        prefs.save_preferences(alice).await.unwrap();

        let results = scheduler.run_tick_at(noon()).await;
        assert_eq!(results.len(), 1);
        assert_eq!(inbox.unread_count("alice"), 0);
        assert_eq!(inbox.unread_count("bob"), 1);
    }

    #[tokio::test]
    async fn test_digest_tick_aggregates_into_one_notification() {
        let today = noon().date_naive();
        let queries = Arc::new(FixedQueries {
            overdue: vec![
                task("alice", "Water the plants", today - chrono::Days::new(1)),
                task("alice", "Vacuum", today - chrono::Days::new(2)),
            ],
            due_today: vec![task("alice", "Take out recycling", today)],
            shopping: vec![ShoppingFact {
                recipient_id: "alice".to_string(),
                name: "Diapers".to_string(),
                list_name: "Groceries".to_string(),
            }],
        });
        let (scheduler, prefs, inbox) = scheduler_with(queries);

        let mut alice = Preferences::default_for("alice");
        alice.digest_mode = true;
        prefs.save_preferences(alice).await.unwrap();

        let results = scheduler.run_digest_tick_at(noon()).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].success);

        let stored = inbox.recent("alice", 10);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].category, Category::DailyDigest);
        assert!(stored[0].title.contains("4 items"));

        // 同一天第二次 digest tick 被去重
        let again = scheduler.run_digest_tick_at(noon()).await;
        assert!(again[0].is_suppressed());
    }

    #[tokio::test]
    async fn test_digest_tick_ignores_non_digest_recipients() {
        let today = noon().date_naive();
        let queries = Arc::new(FixedQueries {
            overdue: vec![task("bob", "Clean the garage", today - chrono::Days::new(1))],
            due_today: vec![],
            shopping: vec![],
        });
        let (scheduler, _prefs, _inbox) = scheduler_with(queries);

        let results = scheduler.run_digest_tick_at(noon()).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_loop_stops_within_one_interval() {
        let queries = Arc::new(FixedQueries {
            overdue: vec![],
            due_today: vec![],
            shopping: vec![],
        });
        let (scheduler, _prefs, _inbox) = scheduler_with(queries);

        assert_eq!(scheduler.state(), SchedulerState::Idle);
        let handle = scheduler.spawn().unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Running);

        // 运行中不允许二次启动
        assert!(scheduler.spawn().is_err());

        handle.stop();
        tokio::time::timeout(Duration::from_millis(500), handle.stopped())
            .await
            .expect("scheduler loop must exit within one tick interval");
        assert_eq!(scheduler.state(), SchedulerState::Stopped);

        // Stopped 是终态
        assert!(scheduler.spawn().is_err());
    }
}
