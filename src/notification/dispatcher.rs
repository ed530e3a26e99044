//! 通知分发器 - 去重、策略、渠道扇出与限流的编排
//!
//! 单条通知的流水线：
//! 1. 去重守卫：同键未读已存在 -> `duplicate`，无副作用
//! 2. 加载偏好与当前小时桶计数，询问策略评估器
//! 3. 拒绝 -> 原样返回原因，不触渠道
//! 4. 允许 -> 并发调用全部渠道（每个带超时），任一成功即聚合成功
//! 5. 聚合成功 -> 递增限流计数并持久化为已发送；全部失败 -> 不持久化
//!
//! 业务逻辑只有这一条异步路径；同步调用方使用 [`BlockingDispatcher`]。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Timelike};
use futures::future::join_all;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::notification::channel::ChannelSender;
use crate::notification::model::{DispatchResult, Notification};
use crate::notification::policy;
use crate::notification::store::InboxStore;
use crate::notification::throttle::{BucketKey, ThrottleCounter};
use crate::prefs::PreferenceStore;

/// 单渠道调用的默认超时
const DEFAULT_CHANNEL_TIMEOUT: Duration = Duration::from_secs(5);

/// 通知分发器
pub struct Dispatcher {
    inbox: Arc<InboxStore>,
    prefs: Arc<PreferenceStore>,
    throttle: Arc<dyn ThrottleCounter>,
    channels: Vec<Arc<dyn ChannelSender>>,
    channel_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        inbox: Arc<InboxStore>,
        prefs: Arc<PreferenceStore>,
        throttle: Arc<dyn ThrottleCounter>,
    ) -> Self {
        Self {
            inbox,
            prefs,
            throttle,
            channels: Vec::new(),
            channel_timeout: DEFAULT_CHANNEL_TIMEOUT,
        }
    }

    /// 设置单渠道调用超时
    pub fn with_channel_timeout(mut self, timeout: Duration) -> Self {
        self.channel_timeout = timeout;
        self
    }

    /// 注册渠道
    pub fn register_channel(&mut self, channel: Arc<dyn ChannelSender>) {
        info!(channel = channel.name(), "Registering delivery channel");
        self.channels.push(channel);
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channel_names(&self) -> Vec<&'static str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    /// 收件箱（CLI 与测试用）
    pub fn inbox(&self) -> &Arc<InboxStore> {
        &self.inbox
    }

    /// 分发一条通知
    pub async fn dispatch(&self, notification: Notification) -> DispatchResult {
        self.dispatch_at(notification, Local::now()).await
    }

    /// 以指定时刻分发（测试与外部 cron 用；`dispatch` 的唯一实现路径）
    pub async fn dispatch_at(
        &self,
        notification: Notification,
        now: DateTime<Local>,
    ) -> DispatchResult {
        // 1. 去重守卫
        if self
            .inbox
            .has_unread(&notification.recipient_id, &notification.dedup_key)
        {
            debug!(
                recipient = %notification.recipient_id,
                dedup_key = %notification.dedup_key,
                "Duplicate unread notification suppressed"
            );
            return DispatchResult::duplicate(&notification.id);
        }

        // 2. 偏好 + 限流计数 -> 策略
        let prefs = match self.prefs.preferences(&notification.recipient_id).await {
            Ok(p) => p,
            Err(e) => {
                warn!(
                    recipient = %notification.recipient_id,
                    error = %e,
                    "Failed to load preferences"
                );
                return DispatchResult::failed("preferences", e.to_string(), &notification.id);
            }
        };

        let bucket = BucketKey::at(&notification.recipient_id, now);
        let count = self.throttle.count(&bucket);
        let decision =
            policy::evaluate(notification.category, &prefs, now.hour() as u8, count);

        // 3. 拒绝：无副作用，不触渠道
        if !decision.allowed {
            debug!(
                recipient = %notification.recipient_id,
                category = %notification.category,
                reason = decision.reason,
                "Notification suppressed by policy"
            );
            return DispatchResult::denied(decision.reason, &notification.id);
        }

        // 4. 渠道扇出，每个渠道带独立超时
        if self.channels.is_empty() {
            return DispatchResult::failed(
                "none",
                "no delivery channels registered",
                &notification.id,
            );
        }

        let results = join_all(self.channels.iter().map(|channel| {
            let n = &notification;
            async move {
                match timeout(self.channel_timeout, channel.send(n)).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(
                            channel = channel.name(),
                            recipient = %n.recipient_id,
                            "Channel call abandoned after timeout"
                        );
                        DispatchResult::failed(
                            channel.name(),
                            format!("timed out after {:?}", self.channel_timeout),
                            &n.id,
                        )
                    }
                }
            }
        }))
        .await;

        let succeeded: Vec<&str> = results
            .iter()
            .filter(|r| r.success)
            .map(|r| r.channel.as_str())
            .collect();

        // 5. 聚合：任一渠道成功即成功
        if !succeeded.is_empty() {
            self.throttle.increment(&bucket);
            // local 渠道可能已经写入过；这里兜底保证已发送的通知可查、可去重
            if let Err(e) = self.inbox.insert_if_absent(notification.clone()) {
                warn!(
                    recipient = %notification.recipient_id,
                    error = %e,
                    "Failed to persist sent notification"
                );
            }
            info!(
                recipient = %notification.recipient_id,
                category = %notification.category,
                channels = %succeeded.join(","),
                "Notification dispatched"
            );
            return DispatchResult::sent(succeeded.join(","), &notification.id);
        }

        let detail = results
            .iter()
            .map(|r| format!("{}: {}", r.channel, r.message))
            .collect::<Vec<_>>()
            .join("; ");
        warn!(
            recipient = %notification.recipient_id,
            category = %notification.category,
            detail = %detail,
            "All delivery channels failed"
        );
        DispatchResult::failed("all", detail, &notification.id)
    }
}

/// 同步调用方的有界阻塞适配器
///
/// 持有自己的 current-thread runtime，deadline 到期时放弃仍在途的
/// provider 调用并以失败结果返回。只能在无 tokio runtime 的线程使用。
pub struct BlockingDispatcher {
    inner: Arc<Dispatcher>,
    runtime: tokio::runtime::Runtime,
    deadline: Duration,
}

impl BlockingDispatcher {
    pub fn new(inner: Arc<Dispatcher>, deadline: Duration) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(Error::Io)?;
        Ok(Self {
            inner,
            runtime,
            deadline,
        })
    }

    /// 阻塞分发，整体受 deadline 约束
    pub fn dispatch(&self, notification: Notification) -> DispatchResult {
        let id = notification.id.clone();
        self.runtime.block_on(async {
            match timeout(self.deadline, self.inner.dispatch(notification)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(deadline = ?self.deadline, "Blocking dispatch abandoned at deadline");
                    DispatchResult::failed(
                        "dispatch",
                        format!("deadline {:?} exceeded", self.deadline),
                        id,
                    )
                }
            }
        })
    }
}
