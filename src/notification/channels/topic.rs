//! Topic push 渠道 - 基于 topic 的 HTTP 推送 broker
//!
//! 每条通知一次 POST 到 `https://<host>/<topic>`，标题、优先级、tags、
//! 点击跳转与延迟都编码在请求头里。2xx 且响应 JSON 带 `id` 才算成功。

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::notification::channel::ChannelSender;
use crate::notification::model::{DispatchResult, Notification};

/// Topic push 渠道配置
#[derive(Debug, Clone)]
pub struct TopicPushConfig {
    /// Broker 根地址（如 https://ntfy.example.org）
    pub base_url: String,
    /// 家庭共享的 topic 名
    pub topic: String,
    /// 点击跳转的应用根地址（通知动作的相对 URL 拼在其后）
    pub click_base_url: Option<String>,
    /// 可选的投递延迟（broker 语法，如 "30s"、"5m"）
    pub delay: Option<String>,
    /// 请求超时（秒）
    pub timeout_secs: u64,
}

impl TopicPushConfig {
    /// 从环境变量读取；未配置 topic 时返回 None（渠道不启用）
    pub fn from_env() -> Result<Option<Self>> {
        let base_url = read_env("FOYER_TOPIC_URL");
        let topic = read_env("FOYER_TOPIC");

        let (base_url, topic) = match (base_url, topic) {
            (None, None) => return Ok(None),
            (Some(base), Some(topic)) => (base, topic),
            _ => {
                return Err(Error::config(
                    "Both FOYER_TOPIC_URL and FOYER_TOPIC must be set to enable topic push",
                ));
            }
        };

        Ok(Some(Self {
            base_url,
            topic,
            click_base_url: read_env("FOYER_CLICK_URL"),
            delay: None,
            timeout_secs: 5,
        }))
    }
}

fn read_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Topic push 渠道
pub struct TopicPushSender {
    config: TopicPushConfig,
    client: Client,
}

impl TopicPushSender {
    pub fn new(config: TopicPushConfig) -> Result<Self> {
        if config.topic.trim().is_empty() {
            return Err(Error::config("topic push: topic name is empty"));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    fn publish_url(&self) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.topic
        )
    }

    /// 订阅 URL（移动端 app 直接打开）
    pub fn subscribe_url(&self) -> String {
        self.publish_url()
    }

    /// Web app 订阅 URL
    pub fn web_app_url(&self) -> String {
        format!(
            "{}/app?topic={}",
            self.config.base_url.trim_end_matches('/'),
            self.config.topic
        )
    }

    /// 生成订阅二维码的 URL（扫码 onboarding）
    pub fn qr_code_url(&self) -> String {
        let encoded: String =
            url::form_urlencoded::byte_serialize(self.subscribe_url().as_bytes()).collect();
        format!("https://api.qrserver.com/v1/create-qr-code/?size=200x200&data={encoded}")
    }

    /// 点击跳转 URL：通知第一个动作的相对路径拼到应用根地址
    fn click_url(&self, notification: &Notification) -> Option<String> {
        let base = self.config.click_base_url.as_ref()?;
        let path = notification.actions.first().and_then(|a| a.url.as_deref())?;
        Some(format!("{}{}", base.trim_end_matches('/'), path))
    }
}

/// 请求头里不允许换行
fn header_safe(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

#[async_trait]
impl ChannelSender for TopicPushSender {
    fn name(&self) -> &'static str {
        "topic_push"
    }

    async fn send(&self, notification: &Notification) -> DispatchResult {
        let mut request = self
            .client
            .post(self.publish_url())
            .header("Title", header_safe(&notification.title))
            .header("Priority", notification.priority.clamp(1, 5).to_string())
            .header("Tags", notification.category.default_tags())
            .body(notification.body.clone());

        if let Some(click) = self.click_url(notification) {
            request = request.header("Click", click);
        }
        if let Some(delay) = &self.config.delay {
            request = request.header("Delay", delay.clone());
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(channel = "topic_push", error = %e, "Broker request failed");
                return DispatchResult::failed("topic_push", e.to_string(), &notification.id);
            }
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            warn!(
                channel = "topic_push",
                status = %status,
                "Broker rejected notification"
            );
            return DispatchResult::failed(
                "topic_push",
                format!("HTTP {status}: {body}"),
                &notification.id,
            );
        }

        // 2xx 但没有消息 id 也视为失败（broker 没有真正接收）
        let has_id = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("id").cloned())
            .is_some();
        if !has_id {
            return DispatchResult::failed(
                "topic_push",
                format!("HTTP {status} without message id: {body}"),
                &notification.id,
            );
        }

        info!(
            channel = "topic_push",
            recipient = %notification.recipient_id,
            category = %notification.category,
            "Notification published to topic"
        );
        DispatchResult::sent("topic_push", &notification.id)
    }
}
