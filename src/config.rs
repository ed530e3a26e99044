//! 引擎配置 - 环境变量加默认值
//!
//! 渠道凭据各自在渠道模块里解析（`TopicPushConfig` / `WebPushConfig`），
//! 这里聚合引擎级开关与路径。凭据内容不打日志。

use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;
use crate::notification::channels::{TopicPushConfig, WebPushConfig};
use crate::notification::store::DEFAULT_INBOX_CAP;

/// 引擎配置
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Topic push 渠道（未配置则该渠道不启用）
    pub topic: Option<TopicPushConfig>,
    /// Device push 渠道（未配置则该渠道不启用）
    pub web_push: Option<WebPushConfig>,
    /// 家庭 hub 的查询端点根地址（调度器协作方）
    pub hub_url: Option<String>,
    /// 持久化目录
    pub data_dir: PathBuf,
    /// 收件箱容量
    pub inbox_cap: usize,
    /// 单渠道调用超时
    pub channel_timeout: Duration,
    /// 调度 tick 间隔
    pub tick_interval: Duration,
    /// 单次 tick 内分发并发上限
    pub dispatch_concurrency: usize,
}

impl EngineConfig {
    /// 从环境变量读取
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            topic: TopicPushConfig::from_env()?,
            web_push: WebPushConfig::from_env()?,
            hub_url: read_env("FOYER_HUB_URL"),
            data_dir: read_env("FOYER_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_data_dir),
            inbox_cap: read_parsed("FOYER_INBOX_CAP").unwrap_or(DEFAULT_INBOX_CAP),
            channel_timeout: Duration::from_secs(
                read_parsed("FOYER_CHANNEL_TIMEOUT_SECS").unwrap_or(5),
            ),
            tick_interval: Duration::from_secs(
                read_parsed("FOYER_TICK_INTERVAL_SECS").unwrap_or(300),
            ),
            dispatch_concurrency: read_parsed("FOYER_DISPATCH_CONCURRENCY").unwrap_or(8),
        })
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            topic: None,
            web_push: None,
            hub_url: None,
            data_dir: default_data_dir(),
            inbox_cap: DEFAULT_INBOX_CAP,
            channel_timeout: Duration::from_secs(5),
            tick_interval: Duration::from_secs(300),
            dispatch_concurrency: 8,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("foyer-notify")
}

fn read_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn read_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    read_env(key).and_then(|v| v.parse().ok())
}
