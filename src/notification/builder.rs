//! 引擎构建器 - 按配置组装 store、渠道与分发器
//!
//! 渠道凭据缺失或非法时：该渠道对本进程永久禁用，在这里报告一次，
//! 之后的每次分发不再重试、不再报错。local 渠道永远启用。

use std::sync::Arc;

use tracing::{error, info};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::notification::channels::{LocalSender, TopicPushSender, WebPushSender};
use crate::notification::dispatcher::Dispatcher;
use crate::notification::store::InboxStore;
use crate::notification::throttle::InMemoryThrottle;
use crate::prefs::{MemoryRepository, PreferenceRepository, PreferenceStore};

/// 组装完成的引擎
pub struct Engine {
    pub inbox: Arc<InboxStore>,
    pub prefs: Arc<PreferenceStore>,
    pub dispatcher: Arc<Dispatcher>,
    /// Topic push 渠道句柄（onboarding URL 用）；未启用时为 None
    pub topic: Option<Arc<TopicPushSender>>,
}

/// 引擎构建器
pub struct EngineBuilder {
    config: EngineConfig,
    repository: Option<Arc<dyn PreferenceRepository>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            repository: None,
        }
    }

    /// 指定持久化仓储（默认用进程内存仓储）
    pub fn with_repository(mut self, repository: Arc<dyn PreferenceRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn build(self) -> Result<Engine> {
        let repository = self
            .repository
            .unwrap_or_else(|| Arc::new(MemoryRepository::new()));

        let inbox = Arc::new(InboxStore::with_cap(self.config.inbox_cap));
        let prefs = Arc::new(PreferenceStore::new(repository));
        let throttle = Arc::new(InMemoryThrottle::new());

        let mut dispatcher = Dispatcher::new(inbox.clone(), prefs.clone(), throttle)
            .with_channel_timeout(self.config.channel_timeout);

        dispatcher.register_channel(Arc::new(LocalSender::new(inbox.clone())));

        let mut topic_handle = None;
        if let Some(topic_config) = self.config.topic {
            match TopicPushSender::new(topic_config) {
                Ok(sender) => {
                    let sender = Arc::new(sender);
                    dispatcher.register_channel(sender.clone());
                    topic_handle = Some(sender);
                }
                Err(e) => {
                    error!(error = %e, "Topic push disabled for this process");
                }
            }
        }

        if let Some(web_push_config) = self.config.web_push {
            match WebPushSender::new(web_push_config, prefs.clone()) {
                Ok(sender) => dispatcher.register_channel(Arc::new(sender)),
                Err(e) => {
                    error!(error = %e, "Device push disabled for this process");
                }
            }
        }

        info!(
            channels = ?dispatcher.channel_names(),
            "Notification engine assembled"
        );

        Ok(Engine {
            inbox,
            prefs,
            dispatcher: Arc::new(dispatcher),
            topic: topic_handle,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::channels::TopicPushConfig;

    #[test]
    fn test_default_config_gets_local_channel_only() {
        let engine = EngineBuilder::new(EngineConfig::default()).build().unwrap();
        assert_eq!(engine.dispatcher.channel_names(), vec!["local"]);
        assert!(engine.topic.is_none());
    }

    #[test]
    fn test_topic_config_registers_topic_channel() {
        let config = EngineConfig {
            topic: Some(TopicPushConfig {
                base_url: "https://ntfy.example.org".to_string(),
                topic: "foyer-test".to_string(),
                click_base_url: None,
                delay: None,
                timeout_secs: 5,
            }),
            ..EngineConfig::default()
        };
        let engine = EngineBuilder::new(config).build().unwrap();
        assert_eq!(engine.dispatcher.channel_names(), vec!["local", "topic_push"]);
        assert!(engine.topic.is_some());
    }

    #[test]
    fn test_invalid_topic_config_disables_channel_without_failing_build() {
        let config = EngineConfig {
            topic: Some(TopicPushConfig {
                base_url: "https://ntfy.example.org".to_string(),
                topic: " ".to_string(),
                click_base_url: None,
                delay: None,
                timeout_secs: 5,
            }),
            ..EngineConfig::default()
        };
        let engine = EngineBuilder::new(config).build().unwrap();
        // 渠道被禁用，但引擎照常组装
        assert_eq!(engine.dispatcher.channel_names(), vec!["local"]);
    }
}
