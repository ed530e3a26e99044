//! 两级缓存的订阅与偏好 store
//!
//! 进程内缓存（按接收者分片）+ 可插拔的持久化仓储。缓存未命中时
//! 回源填充，每次写入后使相关缓存条目失效（write-through）。
//! 校验在这里把关：非法文档带着逐项原因被拒绝，绝不落库。

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tracing::debug;

use crate::error::Result;
use crate::prefs::model::{Preferences, Subscription, SubscriptionRegistration};
use crate::prefs::repository::PreferenceRepository;
use crate::prefs::validate::{validate_preferences, validate_subscription};

/// 订阅与偏好 store
pub struct PreferenceStore {
    repo: Arc<dyn PreferenceRepository>,
    prefs_cache: DashMap<String, Preferences>,
    subs_cache: DashMap<String, Vec<Subscription>>,
}

impl PreferenceStore {
    pub fn new(repo: Arc<dyn PreferenceRepository>) -> Self {
        Self {
            repo,
            prefs_cache: DashMap::new(),
            subs_cache: DashMap::new(),
        }
    }

    /// 读取偏好；未保存过的接收者得到默认偏好
    pub async fn preferences(&self, recipient_id: &str) -> Result<Preferences> {
        if let Some(cached) = self.prefs_cache.get(recipient_id) {
            return Ok(cached.clone());
        }

        let loaded = self
            .repo
            .load_preferences(recipient_id)
            .await?
            .unwrap_or_else(|| Preferences::default_for(recipient_id));
        self.prefs_cache
            .insert(recipient_id.to_string(), loaded.clone());
        debug!(recipient = %recipient_id, "Preference cache populated");
        Ok(loaded)
    }

    /// 保存偏好；校验失败不落库
    pub async fn save_preferences(&self, prefs: Preferences) -> Result<()> {
        validate_preferences(&prefs)?;
        self.repo.save_preferences(&prefs).await?;
        self.prefs_cache.remove(&prefs.recipient_id);
        Ok(())
    }

    /// 某接收者的全部订阅（含失效的）
    pub async fn subscriptions(&self, recipient_id: &str) -> Result<Vec<Subscription>> {
        if let Some(cached) = self.subs_cache.get(recipient_id) {
            return Ok(cached.clone());
        }

        let loaded = self.repo.load_subscriptions(recipient_id).await?;
        self.subs_cache
            .insert(recipient_id.to_string(), loaded.clone());
        Ok(loaded)
    }

    /// 某接收者当前有效的订阅
    pub async fn active_subscriptions(&self, recipient_id: &str) -> Result<Vec<Subscription>> {
        Ok(self
            .subscriptions(recipient_id)
            .await?
            .into_iter()
            .filter(|sub| sub.active)
            .collect())
    }

    /// 注册设备订阅（客户端 opt-in）
    pub async fn register_subscription(
        &self,
        recipient_id: &str,
        registration: SubscriptionRegistration,
    ) -> Result<Subscription> {
        let sub = registration.into_subscription(recipient_id);
        validate_subscription(&sub)?;
        self.repo.upsert_subscription(&sub).await?;
        self.subs_cache.remove(recipient_id);
        Ok(sub)
    }

    /// 显式退订（软删除）
    pub async fn unsubscribe(&self, endpoint: &str) -> Result<()> {
        if let Some(recipient) = self.repo.set_subscription_active(endpoint, false).await? {
            self.subs_cache.remove(&recipient);
        }
        Ok(())
    }

    /// provider 报告订阅已失效（gone/not-found）时软删除
    pub async fn deactivate_endpoint(&self, endpoint: &str) -> Result<()> {
        if let Some(recipient) = self.repo.set_subscription_active(endpoint, false).await? {
            debug!(endpoint = %endpoint, recipient = %recipient, "Subscription deactivated");
            self.subs_cache.remove(&recipient);
        }
        Ok(())
    }

    /// 成功投递后更新 last_used
    pub async fn mark_delivered(&self, endpoint: &str) -> Result<()> {
        if let Some(recipient) = self.repo.touch_subscription(endpoint, Utc::now()).await? {
            self.subs_cache.remove(&recipient);
        }
        Ok(())
    }
}
