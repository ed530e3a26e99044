//! 偏好与订阅仓储 - 类型化接口与两种实现
//!
//! 仓储只做简单 upsert / 软删除，不做跨实体事务。错误以类型化
//! `Result` 返回给调用方，不在仓储内部吞掉。

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use fs2::FileExt;

use crate::error::Result;
use crate::prefs::model::{Preferences, Subscription};

/// 偏好与订阅的持久化接口
#[async_trait]
pub trait PreferenceRepository: Send + Sync {
    /// 读取某接收者的偏好；从未保存过时返回 None
    async fn load_preferences(&self, recipient_id: &str) -> Result<Option<Preferences>>;

    /// 保存偏好（upsert）
    async fn save_preferences(&self, prefs: &Preferences) -> Result<()>;

    /// 读取某接收者的全部订阅（含已失效的）
    async fn load_subscriptions(&self, recipient_id: &str) -> Result<Vec<Subscription>>;

    /// 按 endpoint upsert 订阅
    async fn upsert_subscription(&self, sub: &Subscription) -> Result<()>;

    /// 设置订阅有效位（软删除）；返回受影响的接收者 ID
    async fn set_subscription_active(
        &self,
        endpoint: &str,
        active: bool,
    ) -> Result<Option<String>>;

    /// 更新订阅的 last_used；返回受影响的接收者 ID
    async fn touch_subscription(
        &self,
        endpoint: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<String>>;
}

/// 进程内存仓储（测试与单机默认）
#[derive(Default)]
pub struct MemoryRepository {
    preferences: DashMap<String, Preferences>,
    /// endpoint -> 订阅
    subscriptions: DashMap<String, Subscription>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PreferenceRepository for MemoryRepository {
    async fn load_preferences(&self, recipient_id: &str) -> Result<Option<Preferences>> {
        Ok(self.preferences.get(recipient_id).map(|p| p.clone()))
    }

    async fn save_preferences(&self, prefs: &Preferences) -> Result<()> {
        self.preferences
            .insert(prefs.recipient_id.clone(), prefs.clone());
        Ok(())
    }

    async fn load_subscriptions(&self, recipient_id: &str) -> Result<Vec<Subscription>> {
        Ok(self
            .subscriptions
            .iter()
            .filter(|entry| entry.value().recipient_id == recipient_id)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn upsert_subscription(&self, sub: &Subscription) -> Result<()> {
        self.subscriptions.insert(sub.endpoint.clone(), sub.clone());
        Ok(())
    }

    async fn set_subscription_active(
        &self,
        endpoint: &str,
        active: bool,
    ) -> Result<Option<String>> {
        Ok(self.subscriptions.get_mut(endpoint).map(|mut sub| {
            sub.active = active;
            sub.recipient_id.clone()
        }))
    }

    async fn touch_subscription(
        &self,
        endpoint: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<String>> {
        Ok(self.subscriptions.get_mut(endpoint).map(|mut sub| {
            sub.last_used = Some(at);
            sub.recipient_id.clone()
        }))
    }
}

/// JSON 文件仓储
///
/// 两个文档：`preferences.json`（recipient -> Preferences）与
/// `subscriptions.json`（endpoint -> Subscription）。写入走
/// 临时文件 + 原子 rename，读-改-写期间持有 sidecar 文件锁。
pub struct JsonFileRepository {
    data_dir: PathBuf,
}

impl JsonFileRepository {
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        Ok(Self { data_dir })
    }

    fn preferences_path(&self) -> PathBuf {
        self.data_dir.join("preferences.json")
    }

    fn subscriptions_path(&self) -> PathBuf {
        self.data_dir.join("subscriptions.json")
    }

    fn lock_path(&self) -> PathBuf {
        self.data_dir.join("store.lock")
    }

    /// 读-改-写期间持有的排他锁
    fn exclusive_lock(&self) -> Result<std::fs::File> {
        let lock = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path())?;
        lock.lock_exclusive()?;
        Ok(lock)
    }

    fn read_map<T: serde::de::DeserializeOwned>(path: &Path) -> Result<HashMap<String, T>> {
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let text = fs::read_to_string(path)?;
        if text.trim().is_empty() {
            return Ok(HashMap::new());
        }
        Ok(serde_json::from_str(&text)?)
    }

    fn write_map<T: serde::Serialize>(path: &Path, map: &HashMap<String, T>) -> Result<()> {
        let tmp = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(serde_json::to_string_pretty(map)?.as_bytes())?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[async_trait]
impl PreferenceRepository for JsonFileRepository {
    async fn load_preferences(&self, recipient_id: &str) -> Result<Option<Preferences>> {
        let map: HashMap<String, Preferences> = Self::read_map(&self.preferences_path())?;
        Ok(map.get(recipient_id).cloned())
    }

    async fn save_preferences(&self, prefs: &Preferences) -> Result<()> {
        let lock = self.exclusive_lock()?;
        let mut map: HashMap<String, Preferences> = Self::read_map(&self.preferences_path())?;
        map.insert(prefs.recipient_id.clone(), prefs.clone());
        let result = Self::write_map(&self.preferences_path(), &map);
        let _ = fs2::FileExt::unlock(&lock);
        result
    }

    async fn load_subscriptions(&self, recipient_id: &str) -> Result<Vec<Subscription>> {
        let map: HashMap<String, Subscription> = Self::read_map(&self.subscriptions_path())?;
        Ok(map
            .into_values()
            .filter(|sub| sub.recipient_id == recipient_id)
            .collect())
    }

    async fn upsert_subscription(&self, sub: &Subscription) -> Result<()> {
        let lock = self.exclusive_lock()?;
        let mut map: HashMap<String, Subscription> = Self::read_map(&self.subscriptions_path())?;
        map.insert(sub.endpoint.clone(), sub.clone());
        let result = Self::write_map(&self.subscriptions_path(), &map);
        let _ = fs2::FileExt::unlock(&lock);
        result
    }

    async fn set_subscription_active(
        &self,
        endpoint: &str,
        active: bool,
    ) -> Result<Option<String>> {
        let lock = self.exclusive_lock()?;
        let mut map: HashMap<String, Subscription> = Self::read_map(&self.subscriptions_path())?;
        let recipient = match map.get_mut(endpoint) {
            Some(sub) => {
                sub.active = active;
                Some(sub.recipient_id.clone())
            }
            None => None,
        };
        let result = if recipient.is_some() {
            Self::write_map(&self.subscriptions_path(), &map)
        } else {
            Ok(())
        };
        let _ = fs2::FileExt::unlock(&lock);
        result.map(|_| recipient)
    }

    async fn touch_subscription(
        &self,
        endpoint: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<String>> {
        let lock = self.exclusive_lock()?;
        let mut map: HashMap<String, Subscription> = Self::read_map(&self.subscriptions_path())?;
        let recipient = match map.get_mut(endpoint) {
            Some(sub) => {
                sub.last_used = Some(at);
                Some(sub.recipient_id.clone())
            }
            None => None,
        };
        let result = if recipient.is_some() {
            Self::write_map(&self.subscriptions_path(), &map)
        } else {
            Ok(())
        };
        let _ = fs2::FileExt::unlock(&lock);
        result.map(|_| recipient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(recipient: &str, endpoint: &str) -> Subscription {
        Subscription {
            recipient_id: recipient.to_string(),
            endpoint: endpoint.to_string(),
            p256dh: "pk".to_string(),
            auth: "ak".to_string(),
            active: true,
            last_used: None,
        }
    }

    #[tokio::test]
    async fn test_memory_repository_roundtrip() {
        let repo = MemoryRepository::new();
        assert!(repo.load_preferences("alice").await.unwrap().is_none());

        let prefs = Preferences::default_for("alice");
        repo.save_preferences(&prefs).await.unwrap();
        assert_eq!(repo.load_preferences("alice").await.unwrap(), Some(prefs));

        repo.upsert_subscription(&sub("alice", "https://p.example/1"))
            .await
            .unwrap();
        repo.upsert_subscription(&sub("alice", "https://p.example/2"))
            .await
            .unwrap();
        repo.upsert_subscription(&sub("bob", "https://p.example/3"))
            .await
            .unwrap();

        assert_eq!(repo.load_subscriptions("alice").await.unwrap().len(), 2);

        let touched = repo
            .set_subscription_active("https://p.example/1", false)
            .await
            .unwrap();
        assert_eq!(touched, Some("alice".to_string()));
        let subs = repo.load_subscriptions("alice").await.unwrap();
        assert_eq!(subs.iter().filter(|s| s.active).count(), 1);
    }

    #[tokio::test]
    async fn test_json_file_repository_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonFileRepository::new(dir.path()).unwrap();

        let mut prefs = Preferences::default_for("alice");
        prefs.quiet_hours_start = Some(22);
        prefs.quiet_hours_end = Some(7);
        repo.save_preferences(&prefs).await.unwrap();

        // 重新打开仓储，数据仍在
        let reopened = JsonFileRepository::new(dir.path()).unwrap();
        let loaded = reopened.load_preferences("alice").await.unwrap().unwrap();
        assert_eq!(loaded.quiet_hours_start, Some(22));

        reopened
            .upsert_subscription(&sub("alice", "https://p.example/1"))
            .await
            .unwrap();
        let touched = reopened
            .touch_subscription("https://p.example/1", Utc::now())
            .await
            .unwrap();
        assert_eq!(touched, Some("alice".to_string()));
        let subs = reopened.load_subscriptions("alice").await.unwrap();
        assert!(subs[0].last_used.is_some());
    }

    #[tokio::test]
    async fn test_unknown_endpoint_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonFileRepository::new(dir.path()).unwrap();
        let touched = repo
            .set_subscription_active("https://p.example/none", false)
            .await
            .unwrap();
        assert_eq!(touched, None);
    }
}
