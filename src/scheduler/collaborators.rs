//! 协作方查询 - 调度器轮询的领域服务只读接口
//!
//! 任务、购物清单等 CRUD 服务在本引擎之外；这里只消费三个只读查询。

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// 例行任务事实
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFact {
    /// 负责人
    pub recipient_id: String,
    /// 任务名
    pub name: String,
    /// 截止日期
    pub due_date: NaiveDate,
}

/// 购物清单条目事实
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShoppingFact {
    /// 相关成员
    pub recipient_id: String,
    /// 条目名
    pub name: String,
    /// 所在清单
    pub list_name: String,
}

/// 领域服务只读查询
#[async_trait]
pub trait DomainQueries: Send + Sync {
    /// 截至某日已逾期的例行任务
    async fn overdue_tasks(&self, as_of: NaiveDate) -> Result<Vec<TaskFact>>;

    /// 某日到期的任务
    async fn tasks_due_today(&self, date: NaiveDate) -> Result<Vec<TaskFact>>;

    /// 高优先级且尚未购买的清单条目
    async fn urgent_shopping_items(&self) -> Result<Vec<ShoppingFact>>;
}

/// HTTP JSON 实现：轮询家庭 hub 的查询端点
pub struct HttpDomainQueries {
    base_url: String,
    client: Client,
}

impl HttpDomainQueries {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::transport("hub", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::transport("hub", format!("HTTP {status} from {url}")));
        }

        response
            .json()
            .await
            .map_err(|e| Error::transport("hub", format!("invalid JSON from {url}: {e}")))
    }
}

#[async_trait]
impl DomainQueries for HttpDomainQueries {
    async fn overdue_tasks(&self, as_of: NaiveDate) -> Result<Vec<TaskFact>> {
        self.get_json(&format!("/api/tasks/overdue?as_of={as_of}"))
            .await
    }

    async fn tasks_due_today(&self, date: NaiveDate) -> Result<Vec<TaskFact>> {
        self.get_json(&format!("/api/tasks/due?date={date}")).await
    }

    async fn urgent_shopping_items(&self) -> Result<Vec<ShoppingFact>> {
        self.get_json("/api/shopping/urgent").await
    }
}
