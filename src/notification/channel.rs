//! 投递渠道 trait 定义
//!
//! 所有渠道实现同一契约：`send` 返回 [`DispatchResult`]，任何失败都
//! 在渠道内部捕获并转换为失败结果，绝不让错误穿过渠道边界。

use async_trait::async_trait;

use crate::notification::model::{DispatchResult, Notification};

/// 投递渠道
#[async_trait]
pub trait ChannelSender: Send + Sync {
    /// 渠道名称（用于日志与结果聚合）
    fn name(&self) -> &'static str;

    /// 投递一条通知
    ///
    /// 实现必须捕获自身所有错误：网络失败、provider 拒绝等都转换为
    /// `DispatchResult::failed`，携带原始错误文本。
    async fn send(&self, notification: &Notification) -> DispatchResult;
}
