//! 通知核心 - 目录、策略、限流、渠道与分发
//!
//! # 设计目标
//! 1. 统一契约：所有渠道实现 `ChannelSender` trait，失败转结果不抛错
//! 2. 策略先行：渠道只在策略评估器放行后被调用
//! 3. 幂等去重：同一主体的未读通知最多一条
//! 4. 依赖注入：限流器、store 与渠道都在构建期装配，没有全局可变状态
//!
//! # 使用示例
//! ```ignore
//! use foyer_notify::{EngineBuilder, EngineConfig, catalog};
//!
//! let engine = EngineBuilder::new(EngineConfig::from_env()?).build()?;
//! let draft = catalog::stock_alert("alice", "Milk", 0.5, 2.0).unwrap();
//! let result = engine.dispatcher.dispatch(draft).await;
//! ```

pub mod builder;
pub mod catalog;
pub mod channel;
pub mod channels;
pub mod dispatcher;
pub mod model;
pub mod policy;
pub mod store;
pub mod throttle;

pub use builder::{Engine, EngineBuilder};
pub use channel::ChannelSender;
pub use dispatcher::{BlockingDispatcher, Dispatcher};
pub use model::{Category, DispatchResult, Notification, NotificationAction};
pub use policy::{evaluate, in_quiet_hours, PolicyDecision, QUIET_HOURS_OVERRIDES};
pub use store::{InboxRejection, InboxStore};
pub use throttle::{BucketKey, InMemoryThrottle, ThrottleCounter};
