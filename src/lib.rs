//! Foyer Notify - 家庭 hub 的通知分发与限流引擎

pub mod config;
pub mod error;
pub mod notification;
pub mod prefs;
pub mod scheduler;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use notification::catalog;
pub use notification::{
    BlockingDispatcher, BucketKey, Category, ChannelSender, DispatchResult, Dispatcher, Engine,
    EngineBuilder, InMemoryThrottle, InboxStore, Notification, NotificationAction, ThrottleCounter,
};
pub use prefs::{
    JsonFileRepository, MemoryRepository, PreferenceRepository, PreferenceStore, Preferences,
    Subscription, SubscriptionRegistration,
};
pub use scheduler::{
    DomainQueries, HttpDomainQueries, Scheduler, SchedulerConfig, SchedulerHandle, SchedulerState,
    ShoppingFact, TaskFact,
};
