//! 具体渠道实现

pub mod local;
pub mod topic;
pub mod web_push;

pub use local::LocalSender;
pub use topic::{TopicPushConfig, TopicPushSender};
pub use web_push::{WebPushConfig, WebPushSender};
