//! Session lifecycle, subscription bookkeeping and change fan-out.

pub mod manager;
pub mod sink;
pub mod subscription;

pub use manager::{SessionConfig, SessionInfo, SessionManager, SubscriptionGrant};
pub use sink::{CloseReason, Delivery, NotificationSink};
pub use subscription::Sampling;
