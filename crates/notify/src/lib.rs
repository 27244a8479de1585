//! Lifecycle notification distribution for toolwire.
//!
//! This crate provides:
//! - `Notification`, the immutable event shared by every listener
//! - `NotificationBus`, a publish/subscribe registry with isolated,
//!   non-blocking delivery
//! - `NotificationHistory` and `Filtered`, optional decorators for recent
//!   history and type/server filtering

pub mod bus;
pub mod history;
pub mod notification;

pub use bus::{FnListener, Listener, NotificationBus, Subscription};
pub use history::{Filtered, NotificationFilter, NotificationHistory};
pub use notification::{Notification, NotificationKind, ServerStatus, ORIGIN_REGISTRY, ORIGIN_SERVER};
