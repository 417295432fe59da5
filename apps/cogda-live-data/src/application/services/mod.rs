//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `SubscriptionService`: answers subscribe, snapshot and unsubscribe
//!   requests for one connection
//! - `PushDispatcher`: forwards feed updates for active subscriptions

mod dispatcher;
mod subscription;

pub use dispatcher::{DispatchStats, PushDispatcher};
pub use subscription::SubscriptionService;
