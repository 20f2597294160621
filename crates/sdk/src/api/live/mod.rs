//! Live queries and channels on the client side.

mod channel;
mod manager;
mod subscriber;

pub use manager::{SubscriptionManager, Unsubscribe};
pub use subscriber::{LiveQueryChangeInfo, Observer};
