//! Server side live query registration, diffing and publishing.

mod diff;
pub(crate) mod publisher;
mod registry;

pub use diff::diff;
pub use publisher::Publisher;
pub use registry::LiveQueryRegistry;
