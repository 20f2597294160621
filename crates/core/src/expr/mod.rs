//! Query expressions: where clauses, sort orders and find options.

mod filter;
mod options;
mod order;

pub use filter::Filter;
pub use options::FindOptions;
pub use order::{Direction, OrderBy};
