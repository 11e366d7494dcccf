//! CLI command implementations

pub mod cache;
pub mod completions;
pub mod config;
pub mod resolve;

pub use cache::execute as cache;
pub use completions::execute as completions;
pub use config::execute as config;
pub use resolve::execute as resolve;
