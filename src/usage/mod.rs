pub mod store;
pub mod tracker;
pub mod types;


pub use store::UsageStore;
pub use tracker::{UsageTracker, analyze_sessions, format_duration};
pub use types::*;
