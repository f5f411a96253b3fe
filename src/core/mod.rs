// Public modules
pub mod connection;
pub mod dispatch;
pub mod environment;
pub mod error;
pub mod guard;
pub mod hooks;
pub mod naming;
pub mod output;
pub mod project;
pub mod registry;
pub mod resolvers;
pub mod retry;
pub mod settings;
pub mod stack;

// Internal modules - not part of public API
pub(crate) mod paths;

// Re-export common types for convenience
pub use error::{Error, ErrorCode, Result};
pub use output::{BulkResult, BulkSummary, ItemOutcome};
