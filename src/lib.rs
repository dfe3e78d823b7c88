//! Family Assistant script engine
//!
//! Runs small, synchronous-looking user scripts against host capabilities
//! that are asynchronous underneath:
//! - A sandboxed Python-subset interpreter with wall-clock and recursion limits
//! - A per-invocation registry of host functions (tools, time, JSON, attachments, wake)
//! - A blocking entry point and a pause/resume async entry point
//! - A sync→async bridge that works with or without a surrounding runtime
//! - SQLite-backed tools and attachments with retrying, single-entry database contexts

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Attachment storage
pub mod attachments;
/// Configuration files and environment overrides
pub mod config;
/// Per-invocation execution context
pub mod context;
/// Database access with retries and transactions
pub mod db;
/// Script engine and host function registry
pub mod engine;
/// Sandboxed script interpreter
pub mod script;
/// Tool providers and the sync/async bridge
pub mod tools;

// Re-export key types for convenience
pub use config::{AppConfig, EngineConfig};
pub use context::ExecutionContext;
pub use engine::{Globals, ScriptEngine, ScriptError};
pub use script::Object;

/// Current version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
