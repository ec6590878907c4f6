//! Non-blocking MongoDB query cursor
//!
//! This library iterates the results of a query over a shared, asynchronous
//! transport. A cursor turns its configuration into query and get-more
//! requests, keeps exactly one request in flight, applies limit and skip
//! across batches, follows tailable cursors and always releases the
//! server-side cursor it opened.
//!
//! # Modules
//!
//! - `cli`: Command-line interface for the `mongo-cursor` binary
//! - `collection`: Collection handle and query entry points
//! - `config`: Configuration management
//! - `cursor`: The cursor state machine and its chain API
//! - `driver`: Transport backed by the official MongoDB driver
//! - `error`: Error types and handling
//! - `protocol`: Wire-level request and reply records
//! - `transport`: Traits for the transport and command dispatch
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use bson::doc;
//! use mongo_cursor::{Config, Direction, driver::MongoTransport};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let transport = Arc::new(MongoTransport::connect(&config.connection).await?);
//!     let users = transport.collection("app", "users");
//!
//!     let mut cursor = users.find(doc! { "active": true });
//!     cursor.sort(("created", Direction::Descending))?.limit(50)?;
//!     for user in cursor.execute().await? {
//!         println!("{user}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod collection;
pub mod config;
pub mod cursor;
pub mod driver;
pub mod error;
pub mod protocol;
pub mod transport;

// Re-export commonly used types
pub use collection::Collection;
pub use config::Config;
pub use cursor::{Cursor, Direction, FindOptions, IndexKeys, Projection};
pub use error::{CursorError, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library version string
///
/// # Returns
/// * `&str` - Version string
pub fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
