//! Error handling for cursor operations.
//!
//! This module provides the error taxonomy used throughout the crate:
//! - Configuration errors raised synchronously by chain methods
//! - Sequencing errors when a cursor is reconfigured after execution began
//! - Protocol-integrity errors when a reply contradicts the cursor's state
//! - Transport errors, split into reconnect-eligible and generic failures
//!
//! Failures that happen after a request has been dispatched never unwind
//! across the await point; they are stored on the cursor and delivered by
//! the next call to [`crate::cursor::Cursor::execute`].
//!
//! # Example
//!
//! ```rust
//! use mongo_cursor::error::{CursorError, Result};
//!
//! fn check(result: Result<Vec<bson::Document>>) {
//!     match result {
//!         Ok(docs) => println!("{} documents", docs.len()),
//!         Err(e) if e.is_reconnect() => eprintln!("connection lost: {e}"),
//!         Err(e) => eprintln!("{e}"),
//!     }
//! }
//! ```

pub mod kinds;
pub mod mongo;

// Re-export commonly used types
pub use kinds::{
    ArgumentError, ConfigError, ConnectionError, CursorError, NS_MISSING, OperationFailure,
    ProtocolError, Result,
};
pub use mongo::classify_mongodb_error;
