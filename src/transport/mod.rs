//! Seams to the collaborators a cursor depends on but does not implement:
//! the network transport, administrative command dispatch and outgoing
//! document manipulation.
//!
//! A transport is shared by every cursor created from the same connection.
//! Each cursor keeps at most one request in flight and routes its follow-up
//! requests with the [`ConnectionAffinity`] recorded from its previous reply.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bson::Document;

use crate::error::Result;
use crate::protocol::{KillCursors, Message, RawReply};

#[cfg(test)]
pub(crate) mod mock;

/// Opaque routing hint naming the connection that served a cursor's last request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionAffinity(String);

impl ConnectionAffinity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionAffinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Decoding hints forwarded with every request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplyOptions {
    /// Cursor id the request targets, if any.
    pub expected_cursor_id: Option<i64>,
    /// Decode datetimes as timezone-aware values.
    pub tz_aware: bool,
}

/// A reply together with the connection that produced it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Routed<T> {
    pub connection: Option<ConnectionAffinity>,
    pub reply: T,
}

/// Message transport shared by many cursors.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and wait for its reply.
    ///
    /// # Arguments
    /// * `message` - Request to encode and send
    /// * `route` - Connection the cursor's previous request was served by
    /// * `options` - Decoding hints for the reply
    async fn send_with_response(
        &self,
        message: Message,
        route: Option<ConnectionAffinity>,
        options: ReplyOptions,
    ) -> Result<Routed<RawReply>>;

    /// Release server-side cursors without waiting for the outcome.
    fn close_cursor(&self, kill: KillCursors, route: Option<ConnectionAffinity>);

    /// Drop connections after a reconnect-eligible failure.
    fn disconnect(&self);

    /// Whether queries may be served by secondaries.
    fn slave_okay(&self) -> bool {
        false
    }
}

/// Administrative command dispatch.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` against `database` and return the raw reply.
    ///
    /// Server-side command failures are returned as replies with `ok: 0`
    /// rather than errors, so callers can accept specific messages.
    async fn run_command(&self, database: &str, command: Document) -> Result<Document>;
}

/// Rewrites documents on their way from the server to the application.
pub trait DocumentManipulator: Send + Sync {
    fn transform_outgoing(&self, document: Document, collection: &str) -> Document;
}

/// Any closure with the right shape is a manipulator.
impl<F> DocumentManipulator for F
where
    F: Fn(Document, &str) -> Document + Send + Sync,
{
    fn transform_outgoing(&self, document: Document, collection: &str) -> Document {
        self(document, collection)
    }
}

/// Shared handle to a manipulator.
pub type SharedManipulator = Arc<dyn DocumentManipulator>;

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_affinity_display() {
        let affinity = ConnectionAffinity::new("conn-7");
        assert_eq!(affinity.to_string(), "conn-7");
        assert_eq!(affinity.as_str(), "conn-7");
    }

    #[test]
    fn test_closure_manipulator() {
        let tag = |mut doc: Document, collection: &str| {
            doc.insert("_from", collection);
            doc
        };
        let manipulator: SharedManipulator = Arc::new(tag);
        let out = manipulator.transform_outgoing(doc! { "a": 1 }, "users");
        assert_eq!(out.get_str("_from").unwrap(), "users");
    }
}
