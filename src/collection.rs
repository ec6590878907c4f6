//! Collection handle owning the collaborators its cursors share.

use std::fmt;
use std::sync::Arc;

use bson::{Bson, Document};
use serde::de::DeserializeOwned;

use crate::config::CursorDefaults;
use crate::cursor::{Cursor, FindOptions};
use crate::error::Result;
use crate::protocol;
use crate::transport::{CommandRunner, SharedManipulator, Transport};

/// A named collection in a database, bound to a transport.
///
/// Cloning is cheap; every clone shares the same transport.
#[derive(Clone)]
pub struct Collection {
    database: String,
    name: String,
    transport: Arc<dyn Transport>,
    commands: Arc<dyn CommandRunner>,
    manipulators: Vec<SharedManipulator>,
    defaults: CursorDefaults,
}

impl Collection {
    /// Create a collection handle.
    ///
    /// # Arguments
    /// * `database` - Database name
    /// * `name` - Collection name
    /// * `transport` - Carries queries, get-mores and kill-cursors
    /// * `commands` - Runs administrative commands
    pub fn new(
        database: impl Into<String>,
        name: impl Into<String>,
        transport: Arc<dyn Transport>,
        commands: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            database: database.into(),
            name: name.into(),
            transport,
            commands,
            manipulators: Vec::new(),
            defaults: CursorDefaults::default(),
        }
    }

    /// Append an outgoing manipulator. Manipulators run in the order added.
    pub fn with_manipulator(mut self, manipulator: SharedManipulator) -> Self {
        self.manipulators.push(manipulator);
        self
    }

    /// Replace the defaults applied to new cursors.
    pub fn with_defaults(mut self, defaults: CursorDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// `database.collection`
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.database, self.name)
    }

    pub fn defaults(&self) -> &CursorDefaults {
        &self.defaults
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Apply every outgoing manipulator to a document read from the server.
    pub fn fix_outgoing(&self, document: Document) -> Document {
        self.manipulators
            .iter()
            .fold(document, |doc, m| m.transform_outgoing(doc, &self.name))
    }

    /// Run a command against this collection's database.
    ///
    /// Fails on `ok != 1` unless the reply's `errmsg` is in `allowable_errors`.
    pub async fn command(&self, command: Document, allowable_errors: &[&str]) -> Result<Document> {
        let response = self.commands.run_command(&self.database, command).await?;
        protocol::check_command_response(response, allowable_errors)
    }

    /// An unqueried cursor over documents matching `filter`.
    pub fn find(&self, filter: Document) -> Cursor<Document> {
        Cursor::for_filter(self.clone(), filter)
    }

    /// An unqueried cursor built from explicit options, decoding into `T`.
    pub fn find_with<T>(&self, options: FindOptions) -> Result<Cursor<T>> {
        Cursor::new(self.clone(), options)
    }

    /// The first document matching `filter`, if any.
    pub async fn find_one<T: DeserializeOwned>(&self, filter: Document) -> Result<Option<T>> {
        let mut cursor = self.find_with::<T>(FindOptions {
            filter: Some(filter),
            limit: -1,
            ..FindOptions::default()
        })?;
        Ok(cursor.execute().await?.into_iter().next())
    }

    /// Number of documents in the collection.
    pub async fn count(&self) -> Result<u64> {
        self.find(Document::new()).count(false).await
    }

    /// Distinct values of `key` among documents matching `filter`.
    pub async fn distinct(&self, key: &str, filter: Document) -> Result<Vec<Bson>> {
        self.find(filter).distinct(key).await
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("database", &self.database)
            .field("name", &self.name)
            .field("manipulators", &self.manipulators.len())
            .field("defaults", &self.defaults)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Message, RawReply};
    use crate::transport::mock::{ScriptedTransport, collection};
    use bson::doc;
    use tokio_test::assert_ok;

    #[test]
    fn test_names() {
        let transport = ScriptedTransport::new();
        let users = collection(&transport);
        assert_eq!(users.name(), "users");
        assert_eq!(users.database(), "test");
        assert_eq!(users.full_name(), "test.users");
    }

    #[test]
    fn test_defaults_seed_new_cursors() {
        let transport = ScriptedTransport::new();
        let users = collection(&transport).with_defaults(CursorDefaults {
            batch_size: 1,
            timeout: false,
            tz_aware: true,
        });
        let cursor = users.find(doc! {});
        assert_eq!(cursor.options().batch_size(), 2);
        assert!(!cursor.options().timeout);
        assert!(cursor.options().tz_aware);
    }

    #[test]
    fn test_manipulators_run_in_order() {
        let transport = ScriptedTransport::new();
        let first: SharedManipulator = Arc::new(|mut d: Document, _: &str| {
            d.insert("step", "first");
            d
        });
        let second: SharedManipulator = Arc::new(|mut d: Document, _: &str| {
            let previous = d.get_str("step").unwrap_or_default().to_string();
            d.insert("step", format!("{previous}+second"));
            d
        });
        let users = collection(&transport)
            .with_manipulator(first)
            .with_manipulator(second);
        let out = users.fix_outgoing(doc! {});
        assert_eq!(out.get_str("step").unwrap(), "first+second");
    }

    #[tokio::test]
    async fn test_find_one_uses_hard_limit() {
        let transport = ScriptedTransport::new();
        transport.reply(RawReply::batch(0, 0, vec![doc! { "a": 1 }]));
        transport.reply(RawReply::batch(0, 0, vec![]));

        let users = collection(&transport);
        let found: Option<Document> = assert_ok!(users.find_one(doc! { "a": 1 }).await);
        assert_eq!(found, Some(doc! { "a": 1 }));
        let missing: Option<Document> = assert_ok!(users.find_one(doc! { "a": 2 }).await);
        assert_eq!(missing, None);

        match &transport.sent()[0] {
            Message::Query { limit, .. } => assert_eq!(*limit, -1),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_count_and_distinct() {
        let transport = ScriptedTransport::new();
        transport.command_reply(doc! { "ok": 1, "n": 42 });
        transport.command_reply(doc! { "ok": 1, "values": [1, 2] });

        let users = collection(&transport);
        assert_eq!(users.count().await.unwrap(), 42);
        assert_eq!(
            users.distinct("a", doc! { "b": true }).await.unwrap(),
            vec![Bson::Int32(1), Bson::Int32(2)]
        );
    }

    #[tokio::test]
    async fn test_command_checks_reply() {
        let transport = ScriptedTransport::new();
        transport.command_reply(doc! { "ok": 0, "errmsg": "no such cmd" });

        let users = collection(&transport);
        assert!(users.command(doc! { "bogus": 1 }, &[]).await.is_err());
    }
}
