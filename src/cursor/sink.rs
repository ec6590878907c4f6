//! Result sink: turns buffered documents into stored results.

use serde::de::DeserializeOwned;

use super::Cursor;
use crate::error::{CursorError, Result};

impl<T: DeserializeOwned> Cursor<T> {
    /// Empty the buffer in arrival order.
    ///
    /// Each document goes through the collection's outgoing fixups, then the
    /// transform. What is left is decoded into `T` and kept only when the
    /// cursor stores results and the document is not empty.
    pub(crate) fn drain(&mut self) -> Result<()> {
        while let Some(document) = self.state.buffer.pop_front() {
            let document = self.collection.fix_outgoing(document);
            let document = match self.transform.as_mut() {
                Some(transform) => match transform(document, &self.collection) {
                    Some(document) => document,
                    None => continue,
                },
                None => document,
            };

            if !self.options.store || document.is_empty() {
                continue;
            }
            match bson::from_document::<T>(document) {
                Ok(value) => self.results.push(value),
                Err(e) => {
                    let error = CursorError::from(e);
                    self.fail(error.clone());
                    return Err(error);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::collection::Collection;
    use crate::protocol::RawReply;
    use crate::transport::SharedManipulator;
    use crate::transport::mock::{ScriptedTransport, collection};
    use bson::{Document, doc};
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct User {
        name: String,
        age: i32,
    }

    #[tokio::test]
    async fn test_decodes_into_target_type() {
        let transport = ScriptedTransport::new();
        transport.reply(RawReply::batch(
            0,
            0,
            vec![doc! { "name": "ada", "age": 36 }, doc! { "name": "alan", "age": 41 }],
        ));

        let mut cursor = collection(&transport).find(doc! {}).clone_with_type::<User>();
        let users = cursor.execute().await.unwrap();
        assert_eq!(
            users,
            vec![
                User { name: "ada".to_string(), age: 36 },
                User { name: "alan".to_string(), age: 41 },
            ]
        );
    }

    #[tokio::test]
    async fn test_decode_failure_is_terminal() {
        let transport = ScriptedTransport::new();
        transport.reply(RawReply::batch(12, 0, vec![doc! { "name": "ada" }]));

        let mut cursor = collection(&transport).find(doc! {}).clone_with_type::<User>();
        let err = cursor.execute().await.unwrap_err();
        assert!(matches!(err, CursorError::Decode(_)));
        assert_eq!(transport.killed(), vec![(12, None)]);
        assert!(cursor.execute().await.is_err());
    }

    #[tokio::test]
    async fn test_outgoing_fixups_run_before_transform() {
        let transport = ScriptedTransport::new();
        transport.reply(RawReply::batch(0, 0, vec![doc! { "a": 1 }]));

        let tag: SharedManipulator = Arc::new(|mut d: Document, collection: &str| {
            d.insert("from", collection);
            d
        });
        let users = collection(&transport).with_manipulator(tag);
        let mut cursor = users
            .find(doc! {})
            .with_transform(|d: Document, collection: &Collection| {
                assert_eq!(d.get_str("from").unwrap(), "users");
                assert_eq!(collection.full_name(), "test.users");
                Some(d)
            });

        let docs = cursor.execute().await.unwrap();
        assert_eq!(docs, vec![doc! { "a": 1, "from": "users" }]);
    }

    #[tokio::test]
    async fn test_empty_documents_are_not_stored() {
        let transport = ScriptedTransport::new();
        transport.reply(RawReply::batch(0, 0, vec![doc! { "a": 1 }, doc! {}]));

        let mut cursor = collection(&transport).find(doc! {});
        let docs = cursor.execute().await.unwrap();
        assert_eq!(docs, vec![doc! { "a": 1 }]);
    }

    #[tokio::test]
    async fn test_transform_emptying_a_document_drops_it() {
        let transport = ScriptedTransport::new();
        transport.reply(RawReply::batch(
            0,
            0,
            vec![doc! { "a": 1 }, doc! { "b": 2 }, doc! { "c": 3 }],
        ));

        let mut cursor = collection(&transport)
            .find(doc! {})
            .with_transform(|d: Document, _: &Collection| {
                if d.contains_key("b") {
                    Some(Document::new())
                } else {
                    Some(d)
                }
            });
        let docs = cursor.execute().await.unwrap();
        assert_eq!(docs, vec![doc! { "a": 1 }, doc! { "c": 3 }]);
    }

    #[tokio::test]
    async fn test_empty_document_does_not_reach_typed_decode() {
        let transport = ScriptedTransport::new();
        transport.reply(RawReply::batch(
            0,
            0,
            vec![doc! {}, doc! { "name": "ada", "age": 36 }],
        ));

        let mut cursor = collection(&transport).find(doc! {}).clone_with_type::<User>();
        let users = cursor.execute().await.unwrap();
        assert_eq!(users, vec![User { name: "ada".to_string(), age: 36 }]);
    }
}
