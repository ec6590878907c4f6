//! Chain methods configuring a cursor before it executes.
//!
//! Every method validates its argument, then refuses to run once the cursor
//! has dispatched its first request. The last call of each method wins.

use bson::Bson;

use super::Cursor;
use super::spec::{self, IndexKeys};
use crate::error::{CursorError, Result};

impl<T> Cursor<T> {
    /// Check if it is okay to chain more options onto this cursor.
    pub(crate) fn check_okay_to_chain(&self) -> Result<()> {
        if self.state.retrieved != 0 || self.state.cursor_id.is_some() || self.state.in_flight {
            return Err(CursorError::invalid_operation(
                "cannot set options after executing query",
            ));
        }
        Ok(())
    }

    /// Limit the number of documents returned. Zero means no limit.
    pub fn limit(&mut self, limit: i32) -> Result<&mut Self> {
        self.check_okay_to_chain()?;
        self.options.limit = limit;
        Ok(self)
    }

    /// Skip the first `skip` documents of the result set.
    pub fn skip(&mut self, skip: i32) -> Result<&mut Self> {
        if skip < 0 {
            return Err(CursorError::invalid_value("skip", "must be >= 0"));
        }
        self.check_okay_to_chain()?;
        self.options.skip = skip;
        Ok(self)
    }

    /// Set the number of documents requested per get-more.
    ///
    /// Zero leaves batch sizing to the server; one is stored as two.
    pub fn batch_size(&mut self, batch_size: i32) -> Result<&mut Self> {
        let batch_size = spec::normalize_batch_size(batch_size)?;
        self.check_okay_to_chain()?;
        self.options.batch_size = batch_size;
        Ok(self)
    }

    /// Limit the number of documents the server scans.
    pub fn max_scan(&mut self, max_scan: i32) -> Result<&mut Self> {
        if max_scan < 0 {
            return Err(CursorError::invalid_value("max_scan", "must be >= 0"));
        }
        self.check_okay_to_chain()?;
        self.options.max_scan = Some(max_scan);
        Ok(self)
    }

    /// Sort the results.
    ///
    /// Accepts a single key (ascending), a `(key, direction)` pair, or an
    /// ordered list of pairs.
    pub fn sort(&mut self, keys: impl Into<IndexKeys>) -> Result<&mut Self> {
        let keys = keys.into();
        keys.validate()?;
        self.check_okay_to_chain()?;
        self.options.ordering = Some(keys);
        Ok(self)
    }

    /// Tell the server which index to use.
    pub fn hint(&mut self, index: impl Into<IndexKeys>) -> Result<&mut Self> {
        let index = index.into();
        index.validate()?;
        self.check_okay_to_chain()?;
        self.options.hint = Some(index);
        Ok(self)
    }

    /// Remove any index hint.
    pub fn clear_hint(&mut self) -> Result<&mut Self> {
        self.check_okay_to_chain()?;
        self.options.hint = None;
        Ok(self)
    }

    /// Add a `$where` clause evaluated by the server for every scanned document.
    pub fn where_clause(&mut self, code: impl Into<String>) -> Result<&mut Self> {
        let code = code.into();
        if code.trim().is_empty() {
            return Err(CursorError::invalid_value("code", "must not be empty"));
        }
        self.check_okay_to_chain()?;
        self.options
            .filter
            .insert("$where", Bson::JavaScriptCode(code));
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::Direction;
    use crate::protocol::RawReply;
    use crate::transport::mock::{ScriptedTransport, collection};
    use bson::doc;

    #[test]
    fn test_batch_size_normalization() {
        let transport = ScriptedTransport::new();
        let mut cursor = collection(&transport).find(doc! {});

        cursor.batch_size(1).unwrap();
        assert_eq!(cursor.options().batch_size(), 2);
        cursor.batch_size(0).unwrap();
        assert_eq!(cursor.options().batch_size(), 0);
        cursor.batch_size(30).unwrap();
        assert_eq!(cursor.options().batch_size(), 30);

        let err = cursor.batch_size(-1).unwrap_err();
        assert!(matches!(err, CursorError::Argument(_)));
        assert_eq!(cursor.options().batch_size(), 30);
    }

    #[test]
    fn test_chaining_returns_cursor() {
        let transport = ScriptedTransport::new();
        let mut cursor = collection(&transport).find(doc! { "a": 1 });
        cursor
            .limit(5)
            .and_then(|c| c.skip(2))
            .and_then(|c| c.sort(vec![("a", Direction::Ascending), ("b", Direction::Descending)]))
            .unwrap();

        assert_eq!(cursor.options().limit(), 5);
        assert_eq!(cursor.options().skip(), 2);
        assert_eq!(
            cursor.options().ordering.as_ref().unwrap().to_document(),
            doc! { "a": 1, "b": -1 }
        );
    }

    #[test]
    fn test_argument_errors() {
        let transport = ScriptedTransport::new();
        let mut cursor = collection(&transport).find(doc! {});
        assert!(cursor.skip(-3).is_err());
        assert!(cursor.max_scan(-1).is_err());
        assert!(cursor.sort(Vec::<(&str, Direction)>::new()).is_err());
        assert!(cursor.where_clause("  ").is_err());
    }

    #[test]
    fn test_hint_set_and_clear() {
        let transport = ScriptedTransport::new();
        let mut cursor = collection(&transport).find(doc! {});
        cursor.hint([("a", Direction::Ascending)]).unwrap();
        assert_eq!(cursor.options().hint.as_ref().unwrap().to_document(), doc! { "a": 1 });
        cursor.clear_hint().unwrap();
        assert!(cursor.options().hint.is_none());
    }

    #[test]
    fn test_where_merges_into_filter_and_last_wins() {
        let transport = ScriptedTransport::new();
        let mut cursor = collection(&transport).find(doc! { "a": 1 });
        cursor.where_clause("this.a > 0").unwrap();
        cursor.where_clause("this.a > 1").unwrap();

        let filter = cursor.options().filter();
        assert_eq!(filter.get_i32("a").unwrap(), 1);
        assert_eq!(
            filter.get("$where"),
            Some(&Bson::JavaScriptCode("this.a > 1".to_string()))
        );
    }

    #[test]
    fn test_every_chain_method_fails_after_dispatch() {
        let transport = ScriptedTransport::new();
        let mut cursor = collection(&transport).find(doc! {});
        cursor.next_step().unwrap();

        assert!(cursor.limit(1).is_err());
        assert!(cursor.skip(1).is_err());
        assert!(cursor.batch_size(3).is_err());
        assert!(cursor.max_scan(10).is_err());
        assert!(cursor.sort("a").is_err());
        assert!(cursor.hint("a").is_err());
        assert!(cursor.clear_hint().is_err());
        assert!(cursor.where_clause("true").is_err());

        cursor.complete(Ok(crate::transport::Routed {
            connection: None,
            reply: RawReply::batch(9, 0, vec![doc! { "n": 1 }]),
        }))
        .unwrap();
        let err = cursor.limit(1).unwrap_err();
        assert!(matches!(err, CursorError::InvalidOperation(_)));
        cursor.close();
    }
}
