//! `count` and `distinct` over a cursor's filter.
//!
//! Both run a single administrative command and never touch iteration state.

use std::future::Future;

use bson::{Bson, Document, doc};

use super::Cursor;
use crate::collection::Collection;
use crate::error::{CursorError, NS_MISSING, ProtocolError, Result};
use crate::protocol::numeric_field;

impl<T> Cursor<T> {
    /// Count the documents matching this cursor's filter.
    ///
    /// The returned future owns what it needs and does not borrow the cursor.
    ///
    /// # Arguments
    /// * `with_limit_and_skip` - Apply the cursor's limit and skip to the count
    ///
    /// # Returns
    /// * `Result<u64>` - Matching documents; 0 when the collection does not exist
    pub fn count(
        &self,
        with_limit_and_skip: bool,
    ) -> impl Future<Output = Result<u64>> + Send + use<T> {
        let options = &self.options;
        let mut command = doc! {
            "count": self.collection.name(),
            "query": options.filter.clone(),
        };
        if let Some(projection) = &options.projection {
            command.insert("fields", projection.clone());
        }
        if with_limit_and_skip {
            if options.limit != 0 {
                command.insert("limit", options.limit);
            }
            if options.skip != 0 {
                command.insert("skip", options.skip);
            }
        }

        run_count(self.collection.clone(), command)
    }

    /// Distinct values of `key` among the documents matching this cursor's filter.
    pub fn distinct(&self, key: &str) -> impl Future<Output = Result<Vec<Bson>>> + Send + use<T> {
        let command = if key.is_empty() {
            Err(CursorError::invalid_value("key", "must not be empty"))
        } else {
            let mut command = doc! {
                "distinct": self.collection.name(),
                "key": key,
            };
            if !self.options.filter.is_empty() {
                command.insert("query", self.options.filter.clone());
            }
            Ok(command)
        };

        run_distinct(self.collection.clone(), command)
    }
}

async fn run_count(collection: Collection, command: Document) -> Result<u64> {
    let response = match collection.command(command, &[NS_MISSING]).await {
        Ok(response) => response,
        Err(e) if e.is_namespace_missing() => return Ok(0),
        Err(e) => return Err(e),
    };
    if matches!(response.get_str("errmsg"), Ok(message) if message == NS_MISSING) {
        return Ok(0);
    }

    let n = numeric_field(&response, "n")
        .ok_or_else(|| ProtocolError::MalformedReply("count reply without 'n'".to_string()))?;
    Ok(n.max(0.0) as u64)
}

async fn run_distinct(collection: Collection, command: Result<Document>) -> Result<Vec<Bson>> {
    let mut response = collection.command(command?, &[]).await?;
    match response.remove("values") {
        Some(Bson::Array(values)) => Ok(values),
        _ => Err(ProtocolError::MalformedReply("distinct reply without 'values'".to_string()).into()),
    }
}
