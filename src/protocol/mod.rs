//! Wire-level request and reply records.
//!
//! The cursor never encodes bytes itself. It describes each request as a
//! [`Message`] and hands it to a [`crate::transport::Transport`], which owns
//! encoding and decoding. Replies come back as a [`RawReply`] and are checked
//! by [`unpack_response`] before the cursor applies them.

use std::ops::BitOr;

use bson::{Bson, Document};

use crate::error::{CursorError, ProtocolError, Result};

/// Reply flag: the requested cursor id is unknown to the server.
pub const RESPONSE_CURSOR_NOT_FOUND: i32 = 1;

/// Reply flag: the query failed and the single returned document carries `$err`.
pub const RESPONSE_QUERY_FAILURE: i32 = 2;

/// Option bits attached to an initial query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct QueryFlags(i32);

impl QueryFlags {
    pub const NONE: QueryFlags = QueryFlags(0);
    pub const TAILABLE_CURSOR: QueryFlags = QueryFlags(2);
    pub const SLAVE_OKAY: QueryFlags = QueryFlags(4);
    pub const NO_TIMEOUT: QueryFlags = QueryFlags(16);

    /// Raw bitmask as sent on the wire.
    pub const fn bits(self) -> i32 {
        self.0
    }

    /// Whether every bit of `other` is set.
    pub const fn contains(self, other: QueryFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for QueryFlags {
    type Output = QueryFlags;

    fn bitor(self, rhs: QueryFlags) -> QueryFlags {
        QueryFlags(self.0 | rhs.0)
    }
}

/// A request for the transport to encode and send.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Initial query opening a (possibly) multi-batch result set.
    Query {
        flags: QueryFlags,
        full_collection_name: String,
        skip: i32,
        limit: i32,
        spec: Document,
        projection: Option<Document>,
    },

    /// Next batch for a live server cursor.
    GetMore {
        full_collection_name: String,
        count: i32,
        cursor_id: i64,
    },
}

impl Message {
    /// Build an initial query request.
    pub fn query(
        flags: QueryFlags,
        full_collection_name: impl Into<String>,
        skip: i32,
        limit: i32,
        spec: Document,
        projection: Option<Document>,
    ) -> Self {
        Message::Query {
            flags,
            full_collection_name: full_collection_name.into(),
            skip,
            limit,
            spec,
            projection,
        }
    }

    /// Build a get-more request.
    pub fn get_more(full_collection_name: impl Into<String>, count: i32, cursor_id: i64) -> Self {
        Message::GetMore {
            full_collection_name: full_collection_name.into(),
            count,
            cursor_id,
        }
    }

}

/// Release of server-side cursors. Sent without waiting for a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillCursors {
    pub cursor_ids: Vec<i64>,
}

impl KillCursors {
    pub fn new(cursor_ids: Vec<i64>) -> Self {
        Self { cursor_ids }
    }
}

/// Split a `database.collection` namespace. Collection names may contain dots.
pub fn split_namespace(namespace: &str) -> Result<(&str, &str)> {
    match namespace.split_once('.') {
        Some((database, collection)) if !database.is_empty() && !collection.is_empty() => {
            Ok((database, collection))
        }
        _ => Err(CursorError::invalid_value(
            "namespace",
            format!("expected 'database.collection', got '{namespace}'"),
        )),
    }
}

/// A reply as produced by the transport, before flag checks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawReply {
    /// Response flag bits.
    pub response_flags: i32,
    /// Server cursor id; 0 once the result set is exhausted.
    pub cursor_id: i64,
    /// Offset of the first returned document within the result set.
    pub starting_from: i32,
    /// Number of documents the server returned.
    pub number_returned: i32,
    /// Decoded documents, in server order.
    pub documents: Vec<Document>,
}

/// A checked reply ready to be applied to a cursor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    pub cursor_id: i64,
    pub starting_from: i32,
    pub number_returned: i32,
    pub data: Vec<Document>,
}

impl RawReply {
    /// Build a successful reply carrying `documents`.
    pub fn batch(cursor_id: i64, starting_from: i32, documents: Vec<Document>) -> Self {
        Self {
            response_flags: 0,
            cursor_id,
            starting_from,
            number_returned: documents.len() as i32,
            documents,
        }
    }
}

/// Check the response flags of a reply.
///
/// # Arguments
/// * `raw` - Reply as produced by the transport
/// * `expected_cursor_id` - Cursor id the request was sent for, if any
///
/// # Returns
/// * `Result<Reply>` - The reply's batch, or the failure it reports
pub fn unpack_response(raw: RawReply, expected_cursor_id: Option<i64>) -> Result<Reply> {
    if raw.response_flags & RESPONSE_CURSOR_NOT_FOUND != 0 {
        let id = expected_cursor_id.unwrap_or(raw.cursor_id);
        return Err(CursorError::from_server(
            format!("cursor id '{id}' not valid at server"),
            None,
        ));
    }

    if raw.response_flags & RESPONSE_QUERY_FAILURE != 0 {
        let error = raw.documents.first().ok_or_else(|| {
            ProtocolError::MalformedReply("query failure without an error document".to_string())
        })?;
        let message = error
            .get_str("$err")
            .unwrap_or("unknown query failure")
            .to_string();
        return Err(CursorError::from_server(message, numeric_field(error, "code").map(|c| c as i32)));
    }

    if raw.number_returned < 0 {
        return Err(ProtocolError::MalformedReply(format!(
            "negative document count {}",
            raw.number_returned
        ))
        .into());
    }

    Ok(Reply {
        cursor_id: raw.cursor_id,
        starting_from: raw.starting_from,
        number_returned: raw.number_returned,
        data: raw.documents,
    })
}

/// Check a command reply.
///
/// A reply with `ok != 1` is a failure unless its `errmsg` is one of
/// `allowable_errors`, in which case the reply is returned as-is so the
/// caller can interpret it.
pub fn check_command_response(response: Document, allowable_errors: &[&str]) -> Result<Document> {
    let ok = numeric_field(&response, "ok").unwrap_or(0.0);
    if ok == 1.0 {
        return Ok(response);
    }

    let message = response.get_str("errmsg").unwrap_or("command failed");
    if allowable_errors.contains(&message) {
        return Ok(response);
    }

    let code = numeric_field(&response, "code").map(|c| c as i32);
    Err(CursorError::from_server(message, code))
}

/// Read a numeric field regardless of its BSON width.
pub(crate) fn numeric_field(doc: &Document, key: &str) -> Option<f64> {
    match doc.get(key)? {
        Bson::Int32(v) => Some(*v as f64),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        Bson::Boolean(v) => Some(if *v { 1.0 } else { 0.0 }),
        _ => None,
    }
}
