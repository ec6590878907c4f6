//! Derivation of the wire-level query document and option flags from a
//! cursor's configuration.

use bson::{Bson, Document, doc};

use super::CursorOptions;
use crate::error::{CursorError, Result};
use crate::protocol::QueryFlags;

/// Direction of one key in a sort or index specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
    /// Two-dimensional geospatial index.
    Geo2d,
}

impl Direction {
    fn to_bson(self) -> Bson {
        match self {
            Direction::Ascending => Bson::Int32(1),
            Direction::Descending => Bson::Int32(-1),
            Direction::Geo2d => Bson::String("2d".to_string()),
        }
    }
}

/// Ordered list of (key, direction) pairs used by `sort` and `hint`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexKeys(Vec<(String, Direction)>);

impl IndexKeys {
    /// Build from pairs, rejecting an empty list and empty key names.
    pub fn new(keys: Vec<(String, Direction)>) -> Result<Self> {
        let keys = IndexKeys(keys);
        keys.validate()?;
        Ok(keys)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.0.is_empty() {
            return Err(CursorError::invalid_type(
                "key_or_list",
                "a key or a non-empty list of (key, direction) pairs",
            ));
        }
        if self.0.iter().any(|(key, _)| key.is_empty()) {
            return Err(CursorError::invalid_value("key_or_list", "keys must not be empty"));
        }
        Ok(())
    }

    pub fn keys(&self) -> &[(String, Direction)] {
        &self.0
    }

    /// Render as an ordered document, e.g. `{ "age": -1, "name": 1 }`.
    pub fn to_document(&self) -> Document {
        self.0
            .iter()
            .map(|(key, direction)| (key.clone(), direction.to_bson()))
            .collect()
    }
}

/// A bare key sorts ascending.
impl From<&str> for IndexKeys {
    fn from(key: &str) -> Self {
        IndexKeys(vec![(key.to_string(), Direction::Ascending)])
    }
}

impl From<(&str, Direction)> for IndexKeys {
    fn from((key, direction): (&str, Direction)) -> Self {
        IndexKeys(vec![(key.to_string(), direction)])
    }
}

impl From<Vec<(&str, Direction)>> for IndexKeys {
    fn from(keys: Vec<(&str, Direction)>) -> Self {
        IndexKeys(keys.into_iter().map(|(k, d)| (k.to_string(), d)).collect())
    }
}

impl From<Vec<(String, Direction)>> for IndexKeys {
    fn from(keys: Vec<(String, Direction)>) -> Self {
        IndexKeys(keys)
    }
}

impl<const N: usize> From<[(&str, Direction); N]> for IndexKeys {
    fn from(keys: [(&str, Direction); N]) -> Self {
        IndexKeys(keys.into_iter().map(|(k, d)| (k.to_string(), d)).collect())
    }
}

/// Fields to return from a query.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// Include exactly these fields.
    Fields(Vec<String>),
    /// A projection document as the server expects it.
    Document(Document),
}

impl Projection {
    /// Normalize to a projection document.
    ///
    /// An empty projection asks for `_id` only.
    pub fn into_document(self) -> Document {
        match self {
            Projection::Fields(fields) if fields.is_empty() => doc! { "_id": 1 },
            Projection::Fields(fields) => fields.into_iter().map(|f| (f, Bson::Int32(1))).collect(),
            Projection::Document(doc) if doc.is_empty() => doc! { "_id": 1 },
            Projection::Document(doc) => doc,
        }
    }
}

impl From<Document> for Projection {
    fn from(doc: Document) -> Self {
        Projection::Document(doc)
    }
}

impl From<Vec<&str>> for Projection {
    fn from(fields: Vec<&str>) -> Self {
        Projection::Fields(fields.into_iter().map(str::to_string).collect())
    }
}

/// Batch size as stored on the cursor.
///
/// A batch size of one would read as "return everything and close" on the
/// wire, so it is stored as two.
pub(crate) fn normalize_batch_size(batch_size: i32) -> Result<i32> {
    if batch_size < 0 {
        return Err(CursorError::invalid_value("batch_size", "must be >= 0"));
    }
    Ok(stored_batch_size(batch_size))
}

/// Batch size to store for an already validated value; negatives fall back to the server default.
pub(crate) fn stored_batch_size(batch_size: i32) -> i32 {
    match batch_size {
        1 => 2,
        n if n < 0 => 0,
        n => n,
    }
}

/// Build the query document for the initial request.
///
/// Plain queries are wrapped under `$query` unless the filter already is;
/// modifiers are attached in a fixed order, each only when set.
pub(crate) fn query_spec(options: &CursorOptions) -> Document {
    let mut spec = if !options.is_command && !options.filter.contains_key("$query") {
        doc! { "$query": options.filter.clone() }
    } else {
        options.filter.clone()
    };

    if let Some(ordering) = &options.ordering {
        spec.insert("$orderby", ordering.to_document());
    }
    if options.explain {
        spec.insert("$explain", true);
    }
    if let Some(hint) = &options.hint {
        spec.insert("$hint", hint.to_document());
    }
    if options.snapshot {
        spec.insert("$snapshot", true);
    }
    if let Some(max_scan) = options.max_scan.filter(|n| *n > 0) {
        spec.insert("$maxScan", max_scan);
    }
    spec
}

/// Build the option bits for the initial request.
pub(crate) fn query_flags(options: &CursorOptions, slave_okay: bool) -> QueryFlags {
    let mut flags = QueryFlags::NONE;
    if options.tailable {
        flags = flags | QueryFlags::TAILABLE_CURSOR;
    }
    if slave_okay && !options.must_use_master {
        flags = flags | QueryFlags::SLAVE_OKAY;
    }
    if !options.timeout {
        flags = flags | QueryFlags::NO_TIMEOUT;
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_filter_is_wrapped() {
        let options = CursorOptions {
            filter: doc! { "age": { "$gt": 18 } },
            ..CursorOptions::default()
        };
        assert_eq!(query_spec(&options), doc! { "$query": { "age": { "$gt": 18 } } });
    }

    #[test]
    fn test_wrapped_filter_is_kept() {
        let options = CursorOptions {
            filter: doc! { "$query": { "a": 1 } },
            ..CursorOptions::default()
        };
        assert_eq!(query_spec(&options), doc! { "$query": { "a": 1 } });
    }

    #[test]
    fn test_command_filter_is_not_wrapped() {
        let options = CursorOptions {
            filter: doc! { "count": "users" },
            is_command: true,
            ..CursorOptions::default()
        };
        assert_eq!(query_spec(&options), doc! { "count": "users" });
    }

    #[test]
    fn test_modifier_order() {
        let options = CursorOptions {
            filter: doc! { "a": 1 },
            ordering: Some(IndexKeys::from(("a", Direction::Descending))),
            explain: true,
            hint: Some(IndexKeys::from("a")),
            snapshot: true,
            max_scan: Some(100),
            ..CursorOptions::default()
        };
        let spec = query_spec(&options);
        let keys: Vec<&str> = spec.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec!["$query", "$orderby", "$explain", "$hint", "$snapshot", "$maxScan"]
        );
        assert_eq!(spec.get_document("$orderby").unwrap(), &doc! { "a": -1 });
        assert_eq!(spec.get_document("$hint").unwrap(), &doc! { "a": 1 });
        assert_eq!(spec.get_i32("$maxScan").unwrap(), 100);
    }

    #[test]
    fn test_unset_modifiers_are_omitted() {
        let options = CursorOptions {
            max_scan: Some(0),
            ..CursorOptions::default()
        };
        assert_eq!(query_spec(&options), doc! { "$query": {} });
    }

    #[test]
    fn test_query_flags() {
        let mut options = CursorOptions::default();
        assert_eq!(query_flags(&options, false), QueryFlags::NONE);

        options.tailable = true;
        options.timeout = false;
        let flags = query_flags(&options, true);
        assert!(flags.contains(QueryFlags::TAILABLE_CURSOR));
        assert!(flags.contains(QueryFlags::SLAVE_OKAY));
        assert!(flags.contains(QueryFlags::NO_TIMEOUT));

        options.must_use_master = true;
        assert!(!query_flags(&options, true).contains(QueryFlags::SLAVE_OKAY));
    }

    #[test]
    fn test_batch_size_normalization() {
        assert_eq!(normalize_batch_size(0).unwrap(), 0);
        assert_eq!(normalize_batch_size(1).unwrap(), 2);
        assert_eq!(normalize_batch_size(50).unwrap(), 50);
        assert!(normalize_batch_size(-1).is_err());
    }

    #[test]
    fn test_index_keys() {
        let keys = IndexKeys::from(vec![("a", Direction::Ascending), ("b", Direction::Descending)]);
        assert_eq!(keys.to_document(), doc! { "a": 1, "b": -1 });
        assert_eq!(IndexKeys::from([("loc", Direction::Geo2d)]).to_document(), doc! { "loc": "2d" });
        assert!(IndexKeys::new(vec![]).is_err());
        assert!(IndexKeys::new(vec![(String::new(), Direction::Ascending)]).is_err());
    }

    #[test]
    fn test_projection_normalization() {
        assert_eq!(Projection::from(vec!["a", "b"]).into_document(), doc! { "a": 1, "b": 1 });
        assert_eq!(Projection::Fields(vec![]).into_document(), doc! { "_id": 1 });
        assert_eq!(Projection::from(doc! {}).into_document(), doc! { "_id": 1 });
        assert_eq!(Projection::from(doc! { "a": 0 }).into_document(), doc! { "a": 0 });
    }
}
