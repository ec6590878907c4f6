//! Cursor over the results of a query.
//!
//! A [`Cursor`] is configured through its chain methods, then driven to
//! completion with [`Cursor::execute`]. Every server interaction is a single
//! awaited request; the cursor never has more than one in flight. Between
//! requests the cursor is a plain state machine ([`Cursor::next_step`] /
//! [`Cursor::complete`]) that can also be driven by a custom scheduler.
//!
//! A live server-side cursor is always released: when the result set is
//! exhausted by limit, when an empty batch arrives, on [`Cursor::close`],
//! on [`Cursor::rewind`], or when the cursor is dropped.
//!
//! # Example
//!
//! ```no_run
//! use mongo_cursor::{Collection, Direction};
//! use bson::doc;
//!
//! async fn adults(users: &Collection) -> mongo_cursor::Result<Vec<bson::Document>> {
//!     let mut cursor = users.find(doc! { "age": { "$gte": 18 } });
//!     cursor.sort(("age", Direction::Descending))?.limit(20)?.batch_size(5)?;
//!     cursor.execute().await
//! }
//! ```

use std::collections::VecDeque;
use std::fmt;

use bson::Document;
use tracing::debug;

use crate::collection::Collection;
use crate::error::{CursorError, Result};
use crate::protocol::KillCursors;
use crate::transport::ConnectionAffinity;

mod aggregate;
mod chain;
mod machine;
mod sink;
pub mod spec;

pub use machine::{Request, Step};
pub use spec::{Direction, IndexKeys, Projection};

/// Per-document transform applied while draining a batch.
///
/// Receives each document after the outgoing fixups, with the collection it
/// was read from. Returning `None` or an empty document keeps it out of the
/// stored results.
pub type Transform = Box<dyn FnMut(Document, &Collection) -> Option<Document> + Send>;

/// Options accepted when creating a cursor.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Query filter; an empty filter matches every document.
    pub filter: Option<Document>,
    /// Fields to return.
    pub projection: Option<Projection>,
    /// Number of documents to skip.
    pub skip: i32,
    /// Maximum number of documents to return; negative for a single hard-limited batch.
    pub limit: i32,
    /// Batch size for get-more requests.
    pub batch_size: Option<i32>,
    /// Let the server expire the cursor when idle. Defaults to the collection's setting.
    pub timeout: Option<bool>,
    pub snapshot: bool,
    pub tailable: bool,
    pub sort: Option<IndexKeys>,
    pub max_scan: Option<i32>,
    /// Keep drained documents. Defaults to true.
    pub store: Option<bool>,
    /// Decode datetimes as timezone-aware values. Defaults to the collection's setting.
    pub tz_aware: Option<bool>,
    pub must_use_master: bool,
    /// The filter is a command document and must be sent verbatim.
    pub is_command: bool,
}

/// Configuration a cursor carries across rewinds and clones.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorOptions {
    pub(crate) filter: Document,
    pub(crate) projection: Option<Document>,
    pub(crate) ordering: Option<IndexKeys>,
    pub(crate) hint: Option<IndexKeys>,
    pub(crate) max_scan: Option<i32>,
    pub(crate) snapshot: bool,
    pub(crate) explain: bool,
    pub(crate) skip: i32,
    pub(crate) limit: i32,
    pub(crate) batch_size: i32,
    pub(crate) tailable: bool,
    pub(crate) timeout: bool,
    pub(crate) must_use_master: bool,
    pub(crate) store: bool,
    pub(crate) tz_aware: bool,
    pub(crate) is_command: bool,
}

impl Default for CursorOptions {
    fn default() -> Self {
        Self {
            filter: Document::new(),
            projection: None,
            ordering: None,
            hint: None,
            max_scan: None,
            snapshot: false,
            explain: false,
            skip: 0,
            limit: 0,
            batch_size: 0,
            tailable: false,
            timeout: true,
            must_use_master: false,
            store: true,
            tz_aware: false,
            is_command: false,
        }
    }
}

impl CursorOptions {
    pub fn filter(&self) -> &Document {
        &self.filter
    }

    pub fn projection(&self) -> Option<&Document> {
        self.projection.as_ref()
    }

    pub fn skip(&self) -> i32 {
        self.skip
    }

    pub fn limit(&self) -> i32 {
        self.limit
    }

    pub fn batch_size(&self) -> i32 {
        self.batch_size
    }

    pub fn max_scan(&self) -> Option<i32> {
        self.max_scan
    }

    pub fn is_tailable(&self) -> bool {
        self.tailable
    }

    pub fn is_explain(&self) -> bool {
        self.explain
    }

    pub fn stores_results(&self) -> bool {
        self.store
    }
}

/// Mutable iteration state. Never carried by clones.
#[derive(Debug, Default)]
pub(crate) struct IterationState {
    /// `None` until the initial query is answered; `Some(0)` once exhausted.
    pub(crate) cursor_id: Option<i64>,
    pub(crate) retrieved: i32,
    pub(crate) killed: bool,
    pub(crate) affinity: Option<ConnectionAffinity>,
    pub(crate) buffer: VecDeque<Document>,
    pub(crate) error: Option<CursorError>,
    pub(crate) in_flight: bool,
}

impl IterationState {
    /// Whether a server cursor exists that nobody has released yet.
    fn holds_live_cursor(&self) -> bool {
        matches!(self.cursor_id, Some(id) if id != 0) && !self.killed
    }
}

/// A cursor over query results, decoding each document into `T`.
pub struct Cursor<T = Document> {
    collection: Collection,
    options: CursorOptions,
    state: IterationState,
    results: Vec<T>,
    transform: Option<Transform>,
}

impl<T> Cursor<T> {
    /// Create an unqueried cursor.
    ///
    /// # Arguments
    /// * `collection` - Collection the cursor reads
    /// * `options` - Query shape and behavior
    ///
    /// # Returns
    /// * `Result<Self>` - New cursor, or an argument error
    pub fn new(collection: Collection, options: FindOptions) -> Result<Self> {
        if options.skip < 0 {
            return Err(CursorError::invalid_value("skip", "must be >= 0"));
        }
        if let Some(sort) = &options.sort {
            sort.validate()?;
        }
        let batch_size = match options.batch_size {
            Some(size) => spec::normalize_batch_size(size)?,
            None => spec::stored_batch_size(collection.defaults().batch_size),
        };

        let cursor_options = CursorOptions {
            filter: options.filter.unwrap_or_default(),
            projection: options.projection.map(Projection::into_document),
            ordering: options.sort,
            hint: None,
            max_scan: options.max_scan,
            snapshot: options.snapshot,
            explain: false,
            skip: options.skip,
            limit: options.limit,
            batch_size,
            tailable: options.tailable,
            timeout: options.timeout.unwrap_or(collection.defaults().timeout),
            must_use_master: options.must_use_master,
            store: options.store.unwrap_or(true),
            tz_aware: options.tz_aware.unwrap_or(collection.defaults().tz_aware),
            is_command: options.is_command,
        };

        Ok(Self::from_parts(collection, cursor_options))
    }

    /// Create an unqueried cursor for `filter` using the collection's defaults.
    pub(crate) fn for_filter(collection: Collection, filter: Document) -> Self {
        let defaults = collection.defaults();
        let options = CursorOptions {
            filter,
            batch_size: spec::stored_batch_size(defaults.batch_size),
            timeout: defaults.timeout,
            tz_aware: defaults.tz_aware,
            ..CursorOptions::default()
        };
        Self::from_parts(collection, options)
    }

    fn from_parts(collection: Collection, options: CursorOptions) -> Self {
        Self {
            collection,
            options,
            state: IterationState::default(),
            results: Vec::new(),
            transform: None,
        }
    }

    /// Install a per-document transform.
    ///
    /// With `store` disabled the transform is the only consumer of the
    /// documents, e.g. to stream them out as they arrive.
    pub fn with_transform<F>(mut self, transform: F) -> Self
    where
        F: FnMut(Document, &Collection) -> Option<Document> + Send + 'static,
    {
        self.transform = Some(Box::new(transform));
        self
    }

    /// The collection this cursor reads.
    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    /// Current configuration.
    pub fn options(&self) -> &CursorOptions {
        &self.options
    }

    /// Number of documents the server has returned so far.
    pub fn retrieved(&self) -> i32 {
        self.state.retrieved
    }

    /// Server cursor id: `None` before the first reply, `Some(0)` once exhausted.
    pub fn cursor_id(&self) -> Option<i64> {
        self.state.cursor_id
    }

    /// Whether the cursor may still produce documents.
    ///
    /// Mostly useful for tailable cursors, which stop iterating even though
    /// more documents may arrive later.
    pub fn alive(&self) -> bool {
        !self.state.buffer.is_empty() || !self.state.killed
    }

    /// Release the server-side cursor, if one is live.
    ///
    /// Safe to call repeatedly; only the first call on a live cursor sends
    /// a kill request.
    pub fn close(&mut self) {
        self.die();
    }

    /// Return the cursor to its unqueried state, keeping its configuration.
    ///
    /// A still-live server cursor is released first. Buffered and stored
    /// documents and any stored error are discarded.
    pub fn rewind(&mut self) -> &mut Self {
        self.die();
        self.state = IterationState::default();
        self.results.clear();
        self
    }

    /// An unqueried cursor with this configuration, decoding into `U`.
    pub fn clone_with_type<U>(&self) -> Cursor<U> {
        Cursor::from_parts(self.collection.clone(), self.options.clone())
    }

    /// Mark the cursor dead, sending a kill request for a live server cursor.
    pub(crate) fn die(&mut self) {
        if self.state.holds_live_cursor() {
            if let Some(id) = self.state.cursor_id {
                debug!(
                    "Killing cursor {} on {}",
                    id,
                    self.collection.full_name()
                );
                self.collection
                    .transport()
                    .close_cursor(KillCursors::new(vec![id]), self.state.affinity.clone());
            }
        }
        self.state.killed = true;
    }
}

/// Clones carry configuration only; the clone is unqueried and has no transform.
impl<T> Clone for Cursor<T> {
    fn clone(&self) -> Self {
        self.clone_with_type()
    }
}

impl<T> Drop for Cursor<T> {
    fn drop(&mut self) {
        if self.state.holds_live_cursor() {
            debug!("Cursor dropped while live, releasing it");
        }
        self.die();
    }
}

impl<T> fmt::Debug for Cursor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("collection", &self.collection.full_name())
            .field("options", &self.options)
            .field("state", &self.state)
            .field("results", &self.results.len())
            .field("transform", &self.transform.is_some())
            .finish()
    }
}
