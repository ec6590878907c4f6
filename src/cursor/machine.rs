//! Protocol driver and response applier.
//!
//! The cursor is re-entered after every reply. Each entry first delivers a
//! stored error, then drains buffered documents, then either asks for exactly
//! one request to be sent or hands back the accumulated results.

use std::mem;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use super::Cursor;
use super::spec;
use crate::error::{ConnectionError, CursorError, ProtocolError, Result};
use crate::protocol::{self, Message, RawReply, Reply};
use crate::transport::{ConnectionAffinity, ReplyOptions, Routed};

/// A request the cursor needs sent before it can make progress.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub message: Message,
    /// Connection the previous reply came from.
    pub route: Option<ConnectionAffinity>,
    pub options: ReplyOptions,
}

/// Outcome of [`Cursor::next_step`].
#[derive(Debug)]
pub enum Step<T> {
    /// Send this request, then pass its outcome to [`Cursor::complete`].
    Send(Request),
    /// The cursor is exhausted. Carries every document stored since the last delivery.
    Done(Vec<T>),
}

impl<T: DeserializeOwned> Cursor<T> {
    /// Advance the cursor by one step.
    ///
    /// # Returns
    /// * `Ok(Step::Send)` - A request to dispatch; the cursor is now in flight
    /// * `Ok(Step::Done)` - The accumulated results
    /// * `Err` - The cursor's terminal error, or a sequencing error if a
    ///   request is already in flight
    pub fn next_step(&mut self) -> Result<Step<T>> {
        if self.state.in_flight {
            return Err(CursorError::invalid_operation(
                "a request is already in flight for this cursor",
            ));
        }
        if let Some(error) = &self.state.error {
            return Err(error.clone());
        }

        self.drain()?;

        if !self.state.killed {
            let request = match self.state.cursor_id {
                None => Some(self.initial_query()),
                Some(0) => {
                    self.state.killed = true;
                    None
                }
                Some(id) => Some(self.get_more(id)),
            };
            if let Some(request) = request {
                self.state.in_flight = true;
                return Ok(Step::Send(request));
            }
        }

        Ok(Step::Done(mem::take(&mut self.results)))
    }

    fn initial_query(&self) -> Request {
        let options = &self.options;
        let flags = spec::query_flags(options, self.collection.transport().slave_okay());
        debug!(
            "Query {} skip={} limit={} flags={}",
            self.collection.full_name(),
            options.skip,
            options.limit,
            flags.bits()
        );

        Request {
            message: Message::query(
                flags,
                self.collection.full_name(),
                options.skip,
                options.limit,
                spec::query_spec(options),
                options.projection.clone(),
            ),
            route: self.state.affinity.clone(),
            options: ReplyOptions {
                expected_cursor_id: None,
                tz_aware: options.tz_aware,
            },
        }
    }

    fn get_more(&self, cursor_id: i64) -> Request {
        let limit = self.options.limit;
        let batch_size = self.options.batch_size;
        let count = if limit != 0 {
            let remaining = limit.abs() - self.state.retrieved;
            if batch_size != 0 {
                remaining.min(batch_size)
            } else {
                remaining
            }
        } else {
            batch_size
        };
        debug!(
            "Get more {} cursor={} count={}",
            self.collection.full_name(),
            cursor_id,
            count
        );

        Request {
            message: Message::get_more(self.collection.full_name(), count, cursor_id),
            route: self.state.affinity.clone(),
            options: ReplyOptions {
                expected_cursor_id: Some(cursor_id),
                tz_aware: self.options.tz_aware,
            },
        }
    }

    /// Drive the cursor to completion and return every stored document.
    ///
    /// After the results are delivered, further calls return an empty list
    /// until the cursor is rewound. A terminal error is returned on every call.
    pub async fn execute(&mut self) -> Result<Vec<T>> {
        loop {
            match self.next_step()? {
                Step::Done(results) => return Ok(results),
                Step::Send(request) => {
                    let transport = Arc::clone(self.collection.transport());
                    let pending = PendingReply { cursor: &mut *self };
                    let outcome = transport
                        .send_with_response(request.message, request.route, request.options)
                        .await;
                    pending.cursor.complete(outcome)?;
                }
            }
        }
    }

    /// Run the query with the explain modifier and return the server's plan.
    ///
    /// Explain requires a hard limit, so the limit is made negative.
    pub async fn explain(&mut self) -> Result<Vec<T>> {
        self.check_okay_to_chain()?;
        self.options.explain = true;
        self.options.limit = -self.options.limit.abs();
        self.execute().await
    }
}

/// Abandons the in-flight request if `execute` is dropped while awaiting its reply.
struct PendingReply<'a, T> {
    cursor: &'a mut Cursor<T>,
}

impl<T> Drop for PendingReply<'_, T> {
    fn drop(&mut self) {
        self.cursor.abandon();
    }
}

impl<T> Cursor<T> {
    /// Apply the outcome of the request returned by the last [`Cursor::next_step`].
    ///
    /// Failures in `outcome` are stored and surface from the next step. The
    /// only error returned here is a reply arriving with nothing in flight.
    pub fn complete(&mut self, outcome: Result<Routed<RawReply>>) -> Result<()> {
        if !self.state.in_flight {
            return Err(CursorError::invalid_operation(
                "received a reply with no request in flight",
            ));
        }
        self.state.in_flight = false;

        let expected = self.state.cursor_id;
        let applied = outcome.and_then(|routed| {
            self.state.affinity = routed.connection;
            protocol::unpack_response(routed.reply, expected)
        });

        match applied {
            Ok(reply) => self.apply(reply),
            Err(e) => {
                if e.is_reconnect() {
                    warn!("Lost connection to {}: {}", self.collection.full_name(), e);
                    self.collection.transport().disconnect();
                }
                self.fail(e);
            }
        }
        Ok(())
    }

    /// Give up on the request returned by the last [`Cursor::next_step`].
    ///
    /// Its reply may already have advanced the server cursor, so the cursor
    /// fails with [`ConnectionError::ReplyLost`] and releases the server cursor.
    /// Does nothing when no request is in flight.
    pub fn abandon(&mut self) {
        if !self.state.in_flight {
            return;
        }
        self.state.in_flight = false;
        warn!(
            "Request for {} abandoned before its reply arrived",
            self.collection.full_name()
        );
        self.fail(ConnectionError::ReplyLost.into());
    }

    fn apply(&mut self, reply: Reply) {
        self.state.cursor_id = Some(reply.cursor_id);

        if !self.options.tailable && reply.starting_from != self.state.retrieved {
            self.fail(
                ProtocolError::OffsetMismatch {
                    expected: self.state.retrieved,
                    actual: reply.starting_from,
                }
                .into(),
            );
            return;
        }

        let previously = self.state.retrieved;
        self.state.retrieved = previously.saturating_add(reply.number_returned);
        debug!(
            "Reply cursor={} returned={} retrieved={}",
            reply.cursor_id, reply.number_returned, self.state.retrieved
        );

        let empty = reply.data.is_empty();
        let mut data = reply.data;
        let limit = self.options.limit;
        if limit != 0 {
            let room = (limit.abs() - previously).max(0) as usize;
            data.truncate(room);
        }
        self.state.buffer.extend(data);

        let exhausted_by_limit =
            limit != 0 && reply.cursor_id != 0 && (limit < 0 || self.state.retrieved >= limit);
        if reply.cursor_id == 0 || empty || exhausted_by_limit {
            if self.state.holds_live_cursor() {
                info!(
                    "Cursor {} on {} finished after {} documents",
                    reply.cursor_id,
                    self.collection.full_name(),
                    self.state.retrieved
                );
            }
            self.die();
        }
    }

    /// Store a terminal error and release the server cursor.
    ///
    /// Only the first error is kept.
    pub(crate) fn fail(&mut self, error: CursorError) {
        if self.state.error.is_none() {
            debug!("Cursor on {} failed: {}", self.collection.full_name(), error);
            self.state.error = Some(error);
        }
        self.state.buffer.clear();
        self.die();
    }
}
