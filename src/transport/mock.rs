//! Scripted in-memory transport for tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bson::{Document, doc};

use super::{CommandRunner, ConnectionAffinity, ReplyOptions, Routed, Transport};
use crate::collection::Collection;
use crate::error::{ConnectionError, CursorError, Result};
use crate::protocol::{KillCursors, Message, RawReply};

/// Replays scripted replies and records every request it sees.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    state: Mutex<MockState>,
    slave_okay: bool,
}

#[derive(Default)]
struct MockState {
    /// `None` is a request the server never answers.
    replies: VecDeque<Option<Result<Routed<RawReply>>>>,
    command_replies: VecDeque<Result<Document>>,
    sent: Vec<(Message, Option<ConnectionAffinity>, ReplyOptions)>,
    killed: Vec<(i64, Option<ConnectionAffinity>)>,
    commands: Vec<(String, Document)>,
    disconnects: usize,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn slave_okay() -> Arc<Self> {
        Arc::new(Self {
            slave_okay: true,
            ..Self::default()
        })
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a reply served without connection affinity.
    pub(crate) fn reply(&self, reply: RawReply) {
        self.state().replies.push_back(Some(Ok(Routed {
            connection: None,
            reply,
        })));
    }

    /// Queue a request that never gets a reply.
    pub(crate) fn hang(&self) {
        self.state().replies.push_back(None);
    }

    /// Queue a reply served by `connection`.
    pub(crate) fn reply_from(&self, connection: &str, reply: RawReply) {
        self.state().replies.push_back(Some(Ok(Routed {
            connection: Some(ConnectionAffinity::new(connection)),
            reply,
        })));
    }

    /// Queue a batch of `count` documents numbered from `first`.
    pub(crate) fn batch(&self, cursor_id: i64, first: i32, count: i32) {
        self.reply(RawReply::batch(cursor_id, first, numbered(first, count)));
    }

    pub(crate) fn fail(&self, error: CursorError) {
        self.state().replies.push_back(Some(Err(error)));
    }

    pub(crate) fn command_reply(&self, reply: Document) {
        self.state().command_replies.push_back(Ok(reply));
    }

    pub(crate) fn sent(&self) -> Vec<Message> {
        self.state().sent.iter().map(|(m, _, _)| m.clone()).collect()
    }

    pub(crate) fn routes(&self) -> Vec<Option<ConnectionAffinity>> {
        self.state().sent.iter().map(|(_, r, _)| r.clone()).collect()
    }

    pub(crate) fn reply_options(&self) -> Vec<ReplyOptions> {
        self.state().sent.iter().map(|(_, _, o)| *o).collect()
    }

    pub(crate) fn killed(&self) -> Vec<(i64, Option<ConnectionAffinity>)> {
        self.state().killed.clone()
    }

    pub(crate) fn commands(&self) -> Vec<(String, Document)> {
        self.state().commands.clone()
    }

    pub(crate) fn disconnects(&self) -> usize {
        self.state().disconnects
    }
}

/// A `test.users` collection served by `transport`.
pub(crate) fn collection(transport: &Arc<ScriptedTransport>) -> Collection {
    Collection::new("test", "users", transport.clone(), transport.clone())
}

/// Documents `{ "n": first }` .. `{ "n": first + count - 1 }`.
pub(crate) fn numbered(first: i32, count: i32) -> Vec<Document> {
    (first..first + count).map(|n| doc! { "n": n }).collect()
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send_with_response(
        &self,
        message: Message,
        route: Option<ConnectionAffinity>,
        options: ReplyOptions,
    ) -> Result<Routed<RawReply>> {
        let next = {
            let mut state = self.state();
            state.sent.push((message, route, options));
            state.replies.pop_front()
        };
        match next {
            Some(Some(reply)) => reply,
            Some(None) => std::future::pending().await,
            None => Err(ConnectionError::NotConnected.into()),
        }
    }

    fn close_cursor(&self, kill: KillCursors, route: Option<ConnectionAffinity>) {
        let mut state = self.state();
        for cursor_id in kill.cursor_ids {
            state.killed.push((cursor_id, route.clone()));
        }
    }

    fn disconnect(&self) {
        self.state().disconnects += 1;
    }

    fn slave_okay(&self) -> bool {
        self.slave_okay
    }
}

#[async_trait]
impl CommandRunner for ScriptedTransport {
    async fn run_command(&self, database: &str, command: Document) -> Result<Document> {
        let mut state = self.state();
        state.commands.push((database.to_string(), command));
        state
            .command_replies
            .pop_front()
            .unwrap_or(Err(ConnectionError::NotConnected.into()))
    }
}
