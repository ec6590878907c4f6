//! Transport backed by the official MongoDB driver.
//!
//! Legacy query, get-more and kill-cursors requests are rewritten as `find`,
//! `getMore` and `killCursors` commands. A server cursor only lives inside the
//! session that opened it, so each live cursor keeps its [`ClientSession`]
//! pinned under a generated connection affinity. Get-mores and kills for that
//! cursor are routed back to the same session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bson::{Bson, Document, doc};
use mongodb::error::ErrorKind;
use mongodb::{Client, ClientSession};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::collection::Collection;
use crate::config::ConnectionConfig;
use crate::error::mongo::error_name;
use crate::error::{CursorError, ProtocolError, Result};
use crate::protocol::{
    KillCursors, Message, QueryFlags, RESPONSE_CURSOR_NOT_FOUND, RawReply, split_namespace,
};
use crate::transport::{CommandRunner, ConnectionAffinity, ReplyOptions, Routed, Transport};

/// Collection name addressing a database's command namespace.
const COMMAND_COLLECTION: &str = "$cmd";

/// Modifiers the `find` command has no equivalent for.
const UNSUPPORTED_MODIFIERS: [&str; 2] = ["$snapshot", "$maxScan"];

/// A session holding a live server cursor.
struct PinnedCursor {
    session: ClientSession,
    database: String,
    collection: String,
    /// Documents returned so far, reported back as each batch's starting offset.
    returned: i32,
}

/// Pinned entries by connection affinity.
///
/// An entry stays registered while a request uses it and leaves only when
/// its cursor is exhausted, killed or the connection is dropped. A failed or
/// cancelled get-more therefore leaves the cursor reachable by the kill that
/// follows.
struct Pins<V> {
    entries: Mutex<HashMap<String, Arc<AsyncMutex<V>>>>,
}

impl<V> Pins<V> {
    fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Arc<AsyncMutex<V>>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn pin(&self, affinity: &ConnectionAffinity, value: V) {
        self.entries()
            .insert(affinity.as_str().to_string(), Arc::new(AsyncMutex::new(value)));
    }

    fn get(&self, route: Option<&ConnectionAffinity>) -> Option<Arc<AsyncMutex<V>>> {
        route.and_then(|affinity| self.entries().get(affinity.as_str()).cloned())
    }

    fn unpin(&self, route: Option<&ConnectionAffinity>) -> Option<Arc<AsyncMutex<V>>> {
        route.and_then(|affinity| self.entries().remove(affinity.as_str()))
    }

    /// Forget every entry, returning how many there were.
    fn clear(&self) -> usize {
        let mut entries = self.entries();
        let count = entries.len();
        entries.clear();
        count
    }
}

/// [`Transport`] and [`CommandRunner`] over a `mongodb::Client`.
pub struct MongoTransport {
    client: Client,
    slave_okay: bool,
    cursors: Pins<PinnedCursor>,
}

impl MongoTransport {
    pub fn new(client: Client, slave_okay: bool) -> Self {
        Self {
            client,
            slave_okay,
            cursors: Pins::new(),
        }
    }

    /// Connect using the configured URI.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        config.validate_uri()?;
        let client = Client::with_uri_str(&config.uri).await?;
        debug!("Connected client for {}", config.uri);
        Ok(Self::new(client, config.slave_okay))
    }

    /// A collection handle served by this transport.
    pub fn collection(self: &Arc<Self>, database: &str, name: &str) -> Collection {
        Collection::new(database, name, self.clone(), self.clone())
    }

    async fn query(
        &self,
        namespace: &str,
        flags: QueryFlags,
        skip: i32,
        limit: i32,
        spec: Document,
        projection: Option<Document>,
    ) -> Result<Routed<RawReply>> {
        let (database, collection) = split_namespace(namespace)?;
        let db = self.client.database(database);

        if collection == COMMAND_COLLECTION {
            let response = db.run_command(spec).await?;
            return Ok(Routed {
                connection: None,
                reply: RawReply::batch(0, 0, vec![response]),
            });
        }

        let find = find_command(collection, flags, skip, limit, spec, projection);
        let mut session = self.client.start_session().await?;
        let response = db.run_command(find.command).session(&mut session).await?;
        if find.explain {
            return Ok(Routed {
                connection: None,
                reply: RawReply::batch(0, 0, vec![response]),
            });
        }

        let (cursor_id, documents) = cursor_batch(response, "firstBatch")?;
        let reply = RawReply::batch(cursor_id, 0, documents);
        if cursor_id == 0 {
            return Ok(Routed {
                connection: None,
                reply,
            });
        }

        let affinity = ConnectionAffinity::new(Uuid::new_v4().to_string());
        debug!("Pinned cursor {} on {} to {}", cursor_id, namespace, affinity);
        self.cursors.pin(
            &affinity,
            PinnedCursor {
                session,
                database: database.to_string(),
                collection: collection.to_string(),
                returned: reply.number_returned,
            },
        );
        Ok(Routed {
            connection: Some(affinity),
            reply,
        })
    }

    async fn get_more(
        &self,
        count: i32,
        cursor_id: i64,
        route: Option<ConnectionAffinity>,
    ) -> Result<Routed<RawReply>> {
        let Some(entry) = self.cursors.get(route.as_ref()) else {
            return Ok(Routed {
                connection: route,
                reply: RawReply {
                    response_flags: RESPONSE_CURSOR_NOT_FOUND,
                    cursor_id,
                    ..RawReply::default()
                },
            });
        };

        let mut pinned = entry.lock().await;
        let command = get_more_command(&pinned.collection, count, cursor_id);
        let response = self
            .client
            .database(&pinned.database)
            .run_command(command)
            .session(&mut pinned.session)
            .await?;

        let (next_id, documents) = cursor_batch(response, "nextBatch")?;
        let reply = RawReply::batch(next_id, pinned.returned, documents);
        pinned.returned = pinned.returned.saturating_add(reply.number_returned);
        if next_id == 0 {
            self.cursors.unpin(route.as_ref());
        }
        Ok(Routed {
            connection: route,
            reply,
        })
    }
}

#[async_trait]
impl Transport for MongoTransport {
    async fn send_with_response(
        &self,
        message: Message,
        route: Option<ConnectionAffinity>,
        // The driver decodes datetimes itself, always as UTC.
        _options: ReplyOptions,
    ) -> Result<Routed<RawReply>> {
        match message {
            Message::Query {
                flags,
                full_collection_name,
                skip,
                limit,
                spec,
                projection,
            } => {
                self.query(&full_collection_name, flags, skip, limit, spec, projection)
                    .await
            }
            Message::GetMore {
                count, cursor_id, ..
            } => self.get_more(count, cursor_id, route).await,
        }
    }

    fn close_cursor(&self, kill: KillCursors, route: Option<ConnectionAffinity>) {
        let Some(entry) = self.cursors.unpin(route.as_ref()) else {
            debug!(
                "Cursors {:?} have no pinned session, leaving them to server expiry",
                kill.cursor_ids
            );
            return;
        };

        let client = self.client.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let mut pinned = entry.lock().await;
                    if let Err(e) = kill_cursors(&client, &mut pinned, &kill).await {
                        warn!("Failed to kill cursors {:?}: {}", kill.cursor_ids, e);
                    }
                });
            }
            Err(_) => warn!("No async runtime to kill cursors {:?}", kill.cursor_ids),
        }
    }

    fn disconnect(&self) {
        let dropped = self.cursors.clear();
        if dropped > 0 {
            warn!("Dropping {} pinned cursor sessions", dropped);
        }
    }

    fn slave_okay(&self) -> bool {
        self.slave_okay
    }
}

#[async_trait]
impl CommandRunner for MongoTransport {
    async fn run_command(&self, database: &str, command: Document) -> Result<Document> {
        match self.client.database(database).run_command(command).await {
            Ok(reply) => Ok(reply),
            Err(e) => match e.kind.as_ref() {
                ErrorKind::Command(failure) => {
                    let mut reply = doc! {
                        "ok": 0.0,
                        "errmsg": failure.message.clone(),
                        "code": failure.code,
                    };
                    if let Some(name) = error_name(failure.code) {
                        reply.insert("codeName", name);
                    }
                    Ok(reply)
                }
                _ => Err(e.into()),
            },
        }
    }
}

async fn kill_cursors(client: &Client, pinned: &mut PinnedCursor, kill: &KillCursors) -> Result<()> {
    let command = kill_cursors_command(&pinned.collection, &kill.cursor_ids);
    client
        .database(&pinned.database)
        .run_command(command)
        .session(&mut pinned.session)
        .await?;
    Ok(())
}

#[derive(Debug, PartialEq)]
struct FindCommand {
    command: Document,
    explain: bool,
}

/// Rewrite a legacy query as a `find` command.
fn find_command(
    collection: &str,
    flags: QueryFlags,
    skip: i32,
    limit: i32,
    mut spec: Document,
    projection: Option<Document>,
) -> FindCommand {
    let filter = if spec.contains_key("$query") {
        match spec.remove("$query") {
            Some(Bson::Document(filter)) => filter,
            _ => Document::new(),
        }
    } else {
        std::mem::take(&mut spec)
    };

    let mut command = doc! { "find": collection, "filter": filter };
    if let Some(sort) = spec.remove("$orderby") {
        command.insert("sort", sort);
    }
    if let Some(hint) = spec.remove("$hint") {
        command.insert("hint", hint);
    }
    if let Some(projection) = projection {
        command.insert("projection", projection);
    }
    if skip > 0 {
        command.insert("skip", skip as i64);
    }
    if limit != 0 {
        command.insert("limit", i64::from(limit).abs());
        if limit < 0 {
            command.insert("singleBatch", true);
        }
    }
    if flags.contains(QueryFlags::TAILABLE_CURSOR) {
        command.insert("tailable", true);
    }
    if flags.contains(QueryFlags::NO_TIMEOUT) {
        command.insert("noCursorTimeout", true);
    }
    for modifier in UNSUPPORTED_MODIFIERS {
        if spec.remove(modifier).is_some() {
            warn!("{} has no find command equivalent, ignoring it", modifier);
        }
    }

    let explain = matches!(spec.remove("$explain"), Some(Bson::Boolean(true)));
    if explain {
        command = doc! { "explain": command, "verbosity": "queryPlanner" };
    }
    FindCommand { command, explain }
}

fn get_more_command(collection: &str, count: i32, cursor_id: i64) -> Document {
    let mut command = doc! { "getMore": cursor_id, "collection": collection };
    if count > 0 {
        command.insert("batchSize", count);
    }
    command
}

fn kill_cursors_command(collection: &str, cursor_ids: &[i64]) -> Document {
    doc! { "killCursors": collection, "cursors": cursor_ids }
}

/// Pull the cursor id and a batch out of a `find`/`getMore` reply.
fn cursor_batch(mut response: Document, field: &str) -> Result<(i64, Vec<Document>)> {
    let mut cursor = match response.remove("cursor") {
        Some(Bson::Document(cursor)) => cursor,
        _ => {
            return Err(ProtocolError::MalformedReply("reply without a cursor".to_string()).into());
        }
    };
    let cursor_id = cursor.get_i64("id")?;
    let documents = match cursor.remove(field) {
        Some(Bson::Array(batch)) => batch
            .into_iter()
            .map(|value| match value {
                Bson::Document(document) => Ok(document),
                other => Err(CursorError::from(ProtocolError::MalformedReply(format!(
                    "{field} holds a non-document value: {other}"
                )))),
            })
            .collect::<Result<Vec<_>>>()?,
        _ => {
            return Err(ProtocolError::MalformedReply(format!("cursor without {field}")).into());
        }
    };
    Ok((cursor_id, documents))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectionError;

    fn affinity(id: &str) -> Option<ConnectionAffinity> {
        Some(ConnectionAffinity::new(id))
    }

    #[tokio::test]
    async fn test_pins_survive_a_failed_request() {
        let pins = Pins::new();
        pins.pin(&ConnectionAffinity::new("a"), 5);

        let failed: Result<()> = async {
            let entry = pins.get(affinity("a").as_ref()).unwrap();
            let mut returned = entry.lock().await;
            *returned += 1;
            Err(ConnectionError::NotConnected.into())
        }
        .await;
        assert!(failed.is_err());

        let entry = pins.unpin(affinity("a").as_ref()).unwrap();
        assert_eq!(*entry.lock().await, 6);
        assert!(pins.get(affinity("a").as_ref()).is_none());
    }

    #[test]
    fn test_pins_survive_a_cancelled_request() {
        let pins = Pins::new();
        pins.pin(&ConnectionAffinity::new("a"), 5);
        let held = pins.get(affinity("a").as_ref()).unwrap();
        let guard = held.try_lock().unwrap();

        {
            let mut request = tokio_test::task::spawn(async {
                let entry = pins.get(affinity("a").as_ref()).unwrap();
                let _pinned = entry.lock().await;
            });
            tokio_test::assert_pending!(request.poll());
        }
        drop(guard);

        assert!(pins.unpin(affinity("a").as_ref()).is_some());
        assert!(pins.unpin(affinity("a").as_ref()).is_none());
    }

    #[test]
    fn test_pins_clear() {
        let pins = Pins::new();
        pins.pin(&ConnectionAffinity::new("a"), 1);
        pins.pin(&ConnectionAffinity::new("b"), 2);
        assert!(pins.get(None).is_none());
        assert_eq!(pins.clear(), 2);
        assert!(pins.get(affinity("b").as_ref()).is_none());
    }

    #[test]
    fn test_find_command_translation() {
        let spec = doc! {
            "$query": { "age": { "$gt": 18 } },
            "$orderby": { "age": -1 },
            "$hint": { "age": 1 },
        };
        let find = find_command(
            "users",
            QueryFlags::TAILABLE_CURSOR | QueryFlags::NO_TIMEOUT,
            5,
            -3,
            spec,
            Some(doc! { "name": 1 }),
        );
        assert!(!find.explain);
        assert_eq!(
            find.command,
            doc! {
                "find": "users",
                "filter": { "age": { "$gt": 18 } },
                "sort": { "age": -1 },
                "hint": { "age": 1 },
                "projection": { "name": 1 },
                "skip": 5_i64,
                "limit": 3_i64,
                "singleBatch": true,
                "tailable": true,
                "noCursorTimeout": true,
            }
        );
    }

    #[test]
    fn test_unwrapped_spec_is_the_filter() {
        let find = find_command("users", QueryFlags::NONE, 0, 0, doc! { "a": 1 }, None);
        assert_eq!(find.command, doc! { "find": "users", "filter": { "a": 1 } });
    }

    #[test]
    fn test_explain_and_dropped_modifiers() {
        let spec = doc! {
            "$query": {},
            "$explain": true,
            "$snapshot": true,
            "$maxScan": 10,
        };
        let find = find_command("users", QueryFlags::NONE, 0, -2, spec, None);
        assert!(find.explain);
        assert_eq!(
            find.command,
            doc! {
                "explain": {
                    "find": "users",
                    "filter": {},
                    "limit": 2_i64,
                    "singleBatch": true,
                },
                "verbosity": "queryPlanner",
            }
        );
    }

    #[test]
    fn test_get_more_and_kill_commands() {
        assert_eq!(
            get_more_command("users", 0, 99),
            doc! { "getMore": 99_i64, "collection": "users" }
        );
        assert_eq!(
            get_more_command("users", 4, 99),
            doc! { "getMore": 99_i64, "collection": "users", "batchSize": 4 }
        );
        assert_eq!(
            kill_cursors_command("users", &[1, 2]),
            doc! { "killCursors": "users", "cursors": [1_i64, 2_i64] }
        );
    }

    #[test]
    fn test_cursor_batch() {
        let response = doc! {
            "cursor": { "id": 12_i64, "ns": "app.users", "firstBatch": [{ "a": 1 }, { "a": 2 }] },
            "ok": 1.0,
        };
        let (id, docs) = cursor_batch(response, "firstBatch").unwrap();
        assert_eq!(id, 12);
        assert_eq!(docs, vec![doc! { "a": 1 }, doc! { "a": 2 }]);

        assert!(cursor_batch(doc! { "ok": 1.0 }, "firstBatch").is_err());
        let wrong_field = doc! { "cursor": { "id": 0_i64, "firstBatch": [] } };
        assert!(cursor_batch(wrong_field, "nextBatch").is_err());
        let scalar = doc! { "cursor": { "id": 0_i64, "nextBatch": [1] } };
        assert!(matches!(
            cursor_batch(scalar, "nextBatch"),
            Err(CursorError::Protocol(ProtocolError::MalformedReply(_)))
        ));
    }
}
