//! Shared server state and command execution
//!
//! `Database` owns the store, the channel registry and the journal. It is
//! built once at startup and shared by every connection through an `Arc`.

use crate::aof::Aof;
use crate::command::Command;
use crate::error::{RedVaultError, Result};
use crate::protocol::Value;
use crate::pubsub::PubSub;
use crate::session::Session;
use crate::store::{MemoryStore, Store};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, trace, warn};

pub struct Database {
    store: MemoryStore,
    pubsub: PubSub,
    aof: Option<Arc<Aof>>,
    /// Held from apply through append so the journal sees writes in the
    /// order the store applied them
    write_order: Mutex<()>,
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl Database {
    /// Create a database without a journal
    pub fn new() -> Self {
        Self {
            store: MemoryStore::new(),
            pubsub: PubSub::new(),
            aof: None,
            write_order: Mutex::new(()),
        }
    }

    /// Create a database that journals writes to `aof`
    pub fn with_aof(aof: Arc<Aof>) -> Self {
        Self {
            aof: Some(aof),
            ..Self::new()
        }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn pubsub(&self) -> &PubSub {
        &self.pubsub
    }

    /// Rebuild state from the journal. Returns the number of entries applied.
    pub async fn restore_from_aof(&self, load_truncated: bool) -> Result<usize> {
        let Some(aof) = &self.aof else {
            return Ok(0);
        };

        let entries = aof.read_entries(load_truncated).await?;
        for (index, frame) in entries.iter().enumerate() {
            let command = Command::from_frame(frame).map_err(|e| {
                RedVaultError::Aof(format!("entry {} is not a valid command: {}", index, e))
            })?;
            if !command.is_write() {
                warn!(index, command = command.name(), "skipping non-write AOF entry");
                continue;
            }

            let reply = self.execute(command, None).await;
            if reply.is_error() {
                warn!(index, ?reply, "AOF entry replayed with an error");
            }
        }

        info!(path = %aof.path().display(), entries = entries.len(), "AOF replayed");
        Ok(entries.len())
    }

    /// Handle one decoded request frame: parse, execute, then journal.
    ///
    /// The journal append happens after the store is updated and before the
    /// reply is returned. A failed append is logged and the reply still goes out.
    pub async fn process(&self, frame: Value, session: Option<&mut Session>) -> Value {
        let command = match Command::from_frame(&frame) {
            Ok(command) => command,
            Err(e) => return Value::error(e.to_string()),
        };

        trace!(command = command.name(), "executing");
        let aof = match &self.aof {
            Some(aof) if command.is_write() => aof,
            _ => return self.execute(command, session).await,
        };

        let _ordered = self.write_order.lock().await;
        let reply = self.execute(command, session).await;
        if !reply.is_error() {
            if let Err(e) = aof.append(&frame).await {
                error!(error = %e, "AOF append failed; write is not durable");
            }
        }

        reply
    }

    /// Run a parsed command against the store or registry
    pub async fn execute(&self, command: Command, session: Option<&mut Session>) -> Value {
        match command {
            Command::Ping { message } => {
                Value::BulkString(message.unwrap_or_else(|| Bytes::from_static(b"PONG")))
            }
            Command::Set { key, value } => {
                self.store.set(key, value).await;
                Value::ok()
            }
            Command::Get { key } => match self.store.get(&key).await {
                Some(value) => Value::BulkString(value),
                None => Value::Null,
            },
            Command::Del { keys } => Value::Integer(self.store.delete(&keys).await as i64),
            Command::HSet { key, fields } => {
                self.store.hset(key, fields).await;
                Value::ok()
            }
            Command::HGet { key, field } => match self.store.hget(&key, &field).await {
                Some(value) => Value::BulkString(value),
                None => Value::Null,
            },
            Command::HGetAll { key } => match self.store.hgetall(&key).await {
                Some(pairs) => Value::Array(
                    pairs
                        .into_iter()
                        .flat_map(|(field, value)| {
                            [Value::BulkString(field), Value::BulkString(value)]
                        })
                        .collect(),
                ),
                None => Value::Null,
            },
            Command::Subscribe { channels } => match session {
                Some(session) => {
                    self.pubsub.subscribe(session, &channels).await;
                    Value::Empty
                }
                None => no_session("subscribe"),
            },
            Command::Unsubscribe { channels } => match session {
                Some(session) => {
                    self.pubsub.unsubscribe(session, &channels).await;
                    Value::ok()
                }
                None => no_session("unsubscribe"),
            },
            Command::Publish { channel, message } => {
                Value::Integer(self.pubsub.publish(&channel, message).await as i64)
            }
        }
    }
}

fn no_session(command: &str) -> Value {
    Value::error(format!("ERR '{}' requires a client connection", command))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::parse_value;
    use crate::session::DEFAULT_OUTBOUND_CAPACITY;
    use tempfile::NamedTempFile;
    use tokio::sync::mpsc;

    fn session(id: &str) -> (Session, mpsc::Receiver<Value>) {
        let (tx, rx) = mpsc::channel(DEFAULT_OUTBOUND_CAPACITY);
        (Session::new(id, tx), rx)
    }

    async fn run(db: &Database, args: &[&str]) -> Value {
        db.process(Value::command(args), None).await
    }

    #[tokio::test]
    async fn test_set_get() {
        let db = Database::new();
        assert_eq!(run(&db, &["SET", "foo", "bar"]).await, Value::ok());
        assert_eq!(run(&db, &["GET", "foo"]).await, Value::bulk("bar"));
        assert_eq!(run(&db, &["GET", "nope"]).await, Value::Null);
    }

    #[tokio::test]
    async fn test_ping() {
        let db = Database::new();
        assert_eq!(run(&db, &["PING"]).await, Value::bulk("PONG"));
        assert_eq!(run(&db, &["ping", "hello"]).await, Value::bulk("hello"));
        assert!(run(&db, &["PING", "a", "b"]).await.is_error());
    }

    #[tokio::test]
    async fn test_hset_hgetall() {
        let db = Database::new();
        assert_eq!(
            run(&db, &["HSET", "h", "f1", "v1", "f2", "v2"]).await,
            Value::ok()
        );
        assert_eq!(run(&db, &["HGET", "h", "f2"]).await, Value::bulk("v2"));
        assert_eq!(run(&db, &["HGET", "h", "f3"]).await, Value::Null);

        let Value::Array(items) = run(&db, &["HGETALL", "h"]).await else {
            panic!("expected array");
        };
        let mut pairs: Vec<(Value, Value)> = items
            .chunks(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect();
        pairs.sort_by_key(|(field, _)| field.as_bulk().cloned());
        assert_eq!(
            pairs,
            vec![
                (Value::bulk("f1"), Value::bulk("v1")),
                (Value::bulk("f2"), Value::bulk("v2")),
            ]
        );
        assert_eq!(run(&db, &["HGETALL", "missing"]).await, Value::Null);
    }

    #[tokio::test]
    async fn test_del() {
        let db = Database::new();
        run(&db, &["SET", "a", "1"]).await;
        run(&db, &["HSET", "b", "f", "v"]).await;

        assert_eq!(run(&db, &["DEL", "a", "b", "c"]).await, Value::Integer(2));
        assert_eq!(run(&db, &["GET", "a"]).await, Value::Null);
        assert_eq!(run(&db, &["HGETALL", "b"]).await, Value::Null);
    }

    #[tokio::test]
    async fn test_error_replies() {
        let db = Database::new();
        assert_eq!(
            run(&db, &["NOPE"]).await,
            Value::error("ERR unknown command 'NOPE'")
        );
        assert_eq!(
            run(&db, &["SET", "k"]).await,
            Value::error("ERR wrong number of arguments for 'set' command")
        );
        assert_eq!(
            db.process(Value::Integer(3), None).await,
            Value::error("ERR wrong number of arguments")
        );
        let frame = Value::Array(vec![Value::bulk("SET"), Value::bulk("k"), Value::Null]);
        assert!(db.process(frame, None).await.is_error());
    }

    #[tokio::test]
    async fn test_echoed_name_stays_one_frame() {
        let db = Database::new();
        let reply = db.process(Value::command(["X\r\n:1"]), None).await;

        let bytes = reply.to_bytes();
        let (decoded, consumed) = parse_value(&bytes).unwrap().unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, Value::error("ERR unknown command 'X  :1'"));
    }

    #[tokio::test]
    async fn test_pubsub_flow() {
        let db = Database::new();
        let (mut alice, mut rx) = session("alice");

        let reply = db
            .process(Value::command(["SUBSCRIBE", "a", "b"]), Some(&mut alice))
            .await;
        assert_eq!(reply, Value::Empty);
        assert_eq!(
            rx.try_recv().unwrap(),
            Value::Array(vec![Value::bulk("subscribe"), Value::bulk("a"), Value::Integer(1)])
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            Value::Array(vec![Value::bulk("subscribe"), Value::bulk("b"), Value::Integer(2)])
        );

        assert_eq!(run(&db, &["PUBLISH", "a", "hi"]).await, Value::Integer(1));
        assert_eq!(
            rx.try_recv().unwrap(),
            Value::Array(vec![Value::bulk("message"), Value::bulk("a"), Value::bulk("hi")])
        );

        let reply = db
            .process(Value::command(["UNSUBSCRIBE", "a"]), Some(&mut alice))
            .await;
        assert_eq!(reply, Value::ok());
        assert_eq!(run(&db, &["PUBLISH", "a", "hi"]).await, Value::Integer(0));
        assert_eq!(run(&db, &["PUBLISH", "b", "hi"]).await, Value::Integer(1));
    }

    #[tokio::test]
    async fn test_subscribe_without_session() {
        let db = Database::new();
        assert!(run(&db, &["SUBSCRIBE", "a"]).await.is_error());
    }

    #[tokio::test]
    async fn test_only_successful_writes_are_journaled() {
        let temp_file = NamedTempFile::new().unwrap();
        let aof = Arc::new(Aof::open(temp_file.path()).unwrap());
        let db = Database::with_aof(Arc::clone(&aof));

        run(&db, &["SET", "a", "1"]).await;
        run(&db, &["GET", "a"]).await;
        run(&db, &["SET", "broken"]).await;
        run(&db, &["HSET", "h", "f", "v"]).await;
        run(&db, &["PUBLISH", "c", "m"]).await;
        run(&db, &["DEL", "a"]).await;

        let entries = aof.read_entries(false).await.unwrap();
        assert_eq!(
            entries,
            vec![
                Value::command(["SET", "a", "1"]),
                Value::command(["HSET", "h", "f", "v"]),
                Value::command(["DEL", "a"]),
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_replay_to_live_state() {
        let temp_file = NamedTempFile::new().unwrap();
        let aof = Arc::new(Aof::open(temp_file.path()).unwrap());
        let db = Arc::new(Database::with_aof(aof));

        for round in 0..10 {
            let key = format!("k{}", round);
            let mut handles = Vec::new();
            for task in 0..32 {
                let db = Arc::clone(&db);
                let key = key.clone();
                handles.push(tokio::spawn(async move {
                    for i in 0..50 {
                        let value = format!("{}-{}", task, i);
                        db.process(Value::command(["SET", key.as_str(), value.as_str()]), None)
                            .await;
                        db.process(
                            Value::command(["HSET", key.as_str(), "f", value.as_str()]),
                            None,
                        )
                        .await;
                    }
                }));
            }
            for handle in handles {
                handle.await.unwrap();
            }
        }

        let replayed = Database::with_aof(Arc::new(Aof::open(temp_file.path()).unwrap()));
        replayed.restore_from_aof(false).await.unwrap();

        for round in 0..10 {
            let key = format!("k{}", round);
            assert_eq!(
                replayed.store().get(key.as_bytes()).await,
                db.store().get(key.as_bytes()).await,
                "string {}",
                key
            );
            assert_eq!(
                replayed.store().hget(key.as_bytes(), b"f").await,
                db.store().hget(key.as_bytes(), b"f").await,
                "hash {}",
                key
            );
        }
    }

    #[tokio::test]
    async fn test_restore_from_aof() {
        let temp_file = NamedTempFile::new().unwrap();
        {
            let aof = Arc::new(Aof::open(temp_file.path()).unwrap());
            let db = Database::with_aof(aof);
            run(&db, &["SET", "a", "1"]).await;
            run(&db, &["SET", "b", "2"]).await;
            run(&db, &["HSET", "h", "f1", "v1", "f2", "v2"]).await;
            run(&db, &["DEL", "b"]).await;
            run(&db, &["SET", "a", "3"]).await;
        }

        let aof = Arc::new(Aof::open(temp_file.path()).unwrap());
        let db = Database::with_aof(aof);
        assert_eq!(db.restore_from_aof(false).await.unwrap(), 5);

        assert_eq!(db.store().get(b"a").await, Some(Bytes::from_static(b"3")));
        assert_eq!(db.store().get(b"b").await, None);
        assert_eq!(
            db.store().hget(b"h", b"f2").await,
            Some(Bytes::from_static(b"v2"))
        );
        assert_eq!(db.store().len().await, 1);
        assert_eq!(db.store().hash_len().await, 1);
    }
}
