//! Client library for connecting to a RedVault server
//!
//! Speaks the same framed protocol as the server. Used by the interactive
//! CLI, the benchmark and the integration tests.

use crate::error::{RedVaultError, Result};
use crate::protocol::{FrameReader, Value};
use bytes::Bytes;
use std::collections::VecDeque;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// A message delivered on a subscribed channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub channel: Bytes,
    pub payload: Bytes,
}

impl Message {
    /// Recognize a `["message", channel, payload]` push
    pub fn from_push(value: &Value) -> Option<Self> {
        match value {
            Value::Array(items) => match items.as_slice() {
                [kind, Value::BulkString(channel), Value::BulkString(payload)]
                    if kind.as_bulk().map(|k| &k[..]) == Some(&b"message"[..]) =>
                {
                    Some(Message {
                        channel: channel.clone(),
                        payload: payload.clone(),
                    })
                }
                _ => None,
            },
            _ => None,
        }
    }
}

/// Client for connecting to a RedVault server
pub struct Client {
    reader: FrameReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    /// Messages that arrived while waiting for a command reply
    pending: VecDeque<Message>,
}

impl Client {
    /// Connect to a RedVault server
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: FrameReader::new(read_half),
            writer: BufWriter::new(write_half),
            pending: VecDeque::new(),
        })
    }

    /// Send a request without waiting for the reply
    pub async fn send<I, A>(&mut self, args: I) -> Result<()>
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        self.writer.write_all(&Value::command(args).to_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Read the next value the server sends
    pub async fn read_value(&mut self) -> Result<Value> {
        self.reader
            .read_value()
            .await?
            .ok_or_else(|| RedVaultError::Client("connection closed by server".to_string()))
    }

    /// Send a request and return the raw reply, Error values included
    pub async fn command<I, A>(&mut self, args: I) -> Result<Value>
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        self.send(args).await?;
        self.read_value().await
    }

    /// Like `command`, but an Error reply becomes `Err` and messages pushed
    /// ahead of the reply are kept for `next_message`
    async fn request(&mut self, request: Vec<Bytes>) -> Result<Value> {
        self.send(request).await?;
        loop {
            let value = self.read_value().await?;
            if let Some(message) = Message::from_push(&value) {
                self.pending.push_back(message);
                continue;
            }
            return match value {
                Value::Error(message) => Err(RedVaultError::Server(message)),
                reply => Ok(reply),
            };
        }
    }

    pub async fn ping(&mut self) -> Result<Bytes> {
        match self.request(args("PING", std::iter::empty::<&[u8]>())).await? {
            Value::BulkString(reply) => Ok(reply),
            other => Err(unexpected("PING", &other)),
        }
    }

    /// Set a key-value pair
    pub async fn set(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<()> {
        let reply = self
            .request(args("SET", [key.as_ref(), value.as_ref()]))
            .await?;
        expect_ok("SET", reply)
    }

    /// Get a value by key
    pub async fn get(&mut self, key: impl AsRef<[u8]>) -> Result<Option<Bytes>> {
        match self.request(args("GET", [key.as_ref()])).await? {
            Value::BulkString(value) => Ok(Some(value)),
            Value::Null => Ok(None),
            other => Err(unexpected("GET", &other)),
        }
    }

    /// Delete keys, returning how many existed
    pub async fn del<I, A>(&mut self, keys: I) -> Result<i64>
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        match self.request(args("DEL", keys)).await? {
            Value::Integer(n) => Ok(n),
            other => Err(unexpected("DEL", &other)),
        }
    }

    pub async fn hset<I, F, V>(&mut self, key: impl AsRef<[u8]>, fields: I) -> Result<()>
    where
        I: IntoIterator<Item = (F, V)>,
        F: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let mut request = args("HSET", [key.as_ref()]);
        for (field, value) in fields {
            request.push(Bytes::copy_from_slice(field.as_ref()));
            request.push(Bytes::copy_from_slice(value.as_ref()));
        }
        let reply = self.request(request).await?;
        expect_ok("HSET", reply)
    }

    pub async fn hget(
        &mut self,
        key: impl AsRef<[u8]>,
        field: impl AsRef<[u8]>,
    ) -> Result<Option<Bytes>> {
        match self.request(args("HGET", [key.as_ref(), field.as_ref()])).await? {
            Value::BulkString(value) => Ok(Some(value)),
            Value::Null => Ok(None),
            other => Err(unexpected("HGET", &other)),
        }
    }

    /// All field/value pairs of a hash, in no particular order
    pub async fn hgetall(&mut self, key: impl AsRef<[u8]>) -> Result<Option<Vec<(Bytes, Bytes)>>> {
        match self.request(args("HGETALL", [key.as_ref()])).await? {
            Value::Null => Ok(None),
            Value::Array(items) if items.len() % 2 == 0 => {
                let mut pairs = Vec::with_capacity(items.len() / 2);
                for pair in items.chunks_exact(2) {
                    match (&pair[0], &pair[1]) {
                        (Value::BulkString(field), Value::BulkString(value)) => {
                            pairs.push((field.clone(), value.clone()))
                        }
                        _ => return Err(unexpected("HGETALL", &Value::Array(items.clone()))),
                    }
                }
                Ok(Some(pairs))
            }
            other => Err(unexpected("HGETALL", &other)),
        }
    }

    /// Publish a message, returning how many subscribers received it
    pub async fn publish(
        &mut self,
        channel: impl AsRef<[u8]>,
        message: impl AsRef<[u8]>,
    ) -> Result<i64> {
        match self
            .request(args("PUBLISH", [channel.as_ref(), message.as_ref()]))
            .await?
        {
            Value::Integer(n) => Ok(n),
            other => Err(unexpected("PUBLISH", &other)),
        }
    }

    /// Subscribe to channels and wait for one confirmation per channel
    pub async fn subscribe<I, A>(&mut self, channels: I) -> Result<Vec<Value>>
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        let request = args("SUBSCRIBE", channels);
        let expected = request.len() - 1;
        if expected == 0 {
            return Err(RedVaultError::Client(
                "SUBSCRIBE needs at least one channel".to_string(),
            ));
        }

        self.send(request).await?;
        let mut confirmations = Vec::with_capacity(expected);
        while confirmations.len() < expected {
            let value = self.read_value().await?;
            if let Value::Error(message) = value {
                return Err(RedVaultError::Server(message));
            }
            if let Some(message) = Message::from_push(&value) {
                self.pending.push_back(message);
            } else if is_push(&value, b"subscribe") {
                confirmations.push(value);
            } else {
                return Err(unexpected("SUBSCRIBE", &value));
            }
        }
        Ok(confirmations)
    }

    /// Wait for the next message on any subscribed channel
    ///
    /// Cancel safe, so it can sit in a `select!` next to a signal handler.
    pub async fn next_message(&mut self) -> Result<Message> {
        if let Some(message) = self.pending.pop_front() {
            return Ok(message);
        }

        loop {
            let value = self.read_value().await?;
            match Message::from_push(&value) {
                Some(message) => return Ok(message),
                None if is_push(&value, b"subscribe") => continue,
                None => return Err(unexpected("message", &value)),
            }
        }
    }

    /// Leave channels. Pushes still in flight are discarded until the `OK`.
    pub async fn unsubscribe<I, A>(&mut self, channels: I) -> Result<()>
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        let request = args("UNSUBSCRIBE", channels);
        self.pending
            .retain(|message| !request[1..].contains(&message.channel));
        self.send(request).await?;

        loop {
            match self.read_value().await? {
                Value::String(reply) if reply == "OK" => return Ok(()),
                Value::Error(message) => return Err(RedVaultError::Server(message)),
                value if Message::from_push(&value).is_some() => continue,
                other => return Err(unexpected("UNSUBSCRIBE", &other)),
            }
        }
    }

    /// Close the connection
    pub async fn close(mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

fn args<I, A>(name: &'static str, rest: I) -> Vec<Bytes>
where
    I: IntoIterator<Item = A>,
    A: AsRef<[u8]>,
{
    std::iter::once(Bytes::from_static(name.as_bytes()))
        .chain(rest.into_iter().map(|arg| Bytes::copy_from_slice(arg.as_ref())))
        .collect()
}

fn is_push(value: &Value, kind: &[u8]) -> bool {
    matches!(value, Value::Array(items)
        if items.first().and_then(Value::as_bulk).map(|k| &k[..]) == Some(kind))
}

fn expect_ok(command: &str, reply: Value) -> Result<()> {
    match reply {
        Value::String(text) if text == "OK" => Ok(()),
        other => Err(unexpected(command, &other)),
    }
}

fn unexpected(command: &str, reply: &Value) -> RedVaultError {
    RedVaultError::Protocol(format!("unexpected reply to {}: {:?}", command, reply))
}

/// Render a value for a terminal
pub fn format_value(value: &Value) -> String {
    let mut out = String::new();
    write_formatted(&mut out, value, 0);
    out
}

fn write_formatted(out: &mut String, value: &Value, indent: usize) {
    match value {
        Value::String(text) => out.push_str(text),
        Value::Error(message) => {
            out.push_str("(error) ");
            out.push_str(message);
        }
        Value::Integer(n) => out.push_str(&format!("(integer) {}", n)),
        Value::BulkString(payload) => {
            out.push_str(&format!("{:?}", String::from_utf8_lossy(payload)))
        }
        Value::Null => out.push_str("(nil)"),
        Value::Empty => {}
        Value::Array(items) if items.is_empty() => out.push_str("(empty array)"),
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push('\n');
                    out.push_str(&" ".repeat(indent));
                }
                let prefix = format!("{}) ", i + 1);
                out.push_str(&prefix);
                // nested arrays line up under their first element
                write_formatted(out, item, indent + prefix.len());
            }
        }
    }
}

/// Split an input line into arguments. Double quotes group words.
pub fn split_args(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quoted = false;

    for ch in line.chars() {
        match ch {
            '"' => {
                quoted = !quoted;
                in_token = true;
            }
            c if c.is_whitespace() && !quoted => {
                if in_token {
                    args.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if in_token {
        args.push(current);
    }
    args
}
