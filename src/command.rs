//! Command definitions for RedVault
//!
//! A request frame is an Array whose first element names the command and
//! whose remaining elements are BulkString arguments. `Command::from_frame`
//! checks arity and argument types up front so execution only ever sees
//! well-formed commands.

use crate::error::CommandError;
use crate::protocol::Value;
use bytes::Bytes;

/// Commands supported by the RedVault protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping { message: Option<Bytes> },
    Set { key: Bytes, value: Bytes },
    Get { key: Bytes },
    Del { keys: Vec<Bytes> },
    HSet { key: Bytes, fields: Vec<(Bytes, Bytes)> },
    HGet { key: Bytes, field: Bytes },
    HGetAll { key: Bytes },
    Subscribe { channels: Vec<Bytes> },
    Unsubscribe { channels: Vec<Bytes> },
    Publish { channel: Bytes, message: Bytes },
}

impl Command {
    /// Parse a decoded request frame
    pub fn from_frame(frame: &Value) -> Result<Self, CommandError> {
        let items = match frame {
            Value::Array(items) if !items.is_empty() => items,
            _ => return Err(CommandError::EmptyRequest),
        };

        let name = String::from_utf8_lossy(bulk(&items[0])?).to_ascii_uppercase();
        let args = &items[1..];

        match name.as_str() {
            "PING" => match args {
                [] => Ok(Command::Ping { message: None }),
                [message] => Ok(Command::Ping {
                    message: Some(bulk(message)?.clone()),
                }),
                _ => Err(CommandError::WrongArity("ping")),
            },
            "SET" => match args {
                [key, value] => Ok(Command::Set {
                    key: bulk(key)?.clone(),
                    value: bulk(value)?.clone(),
                }),
                _ => Err(CommandError::WrongArity("set")),
            },
            "GET" => match args {
                [key] => Ok(Command::Get {
                    key: bulk(key)?.clone(),
                }),
                _ => Err(CommandError::WrongArity("get")),
            },
            "DEL" => {
                if args.is_empty() {
                    return Err(CommandError::WrongArity("del"));
                }
                Ok(Command::Del {
                    keys: bulk_list(args)?,
                })
            }
            "HSET" => {
                if args.len() < 3 || args.len() % 2 != 1 {
                    return Err(CommandError::WrongArity("hset"));
                }
                let key = bulk(&args[0])?.clone();
                let fields = args[1..]
                    .chunks_exact(2)
                    .map(|pair| Ok((bulk(&pair[0])?.clone(), bulk(&pair[1])?.clone())))
                    .collect::<Result<Vec<_>, CommandError>>()?;
                Ok(Command::HSet { key, fields })
            }
            "HGET" => match args {
                [key, field] => Ok(Command::HGet {
                    key: bulk(key)?.clone(),
                    field: bulk(field)?.clone(),
                }),
                _ => Err(CommandError::WrongArity("hget")),
            },
            "HGETALL" => match args {
                [key] => Ok(Command::HGetAll {
                    key: bulk(key)?.clone(),
                }),
                _ => Err(CommandError::WrongArity("hgetall")),
            },
            "SUBSCRIBE" => {
                if args.is_empty() {
                    return Err(CommandError::WrongArity("subscribe"));
                }
                Ok(Command::Subscribe {
                    channels: bulk_list(args)?,
                })
            }
            "UNSUBSCRIBE" => {
                if args.is_empty() {
                    return Err(CommandError::WrongArity("unsubscribe"));
                }
                Ok(Command::Unsubscribe {
                    channels: bulk_list(args)?,
                })
            }
            "PUBLISH" => match args {
                [channel, message] => Ok(Command::Publish {
                    channel: bulk(channel)?.clone(),
                    message: bulk(message)?.clone(),
                }),
                _ => Err(CommandError::WrongArity("publish")),
            },
            _ => Err(CommandError::UnknownCommand(name)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Ping { .. } => "PING",
            Command::Set { .. } => "SET",
            Command::Get { .. } => "GET",
            Command::Del { .. } => "DEL",
            Command::HSet { .. } => "HSET",
            Command::HGet { .. } => "HGET",
            Command::HGetAll { .. } => "HGETALL",
            Command::Subscribe { .. } => "SUBSCRIBE",
            Command::Unsubscribe { .. } => "UNSUBSCRIBE",
            Command::Publish { .. } => "PUBLISH",
        }
    }

    /// Whether the command mutates the store and belongs in the journal
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Command::Set { .. } | Command::Del { .. } | Command::HSet { .. }
        )
    }
}

/// Typed accessor: every argument must be a BulkString
fn bulk(value: &Value) -> Result<&Bytes, CommandError> {
    value
        .as_bulk()
        .ok_or_else(|| CommandError::WrongType(value.kind()))
}

fn bulk_list(values: &[Value]) -> Result<Vec<Bytes>, CommandError> {
    values.iter().map(|v| bulk(v).cloned()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ValueKind;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn test_parse_set_command() {
        let command = Command::from_frame(&Value::command(["set", "mykey", "myvalue"])).unwrap();
        assert_eq!(
            command,
            Command::Set {
                key: b("mykey"),
                value: b("myvalue"),
            }
        );
        assert!(command.is_write());
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        let command = Command::from_frame(&Value::command(["hGeTaLl", "h"])).unwrap();
        assert_eq!(command, Command::HGetAll { key: b("h") });
        assert!(!command.is_write());
    }

    #[test]
    fn test_parse_hset_pairs() {
        let command =
            Command::from_frame(&Value::command(["HSET", "h", "f1", "v1", "f2", "v2"])).unwrap();
        assert_eq!(
            command,
            Command::HSet {
                key: b("h"),
                fields: vec![(b("f1"), b("v1")), (b("f2"), b("v2"))],
            }
        );
    }

    #[test]
    fn test_arity_errors() {
        let cases: [(&[&str], &'static str); 11] = [
            (&["PING", "a", "b"][..], "ping"),
            (&["SET", "k"][..], "set"),
            (&["GET"][..], "get"),
            (&["DEL"][..], "del"),
            (&["HSET", "h", "f"][..], "hset"),
            (&["HSET", "h", "f1", "v1", "f2"][..], "hset"),
            (&["HGET", "h"][..], "hget"),
            (&["HGETALL"][..], "hgetall"),
            (&["SUBSCRIBE"][..], "subscribe"),
            (&["UNSUBSCRIBE"][..], "unsubscribe"),
            (&["PUBLISH", "c"][..], "publish"),
        ];

        for (args, name) in cases {
            let err = Command::from_frame(&Value::command(args.iter())).unwrap_err();
            assert_eq!(err, CommandError::WrongArity(name), "{:?}", args);
        }
    }

    #[test]
    fn test_unknown_command() {
        let err = Command::from_frame(&Value::command(["flushall"])).unwrap_err();
        assert_eq!(err.to_string(), "ERR unknown command 'FLUSHALL'");
    }

    #[test]
    fn test_not_an_array() {
        assert_eq!(
            Command::from_frame(&Value::bulk("PING")).unwrap_err(),
            CommandError::EmptyRequest
        );
        assert_eq!(
            Command::from_frame(&Value::Array(vec![])).unwrap_err(),
            CommandError::EmptyRequest
        );
    }

    #[test]
    fn test_non_bulk_argument_is_rejected() {
        let frame = Value::Array(vec![Value::bulk("GET"), Value::Integer(7)]);
        let err = Command::from_frame(&frame).unwrap_err();
        assert_eq!(err, CommandError::WrongType(ValueKind::Integer));
        assert_eq!(
            err.to_string(),
            "ERR Protocol error: expected bulk string argument, got integer"
        );

        let frame = Value::Array(vec![Value::String("PING".to_string())]);
        assert!(Command::from_frame(&frame).is_err());
    }
}
