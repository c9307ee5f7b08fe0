//! Error types for RedVault

use crate::protocol::ValueKind;
use std::io;
use thiserror::Error;

/// Result type alias for RedVault operations
pub type Result<T> = std::result::Result<T, RedVaultError>;

/// Custom error types for RedVault
#[derive(Error, Debug)]
pub enum RedVaultError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Client error: {0}")]
    Client(String),

    #[error("AOF error: {0}")]
    Aof(String),
}

/// Errors raised while turning a request frame into a command.
///
/// The `Display` output is exactly what goes back over the wire as an
/// Error value, so these never close the connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("ERR wrong number of arguments")]
    EmptyRequest,

    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(&'static str),

    #[error("ERR Protocol error: expected bulk string argument, got {0}")]
    WrongType(ValueKind),
}
