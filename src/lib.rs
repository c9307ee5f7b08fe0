//! RedVault - an in-memory key-value server with pub/sub
//!
//! This library provides:
//! - A RESP-like framed wire protocol
//! - String and hash tables behind reader/writer locks
//! - Publish/subscribe channels with per-session outbound queues
//! - An append-only file for durability, replayed at startup
//! - An async client used by the CLI and benchmark

pub mod aof;
pub mod client;
pub mod command;
pub mod db;
pub mod error;
pub mod protocol;
pub mod pubsub;
pub mod server;
pub mod session;
pub mod store;

pub use client::{format_value, split_args, Client, Message};
pub use command::Command;
pub use db::Database;
pub use error::{CommandError, RedVaultError, Result};
pub use protocol::{Value, ValueKind};
pub use server::{RedVaultServer, ServerConfig};
pub use store::{MemoryStore, Store};
