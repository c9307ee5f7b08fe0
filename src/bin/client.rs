//! Interactive command-line client for RedVault
//!
//! Reads one command per line, sends it as an Array of BulkStrings and
//! prints the decoded reply. `SUBSCRIBE` switches to a receive loop that
//! Ctrl+C leaves again.

use clap::Parser;
use redvault::{format_value, split_args, Client, Message, RedVaultError, Value};
use std::io::{self, Write};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;

/// RedVault CLI
#[derive(Parser, Debug)]
#[command(name = "redvault-cli")]
#[command(about = "Interactive client for the RedVault server")]
struct Args {
    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = 7000)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let server_addr = format!("{}:{}", args.host, args.port);

    let mut client = Client::connect(&server_addr).await?;
    println!("Connected to {}. Type 'exit' to quit.", server_addr);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("{}> ", server_addr);
        io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = signal::ctrl_c() => {
                println!();
                break;
            }
        };
        let Some(line) = line else {
            break;
        };

        let parts = split_args(&line);
        let Some(name) = parts.first() else {
            continue;
        };

        if parts.len() == 1 && name.eq_ignore_ascii_case("exit") {
            break;
        }

        if name.eq_ignore_ascii_case("subscribe") && parts.len() > 1 {
            let channels = &parts[1..];
            match client.subscribe(channels).await {
                Ok(confirmations) => {
                    for confirmation in &confirmations {
                        println!("{}", format_value(confirmation));
                    }
                    receive_messages(&mut client, channels).await?;
                }
                Err(RedVaultError::Server(message)) => println!("(error) {}", message),
                Err(e) => return Err(e.into()),
            }
            continue;
        }

        let reply = client.command(&parts).await?;
        println!("{}", format_value(&reply));
    }

    client.close().await?;
    Ok(())
}

/// Print pushed messages until Ctrl+C, then leave the channels
async fn receive_messages(client: &mut Client, channels: &[String]) -> redvault::Result<()> {
    println!("Reading messages... (press Ctrl+C to unsubscribe)");

    loop {
        tokio::select! {
            message = client.next_message() => {
                let Message { channel, payload } = message?;
                let push = Value::Array(vec![
                    Value::bulk("message"),
                    Value::BulkString(channel),
                    Value::BulkString(payload),
                ]);
                println!("{}", format_value(&push));
            }
            _ = signal::ctrl_c() => {
                client.unsubscribe(channels).await?;
                println!("\nUnsubscribed from {}", channels.join(", "));
                return Ok(());
            }
        }
    }
}
