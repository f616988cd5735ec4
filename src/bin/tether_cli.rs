use std::error::Error;

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::io::{self, AsyncBufReadExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

/// Join a relay room from the terminal and exchange envelopes by hand
#[derive(Debug, Parser)]
#[command(name = "tether-cli")]
struct Args {
    /// Relay URL
    #[arg(long, default_value = "ws://127.0.0.1:8081")]
    url: String,

    /// Room to join
    #[arg(long)]
    room: String,

    /// Role announced in the join payload
    #[arg(long, default_value = "sender")]
    role: String,
}

/// Turn `<type> [json payload]` into an envelope for `room`.
/// A payload that is not valid JSON is sent as a string.
fn envelope_from_line(room: &str, line: &str) -> Option<String> {
    let line = line.trim();
    let (kind, rest) = match line.split_once(char::is_whitespace) {
        Some((kind, rest)) => (kind, rest.trim()),
        None => (line, ""),
    };
    if kind.is_empty() {
        return None;
    }
    let payload = if rest.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(rest).unwrap_or_else(|_| Value::String(rest.to_string()))
    };
    Some(json!({ "room": room, "type": kind, "payload": payload }).to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let (ws, _) = connect_async(args.url.as_str()).await?;
    let (mut ws_tx, mut ws_rx) = ws.split();

    let join = json!({ "room": args.room, "type": "join", "payload": { "role": args.role } });
    ws_tx.send(Message::Text(join.to_string().into())).await?;

    println!("Joined room {} as {}", args.room, args.role);
    println!("Type `<type> <json payload>` and press Enter:");

    // Print whatever the relay forwards
    tokio::spawn(async move {
        while let Some(msg) = ws_rx.next().await {
            match msg {
                Ok(Message::Text(text)) => println!("\n> {}", text.as_str()),
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    eprintln!("Read error: {}", e);
                    break;
                }
            }
        }
    });

    let mut stdin = io::BufReader::new(io::stdin()).lines();
    while let Ok(Some(line)) = stdin.next_line().await {
        if let Some(text) = envelope_from_line(&args.room, &line) {
            ws_tx.send(Message::Text(text.into())).await?;
        }
    }

    ws_tx.send(Message::Close(None)).await?;
    Ok(())
}
