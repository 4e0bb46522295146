use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::time::{timeout, timeout_at, Duration, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error};

#[derive(Parser, Debug)]
#[command(name = "beach-pier", author, version)]
#[command(about = "Beach Pier signaling relay and probe client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Server options (used when no subcommand is given)
    #[command(flatten)]
    pub serve: ServeArgs,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Join a room as a client and print what the relay sends
    Probe(ProbeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Address to bind the relay listener to.
    #[arg(long, env = "BEACH_PIER_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: String,

    /// Seconds between keepalive pings on each connection.
    #[arg(long, env = "BEACH_PIER_KEEPALIVE_SECS", default_value_t = 15)]
    pub keepalive_secs: u64,

    /// Messages queued per connection before further sends are dropped.
    #[arg(long, env = "BEACH_PIER_OUTBOUND_BUFFER", default_value_t = 64)]
    pub outbound_buffer: usize,

    /// Keep room entries after their last occupant leaves.
    #[arg(long, env = "BEACH_PIER_KEEP_EMPTY_ROOMS", default_value_t = false)]
    pub keep_empty_rooms: bool,

    /// Grace period applied during shutdown.
    #[arg(long, env = "BEACH_PIER_SHUTDOWN_GRACE_SECS", default_value_t = 2)]
    pub shutdown_grace_secs: u64,

    /// Do not install the Prometheus recorder or serve /metrics.
    #[arg(long, env = "BEACH_PIER_DISABLE_METRICS", default_value_t = false)]
    pub no_metrics: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ProbeArgs {
    /// Relay URL (e.g., ws://localhost:8080)
    #[arg(short, long, default_value = "ws://localhost:8080")]
    pub url: String,

    /// Room to join
    #[arg(short, long)]
    pub room: String,

    /// User id to join as
    #[arg(short = 'i', long)]
    pub user: String,

    /// Send an offer to this user after joining
    #[arg(long, conflicts_with = "answer_to")]
    pub offer_to: Option<String>,

    /// Send an answer to this user after joining
    #[arg(long)]
    pub answer_to: Option<String>,

    /// JSON payload for the offer/answer
    #[arg(long)]
    pub payload: Option<String>,

    /// Stop after this many messages
    #[arg(short = 'n', long)]
    pub count: Option<usize>,

    /// Stop after this many seconds
    #[arg(long, default_value_t = 30)]
    pub wait: u64,
}

impl ProbeArgs {
    pub fn join_url(&self) -> String {
        format!(
            "{}/{}/{}",
            self.url.trim_end_matches('/'),
            self.room,
            self.user
        )
    }

    /// The negotiation envelope to send, if one was requested.
    pub fn outgoing(&self) -> Result<Option<Value>> {
        let (event, target) = match (&self.offer_to, &self.answer_to) {
            (Some(target), _) => ("offer", target),
            (None, Some(target)) => ("answer", target),
            (None, None) => return Ok(None),
        };
        let payload = match &self.payload {
            Some(raw) => serde_json::from_str::<Value>(raw)
                .with_context(|| format!("payload is not valid JSON: {raw}"))?,
            None => Value::Null,
        };
        Ok(Some(json!({
            "event": event,
            "data": { "userId": target, "payload": payload },
        })))
    }
}

pub async fn run_probe(args: ProbeArgs) -> Result<()> {
    // Build WebSocket URL
    let ws_url = args.join_url();
    debug!("Connecting to {}", ws_url);

    // Connect with timeout
    let (ws_stream, _) = match timeout(Duration::from_secs(5), connect_async(&ws_url)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            error!("Failed to connect to {}: {}", ws_url, e);
            return Err(anyhow!("Connection failed: {}", e));
        }
        Err(_) => {
            error!("Connection timeout after 5 seconds");
            return Err(anyhow!("Connection timeout - is the relay running?"));
        }
    };
    let (mut write, mut read) = ws_stream.split();

    // Send the requested offer/answer, if any
    if let Some(envelope) = args.outgoing()? {
        write
            .send(Message::Text(envelope.to_string().into()))
            .await
            .context("failed to send negotiation message")?;
    }

    // Print envelopes until the count or deadline is reached
    let deadline = Instant::now() + Duration::from_secs(args.wait);
    let mut received = 0usize;
    while args.count.map_or(true, |limit| received < limit) {
        let next = match timeout_at(deadline, read.next()).await {
            Ok(next) => next,
            Err(_) => break,
        };
        match next {
            Some(Ok(Message::Text(text))) => {
                received += 1;
                println!("{}", text.as_str());
            }
            Some(Ok(Message::Close(frame))) => {
                debug!("Relay closed the connection: {:?}", frame);
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(anyhow!("Connection error: {}", e)),
            None => break,
        }
    }

    let _ = write.send(Message::Close(None)).await;
    Ok(())
}
