//! Geomark node: reads one JSON command per line on stdin and writes one
//! JSON response per line on stdout. Logs go to stderr.

use anyhow::{anyhow, bail, Context, Result};
use geomark_commands::{Command, CommandContext, CommandError, PublicError};
use geomark_core::{logging, GeomarkConfig, SystemClock};
use geomark_store::{ChannelQueue, QueuedMessage};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const NODE_PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
struct NodeVersionHandshake {
    version: &'static str,
    protocol_version: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
enum Response {
    Ok(geomark_commands::Outcome),
    Error(PublicError),
}

struct Args {
    config: Option<PathBuf>,
    json_logs: bool,
    version_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args(std::env::args().skip(1))?;

    if args.version_json {
        let handshake = NodeVersionHandshake {
            version: env!("CARGO_PKG_VERSION"),
            protocol_version: NODE_PROTOCOL_VERSION,
        };
        println!("{}", serde_json::to_string(&handshake)?);
        return Ok(());
    }

    if args.json_logs {
        logging::init_json("info");
    } else {
        logging::init("info");
    }

    let config = match &args.config {
        Some(path) => GeomarkConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => GeomarkConfig::default(),
    };
    if config.uses_dev_key() {
        warn!("Development master key in use; pseudonymized data is not protected");
    }

    let (queue, receiver) = ChannelQueue::new();
    let context = CommandContext::open(&config, Arc::new(SystemClock), Arc::new(queue))
        .map_err(|e| anyhow!("opening stores: {}", e))?;
    tokio::spawn(drain_queue(receiver));

    info!(
        database = %config.store.database_path.display(),
        vault = %config.pseudonym.database_path.display(),
        "Geomark node ready"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let response = handle_line(&context, line).await;
        let mut encoded = serde_json::to_vec(&response)?;
        encoded.push(b'\n');
        stdout.write_all(&encoded).await?;
        stdout.flush().await?;
    }

    info!("Input closed, shutting down");
    Ok(())
}

async fn handle_line(context: &CommandContext, line: &str) -> Response {
    let command: Command = match serde_json::from_str(line) {
        Ok(command) => command,
        Err(e) => {
            return Response::Error(CommandError::InvalidInput(e.to_string()).to_public());
        }
    };
    match context.execute(command).await {
        Ok(outcome) => Response::Ok(outcome),
        Err(e) => Response::Error(e.to_public()),
    }
}

/// Stand-in consumer for downstream workers (tile rebuilds, credibility jobs)
async fn drain_queue(mut receiver: mpsc::UnboundedReceiver<QueuedMessage>) {
    while let Some(message) = receiver.recv().await {
        debug!(topic = %message.topic, payload = %message.payload, "Queued message");
    }
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Args> {
    let mut parsed = Args {
        config: None,
        json_logs: false,
        version_json: false,
    };
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => match args.next() {
                Some(path) => parsed.config = Some(PathBuf::from(path)),
                None => bail!("--config was provided without a path"),
            },
            "--json-logs" => parsed.json_logs = true,
            "--version-json" => parsed.version_json = true,
            other => bail!("unknown argument {}", other),
        }
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<Args> {
        parse_args(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_parse_args() {
        let parsed = args(&["--config", "node.toml", "--json-logs"]).unwrap();
        assert_eq!(parsed.config, Some(PathBuf::from("node.toml")));
        assert!(parsed.json_logs);
        assert!(!parsed.version_json);

        assert!(args(&["--config"]).is_err());
        assert!(args(&["--listen"]).is_err());
        assert!(args(&[]).unwrap().config.is_none());
    }

    #[test]
    fn test_response_shape() {
        let response = Response::Error(PublicError {
            code: "NOT_FOUND".to_string(),
            message: "gone".to_string(),
        });
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["error"]["code"], "NOT_FOUND");
    }
}
