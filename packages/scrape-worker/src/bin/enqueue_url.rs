//! CLI for submitting URLs to the scrape work queue
//!
//! Publishes one `{"url": ...}` task per argument through JetStream and waits
//! for the stream to acknowledge each one. Prints one JSON line per URL.

use anyhow::{Context, Result};
use clap::Parser;
use scrape_worker_core::common::TaskPayload;
use serde::Serialize;

#[derive(Parser)]
#[command(name = "enqueue_url")]
#[command(about = "Enqueue URLs for the scrape workers")]
struct Cli {
    /// URLs to enqueue
    #[arg(required = true)]
    urls: Vec<String>,

    /// NATS server address
    #[arg(long, env = "NATS_URL", default_value = "nats://localhost:4222")]
    nats_url: String,

    /// Subject the workers consume
    #[arg(long, env = "NATS_SUBJECT", default_value = "urls")]
    subject: String,
}

#[derive(Serialize)]
struct Enqueued<'a> {
    url: &'a str,
    stream: String,
    sequence: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let client = async_nats::connect(cli.nats_url.as_str())
        .await
        .with_context(|| format!("Failed to connect to NATS at {}", cli.nats_url))?;
    let jetstream = async_nats::jetstream::new(client);

    for url in &cli.urls {
        let payload = serde_json::to_vec(&TaskPayload::new(url.as_str()))?;
        let ack = jetstream
            .publish(cli.subject.clone(), payload.into())
            .await
            .with_context(|| format!("Failed to publish {}", url))?
            .await
            .with_context(|| {
                format!(
                    "No stream acknowledged {} (has a worker created the stream yet?)",
                    url
                )
            })?;

        println!(
            "{}",
            serde_json::to_string(&Enqueued {
                url,
                stream: ack.stream,
                sequence: ack.sequence,
            })?
        );
    }

    Ok(())
}
