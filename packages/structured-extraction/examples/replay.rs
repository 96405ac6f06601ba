//! Replay a recorded extraction stream against a schema.
//!
//! Usage: cargo run --example replay -- <schema.json> <stream.sse>
//!
//! The stream file holds `data: {...}` lines as sent by the server.
//! Prints the strict schema, each snapshot's filtered data and the final
//! validation outcome.

use std::convert::Infallible;
use std::env;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use futures::StreamExt;
use structured_extraction::{
    AccumulateExt, AccumulatedExtraction, ChunkStream, ExtractionConfig, ExtractionSchema,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,structured_extraction=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let [schema_path, stream_path] = args.as_slice() else {
        bail!("usage: replay <schema.json> <stream.sse>");
    };

    let raw = std::fs::read_to_string(schema_path)
        .with_context(|| format!("Failed to read schema {schema_path}"))?;
    let raw: serde_json::Value = serde_json::from_str(&raw).context("Schema is not JSON")?;
    let schema = ExtractionSchema::new(&raw, ExtractionConfig::default())
        .context("Failed to prepare schema")?
        .shared();

    println!("{}", serde_json::to_string_pretty(schema.strict_schema()?)?);

    let body = std::fs::read(stream_path)
        .with_context(|| format!("Failed to read stream {stream_path}"))?;
    let bytes = futures::stream::iter([Ok::<_, Infallible>(Bytes::from(body))]);

    let mut snapshots = ChunkStream::new(bytes).accumulate(AccumulatedExtraction::new(schema)?);
    let mut last = None;
    while let Some(snapshot) = snapshots.next().await {
        let snapshot = snapshot?;
        for (index, value) in snapshot.filtered().into_iter().enumerate() {
            tracing::info!(choice = index, data = %value, "snapshot");
        }
        last = Some(snapshot);
    }

    let Some(last) = last else {
        bail!("stream contained no chunks");
    };
    let done = last.into_result()?;
    for (index, value) in done.filtered().into_iter().enumerate() {
        println!("choice {index}: {}", serde_json::to_string_pretty(value)?);
    }
    Ok(())
}
