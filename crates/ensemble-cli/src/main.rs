use std::sync::Arc;

use anyhow::{bail, Context};

use ensemble_core::{AnalysisRequest, EnsembleConfig};
use ensemble_engine::{BatchRunner, EnsembleEngine};

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let requests = parse_args(std::env::args().skip(1))?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(requests))
}

async fn run(mut requests: Vec<AnalysisRequest>) -> anyhow::Result<()> {
    let engine = Arc::new(EnsembleEngine::new(EnsembleConfig::from_env()));

    if !engine.is_available().await {
        tracing::warn!("Inference service or models unavailable; expect neutral verdicts");
    }

    if requests.len() == 1 {
        let request = requests.remove(0);
        let result = engine.decide(request).await?;
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        let runner = BatchRunner::new(Arc::clone(&engine));
        let result = runner.run(requests).await?;
        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    tracing::debug!(
        "engine stats: {}",
        serde_json::to_string(&engine.stats())?
    );

    Ok(())
}

/// Each argument is SYMBOL:PRICE:CHANGE_PERCENT[:VOLUME]; a single argument
/// runs one ensemble, several run as a batch.
fn parse_args(args: impl Iterator<Item = String>) -> anyhow::Result<Vec<AnalysisRequest>> {
    let mut requests = Vec::new();

    for arg in args {
        let parts: Vec<&str> = arg.split(':').collect();
        if parts.len() < 3 || parts.len() > 4 {
            bail!("expected SYMBOL:PRICE:CHANGE_PERCENT[:VOLUME], got '{arg}'");
        }

        let mut request = AnalysisRequest::new(
            parts[0],
            parts[1]
                .parse::<f64>()
                .with_context(|| format!("bad price in '{arg}'"))?,
            parts[2]
                .parse::<f64>()
                .with_context(|| format!("bad change percent in '{arg}'"))?,
        );
        if let Some(raw) = parts.get(3) {
            request.volume = Some(
                raw.parse::<f64>()
                    .with_context(|| format!("bad volume in '{arg}'"))?,
            );
        }
        requests.push(request);
    }

    if requests.is_empty() {
        bail!("usage: ensemble SYMBOL:PRICE:CHANGE_PERCENT[:VOLUME] [more symbols...]");
    }

    Ok(requests)
}
