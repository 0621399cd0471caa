use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use ensemble_core::{
    AnalysisRequest, BatchEntry, BatchResult, BatchSummary, EnsembleError, Recommendation,
};

use crate::EnsembleEngine;

/// Runs the ensemble over a list of symbols with bounded fan-out. One
/// symbol's failure is collected as an error entry and never aborts the
/// rest; output preserves input order.
pub struct BatchRunner {
    engine: Arc<EnsembleEngine>,
}

impl BatchRunner {
    pub fn new(engine: Arc<EnsembleEngine>) -> Self {
        Self { engine }
    }

    pub async fn run(&self, requests: Vec<AnalysisRequest>) -> Result<BatchResult, EnsembleError> {
        let max = self.engine.config().max_batch_size;
        if requests.len() > max {
            return Err(EnsembleError::BatchTooLarge {
                given: requests.len(),
                max,
            });
        }

        let total_symbols = requests.len();
        tracing::info!("Batch analyzing {total_symbols} symbols");
        let started = Instant::now();

        // Each run fans out to all configured models, so the semaphore caps
        // total in-flight inference at roughly runs * specs.
        let semaphore = Arc::new(Semaphore::new(self.engine.config().max_concurrent_runs));
        let mut tasks = JoinSet::new();

        for (index, request) in requests.into_iter().enumerate() {
            let engine = Arc::clone(&self.engine);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                let symbol = request.symbol.clone();
                let outcome = engine.decide(request).await;
                (index, symbol, outcome)
            });
        }

        let mut slots: Vec<Option<BatchEntry>> = Vec::new();
        slots.resize_with(total_symbols, || None);

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, _symbol, Ok(analysis))) => {
                    slots[index] = Some(BatchEntry::Ok { analysis });
                }
                Ok((index, symbol, Err(e))) => {
                    tracing::warn!(%symbol, "batch entry failed: {e}");
                    slots[index] = Some(BatchEntry::Error {
                        symbol,
                        error: e.to_string(),
                    });
                }
                Err(e) => {
                    tracing::error!("batch task failed: {e}");
                }
            }
        }

        let entries: Vec<BatchEntry> = slots.into_iter().flatten().collect();
        let summary = summarize(&entries, total_symbols, started.elapsed().as_millis() as u64);

        tracing::info!(
            "Batch complete: {}/{} symbols in {}ms",
            summary.successful,
            total_symbols,
            summary.total_elapsed_ms
        );

        Ok(BatchResult {
            entries,
            summary,
            timestamp: Utc::now(),
        })
    }
}

fn summarize(entries: &[BatchEntry], total_symbols: usize, total_elapsed_ms: u64) -> BatchSummary {
    let mut buy_signals = 0;
    let mut sell_signals = 0;
    let mut hold_signals = 0;
    let mut successful = 0;
    let mut confidence_sum = 0.0;

    for entry in entries {
        if let BatchEntry::Ok { analysis } = entry {
            successful += 1;
            confidence_sum += analysis.confidence;
            match analysis.recommendation {
                Recommendation::Buy => buy_signals += 1,
                Recommendation::Sell => sell_signals += 1,
                Recommendation::Hold => hold_signals += 1,
            }
        }
    }

    BatchSummary {
        total_symbols,
        successful,
        buy_signals,
        sell_signals,
        hold_signals,
        avg_confidence: if successful > 0 {
            confidence_sum / successful as f64
        } else {
            0.0
        },
        total_elapsed_ms,
        avg_ms_per_symbol: if total_symbols > 0 {
            total_elapsed_ms / total_symbols as u64
        } else {
            0
        },
    }
}
