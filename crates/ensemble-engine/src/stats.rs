use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use ensemble_core::Recommendation;

#[derive(Debug, Default)]
struct ModelStat {
    success: u64,
    total: u64,
    avg_response_ms: f64,
}

#[derive(Default)]
struct StatsInner {
    total_runs: AtomicU64,
    buy: AtomicU64,
    sell: AtomicU64,
    hold: AtomicU64,
    models: DashMap<String, ModelStat>,
}

/// Process-wide counters over ensemble runs and per-model call outcomes.
#[derive(Clone, Default)]
pub struct EngineStats {
    inner: Arc<StatsInner>,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_run(&self) {
        self.inner.total_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decision(&self, recommendation: Recommendation) {
        let counter = match recommendation {
            Recommendation::Buy => &self.inner.buy,
            Recommendation::Sell => &self.inner.sell,
            Recommendation::Hold => &self.inner.hold,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Response time tracked as an exponentially-weighted average (0.8/0.2
    /// decay) so recent behavior dominates.
    pub fn record_model_call(&self, model: &str, ok: bool, elapsed_ms: f64) {
        let mut stat = self.inner.models.entry(model.to_string()).or_default();
        stat.total += 1;
        if ok {
            stat.success += 1;
        }
        stat.avg_response_ms = if stat.total == 1 {
            elapsed_ms
        } else {
            stat.avg_response_ms * 0.8 + elapsed_ms * 0.2
        };
    }

    pub fn snapshot(&self, cache_size: usize, models_warmed: bool) -> StatsSnapshot {
        let model_performance = self
            .inner
            .models
            .iter()
            .map(|entry| {
                let stat = entry.value();
                (
                    entry.key().clone(),
                    ModelStatSnapshot {
                        total: stat.total,
                        success: stat.success,
                        success_rate: if stat.total > 0 {
                            stat.success as f64 / stat.total as f64
                        } else {
                            0.0
                        },
                        avg_response_ms: stat.avg_response_ms.round() as u64,
                    },
                )
            })
            .collect();

        StatsSnapshot {
            total_runs: self.inner.total_runs.load(Ordering::Relaxed),
            decisions: DecisionCounts {
                buy: self.inner.buy.load(Ordering::Relaxed),
                sell: self.inner.sell.load(Ordering::Relaxed),
                hold: self.inner.hold.load(Ordering::Relaxed),
            },
            model_performance,
            cache_size,
            models_warmed,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelStatSnapshot {
    pub total: u64,
    pub success: u64,
    pub success_rate: f64,
    pub avg_response_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DecisionCounts {
    pub buy: u64,
    pub sell: u64,
    pub hold: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub total_runs: u64,
    pub decisions: DecisionCounts,
    pub model_performance: HashMap<String, ModelStatSnapshot>,
    pub cache_size: usize,
    pub models_warmed: bool,
}
