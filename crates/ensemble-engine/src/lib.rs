use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::task::JoinSet;

use ensemble_core::{
    AgreementLevel, AnalysisRequest, Dimension, EnsembleConfig, EnsembleError, EnsembleResult,
    InferenceError, InferenceRequest, ModelInference, PartialVerdict, Recommendation,
};
use ollama_client::OllamaClient;

pub mod batch;
pub mod cache;
pub mod interpret;
pub mod prompt;
pub mod stats;
pub mod warmup;

#[cfg(test)]
mod tests;

pub use batch::BatchRunner;
pub use cache::ResponseCache;
pub use stats::{EngineStats, StatsSnapshot};
pub use warmup::WarmupManager;

/// Multi-model ensemble decision engine: fans one analysis request out to
/// the configured specialist models concurrently, absorbs per-model
/// failures into neutral verdicts, and combines whatever responded into a
/// single weighted trading signal.
pub struct EnsembleEngine {
    config: EnsembleConfig,
    inference: Arc<dyn ModelInference>,
    cache: ResponseCache,
    warmup: WarmupManager,
    stats: EngineStats,
}

impl EnsembleEngine {
    pub fn new(config: EnsembleConfig) -> Self {
        let inference: Arc<dyn ModelInference> =
            Arc::new(OllamaClient::new(config.base_url.clone()));
        Self::with_inference(config, inference)
    }

    /// Construct with an injected inference boundary. This is how tests
    /// script model behavior.
    pub fn with_inference(config: EnsembleConfig, inference: Arc<dyn ModelInference>) -> Self {
        Self {
            config,
            inference,
            cache: ResponseCache::new(),
            warmup: WarmupManager::new(),
            stats: EngineStats::new(),
        }
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    /// Pre-flight all configured models. Idempotent and safe to call
    /// concurrently; `decide` also triggers it when warmup is enabled.
    pub async fn warmup(&self) {
        self.warmup
            .ensure_warm(
                &self.inference,
                &self.config.specs,
                self.config.warmup_timeout,
            )
            .await;
    }

    /// Health probe: true when every configured model is registered on the
    /// inference service.
    pub async fn is_available(&self) -> bool {
        match self.inference.list_models().await {
            Ok(available) => {
                let missing: Vec<&str> = self
                    .config
                    .specs
                    .iter()
                    .filter(|spec| !available.iter().any(|m| m == &spec.model))
                    .map(|spec| spec.model.as_str())
                    .collect();

                if missing.is_empty() {
                    true
                } else {
                    tracing::warn!("Missing models on inference service: {}", missing.join(", "));
                    false
                }
            }
            Err(e) => {
                tracing::debug!("Inference service unreachable: {e}");
                false
            }
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot(self.cache.len(), self.warmup.is_warmed())
    }

    /// Run one full ensemble analysis. The only error path is an invalid
    /// request; every per-model failure degrades into a neutral verdict.
    pub async fn decide(&self, request: AnalysisRequest) -> Result<EnsembleResult, EnsembleError> {
        request.validate()?;

        if self.config.warmup_enabled {
            self.warmup().await;
        }

        let started = Instant::now();
        self.stats.record_run();
        tracing::info!(symbol = %request.symbol, "Starting ensemble analysis");

        let raw = self.fan_out(&request).await;

        let mut verdicts: HashMap<Dimension, PartialVerdict> = HashMap::new();
        let mut responded = 0usize;
        for spec in &self.config.specs {
            let verdict = interpret::interpret(
                spec.dimension,
                raw.get(&spec.dimension).map(String::as_str),
            );
            if verdict.responded {
                responded += 1;
            }
            verdicts.insert(spec.dimension, verdict);
        }

        let (decision_score, recommendation, confidence) =
            decide_from_verdicts(&verdicts, &self.config, responded);

        self.stats.record_decision(recommendation);

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let total_count = self.config.specs.len();
        tracing::info!(
            symbol = %request.symbol,
            recommendation = ?recommendation,
            decision_score,
            confidence,
            responded,
            total = total_count,
            elapsed_ms,
            "Ensemble decision"
        );

        Ok(EnsembleResult {
            symbol: request.symbol.clone(),
            recommendation,
            confidence,
            decision_score,
            verdicts,
            responded_count: responded,
            total_count,
            agreement: AgreementLevel::from_responders(responded),
            elapsed_ms,
            timestamp: Utc::now(),
        })
    }

    /// Launch one inference task per spec and join them under the outer
    /// deadline. A slow or failing model never delays the others; when the
    /// deadline hits, still-pending calls are aborted and their dimensions
    /// come back absent.
    async fn fan_out(&self, request: &AnalysisRequest) -> HashMap<Dimension, String> {
        let deadline = tokio::time::Instant::now() + self.config.overall_timeout;
        let mut tasks: JoinSet<(Dimension, Result<String, InferenceError>)> = JoinSet::new();

        for spec in &self.config.specs {
            let prompt = prompt::build_prompt(spec.dimension, request);
            let inference_request = InferenceRequest {
                model: spec.model.clone(),
                prompt: prompt.clone(),
                temperature: spec.temperature,
                top_p: self.config.top_p,
                max_tokens: spec.max_tokens,
                stop: self.config.stop_sequences.clone(),
                timeout: spec.timeout,
            };

            let inference = Arc::clone(&self.inference);
            let cache = self.cache.clone();
            let stats = self.stats.clone();
            let ttl = self.config.cache_ttl;
            let dimension = spec.dimension;
            let model = spec.model.clone();

            tasks.spawn(async move {
                let call_started = Instant::now();
                let outcome = cache
                    .get_or_compute(&model, &prompt, ttl, move || async move {
                        inference.infer(&inference_request).await
                    })
                    .await;
                stats.record_model_call(
                    &model,
                    outcome.is_ok(),
                    call_started.elapsed().as_millis() as f64,
                );
                (dimension, outcome)
            });
        }

        let mut raw: HashMap<Dimension, String> = HashMap::new();
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((dimension, Ok(text))))) => {
                    raw.insert(dimension, text);
                }
                Ok(Some(Ok((dimension, Err(e))))) => {
                    tracing::warn!(dimension = dimension.as_str(), "model call failed: {e}");
                }
                Ok(Some(Err(e))) => {
                    tracing::error!("analysis task failed: {e}");
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        symbol = %request.symbol,
                        pending = tasks.len(),
                        "overall deadline reached, aborting pending model calls"
                    );
                    tasks.abort_all();
                    break;
                }
            }
        }
        raw
    }
}

/// Weighted aggregation over the verdicts that actually responded.
///
/// `score = Σ(signal × confidence × weight) / Σ(weight of responders)`; no
/// responders means score 0 and HOLD. The threshold boundary is exclusive:
/// a score exactly at the threshold stays HOLD. Confidence is |score|,
/// boosted when enough dimensions corroborated, and always capped.
pub(crate) fn decide_from_verdicts(
    verdicts: &HashMap<Dimension, PartialVerdict>,
    config: &EnsembleConfig,
    responded: usize,
) -> (f64, Recommendation, f64) {
    let mut total_score = 0.0;
    let mut total_weight = 0.0;

    for spec in &config.specs {
        if let Some(verdict) = verdicts.get(&spec.dimension) {
            if verdict.responded {
                total_score += verdict.signal * verdict.confidence * spec.weight;
                total_weight += spec.weight;
            }
        }
    }

    let score = if total_weight > 0.0 {
        total_score / total_weight
    } else {
        0.0
    };

    let recommendation = if score > config.buy_threshold {
        Recommendation::Buy
    } else if score < -config.buy_threshold {
        Recommendation::Sell
    } else {
        Recommendation::Hold
    };

    let mut confidence = score.abs();
    if responded >= config.boost_min_responders {
        confidence *= config.agreement_boost;
    }
    confidence = confidence.min(config.confidence_cap);

    (score, recommendation, confidence)
}
