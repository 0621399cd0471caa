use std::str::FromStr;
use std::time::Duration;

use crate::types::Dimension;

/// Configuration for one dimension's model. Loaded once at process start.
/// Weights need not sum to 1: aggregation normalizes by the weights of the
/// dimensions that actually responded.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub dimension: Dimension,
    pub model: String,
    /// In [0, 1].
    pub weight: f64,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl ModelSpec {
    pub fn new(
        dimension: Dimension,
        model: impl Into<String>,
        weight: f64,
        temperature: f64,
        max_tokens: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            dimension,
            model: model.into(),
            weight: weight.clamp(0.0, 1.0),
            temperature,
            max_tokens,
            timeout,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnsembleConfig {
    /// Base address of the inference service.
    pub base_url: String,
    pub specs: Vec<ModelSpec>,
    /// Decision threshold: score > threshold is BUY, score < -threshold is
    /// SELL, the boundary itself is HOLD.
    pub buy_threshold: f64,
    /// Confidence multiplier applied when enough dimensions responded.
    pub agreement_boost: f64,
    pub boost_min_responders: usize,
    /// Upper bound on reported confidence, applied unconditionally.
    pub confidence_cap: f64,
    /// Outer hard wall on one ensemble run, on top of per-call timeouts.
    pub overall_timeout: Duration,
    pub cache_ttl: Duration,
    pub warmup_enabled: bool,
    /// Per-model bound on the throwaway warmup call.
    pub warmup_timeout: Duration,
    pub max_batch_size: usize,
    /// Simultaneous ensemble runs in a batch. Each run fans out to all
    /// configured models, so total in-flight inference is roughly this
    /// times the spec count.
    pub max_concurrent_runs: usize,
    pub stop_sequences: Vec<String>,
    pub top_p: f64,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            specs: default_specs(),
            buy_threshold: 0.35,
            agreement_boost: 1.2,
            boost_min_responders: 3,
            confidence_cap: 0.95,
            overall_timeout: Duration::from_secs(120),
            cache_ttl: Duration::from_secs(120),
            warmup_enabled: true,
            warmup_timeout: Duration::from_secs(2),
            max_batch_size: 20,
            max_concurrent_runs: 4,
            stop_sequences: vec!["\n\n".to_string(), "---".to_string(), "END".to_string()],
            top_p: 0.9,
        }
    }
}

impl EnsembleConfig {
    /// Build from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("OLLAMA_URL") {
            config.base_url = url;
        }
        if let Some(t) = env_parse::<f64>("ENSEMBLE_BUY_THRESHOLD") {
            config.buy_threshold = t;
        }
        if let Some(secs) = env_parse::<u64>("ENSEMBLE_OVERALL_TIMEOUT_SECS") {
            config.overall_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("ENSEMBLE_CACHE_TTL_SECS") {
            config.cache_ttl = Duration::from_secs(secs);
        }
        if let Ok(raw) = std::env::var("ENSEMBLE_WARMUP") {
            config.warmup_enabled = !matches!(raw.as_str(), "0" | "false" | "off");
        }
        if let Some(n) = env_parse::<usize>("ENSEMBLE_MAX_BATCH") {
            config.max_batch_size = n.max(1);
        }
        if let Some(n) = env_parse::<usize>("ENSEMBLE_MAX_CONCURRENT") {
            config.max_concurrent_runs = n.max(1);
        }

        for spec in &mut config.specs {
            let suffix = spec.dimension.as_str().to_uppercase();
            if let Ok(model) = std::env::var(format!("ENSEMBLE_MODEL_{suffix}")) {
                spec.model = model;
            }
            if let Some(w) = env_parse::<f64>(&format!("ENSEMBLE_WEIGHT_{suffix}")) {
                spec.weight = w.clamp(0.0, 1.0);
            }
        }
        // Single override applied to every per-call deadline.
        if let Some(secs) = env_parse::<u64>("ENSEMBLE_CALL_TIMEOUT_SECS") {
            for spec in &mut config.specs {
                spec.timeout = Duration::from_secs(secs);
            }
        }

        config
    }

    pub fn spec_for(&self, dimension: Dimension) -> Option<&ModelSpec> {
        self.specs.iter().find(|s| s.dimension == dimension)
    }
}

/// Specialist model catalog: one model per dimension, sized and bounded per
/// its typical response behavior.
fn default_specs() -> Vec<ModelSpec> {
    vec![
        ModelSpec::new(
            Dimension::Technical,
            "llama3.1:8b",
            0.35,
            0.1,
            50,
            Duration::from_secs(60),
        ),
        ModelSpec::new(
            Dimension::Risk,
            "mistral:7b",
            0.30,
            0.1,
            40,
            Duration::from_secs(60),
        ),
        ModelSpec::new(
            Dimension::Sentiment,
            "phi3:mini",
            0.20,
            0.2,
            30,
            Duration::from_secs(30),
        ),
        ModelSpec::new(
            Dimension::Strategy,
            "codellama:13b",
            0.15,
            0.1,
            60,
            Duration::from_secs(90),
        ),
    ]
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
