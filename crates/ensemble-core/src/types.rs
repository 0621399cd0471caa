use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EnsembleError;

/// One independent axis of analysis, each handled by its own model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Technical,
    Risk,
    Sentiment,
    Strategy,
}

impl Dimension {
    pub const ALL: [Dimension; 4] = [
        Dimension::Technical,
        Dimension::Risk,
        Dimension::Sentiment,
        Dimension::Strategy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Technical => "technical",
            Dimension::Risk => "risk",
            Dimension::Sentiment => "sentiment",
            Dimension::Strategy => "strategy",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentLabel {
    VeryBullish,
    Bullish,
    Neutral,
    Bearish,
    VeryBearish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeAction {
    Buy,
    Sell,
    Hold,
}

/// A single dimension's structured opinion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Opinion {
    Technical { trend: Trend },
    Risk { level: RiskLevel },
    Sentiment { sentiment: SentimentLabel },
    Strategy { action: TradeAction },
}

impl Opinion {
    pub fn dimension(&self) -> Dimension {
        match self {
            Opinion::Technical { .. } => Dimension::Technical,
            Opinion::Risk { .. } => Dimension::Risk,
            Opinion::Sentiment { .. } => Dimension::Sentiment,
            Opinion::Strategy { .. } => Dimension::Strategy,
        }
    }

    /// Directional signal in [-1, 1]. Confidence is kept separate so the
    /// aggregation can weight them explicitly.
    pub fn signal(&self) -> f64 {
        match self {
            Opinion::Technical { trend } => match trend {
                Trend::Bullish => 1.0,
                Trend::Bearish => -1.0,
                Trend::Neutral => 0.0,
            },
            // Low risk supports entering, high risk argues against.
            Opinion::Risk { level } => match level {
                RiskLevel::Low => 0.5,
                RiskLevel::Medium => 0.0,
                RiskLevel::High => -0.5,
            },
            Opinion::Sentiment { sentiment } => match sentiment {
                SentimentLabel::VeryBullish => 1.0,
                SentimentLabel::Bullish => 0.7,
                SentimentLabel::Neutral => 0.0,
                SentimentLabel::Bearish => -0.7,
                SentimentLabel::VeryBearish => -1.0,
            },
            Opinion::Strategy { action } => match action {
                TradeAction::Buy => 1.0,
                TradeAction::Sell => -1.0,
                TradeAction::Hold => 0.0,
            },
        }
    }

    /// Neutral opinion for a dimension, used when a model is absent or
    /// unparsable.
    pub fn neutral(dimension: Dimension) -> Self {
        match dimension {
            Dimension::Technical => Opinion::Technical {
                trend: Trend::Neutral,
            },
            Dimension::Risk => Opinion::Risk {
                level: RiskLevel::Medium,
            },
            Dimension::Sentiment => Opinion::Sentiment {
                sentiment: SentimentLabel::Neutral,
            },
            Dimension::Strategy => Opinion::Strategy {
                action: TradeAction::Hold,
            },
        }
    }
}

/// One dimension's verdict: opinion + confidence + rationale.
///
/// `responded` is false when the verdict is a neutral stand-in for a model
/// that timed out or was unreachable; such verdicts are excluded from
/// weight normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialVerdict {
    #[serde(flatten)]
    pub opinion: Opinion,
    pub signal: f64,
    pub confidence: f64,
    pub rationale: String,
    pub responded: bool,
}

impl PartialVerdict {
    pub fn new(opinion: Opinion, confidence: f64, rationale: impl Into<String>) -> Self {
        Self {
            opinion,
            signal: opinion.signal(),
            confidence: confidence.clamp(0.0, 1.0),
            rationale: rationale.into(),
            responded: true,
        }
    }

    /// Neutral default for a dimension whose model produced no response.
    pub fn absent(dimension: Dimension, rationale: impl Into<String>) -> Self {
        let opinion = Opinion::neutral(dimension);
        Self {
            opinion,
            signal: opinion.signal(),
            confidence: 0.0,
            rationale: rationale.into(),
            responded: false,
        }
    }
}

/// Immutable input to one ensemble run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub symbol: String,
    pub price: f64,
    pub change_percent: f64,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub extra_context: Option<String>,
}

impl AnalysisRequest {
    pub fn new(symbol: impl Into<String>, price: f64, change_percent: f64) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            change_percent,
            volume: None,
            extra_context: None,
        }
    }

    pub fn validate(&self) -> Result<(), EnsembleError> {
        if self.symbol.trim().is_empty() {
            return Err(EnsembleError::InvalidRequest("empty symbol".to_string()));
        }
        if !self.price.is_finite() || self.price <= 0.0 {
            return Err(EnsembleError::InvalidRequest(format!(
                "non-positive or non-finite price: {}",
                self.price
            )));
        }
        if !self.change_percent.is_finite() {
            return Err(EnsembleError::InvalidRequest(
                "non-finite change_percent".to_string(),
            ));
        }
        if let Some(v) = self.volume {
            if !v.is_finite() || v < 0.0 {
                return Err(EnsembleError::InvalidRequest(format!(
                    "invalid volume: {v}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Recommendation {
    Buy,
    Sell,
    Hold,
}

/// How broadly the configured dimensions corroborated the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgreementLevel {
    High,
    Medium,
    Low,
}

impl AgreementLevel {
    pub fn from_responders(responded: usize) -> Self {
        match responded {
            n if n >= 3 => AgreementLevel::High,
            2 => AgreementLevel::Medium,
            _ => AgreementLevel::Low,
        }
    }
}

/// Combined decision from all dimensions for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleResult {
    pub symbol: String,
    pub recommendation: Recommendation,
    pub confidence: f64,
    pub decision_score: f64,
    pub verdicts: HashMap<Dimension, PartialVerdict>,
    pub responded_count: usize,
    pub total_count: usize,
    pub agreement: AgreementLevel,
    pub elapsed_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// One entry of a batch run. Failures are collected, not propagated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchEntry {
    Ok { analysis: EnsembleResult },
    Error { symbol: String, error: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_symbols: usize,
    pub successful: usize,
    pub buy_signals: usize,
    pub sell_signals: usize,
    pub hold_signals: usize,
    /// Mean confidence over successful entries only; 0.0 when none succeeded.
    pub avg_confidence: f64,
    pub total_elapsed_ms: u64,
    pub avg_ms_per_symbol: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    /// Same order as the input request list.
    pub entries: Vec<BatchEntry>,
    pub summary: BatchSummary,
    pub timestamp: DateTime<Utc>,
}

/// One inference call as handed to the boundary adapter.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub model: String,
    pub prompt: String,
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
    pub stop: Vec<String>,
    pub timeout: Duration,
}
