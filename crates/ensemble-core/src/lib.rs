pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{EnsembleConfig, ModelSpec};
pub use error::{EnsembleError, InferenceError};
pub use traits::ModelInference;
pub use types::{
    AgreementLevel, AnalysisRequest, BatchEntry, BatchResult, BatchSummary, Dimension,
    EnsembleResult, InferenceRequest, Opinion, PartialVerdict, Recommendation, RiskLevel,
    SentimentLabel, TradeAction, Trend,
};
