use thiserror::Error;

/// Errors the ensemble surfaces to callers. Per-model failures are absorbed
/// into neutral verdicts and never appear here.
#[derive(Error, Debug)]
pub enum EnsembleError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Batch too large: {given} symbols (max {max})")]
    BatchTooLarge { given: usize, max: usize },
}

/// Failures at the model inference boundary.
#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Inference timed out")]
    Timeout,

    #[error("Inference service unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid inference response: {0}")]
    InvalidResponse(String),
}
