use async_trait::async_trait;

use crate::error::InferenceError;
use crate::types::InferenceRequest;

/// Boundary to the external model inference runtime.
///
/// Implementations must honor `request.timeout` themselves and map expiry to
/// `InferenceError::Timeout` rather than blocking the caller. No retries:
/// retry policy, if any, belongs to the coordinator.
#[async_trait]
pub trait ModelInference: Send + Sync {
    async fn infer(&self, request: &InferenceRequest) -> Result<String, InferenceError>;

    /// Model identifiers currently registered on the inference service.
    async fn list_models(&self) -> Result<Vec<String>, InferenceError>;
}
