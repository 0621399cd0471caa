use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;
use tokio::task::JoinSet;

use ensemble_core::{InferenceRequest, ModelInference, ModelSpec};

/// One-shot pre-flight: a cheap throwaway request per configured model to
/// pull weights into memory before the first real call. Outcomes are
/// ignored; the only goal is first-call tail latency.
#[derive(Default)]
pub struct WarmupManager {
    warmed: OnceCell<()>,
}

impl WarmupManager {
    pub fn new() -> Self {
        Self {
            warmed: OnceCell::new(),
        }
    }

    pub fn is_warmed(&self) -> bool {
        self.warmed.initialized()
    }

    /// The first caller performs the warmup; concurrent callers wait on the
    /// same pass; everyone after that is a no-op.
    pub async fn ensure_warm(
        &self,
        inference: &Arc<dyn ModelInference>,
        specs: &[ModelSpec],
        timeout: Duration,
    ) {
        self.warmed
            .get_or_init(|| async {
                tracing::info!("Warming up {} models", specs.len());

                let mut tasks = JoinSet::new();
                for spec in specs {
                    let inference = Arc::clone(inference);
                    let request = InferenceRequest {
                        model: spec.model.clone(),
                        prompt: format!("{} warmup check", spec.model),
                        temperature: spec.temperature,
                        top_p: 0.9,
                        max_tokens: 8,
                        stop: Vec::new(),
                        timeout,
                    };
                    tasks.spawn(async move {
                        let model = request.model.clone();
                        (model, inference.infer(&request).await)
                    });
                }

                while let Some(joined) = tasks.join_next().await {
                    match joined {
                        Ok((model, Ok(_))) => tracing::debug!(%model, "warmup ok"),
                        Ok((model, Err(e))) => tracing::debug!(%model, "warmup skipped: {e}"),
                        Err(e) => tracing::debug!("warmup task failed: {e}"),
                    }
                }

                tracing::info!("Model warmup complete");
            })
            .await;
    }
}
