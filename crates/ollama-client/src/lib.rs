use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use ensemble_core::{InferenceError, InferenceRequest, ModelInference};

/// Bound on the model-catalog probe; generation calls carry their own
/// per-request deadline instead.
const TAGS_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions<'a>,
}

#[derive(Debug, Clone, Serialize)]
struct GenerateOptions<'a> {
    temperature: f64,
    top_p: f64,
    num_predict: u32,
    stop: &'a [String],
}

#[derive(Debug, Clone, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Clone, Deserialize)]
struct TagsResponse {
    models: Vec<ModelTag>,
}

#[derive(Debug, Clone, Deserialize)]
struct ModelTag {
    name: String,
}

/// HTTP adapter for a local Ollama runtime.
#[derive(Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaClient {
    /// No client-level request timeout: each call enforces the deadline the
    /// caller supplies, which varies per model.
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.into(),
        }
    }

    async fn generate(&self, request: &InferenceRequest) -> Result<String, InferenceError> {
        let body = GenerateRequest {
            model: &request.model,
            prompt: &request.prompt,
            stream: false,
            options: GenerateOptions {
                temperature: request.temperature,
                top_p: request.top_p,
                num_predict: request.max_tokens,
                stop: &request.stop,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            return Err(InferenceError::Unavailable(format!(
                "Status: {}",
                response.status()
            )));
        }

        let parsed = response
            .json::<GenerateResponse>()
            .await
            .map_err(|e| InferenceError::InvalidResponse(e.to_string()))?;

        Ok(parsed.response.trim().to_string())
    }
}

#[async_trait]
impl ModelInference for OllamaClient {
    async fn infer(&self, request: &InferenceRequest) -> Result<String, InferenceError> {
        let started = Instant::now();

        match tokio::time::timeout(request.timeout, self.generate(request)).await {
            Ok(Ok(text)) => {
                tracing::debug!(
                    model = %request.model,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "generate ok"
                );
                Ok(text)
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    model = %request.model,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "generate failed: {e}"
                );
                Err(e)
            }
            Err(_) => {
                tracing::warn!(
                    model = %request.model,
                    timeout_ms = request.timeout.as_millis() as u64,
                    "generate timed out"
                );
                Err(InferenceError::Timeout)
            }
        }
    }

    async fn list_models(&self) -> Result<Vec<String>, InferenceError> {
        let fetch = async {
            let response = self
                .client
                .get(format!("{}/api/tags", self.base_url))
                .send()
                .await
                .map_err(map_transport_error)?;

            if !response.status().is_success() {
                return Err(InferenceError::Unavailable(format!(
                    "Status: {}",
                    response.status()
                )));
            }

            response
                .json::<TagsResponse>()
                .await
                .map_err(|e| InferenceError::InvalidResponse(e.to_string()))
        };

        match tokio::time::timeout(TAGS_TIMEOUT, fetch).await {
            Ok(Ok(tags)) => Ok(tags.models.into_iter().map(|m| m.name).collect()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(InferenceError::Timeout),
        }
    }
}

fn map_transport_error(e: reqwest::Error) -> InferenceError {
    if e.is_timeout() {
        InferenceError::Timeout
    } else {
        InferenceError::Unavailable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_request_wire_shape() {
        let stop = vec!["\n\n".to_string(), "END".to_string()];
        let body = GenerateRequest {
            model: "phi3:mini",
            prompt: "AAPL sentiment",
            stream: false,
            options: GenerateOptions {
                temperature: 0.2,
                top_p: 0.9,
                num_predict: 30,
                stop: &stop,
            },
        };

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "phi3:mini");
        assert_eq!(json["stream"], false);
        assert_eq!(json["options"]["num_predict"], 30);
        assert_eq!(json["options"]["stop"][1], "END");
    }

    #[test]
    fn tags_response_parses() {
        let raw = r#"{"models":[{"name":"llama3.1:8b","size":123},{"name":"phi3:mini"}]}"#;
        let parsed: TagsResponse = serde_json::from_str(raw).unwrap();
        let names: Vec<String> = parsed.models.into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["llama3.1:8b", "phi3:mini"]);
    }
}
