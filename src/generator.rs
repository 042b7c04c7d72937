//! Insight generators.
//!
//! [`InsightGenerator`] is the single substitution point between the insight
//! cache and the outside world. Implementations:
//!
//! - **[`OpenAiGenerator`]** calls an OpenAI-compatible `chat/completions`
//!   endpoint. The API key is read once, when the generator is built; a
//!   missing key fails each request, never startup.
//! - **[`PlaceholderGenerator`]** returns deterministic demo text without any
//!   network access.
//! - **[`DisabledGenerator`]** fails every request.
//!
//! Generators never retry. A failed attempt surfaces as [`GenerationError`]
//! and the cache stays untouched.

use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use thiserror::Error;

use crate::config::GenerationConfig;
use crate::models::InsightKind;

#[derive(Debug, Clone, Error)]
#[error("generation failed: {0}")]
pub struct GenerationError(pub String);

impl GenerationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[async_trait]
pub trait InsightGenerator: Send + Sync {
    /// Short identifier for logs (`"openai:gpt-4o-mini"`, `"placeholder"`).
    fn name(&self) -> String;

    /// Produces the insight text for `kind` from extracted syllabus `text`.
    async fn generate(&self, kind: InsightKind, text: &str) -> Result<String, GenerationError>;
}

/// Builds the generator selected by `generation.provider`.
pub fn create_generator(config: &GenerationConfig) -> anyhow::Result<Arc<dyn InsightGenerator>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiGenerator::new(config)?)),
        "placeholder" => Ok(Arc::new(PlaceholderGenerator)),
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

/// System prompt for each kind. The JSON field names are the ones
/// [`crate::render`] knows how to lay out.
pub fn prompt_for(kind: InsightKind) -> &'static str {
    match kind {
        InsightKind::Summary => {
            "Summarize the syllabus in 6 bullet points. Format the answer as markdown."
        }
        InsightKind::Workload => {
            "Estimate the workload of this course. Respond with a JSON object with keys: \
             hours_per_week_estimate (number or null), workload_shape (string), \
             heavy_weeks (array of strings), why_heavy (string), \
             evidence_quotes (array of short verbatim quotes from the syllabus)."
        }
        InsightKind::Grading => {
            "Extract the grading breakdown and major deliverables. Respond with a JSON object \
             with keys: grading_components (array of {name, weight_percent}), \
             deliverables (array of {type, count, notes}), late_policy (string), \
             collaboration_policy (string), evidence_quotes (array of strings)."
        }
        InsightKind::Prereqs => {
            "Infer prerequisites and recommended background. Respond with a JSON object with \
             keys: official_prereqs, implied_background, tools_languages, math_background, \
             evidence_quotes (each an array of strings)."
        }
    }
}

fn wants_json(kind: InsightKind) -> bool {
    !matches!(kind, InsightKind::Summary)
}

// ============ Disabled ============

pub struct DisabledGenerator;

#[async_trait]
impl InsightGenerator for DisabledGenerator {
    fn name(&self) -> String {
        "disabled".to_string()
    }

    async fn generate(&self, _kind: InsightKind, _text: &str) -> Result<String, GenerationError> {
        Err(GenerationError::new("generation is disabled"))
    }
}

// ============ Placeholder ============

/// Offline stand-in that echoes the prompt it would have sent.
pub struct PlaceholderGenerator;

#[async_trait]
impl InsightGenerator for PlaceholderGenerator {
    fn name(&self) -> String {
        "placeholder".to_string()
    }

    async fn generate(&self, kind: InsightKind, text: &str) -> Result<String, GenerationError> {
        Ok(format!(
            "[DEMO PLACEHOLDER]\n\nPrompt key: {}\nPrompt: {}\n\n({} characters of syllabus text extracted.)\n",
            kind.key(),
            prompt_for(kind),
            text.chars().count()
        ))
    }
}

// ============ OpenAI-compatible ============

pub struct OpenAiGenerator {
    client: reqwest::Client,
    model: String,
    base_url: String,
    api_key_env: String,
    api_key: Option<String>,
}

impl OpenAiGenerator {
    /// Reads the API key from `config.api_key_env` now; it is not re-read.
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            tracing::warn!(
                env = %config.api_key_env,
                "API key not set; insight generation will fail until it is configured"
            );
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key_env: config.api_key_env.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl InsightGenerator for OpenAiGenerator {
    fn name(&self) -> String {
        format!("openai:{}", self.model)
    }

    async fn generate(&self, kind: InsightKind, text: &str) -> Result<String, GenerationError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| GenerationError::new(format!("{} is not set", self.api_key_env)))?;

        let mut body = serde_json::json!({
            "model": self.model,
            "temperature": 0.2,
            "messages": [
                { "role": "system", "content": prompt_for(kind) },
                { "role": "user", "content": format!("Syllabus text:\n\n{}", text) },
            ],
        });
        if wants_json(kind) {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationError::new("request timed out")
                } else {
                    GenerationError::new(format!("request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(GenerationError::new(format!(
                "API error {}: {}",
                status, body_text
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GenerationError::new(format!("malformed response: {}", e)))?;
        parse_chat_response(&json)
    }
}

/// Pulls `choices[0].message.content` out of a chat-completions response.
fn parse_chat_response(json: &serde_json::Value) -> Result<String, GenerationError> {
    let content = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| GenerationError::new("malformed response: missing message content"))?;

    if content.trim().is_empty() {
        return Err(GenerationError::new("empty response"));
    }
    Ok(content.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_first_choice() {
        let body = json!({
            "choices": [{ "message": { "role": "assistant", "content": "- point one" } }]
        });
        assert_eq!(parse_chat_response(&body).unwrap(), "- point one");
    }

    #[test]
    fn rejects_missing_or_empty_content() {
        assert!(parse_chat_response(&json!({ "choices": [] })).is_err());
        let empty = json!({ "choices": [{ "message": { "content": "  " } }] });
        assert_eq!(
            parse_chat_response(&empty).unwrap_err().to_string(),
            "generation failed: empty response"
        );
    }

    #[tokio::test]
    async fn missing_api_key_fails_per_request() {
        let config = GenerationConfig {
            api_key_env: "SYL_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..GenerationConfig::default()
        };
        let generator = OpenAiGenerator::new(&config).unwrap();
        let err = generator
            .generate(InsightKind::Summary, "text")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("SYL_TEST_KEY_THAT_IS_NEVER_SET is not set"));
    }

    #[tokio::test]
    async fn placeholder_is_deterministic() {
        let a = PlaceholderGenerator
            .generate(InsightKind::Grading, "abc")
            .await
            .unwrap();
        let b = PlaceholderGenerator
            .generate(InsightKind::Grading, "abc")
            .await
            .unwrap();
        assert_eq!(a, b);
        assert!(a.contains("Prompt key: grading"));
        assert!(a.contains("3 characters"));
    }

    #[tokio::test]
    async fn disabled_always_fails() {
        assert!(DisabledGenerator
            .generate(InsightKind::Summary, "x")
            .await
            .is_err());
    }
}
