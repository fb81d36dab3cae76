//! Analysis backend clients: OpenAI (low-cost) and Anthropic
//! (high-cost) chat completions over plain HTTP.
//!
//! Both speak the same classification contract: a tight system prompt
//! asking for a single JSON object with category, urgency, rationale
//! and keywords. Malformed output surfaces as
//! `BackendError::InvalidResponse` so the router can retry or fall
//! back.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::analysis::{AnalysisBackend, AnalysisResult, Category, UrgencyHint};
use crate::error::BackendError;
use crate::source::RawMessage;

/// Max completion tokens for the low-cost classify call.
const LOW_COST_MAX_TOKENS: u32 = 300;

/// Max completion tokens for the high-cost classify call.
const HIGH_COST_MAX_TOKENS: u32 = 500;

/// Temperature for classification (deterministic-ish).
const CLASSIFY_TEMPERATURE: f32 = 0.1;

/// Flat per-call cost estimate for the low-cost backend, in dollars.
const OPENAI_CALL_COST: Decimal = dec!(0.001);

/// Flat per-call cost estimate for the high-cost backend, in dollars.
const ANTHROPIC_CALL_COST: Decimal = dec!(0.01);

/// Message text is truncated to this many chars in the prompt.
const PROMPT_TEXT_LIMIT: usize = 1000;

/// Keywords taken from a classifier response, at most.
const MAX_KEYWORDS: usize = 8;

const OPENAI_API_URL: &str = "https://api.openai.com/v1";
const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

// ── OpenAI backend (low-cost) ───────────────────────────────────────

/// Low-cost classification backend over the OpenAI chat-completions API.
pub struct OpenAiBackend {
    api_key: SecretString,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiBackend {
    pub fn new(api_key: SecretString, model: impl Into<String>) -> Self {
        Self {
            api_key,
            model: model.into(),
            base_url: OPENAI_API_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Builder: override the API base URL (used by tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl AnalysisBackend for OpenAiBackend {
    fn id(&self) -> &str {
        "openai"
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn estimated_cost_per_call(&self) -> Decimal {
        OPENAI_CALL_COST
    }

    async fn classify(&self, message: &RawMessage) -> Result<AnalysisResult, BackendError> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": CLASSIFY_TEMPERATURE,
            "max_tokens": LOW_COST_MAX_TOKENS,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": build_system_prompt()},
                {"role": "user", "content": build_user_prompt(message)},
            ],
        });

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::RequestFailed {
                backend: "openai".into(),
                reason: e.to_string(),
            })?;

        let resp = check_status("openai", resp).await?;
        let payload: serde_json::Value =
            resp.json().await.map_err(|e| BackendError::InvalidResponse {
                backend: "openai".into(),
                reason: format!("body was not JSON: {e}"),
            })?;

        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| BackendError::InvalidResponse {
                backend: "openai".into(),
                reason: "missing choices[0].message.content".into(),
            })?;

        parse_classification(content, self.id())
    }
}

// ── Anthropic backend (high-cost) ───────────────────────────────────

/// High-cost classification backend over the Anthropic messages API.
pub struct AnthropicBackend {
    api_key: SecretString,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl AnthropicBackend {
    pub fn new(api_key: SecretString, model: impl Into<String>) -> Self {
        Self {
            api_key,
            model: model.into(),
            base_url: ANTHROPIC_API_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Builder: override the API base URL (used by tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl AnalysisBackend for AnthropicBackend {
    fn id(&self) -> &str {
        "anthropic"
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn estimated_cost_per_call(&self) -> Decimal {
        ANTHROPIC_CALL_COST
    }

    async fn classify(&self, message: &RawMessage) -> Result<AnalysisResult, BackendError> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": CLASSIFY_TEMPERATURE,
            "max_tokens": HIGH_COST_MAX_TOKENS,
            "system": build_system_prompt(),
            "messages": [
                {"role": "user", "content": build_user_prompt(message)},
            ],
        });

        let resp = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::RequestFailed {
                backend: "anthropic".into(),
                reason: e.to_string(),
            })?;

        let resp = check_status("anthropic", resp).await?;
        let payload: serde_json::Value =
            resp.json().await.map_err(|e| BackendError::InvalidResponse {
                backend: "anthropic".into(),
                reason: format!("body was not JSON: {e}"),
            })?;

        let content = payload["content"][0]["text"]
            .as_str()
            .ok_or_else(|| BackendError::InvalidResponse {
                backend: "anthropic".into(),
                reason: "missing content[0].text".into(),
            })?;

        parse_classification(content, self.id())
    }
}

/// Maps non-success HTTP statuses onto backend errors.
async fn check_status(
    backend: &str,
    resp: reqwest::Response,
) -> Result<reqwest::Response, BackendError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(BackendError::AuthFailed {
            backend: backend.into(),
        });
    }
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .map(std::time::Duration::from_secs);
        return Err(BackendError::RateLimited {
            backend: backend.into(),
            retry_after,
        });
    }
    let detail = resp.text().await.unwrap_or_default();
    Err(BackendError::RequestFailed {
        backend: backend.into(),
        reason: format!("HTTP {status}: {detail}"),
    })
}

// ── Prompt construction ─────────────────────────────────────────────

/// Build the classification system prompt, shared by both backends.
fn build_system_prompt() -> String {
    "You are a message triage classifier for a busy professional. Classify one workplace message.\n\n\
     Categories:\n\
     - \"informational\": FYI content, no response expected.\n\
     - \"question\": the user is being asked something.\n\
     - \"action_required\": the user is expected to do something.\n\
     - \"decision_needed\": the user is expected to choose or approve.\n\n\
     Urgency: one of \"low\", \"moderate\", \"high\", \"critical\".\n\n\
     Respond with ONLY a JSON object:\n\
     {\"category\": \"...\", \"urgency\": \"...\", \"rationale\": \"...\", \"keywords\": [\"...\"]}\n\n\
     Rules:\n\
     - rationale: one sentence, why this category and urgency\n\
     - keywords: up to 5 lowercase terms that drove the classification\n\
     - Judge urgency from the text itself, not the sender\n\
     - When torn between two categories, pick the one demanding more of the user"
        .to_string()
}

/// Build the per-message user prompt from the raw message and its
/// context metadata.
fn build_user_prompt(message: &RawMessage) -> String {
    let mut prompt = String::with_capacity(512);

    prompt.push_str(&format!("Kind: {}\n", message.kind.label()));
    prompt.push_str(&format!("Channel: {}\n", message.channel_name));
    prompt.push_str(&format!("From: {}\n", message.sender_name));
    if message.thread_root.is_some() {
        prompt.push_str("In thread: yes\n");
    }
    prompt.push_str(&format!(
        "Posted: {}\n",
        message.timestamp.format("%Y-%m-%d %H:%M UTC")
    ));

    let preview: String = message.text.chars().take(PROMPT_TEXT_LIMIT).collect();
    prompt.push_str(&format!("\nMessage:\n{preview}"));

    prompt
}

// ── Response parsing ────────────────────────────────────────────────

/// Classifier response structure.
#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    category: Category,
    urgency: UrgencyHint,
    #[serde(default)]
    rationale: String,
    #[serde(default)]
    keywords: Vec<String>,
}

/// Parse a classifier completion into an `AnalysisResult`.
fn parse_classification(raw: &str, backend: &str) -> Result<AnalysisResult, BackendError> {
    let json_str = extract_json_object(raw);
    let response: ClassifyResponse =
        serde_json::from_str(&json_str).map_err(|e| BackendError::InvalidResponse {
            backend: backend.into(),
            reason: format!("JSON parse error: {e}"),
        })?;

    // "unknown" is reserved for the degraded fallback path.
    if response.category == Category::Unknown {
        return Err(BackendError::InvalidResponse {
            backend: backend.into(),
            reason: "classifier returned reserved category 'unknown'".into(),
        });
    }

    let keywords: Vec<String> = response
        .keywords
        .into_iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .take(MAX_KEYWORDS)
        .collect();

    Ok(AnalysisResult {
        category: response.category,
        urgency: response.urgency,
        rationale: if response.rationale.is_empty() {
            "no rationale provided".into()
        } else {
            response.rationale
        },
        keywords,
        backend: backend.to_string(),
        degraded: false,
    })
}

/// Extract a JSON object from model output (handles markdown wrapping).
fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    // Already a JSON object
    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    // Wrapped in a markdown code block
    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    // Fall back to outermost object bounds
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::source::MessageKind;

    fn make_message(text: &str) -> RawMessage {
        RawMessage {
            id: "1700000000.000100".into(),
            sender_id: "U02ALICE".into(),
            sender_name: "alice".into(),
            channel_id: "C01GENERAL".into(),
            channel_name: "general".into(),
            text: text.into(),
            timestamp: Utc::now(),
            thread_root: None,
            kind: MessageKind::ChannelPost,
            thread_engaged: false,
            permalink: None,
        }
    }

    // ── Prompt construction tests ───────────────────────────────────

    #[test]
    fn system_prompt_names_all_categories() {
        let prompt = build_system_prompt();
        assert!(prompt.contains("informational"));
        assert!(prompt.contains("question"));
        assert!(prompt.contains("action_required"));
        assert!(prompt.contains("decision_needed"));
        assert!(prompt.contains("critical"));
    }

    #[test]
    fn user_prompt_includes_metadata() {
        let mut msg = make_message("Can you approve the budget today?");
        msg.thread_root = Some("1699999999.000001".into());
        let prompt = build_user_prompt(&msg);
        assert!(prompt.contains("Kind: channel"));
        assert!(prompt.contains("Channel: general"));
        assert!(prompt.contains("From: alice"));
        assert!(prompt.contains("In thread: yes"));
        assert!(prompt.contains("Can you approve the budget today?"));
    }

    #[test]
    fn user_prompt_truncates_long_text() {
        let long = "x".repeat(5000);
        let prompt = build_user_prompt(&make_message(&long));
        assert!(prompt.len() < 1200);
    }

    // ── Parsing tests ───────────────────────────────────────────────

    #[test]
    fn parses_plain_json_classification() {
        let raw = r#"{"category": "action_required", "urgency": "high",
                      "rationale": "Asks for a review before EOD",
                      "keywords": ["Review", "EOD"]}"#;
        let result = parse_classification(raw, "openai").unwrap();
        assert_eq!(result.category, Category::ActionRequired);
        assert_eq!(result.urgency, UrgencyHint::High);
        assert_eq!(result.keywords, vec!["review".to_string(), "eod".to_string()]);
        assert_eq!(result.backend, "openai");
        assert!(!result.degraded);
    }

    #[test]
    fn parses_markdown_wrapped_classification() {
        let raw = "Here is the classification:\n```json\n{\"category\": \"question\", \"urgency\": \"moderate\", \"rationale\": \"direct question\"}\n```";
        let result = parse_classification(raw, "anthropic").unwrap();
        assert_eq!(result.category, Category::Question);
        assert_eq!(result.urgency, UrgencyHint::Moderate);
    }

    #[test]
    fn parses_object_embedded_in_prose() {
        let raw = "Sure! {\"category\": \"informational\", \"urgency\": \"low\", \"rationale\": \"status update\"} Hope that helps.";
        let result = parse_classification(raw, "openai").unwrap();
        assert_eq!(result.category, Category::Informational);
    }

    #[test]
    fn rejects_missing_category() {
        let raw = r#"{"urgency": "low", "rationale": "?"}"#;
        assert!(matches!(
            parse_classification(raw, "openai"),
            Err(BackendError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn rejects_unrecognized_category() {
        let raw = r#"{"category": "gossip", "urgency": "low", "rationale": "?"}"#;
        assert!(parse_classification(raw, "openai").is_err());
    }

    #[test]
    fn rejects_reserved_unknown_category() {
        let raw = r#"{"category": "unknown", "urgency": "low", "rationale": "?"}"#;
        assert!(matches!(
            parse_classification(raw, "openai"),
            Err(BackendError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn rejects_non_json_output() {
        assert!(parse_classification("I could not classify this.", "openai").is_err());
    }

    #[test]
    fn empty_rationale_gets_placeholder() {
        let raw = r#"{"category": "question", "urgency": "low"}"#;
        let result = parse_classification(raw, "openai").unwrap();
        assert_eq!(result.rationale, "no rationale provided");
    }

    // ── HTTP contract tests ─────────────────────────────────────────

    fn chat_completion_body(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": content}}]
        })
    }

    #[tokio::test]
    async fn openai_classify_happy_path() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion_body(
                r#"{"category": "decision_needed", "urgency": "critical",
                    "rationale": "Approval blocks the release",
                    "keywords": ["approval", "release"]}"#,
            )))
            .mount(&server)
            .await;

        let backend = OpenAiBackend::new(SecretString::from("test-key".to_string()), "gpt-4o-mini")
            .with_base_url(server.uri());
        let result = backend
            .classify(&make_message("Need your approval to ship the release"))
            .await
            .unwrap();
        assert_eq!(result.category, Category::DecisionNeeded);
        assert_eq!(result.urgency, UrgencyHint::Critical);
        assert_eq!(result.backend, "openai");
    }

    #[tokio::test]
    async fn openai_server_error_maps_to_request_failed() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let backend = OpenAiBackend::new(SecretString::from("test-key".to_string()), "gpt-4o-mini")
            .with_base_url(server.uri());
        let err = backend
            .classify(&make_message("anything"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::RequestFailed { .. }));
    }

    #[tokio::test]
    async fn openai_unauthorized_maps_to_auth_failed() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let backend = OpenAiBackend::new(SecretString::from("bad-key".to_string()), "gpt-4o-mini")
            .with_base_url(server.uri());
        let err = backend
            .classify(&make_message("anything"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::AuthFailed { .. }));
    }

    #[tokio::test]
    async fn anthropic_classify_happy_path() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{"type": "text", "text":
                    "{\"category\": \"action_required\", \"urgency\": \"high\", \"rationale\": \"deadline work\", \"keywords\": [\"deadline\"]}"
                }]
            })))
            .mount(&server)
            .await;

        let backend = AnthropicBackend::new(
            SecretString::from("test-key".to_string()),
            "claude-3-5-sonnet-latest",
        )
        .with_base_url(server.uri());
        let result = backend
            .classify(&make_message("The deadline moved to Friday, please replan"))
            .await
            .unwrap();
        assert_eq!(result.category, Category::ActionRequired);
        assert_eq!(result.backend, "anthropic");
        assert_eq!(result.keywords, vec!["deadline".to_string()]);
    }

    #[tokio::test]
    async fn anthropic_malformed_completion_is_invalid_response() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{"type": "text", "text": "cannot classify, sorry"}]
            })))
            .mount(&server)
            .await;

        let backend = AnthropicBackend::new(
            SecretString::from("test-key".to_string()),
            "claude-3-5-sonnet-latest",
        )
        .with_base_url(server.uri());
        let err = backend
            .classify(&make_message("anything"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::InvalidResponse { .. }));
    }

    #[test]
    fn backend_cost_estimates_differ() {
        let low = OpenAiBackend::new(SecretString::from("k".to_string()), "gpt-4o-mini");
        let high = AnthropicBackend::new(SecretString::from("k".to_string()), "claude-3-5-sonnet-latest");
        assert!(low.estimated_cost_per_call() < high.estimated_cost_per_call());
    }
}
