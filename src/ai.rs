//! External analysis client: provider abstraction and implementations.
//!
//! Defines the [`AiProvider`] trait and concrete implementations:
//! - [`DisabledProvider`] returns errors; used when no AI service is configured.
//! - [`ChatProvider`] calls an OpenAI-compatible chat-completions endpoint
//!   (GLM or OpenAI) with retry and exponential backoff.
//!
//! [`AnalysisClient`] layers the compliance-specific operations on top of the
//! raw `invoke` call: TOS interpretation, direct-from-name analysis, TOS URL
//! search, alternative-tool suggestions, and per-dimension score hints.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) → retry with delay `base_delay × backoff_factor^attempt`
//! - Timeout or connect error → same backoff
//! - Any other failure → fail immediately
//! - Exhausting `retry.max_attempts` surfaces the last error to the caller
//!
//! # Response Parsing
//!
//! The remote service returns free text that may embed JSON in a fenced code
//! block. [`extract_payload`] degrades softly: fenced block → brace substring →
//! raw text tagged as non-JSON. It never fails, so downstream consumers always
//! receive something they can handle.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{mask_secret, AiConfig, ProviderConfig, RetryConfig};
use crate::models::{AlternativeTool, TosAnalysis};

/// Longest TOS excerpt forwarded to the model.
const TOS_PREVIEW_CHARS: usize = 5000;

/// A remote AI service reachable through a single prompt-in, text-out call.
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Provider label for logs (e.g. `"glm"`).
    fn name(&self) -> &str;

    /// Send one prompt and return the raw reply text.
    async fn invoke(&self, system: &str, prompt: &str) -> Result<String>;
}

// ============ Disabled Provider ============

/// A no-op provider that always returns errors.
///
/// Used when `ai.provider = "disabled"`. Every pipeline stage that calls
/// the AI then falls through to its degraded path (knowledge-base fallback,
/// empty analysis), which keeps scans usable offline.
pub struct DisabledProvider;

#[async_trait]
impl AiProvider for DisabledProvider {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn invoke(&self, _system: &str, _prompt: &str) -> Result<String> {
        bail!("AI provider is disabled")
    }
}

// ============ Chat-completions Provider ============

/// Provider speaking the OpenAI-compatible `POST /chat/completions` wire
/// format. Both supported services (GLM, OpenAI) use it.
pub struct ChatProvider {
    label: String,
    config: ProviderConfig,
    retry: RetryConfig,
    client: reqwest::Client,
}

impl ChatProvider {
    pub fn new(label: &str, config: ProviderConfig, retry: RetryConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            bail!("ai.{}.api_key is not configured", label);
        }
        if config.api_base.is_empty() {
            bail!("ai.{}.api_base is not configured", label);
        }
        if config.model.is_empty() {
            bail!("ai.{}.model is not configured", label);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        debug!(
            provider = label,
            api_base = %config.api_base,
            model = %config.model,
            api_key = %mask_secret(&config.api_key),
            "chat provider ready"
        );

        Ok(Self {
            label: label.to_string(),
            config,
            retry,
            client,
        })
    }
}

#[async_trait]
impl AiProvider for ChatProvider {
    fn name(&self) -> &str {
        &self.label
    }

    async fn invoke(&self, system: &str, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.config.api_base);
        let body = serde_json::json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt},
            ],
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        });

        let mut last_err = None;

        for attempt in 0..self.retry.max_attempts {
            if attempt > 0 {
                let delay = self.retry.base_delay_secs
                    * u64::from(self.retry.backoff_factor).pow(attempt - 1);
                warn!(
                    provider = %self.label,
                    attempt,
                    delay_secs = delay,
                    "retrying AI call after transient failure"
                );
                tokio::time::sleep(Duration::from_secs(delay)).await;
            }

            let resp = self
                .client
                .post(&url)
                .bearer_auth(&self.config.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: Value = response.json().await?;
                        return extract_message_content(&json);
                    }

                    if status.as_u16() == 429 {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!(
                            "{} API rate limited (429): {}",
                            self.label,
                            body_text
                        ));
                        continue;
                    }

                    // Any other HTTP error is not retryable
                    let body_text = response.text().await.unwrap_or_default();
                    bail!("{} API error {}: {}", self.label, status, body_text);
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    last_err = Some(e.into());
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(last_err
            .unwrap_or_else(|| anyhow::anyhow!("{} API call failed after retries", self.label)))
    }
}

/// Pull `choices[0].message.content` out of a chat-completions reply.
fn extract_message_content(json: &Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("AI reply missing choices[0].message.content"))
}

/// Create the provider named in the configuration.
///
/// Unknown names and unconfigured glm/openai credentials fail here, at
/// construction, not at the first call.
pub fn create_provider(ai: &AiConfig, retry: &RetryConfig) -> Result<Box<dyn AiProvider>> {
    match ai.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "glm" => {
            let mut cfg = ai.glm.clone();
            if cfg.api_base.is_empty() {
                cfg.api_base = "https://open.bigmodel.cn/api/paas/v4".to_string();
            }
            if cfg.model.is_empty() {
                cfg.model = "glm-4".to_string();
            }
            Ok(Box::new(ChatProvider::new("glm", cfg, retry.clone())?))
        }
        "openai" => {
            let mut cfg = ai.openai.clone();
            if cfg.api_base.is_empty() {
                cfg.api_base = "https://api.openai.com/v1".to_string();
            }
            if cfg.model.is_empty() {
                cfg.model = "gpt-4".to_string();
            }
            Ok(Box::new(ChatProvider::new("openai", cfg, retry.clone())?))
        }
        other => bail!("Unknown AI provider: {}", other),
    }
}

// ============ Response extraction ============

/// The result of pulling a payload out of free-form AI reply text.
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted {
    /// A JSON object or array was found and parsed.
    Structured(Value),
    /// No parseable JSON anywhere; the raw reply is preserved.
    RawText(String),
}

/// Three-stage soft-degrading extraction:
/// fenced code block → first-`{`-to-last-`}` substring → raw text.
pub fn extract_payload(text: &str) -> Extracted {
    // Stage 1: fenced code blocks, tagged (```json) or untagged
    let mut rest = text;
    while let Some(open) = rest.find("```") {
        let after_open = &rest[open + 3..];
        let body_start = match after_open.find('\n') {
            Some(nl) => nl + 1,
            None => break,
        };
        let body = &after_open[body_start..];
        let Some(close) = body.find("```") else {
            break;
        };
        let candidate = body[..close].trim();
        if candidate.starts_with('{') || candidate.starts_with('[') {
            if let Ok(v) = serde_json::from_str::<Value>(candidate) {
                return Extracted::Structured(v);
            }
        }
        rest = &body[close + 3..];
    }

    // Stage 2: outermost brace span
    if let (Some(first), Some(last)) = (text.find('{'), text.rfind('}')) {
        if first < last {
            if let Ok(v) = serde_json::from_str::<Value>(&text[first..=last]) {
                return Extracted::Structured(v);
            }
        }
    }

    // Stage 3: keep the raw reply rather than failing
    Extracted::RawText(text.to_string())
}

/// Scan the reply for the first http(s) URL.
fn extract_url(text: &str) -> Option<String> {
    for scheme in ["https://", "http://"] {
        if let Some(start) = text.find(scheme) {
            let tail = &text[start..];
            let end = tail
                .find(|c: char| {
                    c.is_whitespace() || matches!(c, '<' | '>' | '"' | '{' | '}' | '|' | '\\' | '^' | '`' | '[' | ']')
                })
                .unwrap_or(tail.len());
            let url = tail[..end].trim_end_matches(['.', ',', ')', ';']);
            if url.len() > scheme.len() {
                return Some(url.to_string());
            }
        }
    }
    None
}

pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

// ============ Analysis client ============

/// High-level compliance operations over an [`AiProvider`].
pub struct AnalysisClient {
    provider: Box<dyn AiProvider>,
}

const ANALYST_SYSTEM: &str =
    "You are a professional legal and software-compliance analyst. Answer with a single JSON object.";
const SEARCH_SYSTEM: &str = "You are a web search assistant.";

impl AnalysisClient {
    pub fn new(provider: Box<dyn AiProvider>) -> Self {
        Self { provider }
    }

    pub fn from_config(ai: &AiConfig, retry: &RetryConfig) -> Result<Self> {
        Ok(Self::new(create_provider(ai, retry)?))
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Interpret a TOS document. Soft-degrades to a text-tagged result when
    /// the reply is not parseable JSON; fails only when the call itself fails.
    pub async fn analyze_tos(&self, tool_name: &str, tos_text: &str) -> Result<TosAnalysis> {
        let preview = truncate_chars(tos_text, TOS_PREVIEW_CHARS);
        let prompt = format!(
            "Analyze the terms of service of the tool \"{tool_name}\" and identify compliance \
             risks for commercial users.\n\nTOS excerpt:\n{preview}\n\n{}",
            analysis_schema_instructions()
        );

        let reply = self.provider.invoke(ANALYST_SYSTEM, &prompt).await?;
        Ok(match extract_payload(&reply) {
            Extracted::Structured(v) => TosAnalysis::from_value(&v),
            Extracted::RawText(raw) => {
                warn!(tool = tool_name, "TOS analysis reply was not JSON, keeping raw text");
                TosAnalysis::from_raw_text(raw)
            }
        })
    }

    /// Analyze a tool from its name alone, without a TOS document.
    /// Returns `None` when the reply carries no structured data.
    pub async fn analyze_directly(&self, tool_name: &str) -> Result<Option<TosAnalysis>> {
        let prompt = format!(
            "Analyze the licensing and commercial-use compliance of the tool \"{tool_name}\" \
             from public knowledge: license type and mode, owning company and country, whether \
             commercial users must purchase a license, and 1-2 replacement suggestions \
             (prefer free open-source options).\n\n{}",
            analysis_schema_instructions()
        );

        let reply = self.provider.invoke(ANALYST_SYSTEM, &prompt).await?;
        match extract_payload(&reply) {
            Extracted::Structured(v) => Ok(Some(TosAnalysis::from_value(&v))),
            Extracted::RawText(_) => {
                warn!(tool = tool_name, "direct analysis reply was not JSON");
                Ok(None)
            }
        }
    }

    /// Find the official TOS (or privacy policy) URL for a tool.
    pub async fn search_tos_url(&self, tool_name: &str) -> Result<Option<String>> {
        let prompt = format!(
            "Find the official Terms of Service or Privacy Policy URL for the tool \
             \"{tool_name}\". Reply with the URL only, or NOT_FOUND if you cannot find one."
        );

        let reply = self.provider.invoke(SEARCH_SYSTEM, &prompt).await?;
        if reply.to_uppercase().contains("NOT_FOUND") {
            return Ok(None);
        }
        Ok(extract_url(&reply))
    }

    /// Suggest up to two replacement tools, independent of any TOS analysis.
    pub async fn suggest_alternatives(&self, tool_name: &str) -> Result<Vec<AlternativeTool>> {
        let prompt = format!(
            "Recommend 1-2 replacements for the tool \"{tool_name}\". Prefer free open-source \
             tools, then free commercial ones. Reply as JSON: {{\"alternative_tools\": \
             [{{\"name\", \"type\", \"license\", \"advantages\", \"use_case\"}}]}}. \
             No more than 2 entries."
        );

        let reply = self.provider.invoke(ANALYST_SYSTEM, &prompt).await?;
        match extract_payload(&reply) {
            Extracted::Structured(v) => {
                let mut alternatives = TosAnalysis::from_value(&v).alternative_tools;
                alternatives.truncate(2);
                Ok(alternatives)
            }
            Extracted::RawText(_) => {
                warn!(tool = tool_name, "alternatives reply was not JSON");
                Ok(Vec::new())
            }
        }
    }

    /// Ask for a numeric 0-100 score for one assessment dimension.
    /// Returns `None` when the reply has no usable `<dimension>_score` field.
    pub async fn dimension_score(&self, tool_name: &str, dimension: &str) -> Result<Option<f64>> {
        let prompt = format!(
            "Rate the {dimension} of the tool \"{tool_name}\" for enterprise use on a 0-100 \
             scale. Reply as JSON: {{\"{dimension}_score\": <number>, \"rationale\": \"...\"}}."
        );

        let reply = self.provider.invoke(ANALYST_SYSTEM, &prompt).await?;
        match extract_payload(&reply) {
            Extracted::Structured(v) => Ok(v
                .get(format!("{dimension}_score"))
                .and_then(|s| s.as_f64())
                .filter(|s| (0.0..=100.0).contains(s))),
            Extracted::RawText(_) => Ok(None),
        }
    }
}

/// The JSON shape every analysis prompt asks for. Shared so that TOS-based
/// and direct analysis produce the same field set.
fn analysis_schema_instructions() -> String {
    r#"Reply with one JSON object containing exactly these fields (use null when unknown):
{
    "license_type": "MIT / Apache 2.0 / GPL v3 / commercial license / ...",
    "license_version": "version string",
    "license_mode": "open source / commercial / hybrid",
    "company_name": "owning company, or null for community-run open source",
    "company_country": "country or null",
    "company_headquarters": "city or null",
    "local_presence": true/false/null,
    "commercial_license_required": true/false,
    "free_for_commercial": true/false,
    "commercial_restrictions": "restrictions for commercial users",
    "user_limit": "seat or user limits",
    "feature_restrictions": "free-vs-paid feature limits",
    "alternative_tools": [{"name": "...", "type": "open source / free commercial", "license": "...", "advantages": "...", "use_case": "..."}],
    "data_usage": "data usage terms",
    "privacy_policy": "privacy policy summary",
    "service_restrictions": "service restrictions",
    "risk_points": ["risk 1", "risk 2"],
    "compliance_notes": "free-text notes"
}
Provide at most 2 alternative_tools entries."#
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_tagged_fenced_block() {
        let text = "Here is the analysis:\n```json\n{\"license_type\": \"MIT\"}\n```\nDone.";
        match extract_payload(text) {
            Extracted::Structured(v) => assert_eq!(v["license_type"], "MIT"),
            other => panic!("expected structured, got {:?}", other),
        }
    }

    #[test]
    fn extract_untagged_fenced_block() {
        let text = "```\n[1, 2, 3]\n```";
        match extract_payload(text) {
            Extracted::Structured(v) => assert_eq!(v, serde_json::json!([1, 2, 3])),
            other => panic!("expected structured, got {:?}", other),
        }
    }

    #[test]
    fn extract_skips_invalid_fence_and_uses_brace_span() {
        let text = "```json\nnot valid json\n```\nbut inline {\"ok\": true} works";
        match extract_payload(text) {
            Extracted::Structured(v) => assert_eq!(v["ok"], true),
            other => panic!("expected structured, got {:?}", other),
        }
    }

    #[test]
    fn extract_brace_substring_without_fence() {
        let text = "The verdict is {\"free_for_commercial\": false} overall.";
        match extract_payload(text) {
            Extracted::Structured(v) => assert_eq!(v["free_for_commercial"], false),
            other => panic!("expected structured, got {:?}", other),
        }
    }

    #[test]
    fn extract_degrades_to_raw_text() {
        let text = "Sorry, I cannot analyze this document.";
        assert_eq!(extract_payload(text), Extracted::RawText(text.to_string()));
    }

    #[test]
    fn extract_url_finds_first_link() {
        let reply = "The TOS lives at https://example.com/legal/tos. Check it.";
        assert_eq!(
            extract_url(reply),
            Some("https://example.com/legal/tos".to_string())
        );
        assert_eq!(extract_url("no links here"), None);
        assert_eq!(extract_url("https://"), None);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "ab€de";
        assert_eq!(truncate_chars(s, 3), "ab€");
        assert_eq!(truncate_chars(s, 99), s);
    }

    #[tokio::test]
    async fn disabled_provider_always_errors() {
        let client = AnalysisClient::new(Box::new(DisabledProvider));
        assert!(client.analyze_tos("Postman", "some tos").await.is_err());
        assert!(client.search_tos_url("Postman").await.is_err());
    }

    #[test]
    fn unknown_provider_fails_at_construction() {
        let mut ai = AiConfig::default();
        ai.provider = "watson".to_string();
        assert!(create_provider(&ai, &RetryConfig::default()).is_err());
    }

    #[test]
    fn glm_without_key_fails_at_construction() {
        let mut ai = AiConfig::default();
        ai.provider = "glm".to_string();
        assert!(create_provider(&ai, &RetryConfig::default()).is_err());
    }
}
