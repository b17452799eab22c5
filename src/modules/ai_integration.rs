use std::sync::OnceLock;

use futures::future::BoxFuture;
use reqwest::Client;
use serde_json::{json, Value};

use crate::modules::app_state::ExportData;
use crate::modules::error::{Result, TrackerError};
use crate::modules::utils::AiProvider;

const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const OPENAI_MODEL: &str = "gpt-4";
const ANTHROPIC_MODEL: &str = "claude-3-5-sonnet-20241022";
const MAX_TOKENS: u32 = 1500;

const CONSULTANT_SYSTEM_PROMPT: &str = "You are an expert automation consultant specializing in identifying automation opportunities from user activity data.";

// Global HTTP client for LLM providers
static LLM_CLIENT: OnceLock<Client> = OnceLock::new();

pub fn get_llm_client() -> &'static Client {
    LLM_CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .pool_max_idle_per_host(1)
            .build()
            .expect("Failed to create LLM HTTP client")
    })
}

/// Text completion by a hosted LLM.
pub trait CompletionProvider: Send + Sync {
    fn complete<'a>(
        &'a self,
        provider: AiProvider,
        api_key: &'a str,
        prompt: &'a str,
    ) -> BoxFuture<'a, Result<String>>;
}

/// Talks to the provider's public HTTP API.
pub struct HttpCompletionProvider;

impl CompletionProvider for HttpCompletionProvider {
    fn complete<'a>(
        &'a self,
        provider: AiProvider,
        api_key: &'a str,
        prompt: &'a str,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            match provider {
                AiProvider::Openai => call_openai(api_key, prompt).await,
                AiProvider::Anthropic => call_anthropic(api_key, prompt).await,
                AiProvider::None => Err(TrackerError::AiNotConfigured),
            }
        })
    }
}

pub async fn call_openai(api_key: &str, prompt: &str) -> Result<String> {
    let payload = json!({
        "model": OPENAI_MODEL,
        "messages": [
            { "role": "system", "content": CONSULTANT_SYSTEM_PROMPT },
            { "role": "user", "content": prompt }
        ],
        "temperature": 0.7,
        "max_tokens": MAX_TOKENS
    });

    let response = get_llm_client()
        .post(OPENAI_URL)
        .bearer_auth(api_key)
        .json(&payload)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        log::error!("OpenAI API error {}", status);
        return Err(TrackerError::Llm(format!(
            "OpenAI API error: {}",
            status.canonical_reason().unwrap_or(status.as_str())
        )));
    }

    let result: Value = response.json().await?;
    extract_openai_text(&result)
}

pub async fn call_anthropic(api_key: &str, prompt: &str) -> Result<String> {
    let payload = json!({
        "model": ANTHROPIC_MODEL,
        "max_tokens": MAX_TOKENS,
        "messages": [
            { "role": "user", "content": prompt }
        ]
    });

    let response = get_llm_client()
        .post(ANTHROPIC_URL)
        .header("x-api-key", api_key)
        .header("anthropic-version", ANTHROPIC_VERSION)
        .json(&payload)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        log::error!("Anthropic API error {}", status);
        return Err(TrackerError::Llm(format!(
            "Anthropic API error: {}",
            status.canonical_reason().unwrap_or(status.as_str())
        )));
    }

    let result: Value = response.json().await?;
    extract_anthropic_text(&result)
}

pub fn extract_openai_text(result: &Value) -> Result<String> {
    result
        .pointer("/choices/0/message/content")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| TrackerError::Llm("No message content in OpenAI response".to_string()))
}

pub fn extract_anthropic_text(result: &Value) -> Result<String> {
    result
        .pointer("/content/0/text")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| TrackerError::Llm("No text content in Anthropic response".to_string()))
}

/// Prompt asking for the top automation opportunities in the exported data.
pub fn build_automation_prompt(data: &ExportData) -> Result<String> {
    let patterns_json = serde_json::to_string_pretty(&data.patterns)?;

    let prompt = format!(
        r#"You are an automation consultant analyzing employee activity data to identify automation opportunities.

Activity Summary:
- Total events tracked: {}
- Detected patterns: {}

Patterns detected:
{}

Based on this activity data, please:
1. Identify the top 3-5 automation opportunities
2. For each opportunity, explain:
   - What task is being repeated
   - Why it's a good automation candidate
   - Suggested automation approach (RPA, API integration, browser automation, etc.)
   - Estimated time savings
3. Prioritize by impact (time saved × frequency)

Format your response in clear, actionable bullet points."#,
        data.activities.len(),
        data.patterns.len(),
        patterns_json
    );

    Ok(prompt)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::pattern_analyzer::{Pattern, PatternKind, Severity};

    #[test]
    fn openai_text_location() {
        let body = json!({"choices": [{"message": {"role": "assistant", "content": "Use an API"}}]});
        assert_eq!(extract_openai_text(&body).unwrap(), "Use an API");
        assert!(matches!(extract_openai_text(&json!({"choices": []})), Err(TrackerError::Llm(_))));
    }

    #[test]
    fn anthropic_text_location() {
        let body = json!({"content": [{"type": "text", "text": "Record a macro"}]});
        assert_eq!(extract_anthropic_text(&body).unwrap(), "Record a macro");
        assert!(extract_anthropic_text(&json!({"error": "x"})).is_err());
    }

    #[test]
    fn prompt_embeds_counts_and_patterns() {
        let data = ExportData {
            activities: vec![],
            patterns: vec![Pattern {
                kind: PatternKind::RepetitiveForms {
                    domain: "crm.test".to_string(),
                    count: 12,
                },
                severity: Severity::High,
                suggestion: "User submits 12 forms on crm.test".to_string(),
            }],
            screenshots: vec![],
            export_date: "2024-01-01T00:00:00Z".to_string(),
        };

        let prompt = build_automation_prompt(&data).unwrap();
        assert!(prompt.contains("- Total events tracked: 0"));
        assert!(prompt.contains("- Detected patterns: 1"));
        assert!(prompt.contains("\"domain\": \"crm.test\""));
        assert!(prompt.contains("Prioritize by impact"));
    }

    #[tokio::test]
    async fn http_provider_refuses_without_provider() {
        let result = HttpCompletionProvider.complete(AiProvider::None, "key", "prompt").await;
        assert!(matches!(result, Err(TrackerError::AiNotConfigured)));
    }
}
