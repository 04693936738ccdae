//! Agent response generation.
//!
//! Each tenant's autoresponder is configured with an API URL and key; the
//! URL decides the wire dialect. Google-hosted endpoints speak the
//! `generateContent` shape, everything else is treated as an
//! OpenAI-compatible chat completion endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use groupdeck_core::error::{DeckError, Result};
use groupdeck_store::AgentRecord;

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(60);

/// Turns a prompt into a reply using the agent's configured endpoint.
#[async_trait]
pub trait ResponseBackend: Send + Sync {
    async fn complete(&self, agent: &AgentRecord, prompt: &str) -> Result<String>;
}

pub struct HttpBackend {
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn is_google_endpoint(url: &str) -> bool {
    url.contains("generativelanguage.googleapis.com")
}

#[async_trait]
impl ResponseBackend for HttpBackend {
    async fn complete(&self, agent: &AgentRecord, prompt: &str) -> Result<String> {
        if is_google_endpoint(&agent.api_url) {
            let mut parts = Vec::new();
            if let Some(system) = &agent.system_prompt {
                parts.push(format!("{system}\n\n"));
            }
            parts.push(prompt.to_string());
            let body = json!({
                "contents": [{ "parts": [{ "text": parts.concat() }] }],
                "generationConfig": {
                    "maxOutputTokens": agent.output_token_limit,
                    "temperature": 0.7,
                },
            });
            let url = format!("{}?key={}", agent.api_url, agent.api_key);
            let resp: Value = self
                .client
                .post(&url)
                .json(&body)
                .timeout(RESPONSE_TIMEOUT)
                .send()
                .await
                .map_err(|e| DeckError::Agent(format!("Request failed: {e}")))?
                .json()
                .await
                .map_err(|e| DeckError::Agent(format!("Bad response body: {e}")))?;
            resp["candidates"][0]["content"]["parts"][0]["text"]
                .as_str()
                .map(|s| s.trim().to_string())
                .ok_or_else(|| DeckError::Agent("Empty completion".into()))
        } else {
            let mut messages = Vec::new();
            if let Some(system) = &agent.system_prompt {
                messages.push(json!({ "role": "system", "content": system }));
            }
            messages.push(json!({ "role": "user", "content": prompt }));
            let body = json!({
                "messages": messages,
                "max_tokens": agent.output_token_limit,
                "temperature": 0.7,
            });
            let resp: Value = self
                .client
                .post(&agent.api_url)
                .bearer_auth(&agent.api_key)
                .json(&body)
                .timeout(RESPONSE_TIMEOUT)
                .send()
                .await
                .map_err(|e| DeckError::Agent(format!("Request failed: {e}")))?
                .json()
                .await
                .map_err(|e| DeckError::Agent(format!("Bad response body: {e}")))?;
            resp["choices"][0]["message"]["content"]
                .as_str()
                .map(|s| s.trim().to_string())
                .ok_or_else(|| DeckError::Agent("Empty completion".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_detection() {
        assert!(is_google_endpoint(
            "https://generativelanguage.googleapis.com/v1beta/models/x:generateContent"
        ));
        assert!(!is_google_endpoint("https://api.openai.com/v1/chat/completions"));
        assert!(!is_google_endpoint("http://localhost:8080/v1/chat/completions"));
    }
}
