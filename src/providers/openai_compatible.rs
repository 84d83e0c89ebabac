use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::providers::ProviderError;
use crate::traits::ModelProvider;

pub struct OpenAiCompatibleProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

/// Validate the base URL for security.
/// - HTTPS is required for remote URLs to protect API keys in transit
/// - HTTP is allowed only for localhost (local LLM servers)
fn validate_base_url(base_url: &str) -> anyhow::Result<()> {
    let parsed = reqwest::Url::parse(base_url)
        .map_err(|e| anyhow::anyhow!("Invalid base_url '{}': {}", base_url, e))?;

    let scheme = parsed.scheme();
    let host = parsed.host_str().unwrap_or("");

    match scheme {
        "https" => Ok(()),
        "http" => {
            let is_localhost =
                host == "localhost" || host == "127.0.0.1" || host == "[::1]" || host == "::1";
            if is_localhost {
                warn!(
                    "Using unencrypted HTTP for local LLM server at '{}'. \
                     API key will be transmitted in cleartext.",
                    base_url
                );
                Ok(())
            } else {
                anyhow::bail!(
                    "HTTP is not allowed for remote URLs (base_url: '{}'). \
                     Use HTTPS to protect your API key in transit.",
                    base_url
                )
            }
        }
        _ => anyhow::bail!(
            "Unsupported URL scheme '{}' in base_url '{}'. Only http and https are allowed.",
            scheme,
            base_url
        ),
    }
}

impl OpenAiCompatibleProvider {
    pub fn new(base_url: &str, api_key: &str, timeout_secs: u64) -> anyhow::Result<Self> {
        validate_base_url(base_url)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl ModelProvider for OpenAiCompatibleProvider {
    async fn complete(&self, model: &str, system: &str, prompt: &str) -> anyhow::Result<String> {
        let body = json!({
            "model": model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt},
            ],
        });

        let url = format!("{}/chat/completions", self.base_url);
        info!(model, url = %url, "Calling LLM API");

        let resp = match self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                error!("HTTP request failed: {}", e);
                return Err(ProviderError::network(&e).into());
            }
        };

        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            error!(status = %status, "Provider API error: {}", crate::utils::truncate_str(&text, 300));
            return Err(ProviderError::from_status(status.as_u16(), &text).into());
        }

        let parsed: Value = serde_json::from_str(&text)
            .map_err(|e| anyhow::anyhow!("Provider returned non-JSON body: {}", e))?;
        let content = parsed["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        debug!(chars = content.len(), "LLM response received");
        if content.is_empty() {
            anyhow::bail!("Provider returned an empty completion");
        }
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn https_urls_allowed() {
        assert!(validate_base_url("https://api.openai.com/v1").is_ok());
    }

    #[test]
    fn http_allowed_only_for_localhost() {
        assert!(validate_base_url("http://localhost:11434/v1").is_ok());
        assert!(validate_base_url("http://127.0.0.1:8000/v1").is_ok());
        assert!(validate_base_url("http://example.com/v1").is_err());
    }

    #[test]
    fn other_schemes_rejected() {
        assert!(validate_base_url("ftp://example.com").is_err());
    }
}
