use reqwest::Client;
use tracing::debug;

use crate::config::CredentialsConfig;
use crate::error::PipelineError;

/// Reads the short-lived bearer token and session cookie from their remote
/// text files. Every call goes to the network; nothing is cached.
#[derive(Clone)]
pub struct CredentialFetcher {
    client: Client,
    token_url: String,
    cookie_url: String,
}

impl CredentialFetcher {
    pub fn new(client: Client, config: &CredentialsConfig) -> Self {
        Self {
            client,
            token_url: config.token_url.clone(),
            cookie_url: config.cookie_url.clone(),
        }
    }

    pub async fn token(&self) -> Result<String, PipelineError> {
        self.fetch("token", &self.token_url).await
    }

    pub async fn cookie(&self) -> Result<String, PipelineError> {
        self.fetch("cookie", &self.cookie_url).await
    }

    async fn fetch(&self, what: &'static str, url: &str) -> Result<String, PipelineError> {
        let fail = |reason: String| PipelineError::CredentialFetch { what, reason };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(fail(format!("status {}", status.as_u16())));
        }
        let body = response.text().await.map_err(|e| fail(e.to_string()))?;

        let value = clean(&body);
        if value.is_empty() {
            return Err(fail("empty response".to_string()));
        }
        debug!("{what} fetched successfully");
        Ok(value)
    }
}

/// Trims the value and drops every line break inside it.
fn clean(raw: &str) -> String {
    raw.trim().replace(['\r', '\n'], "")
}
