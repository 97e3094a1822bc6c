use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use super::rejection;
use super::types::AnalysisRequest;
use crate::error::SubmissionError;
use crate::extract::{JOB_ID_FIELDS, first_field};

const SERVICE: &str = "analysis";

/// Client for the deep-check endpoint that starts an analysis job.
#[derive(Clone)]
pub struct AnalysisClient {
    client: Client,
    url: String,
}

impl AnalysisClient {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    /// Submits `file_url` for analysis on behalf of `uid`, authenticated by
    /// the session `cookie`. Returns the job identifier when the service
    /// handed one out.
    pub async fn submit(
        &self,
        cookie: &str,
        uid: &str,
        file_url: &str,
    ) -> Result<Option<String>, SubmissionError> {
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::COOKIE, cookie)
            .json(&AnalysisRequest { uid, file_url })
            .send()
            .await
            .map_err(|source| SubmissionError::Transport {
                service: SERVICE,
                source,
            })?;

        if !response.status().is_success() {
            return Err(rejection(SERVICE, response).await);
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| SubmissionError::MalformedResponse {
                service: SERVICE,
                reason: e.to_string(),
            })?;
        debug!(response = %body, "Analysis response");

        Ok(first_field(&body, JOB_ID_FIELDS))
    }
}
