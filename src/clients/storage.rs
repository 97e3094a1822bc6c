use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Url};
use serde_json::Value;
use tracing::debug;

use super::rejection;
use super::types::{JobRecord, StoredObject};
use crate::config::StorageConfig;
use crate::error::SubmissionError;
use crate::extract::{STORAGE_KEY_FIELDS, first_field};

const SERVICE: &str = "storage";

/// Error code storage returns for object keys it cannot accept.
const INVALID_KEY: &str = "InvalidKey";

/// Object storage plus the `checks_history` table of the same project.
#[derive(Clone)]
pub struct StorageClient {
    client: Client,
    base_url: String,
    api_key: String,
    workflow_id: String,
}

impl StorageClient {
    pub fn new(client: Client, config: &StorageConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            workflow_id: config.workflow_id.clone(),
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    fn authorized(&self, request: RequestBuilder, token: &str) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .header(reqwest::header::AUTHORIZATION, token)
    }

    fn url(&self, segments: &[&str]) -> Result<Url, SubmissionError> {
        let invalid = |reason: String| SubmissionError::InvalidUrl {
            service: SERVICE,
            reason,
        };
        let mut url = Url::parse(&self.base_url).map_err(|e| invalid(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| invalid(format!("{} cannot be a base", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Uploads `bytes` as `files/<workflow_id>/<file_name>` and returns where
    /// it can be fetched publicly.
    pub async fn upload(
        &self,
        token: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<StoredObject, SubmissionError> {
        let url = self.url(&[
            "storage",
            "v1",
            "object",
            "files",
            self.workflow_id.as_str(),
            file_name,
        ])?;
        let form = Form::new().part("file", Part::bytes(bytes).file_name(file_name.to_string()));

        let response = self
            .authorized(self.client.post(url), token)
            .multipart(form)
            .send()
            .await
            .map_err(|source| SubmissionError::Transport {
                service: SERVICE,
                source,
            })?;

        if !response.status().is_success() {
            return Err(match rejection(SERVICE, response).await {
                SubmissionError::Rejected {
                    message: Some(code),
                    ..
                } if code == INVALID_KEY => SubmissionError::InvalidKey,
                other => other,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| SubmissionError::MalformedResponse {
                service: SERVICE,
                reason: e.to_string(),
            })?;
        debug!(response = %body, "Storage upload response");

        let key = first_field(&body, STORAGE_KEY_FIELDS).unwrap_or_else(|| file_name.to_string());
        let public_url = format!("{}/storage/v1/object/public/{}", self.base_url, key);
        Ok(StoredObject { key, public_url })
    }

    /// Looks up the analysis job. `Ok(None)` means the row does not exist yet.
    pub async fn job_status(
        &self,
        token: &str,
        job_id: &str,
    ) -> Result<Option<JobRecord>, SubmissionError> {
        let url = self.url(&["rest", "v1", "checks_history"])?;
        let response = self
            .authorized(self.client.get(url), token)
            .query(&[("id", format!("eq.{job_id}"))])
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

        let row = match body {
            Value::Array(rows) => rows.into_iter().next(),
            object @ Value::Object(_) => Some(object),
            _ => None,
        };
        row.map(serde_json::from_value::<JobRecord>)
            .transpose()
            .map_err(|e| SubmissionError::MalformedResponse {
                service: SERVICE,
                reason: e.to_string(),
            })
    }
}
