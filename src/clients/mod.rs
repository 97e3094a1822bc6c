//! HTTP clients for the third-party services the pipeline talks to.

pub mod analysis;
pub mod cdn;
pub mod credentials;
pub mod storage;
pub mod types;

pub use analysis::AnalysisClient;
pub use cdn::CdnClient;
pub use credentials::CredentialFetcher;
pub use storage::StorageClient;
pub use types::{JobRecord, StoredObject};

use std::time::Duration;

use reqwest::{Client, Response};
use serde_json::Value;

use crate::error::{PipelineError, SubmissionError};

/// Shared connection pool for every outbound call.
pub fn http_client() -> reqwest::Result<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(120))
        .build()
}

/// Fetches `url` into memory, failing on transport errors and non-2xx.
pub async fn download(client: &Client, url: &str) -> Result<Vec<u8>, PipelineError> {
    let fail = |reason: String| PipelineError::Download {
        url: url.to_string(),
        reason,
    };

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| fail(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(fail(format!("status {}", status.as_u16())));
    }
    let bytes = response.bytes().await.map_err(|e| fail(e.to_string()))?;
    Ok(bytes.to_vec())
}

/// Turns a non-2xx response into [`SubmissionError::Rejected`], keeping the
/// `error` field of a JSON body as the message.
pub(crate) async fn rejection(service: &'static str, response: Response) -> SubmissionError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    SubmissionError::Rejected {
        service,
        status,
        message: error_field(&body),
    }
}

/// The `error` string of a JSON error body, if there is one.
pub(crate) fn error_field(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.get("error")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(inner) => inner
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}
