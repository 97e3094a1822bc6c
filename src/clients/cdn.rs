//! Signed raw uploads to the report CDN.
//!
//! Requests are signed the Cloudinary way: the signed parameters are sorted
//! by name, joined as `k=v&k=v`, suffixed with the API secret and hashed with
//! SHA-256.

use reqwest::Client;
use reqwest::multipart::{Form, Part};
use sha2::{Digest, Sha256};
use tracing::info;

use super::error_field;
use super::types::CdnUploadResponse;
use crate::config::CdnConfig;
use crate::error::PipelineError;

#[derive(Clone)]
pub struct CdnClient {
    client: Client,
    upload_url: String,
    api_key: String,
    api_secret: String,
    folder: String,
}

impl CdnClient {
    pub fn new(client: Client, config: &CdnConfig) -> Self {
        Self {
            client,
            upload_url: format!(
                "{}/{}/raw/upload",
                config.base_url.trim_end_matches('/'),
                config.cloud_name
            ),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            folder: config.folder.clone(),
        }
    }

    /// Uploads `bytes` as a raw resource and returns its `secure_url`.
    pub async fn upload_raw(&self, public_id: &str, bytes: Vec<u8>) -> Result<String, PipelineError> {
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = sign(
            &[
                ("folder", self.folder.as_str()),
                ("public_id", public_id),
                ("timestamp", timestamp.as_str()),
            ],
            &self.api_secret,
        );
        let file_name = public_id.rsplit('/').next().unwrap_or(public_id).to_string();

        let form = Form::new()
            .part("file", Part::bytes(bytes).file_name(file_name))
            .text("public_id", public_id.to_string())
            .text("folder", self.folder.clone())
            .text("timestamp", timestamp)
            .text("api_key", self.api_key.clone())
            .text("signature_algorithm", "sha256")
            .text("signature", signature);

        let response = self
            .client
            .post(&self.upload_url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| PipelineError::Upload(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PipelineError::Upload(e.to_string()))?;
        if !status.is_success() {
            let message = error_field(&body).unwrap_or_else(|| format!("status {}", status.as_u16()));
            return Err(PipelineError::Upload(message));
        }

        let parsed: CdnUploadResponse =
            serde_json::from_str(&body).map_err(|e| PipelineError::Upload(e.to_string()))?;
        let url = parsed
            .secure_url
            .filter(|url| !url.is_empty())
            .ok_or_else(|| PipelineError::Upload("response has no secure_url".to_string()))?;
        info!(url = %url, "CDN upload successful");
        Ok(url)
    }
}

fn sign(params: &[(&str, &str)], secret: &str) -> String {
    let mut sorted = params.to_vec();
    sorted.sort_by_key(|(name, _)| *name);
    let joined = sorted
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}
