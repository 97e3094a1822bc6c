//! Report post-processing: drop the cover page of a PDF and republish it.

use std::path::{Path, PathBuf};

use reqwest::Client;
use tokio::process::Command;
use tracing::{debug, info};

use crate::clients::{CdnClient, download};
use crate::config::ArtifactsConfig;
use crate::error::PipelineError;

/// Downloads a report, strips its first page with an external tool and
/// uploads the result to the CDN.
#[derive(Clone)]
pub struct ArtifactProcessor {
    client: Client,
    cdn: CdnClient,
    page_tool: PathBuf,
    temp_root: PathBuf,
}

fn megabytes(len: u64) -> String {
    format!("{:.2}MB", len as f64 / 1024.0 / 1024.0)
}

impl ArtifactProcessor {
    pub fn new(client: Client, cdn: CdnClient, config: &ArtifactsConfig) -> Self {
        Self {
            client,
            cdn,
            page_tool: config.page_tool.clone(),
            temp_root: config.temp_dir(),
        }
    }

    /// Returns the public URL of the processed copy of `document_url`.
    ///
    /// The input and output files live in a temporary directory that is
    /// removed when this returns, whether it succeeded or not.
    pub async fn process(&self, document_url: &str, label: &str) -> Result<String, PipelineError> {
        tokio::fs::create_dir_all(&self.temp_root).await?;
        let scratch = tempfile::Builder::new()
            .prefix("report-")
            .tempdir_in(&self.temp_root)?;
        let input = scratch.path().join("input.pdf");
        let output = scratch.path().join("output.pdf");

        info!(url = document_url, label, "Downloading report");
        let document = download(&self.client, document_url).await?;
        info!(size = %megabytes(document.len() as u64), "Input PDF downloaded");
        tokio::fs::write(&input, &document).await?;

        self.remove_first_page(&input, &output).await?;
        let processed = tokio::fs::read(&output).await?;
        info!(size = %megabytes(processed.len() as u64), "First page removed");

        let public_id = format!(
            "reports/{label}_{}.pdf",
            chrono::Utc::now().timestamp_millis()
        );
        self.cdn.upload_raw(&public_id, processed).await
    }

    /// `<tool> <input> <output> --pages <input> 2-z --`
    async fn remove_first_page(&self, input: &Path, output: &Path) -> Result<(), PipelineError> {
        debug!(tool = %self.page_tool.display(), "Running page removal");
        let result = Command::new(&self.page_tool)
            .arg(input)
            .arg(output)
            .arg("--pages")
            .arg(input)
            .arg("2-z")
            .arg("--")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                PipelineError::PageRemoval(format!(
                    "failed to run {}: {e}",
                    self.page_tool.display()
                ))
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(PipelineError::PageRemoval(format!(
                "{} exited with {}: {}",
                self.page_tool.display(),
                result.status,
                stderr.trim()
            )));
        }

        match tokio::fs::metadata(output).await {
            Ok(meta) if meta.len() > 0 => Ok(()),
            _ => Err(PipelineError::PageRemoval("tool produced no output".to_string())),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::CdnConfig;
    use crate::testing::{fake_page_tool, failing_page_tool};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn processor(server: &MockServer, tool: PathBuf, temp_root: &Path) -> ArtifactProcessor {
        let client = crate::clients::http_client().unwrap();
        let cdn = CdnClient::new(
            client.clone(),
            &CdnConfig {
                base_url: server.uri(),
                cloud_name: "demo".into(),
                api_key: "k".into(),
                api_secret: "s".into(),
                folder: "homework_reports".into(),
            },
        );
        let config = ArtifactsConfig {
            page_tool: tool,
            temp_dir: Some(temp_root.to_path_buf()),
        };
        ArtifactProcessor::new(client, cdn, &config)
    }

    async fn mount_report(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/report.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.7 body".to_vec()))
            .mount(server)
            .await;
    }

    fn is_empty_dir(dir: &Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn process_uploads_and_cleans_up() {
        let server = MockServer::start().await;
        mount_report(&server).await;
        Mock::given(method("POST"))
            .and(path("/demo/raw/upload"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"secure_url": "https://cdn/r.pdf"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let scratch = tempfile::tempdir().unwrap();
        let processor = processor(&server, fake_page_tool(), scratch.path());

        let url = processor
            .process(&format!("{}/report.pdf", server.uri()), "ai_report")
            .await
            .unwrap();
        assert_eq!(url, "https://cdn/r.pdf");
        assert!(is_empty_dir(scratch.path()));
    }

    #[tokio::test]
    async fn download_failure_cleans_up() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let scratch = tempfile::tempdir().unwrap();
        let processor = processor(&server, fake_page_tool(), scratch.path());

        let err = processor
            .process(&format!("{}/gone.pdf", server.uri()), "ai_report")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Download { .. }));
        assert!(is_empty_dir(scratch.path()));
    }

    #[tokio::test]
    async fn tool_failure_is_page_removal_error() {
        let server = MockServer::start().await;
        mount_report(&server).await;

        let scratch = tempfile::tempdir().unwrap();
        let processor = processor(&server, failing_page_tool(), scratch.path());

        let err = processor
            .process(&format!("{}/report.pdf", server.uri()), "similarity_report")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::PageRemoval(_)));
        assert!(is_empty_dir(scratch.path()));
    }

    #[tokio::test]
    async fn missing_tool_is_page_removal_error() {
        let server = MockServer::start().await;
        mount_report(&server).await;

        let scratch = tempfile::tempdir().unwrap();
        let processor = processor(
            &server,
            PathBuf::from("/definitely/not/a/page-tool"),
            scratch.path(),
        );

        let err = processor
            .process(&format!("{}/report.pdf", server.uri()), "ai_report")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::PageRemoval(_)));
    }

    #[tokio::test]
    async fn cdn_failure_is_upload_error() {
        let server = MockServer::start().await;
        mount_report(&server).await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let scratch = tempfile::tempdir().unwrap();
        let processor = processor(&server, fake_page_tool(), scratch.path());

        let err = processor
            .process(&format!("{}/report.pdf", server.uri()), "ai_report")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Upload(_)));
        assert!(is_empty_dir(scratch.path()));
    }
}
