//! Request and response bodies exchanged with the external services.

use serde::{Deserialize, Serialize};

/// Object created by a storage upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Storage key, bucket included (e.g. `files/<workflow>/essay.pdf`).
    pub key: String,
    /// Publicly fetchable URL of the object.
    pub public_url: String,
}

/// Body of an analysis submission.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRequest<'a> {
    pub uid: &'a str,
    #[serde(rename = "fileUrl")]
    pub file_url: &'a str,
}

/// Row of the `checks_history` table describing one analysis job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct JobRecord {
    #[serde(default, rename = "turnitin_status")]
    pub status: Option<String>,
    #[serde(default, rename = "turnitin_report_url")]
    pub report_url: Option<String>,
    #[serde(default, rename = "turnitin_similarity_report_url")]
    pub similarity_report_url: Option<String>,
}

impl JobRecord {
    pub fn is_done(&self) -> bool {
        self.status.as_deref() == Some("done")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CdnUploadResponse {
    #[serde(default)]
    pub secure_url: Option<String>,
}
