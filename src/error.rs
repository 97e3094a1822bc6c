use thiserror::Error;

/// Reason stored on an order whose file name was rejected by object storage.
pub const UNICODE_FILENAME_REASON: &str =
    "Please make sure your filename is in full english and doesn't contain any unicode characters!";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to fetch {what}: {reason}")]
    CredentialFetch { what: &'static str, reason: String },

    #[error("Failed to download {url}: {reason}")]
    Download { url: String, reason: String },

    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error("Report polling timed out after {elapsed_secs}s")]
    PollTimeout { elapsed_secs: u64 },

    #[error("Page removal failed: {0}")]
    PageRemoval(String),

    #[error("CDN upload failed: {0}")]
    Upload(String),

    #[error("Refund failed: {0}")]
    Refund(String),

    #[error("Change listener error: {0}")]
    Listener(String),

    #[error("Datastore error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Human-readable reason persisted on a failed order.
    ///
    /// Errors carrying a service-provided message surface that message as-is;
    /// the storage `InvalidKey` rejection is replaced by a hint about the
    /// file name.
    pub fn failure_reason(&self) -> String {
        match self {
            PipelineError::Submission(SubmissionError::InvalidKey) => {
                UNICODE_FILENAME_REASON.to_string()
            }
            PipelineError::Submission(SubmissionError::Rejected {
                message: Some(message),
                ..
            }) => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Failures talking to the object-storage or analysis services.
#[derive(Debug, Error)]
pub enum SubmissionError {
    /// Storage refused the object key, which happens for non-ASCII file names.
    #[error("Storage rejected the object key (InvalidKey)")]
    InvalidKey,

    /// The service answered with a non-2xx status. `message` is the `error`
    /// field of the JSON body when there was one.
    #[error("{service} returned status {status}: {}", message.as_deref().unwrap_or("no error message"))]
    Rejected {
        service: &'static str,
        status: u16,
        message: Option<String>,
    },

    #[error("{service} request failed: {source}")]
    Transport {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid {service} URL: {reason}")]
    InvalidUrl {
        service: &'static str,
        reason: String,
    },

    #[error("{service} returned a malformed response: {reason}")]
    MalformedResponse {
        service: &'static str,
        reason: String,
    },
}

/// Errors reported by an [`OrderStore`](crate::store::OrderStore) or
/// [`ChangeFeed`](crate::store::ChangeFeed) implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Order {0} is already finalized")]
    AlreadyFinalized(String),

    #[error("Change feed error: {0}")]
    Feed(String),

    #[error("Backend error: {0}")]
    Backend(String),
}
