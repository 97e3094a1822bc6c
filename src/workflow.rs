//! The per-order workflow: upload the submitted file, start an analysis job
//! and hand the job over to the poller.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{error, info, warn};

use crate::artifacts::ArtifactProcessor;
use crate::clients::{AnalysisClient, CdnClient, CredentialFetcher, StorageClient, download};
use crate::config::ReportflowConfig;
use crate::error::PipelineError;
use crate::finalize::finalize_order;
use crate::listener::Dispatch;
use crate::order::{Order, Outcome};
use crate::poller::{INTERRUPTED_REASON, PollPolicy, PollStart, PollSupervisor};
use crate::store::OrderStore;

pub const MISSING_JOB_REASON: &str = "Failed to start report generation, try again later!";

/// Where an order stands once [`OrderHandler::handle`] returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowOutcome {
    /// The analysis job was accepted; the order stays pending while it is polled.
    Polling { job_id: String },
    /// The order was finalized as failed with `reason`.
    Failed { reason: String },
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Token,
    Download,
    Upload,
    Cookie,
    Submit,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Token => write!(f, "fetch token"),
            Step::Download => write!(f, "download file"),
            Step::Upload => write!(f, "upload to storage"),
            Step::Cookie => write!(f, "fetch cookie"),
            Step::Submit => write!(f, "submit for analysis"),
        }
    }
}

pub struct OrderHandler {
    http: Client,
    credentials: CredentialFetcher,
    storage: StorageClient,
    analysis: AnalysisClient,
    store: Arc<dyn OrderStore>,
    poller: Arc<PollSupervisor>,
}

impl OrderHandler {
    pub fn new(
        http: Client,
        credentials: CredentialFetcher,
        storage: StorageClient,
        analysis: AnalysisClient,
        store: Arc<dyn OrderStore>,
        poller: Arc<PollSupervisor>,
    ) -> Self {
        Self {
            http,
            credentials,
            storage,
            analysis,
            store,
            poller,
        }
    }

    /// Wires every client from `config` around one shared HTTP client.
    pub fn from_config(
        config: &ReportflowConfig,
        store: Arc<dyn OrderStore>,
    ) -> reqwest::Result<Self> {
        let http = crate::clients::http_client()?;
        let storage = StorageClient::new(http.clone(), &config.storage);
        let cdn = CdnClient::new(http.clone(), &config.cdn);
        let processor = ArtifactProcessor::new(http.clone(), cdn, &config.artifacts);
        let poller = Arc::new(PollSupervisor::new(
            storage.clone(),
            processor,
            store.clone(),
            PollPolicy::from(&config.polling),
        ));

        Ok(Self::new(
            http.clone(),
            CredentialFetcher::new(http.clone(), &config.credentials),
            storage,
            AnalysisClient::new(http, config.analysis.url.clone()),
            store,
            poller,
        ))
    }

    /// Runs the workflow for a newly inserted order. Never fails: errors end
    /// up as the order's failure reason.
    pub async fn handle(&self, order: Order) -> WorkflowOutcome {
        let order_id = order.id.as_str();
        info!(order_id, file = order.upload_name(), "Processing order");

        match self.submit(&order).await {
            Ok((job_id, token)) => match job_id {
                Some(job_id) => {
                    info!(order_id, job_id = %job_id, "Analysis job started");
                    match self.poller.start_polling(&job_id, &token, order_id) {
                        PollStart::Started | PollStart::AlreadyPolling => {
                            WorkflowOutcome::Polling { job_id }
                        }
                        PollStart::Halted => {
                            self.fail(order_id, INTERRUPTED_REASON.to_string()).await
                        }
                    }
                }
                None => {
                    warn!(order_id, "Analysis response carried no job id");
                    self.fail(order_id, MISSING_JOB_REASON.to_string()).await
                }
            },
            Err((step, e)) => {
                error!(order_id, step = %step, error = %e, "Order workflow failed");
                self.fail(order_id, e.failure_reason()).await
            }
        }
    }

    /// Steps 1 to 5. Returns the job id, if any, and the token used to poll it.
    async fn submit(
        &self,
        order: &Order,
    ) -> Result<(Option<String>, String), (Step, PipelineError)> {
        let token = self.credentials.token().await.map_err(|e| (Step::Token, e))?;

        let file = download(&self.http, &order.user_file.url)
            .await
            .map_err(|e| (Step::Download, e))?;

        let stored = self
            .storage
            .upload(&token, order.upload_name(), file)
            .await
            .map_err(|e| (Step::Upload, e.into()))?;
        info!(order_id = %order.id, key = %stored.key, "File uploaded");

        let cookie = self.credentials.cookie().await.map_err(|e| (Step::Cookie, e))?;

        let job_id = self
            .analysis
            .submit(&cookie, self.storage.workflow_id(), &stored.public_url)
            .await
            .map_err(|e| (Step::Submit, e.into()))?;

        Ok((job_id, token))
    }

    async fn fail(&self, order_id: &str, reason: String) -> WorkflowOutcome {
        finalize_order(self.store.as_ref(), order_id, &Outcome::failed(reason.clone())).await;
        WorkflowOutcome::Failed { reason }
    }
}

#[async_trait]
impl Dispatch for OrderHandler {
    fn dispatch(self: Arc<Self>, order: Order) {
        tokio::spawn(async move {
            self.handle(order).await;
        });
    }

    async fn halt(&self) {
        self.poller.cancel_all().await;
    }

    fn resume(&self) {
        self.poller.resume();
    }
}
