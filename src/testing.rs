//! Shared fixtures for the async pipeline tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::mpsc;

use crate::artifacts::ArtifactProcessor;
use crate::clients::{AnalysisClient, CdnClient, CredentialFetcher, StorageClient, http_client};
use crate::config::{ArtifactsConfig, CdnConfig, CredentialsConfig, StorageConfig};
use crate::listener::Dispatch;
use crate::order::Order;
use crate::poller::{PollPolicy, PollSupervisor};
use crate::store::{MemoryStore, OrderStore};
use crate::workflow::OrderHandler;

pub const WORKFLOW_ID: &str = "wf-test";

static TOOLS: OnceLock<TempDir> = OnceLock::new();

#[cfg(unix)]
fn tools_dir() -> &'static Path {
    use std::os::unix::fs::PermissionsExt;

    TOOLS
        .get_or_init(|| {
            let dir = tempfile::tempdir().unwrap();
            let scripts = [
                ("page-tool-ok", "#!/bin/sh\ncp \"$1\" \"$2\"\n"),
                (
                    "page-tool-broken",
                    "#!/bin/sh\necho 'file is damaged' >&2\nexit 2\n",
                ),
            ];
            for (name, body) in scripts {
                let path = dir.path().join(name);
                std::fs::write(&path, body).unwrap();
                std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            }
            dir
        })
        .path()
}

/// Stand-in for qpdf that copies the input to the output unchanged.
#[cfg(unix)]
pub fn fake_page_tool() -> PathBuf {
    tools_dir().join("page-tool-ok")
}

/// Stand-in for qpdf that always exits non-zero.
#[cfg(unix)]
pub fn failing_page_tool() -> PathBuf {
    tools_dir().join("page-tool-broken")
}

/// Polls `condition` until it holds, panicking after two seconds.
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Waits for `order_id` to reach a terminal state and returns it.
pub async fn terminal_order(store: &MemoryStore, order_id: &str) -> Order {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        if let Some(order) = store.order(order_id)
            && order.status.is_terminal()
        {
            return order;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("order {order_id} never reached a terminal state");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Every pipeline component wired against one mock server.
pub struct Pipeline {
    pub store: MemoryStore,
    pub poller: Arc<PollSupervisor>,
    pub handler: Arc<OrderHandler>,
    _scratch: TempDir,
}

impl Pipeline {
    pub fn new(server_uri: &str, page_tool: PathBuf, policy: PollPolicy) -> Self {
        let client = http_client().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        let shared: Arc<dyn OrderStore> = Arc::new(store.clone());

        let storage = StorageClient::new(
            client.clone(),
            &StorageConfig {
                base_url: server_uri.to_string(),
                api_key: "anon".into(),
                workflow_id: WORKFLOW_ID.into(),
            },
        );
        let cdn = CdnClient::new(
            client.clone(),
            &CdnConfig {
                base_url: format!("{server_uri}/cdn"),
                cloud_name: "demo".into(),
                api_key: "k".into(),
                api_secret: "s".into(),
                folder: "homework_reports".into(),
            },
        );
        let processor = ArtifactProcessor::new(
            client.clone(),
            cdn,
            &ArtifactsConfig {
                page_tool,
                temp_dir: Some(scratch.path().to_path_buf()),
            },
        );
        let poller = Arc::new(PollSupervisor::new(
            storage.clone(),
            processor,
            shared.clone(),
            policy,
        ));
        let credentials = CredentialFetcher::new(
            client.clone(),
            &CredentialsConfig {
                token_url: format!("{server_uri}/token.txt"),
                cookie_url: format!("{server_uri}/Cookie.txt"),
            },
        );
        let analysis = AnalysisClient::new(client.clone(), format!("{server_uri}/api/deep-check"));
        let handler = Arc::new(OrderHandler::new(
            client,
            credentials,
            storage,
            analysis,
            shared,
            poller.clone(),
        ));

        Self {
            store,
            poller,
            handler,
            _scratch: scratch,
        }
    }
}

/// Dispatcher that records orders instead of processing them.
pub struct RecordingDispatcher {
    orders: mpsc::UnboundedSender<Order>,
    halts: AtomicUsize,
    resumes: AtomicUsize,
}

impl RecordingDispatcher {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Order>) {
        let (orders, rx) = mpsc::unbounded_channel();
        let recorder = Self {
            orders,
            halts: AtomicUsize::new(0),
            resumes: AtomicUsize::new(0),
        };
        (Arc::new(recorder), rx)
    }

    pub fn halt_count(&self) -> usize {
        self.halts.load(Ordering::SeqCst)
    }

    pub fn resume_count(&self) -> usize {
        self.resumes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dispatch for RecordingDispatcher {
    fn dispatch(self: Arc<Self>, order: Order) {
        let _ = self.orders.send(order);
    }

    async fn halt(&self) {
        self.halts.fetch_add(1, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.resumes.fetch_add(1, Ordering::SeqCst);
    }
}
