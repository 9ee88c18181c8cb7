//! Request dispatcher: the public face of the bridge.
//!
//! `Bridge` owns one transport split between a reader and a writer task.
//! Callers share it by reference; every call gets its own RequestId and
//! pending entry, so any number of requests can be in flight at once.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;

use super::actor::{
    PendingRegistry, ReaderTaskHandle, ResponseRouter, WriterTaskHandle, spawn_reader_task,
    spawn_writer_task,
};
use super::init_gate::{GateTicket, InitGate};
use super::lifecycle::{BridgeState, Lifecycle};
use super::protocol::{
    AcquisitionMapping, AnalysisResult, AnalyzeFilesParams, ComplianceReport, FileEntry,
    GenerateTemplateParams, MapAcquisitionsParams, OperationRequest, OutboundEnvelope,
    ProgressSink, RequestId, RequestIdGenerator, Template, ValidateComplianceParams,
};
use super::transport::{ProcessTransport, Transport};
use crate::config::BridgeSettings;
use crate::error::{BridgeError, BridgeResult, LockResultExt};

/// Handle to a background host.
///
/// Dropping it closes the bridge the same way [`Bridge::close`] does.
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    registry: Arc<PendingRegistry>,
    lifecycle: Arc<Lifecycle>,
    gate: InitGate,
    ids: RequestIdGenerator,
    outbound: mpsc::Sender<OutboundEnvelope>,
    init_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
    tasks: Mutex<Option<(ReaderTaskHandle, WriterTaskHandle)>>,
}

impl Bridge {
    /// Start a bridge over `transport`.
    ///
    /// Spawns the reader and writer tasks, so this must be called from
    /// within a tokio runtime.
    pub fn new<T: Transport>(transport: T, settings: &BridgeSettings) -> Self {
        let registry = Arc::new(PendingRegistry::new());
        let lifecycle = Arc::new(Lifecycle::new());
        let router = Arc::new(ResponseRouter::new(registry.clone(), lifecycle.clone()));

        let (sink, source) = transport.split();
        let (outbound, queue) = mpsc::channel(settings.queue_capacity.max(1));
        let writer = spawn_writer_task(sink, queue, registry.clone());
        let reader = spawn_reader_task(source, router);

        let ids = RequestIdGenerator::new();
        debug!(
            target: "workbridge::bridge",
            "Bridge session {} started",
            ids.session()
        );

        Self {
            inner: Arc::new(BridgeInner {
                gate: InitGate::new(lifecycle.clone()),
                registry,
                lifecycle,
                ids,
                outbound,
                init_timeout: settings.init_timeout,
                request_timeout: settings.request_timeout,
                tasks: Mutex::new(Some((reader, writer))),
            }),
        }
    }

    /// Spawn the configured host command and start a bridge to it.
    pub fn spawn_process(settings: &BridgeSettings) -> BridgeResult<Self> {
        let transport = ProcessTransport::spawn(&settings.host_command)?;
        Ok(Self::new(transport, settings))
    }

    pub fn state(&self) -> BridgeState {
        self.inner.lifecycle.state()
    }

    /// Number of requests still waiting for a terminal message.
    pub fn pending_count(&self) -> usize {
        self.inner.registry.pending_count()
    }

    /// Make sure the host finished its one-time startup.
    ///
    /// Concurrent callers share a single `initialize` request. A failed
    /// attempt is reported to everyone waiting on it; the next call retries.
    pub async fn ensure_ready(&self) -> BridgeResult<()> {
        match self.inner.gate.enter() {
            GateTicket::Ready => Ok(()),
            GateTicket::Terminated => Err(BridgeError::Terminated),
            GateTicket::Follow(outcome) => InitGate::wait(outcome).await,
            GateTicket::Lead { publisher, outcome } => {
                // Run detached so a caller dropping this future does not
                // abandon the followers
                let inner = self.inner.clone();
                tokio::spawn(async move {
                    let result = inner.run_startup().await;
                    publisher.publish(result);
                });
                InitGate::wait(outcome).await
            }
        }
    }

    /// Send one operation and wait for its terminal message.
    ///
    /// Every operation waits for the host to be ready first. `initialize`
    /// itself is routed through [`Bridge::ensure_ready`], so startup is only
    /// ever sent once; it resolves to `Value::Null`. `progress`, if given, is
    /// invoked for each progress message that arrives before the terminal
    /// one.
    pub async fn request(
        &self,
        request: OperationRequest,
        progress: Option<ProgressSink>,
    ) -> BridgeResult<Value> {
        self.ensure_ready().await?;
        if request.is_startup() {
            return Ok(Value::Null);
        }
        self.inner.dispatch(request, progress).await
    }

    /// Parse DICOM files and extract acquisitions. File bytes are moved to
    /// the host.
    pub async fn analyze_files(
        &self,
        files: Vec<FileEntry>,
        progress: Option<ProgressSink>,
    ) -> BridgeResult<AnalysisResult> {
        let request = OperationRequest::AnalyzeFiles(AnalyzeFilesParams { files });
        decode(self.request(request, progress).await?)
    }

    pub async fn map_acquisitions(
        &self,
        params: MapAcquisitionsParams,
        progress: Option<ProgressSink>,
    ) -> BridgeResult<AcquisitionMapping> {
        let request = OperationRequest::MapAcquisitions(params);
        decode(self.request(request, progress).await?)
    }

    pub async fn validate_compliance(
        &self,
        params: ValidateComplianceParams,
        progress: Option<ProgressSink>,
    ) -> BridgeResult<ComplianceReport> {
        let request = OperationRequest::ValidateCompliance(params);
        decode(self.request(request, progress).await?)
    }

    pub async fn generate_template(
        &self,
        params: GenerateTemplateParams,
    ) -> BridgeResult<Template> {
        let request = OperationRequest::GenerateTemplate(params);
        decode(self.request(request, None).await?)
    }

    pub async fn clear_cache(&self) -> BridgeResult<()> {
        self.request(OperationRequest::ClearCache, None).await?;
        Ok(())
    }

    /// Terminate the bridge.
    ///
    /// Every pending request fails with [`BridgeError::Terminated`] before
    /// this returns, later calls fail immediately, and the transport is
    /// closed (a host process is killed). Idempotent.
    pub fn close(&self) {
        let inner = &self.inner;
        if inner.lifecycle.terminate() {
            info!(target: "workbridge::bridge", "Closing bridge");
        }

        let failed = inner.registry.close(BridgeError::Terminated);
        if failed > 0 {
            debug!(
                target: "workbridge::bridge",
                "Failed {} pending request(s) on close",
                failed
            );
        }

        let tasks = inner.tasks.lock().recover_poison("Bridge::close").take();
        if let Some((reader, writer)) = tasks {
            reader.cancel();
            // The writer fails anything still queued and closes the transport
            writer.cancel();
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.close();
    }
}

impl BridgeInner {
    /// Register and enqueue one request, then wait for its outcome.
    async fn dispatch(
        &self,
        request: OperationRequest,
        progress: Option<ProgressSink>,
    ) -> BridgeResult<Value> {
        if self.lifecycle.is_terminated() {
            return Err(BridgeError::Terminated);
        }

        // Reserve the queue slot first so the envelope (and the buffers it
        // owns) moves to the writer in one step once registered
        let permit = self
            .outbound
            .reserve()
            .await
            .map_err(|_| BridgeError::Terminated)?;

        let id = self.ids.next_id();
        let response = self.registry.register(id.clone(), progress)?;
        let _guard = PendingGuard {
            registry: &self.registry,
            id: id.clone(),
        };

        let kind = request.name();
        permit.send(OutboundEnvelope::new(id.clone(), request));
        debug!(target: "workbridge::bridge", "Dispatched {} ({})", id, kind);

        let outcome = match self.request_timeout {
            Some(after) => match tokio::time::timeout(after, response).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(
                        target: "workbridge::bridge",
                        "Request {} ({}) timed out after {:?}",
                        id,
                        kind,
                        after
                    );
                    return Err(BridgeError::Timeout { after });
                }
            },
            None => response.await,
        };

        // A dropped responder means the entry was discarded without a value
        outcome.unwrap_or(Err(BridgeError::Terminated))
    }

    /// Send `initialize` and wait until the host is ready.
    ///
    /// Ready is reached by whichever comes first: the host's `ready` message
    /// or the `success` of the initialize request.
    async fn run_startup(&self) -> BridgeResult<()> {
        let lifecycle = self.lifecycle.subscribe();

        let attempt = async {
            tokio::select! {
                result = self.dispatch(OperationRequest::Initialize, None) => match result {
                    Ok(_) => Ok(()),
                    Err(BridgeError::Operation { message }) => {
                        Err(BridgeError::InitializationFailed { message })
                    }
                    Err(BridgeError::Timeout { after }) => Err(BridgeError::initialization_failed(
                        format!("initialize timed out after {:?}", after),
                    )),
                    Err(e) => Err(e),
                },
                state = settled_state(lifecycle) => match state {
                    BridgeState::Ready => Ok(()),
                    _ => Err(BridgeError::Terminated),
                },
            }
        };

        match self.init_timeout {
            Some(after) => tokio::time::timeout(after, attempt).await.unwrap_or_else(|_| {
                Err(BridgeError::initialization_failed(format!(
                    "host not ready after {:?}",
                    after
                )))
            }),
            None => attempt.await,
        }
    }
}

/// Wait until the lifecycle leaves the startup states.
async fn settled_state(mut lifecycle: tokio::sync::watch::Receiver<BridgeState>) -> BridgeState {
    match lifecycle
        .wait_for(|s| matches!(s, BridgeState::Ready | BridgeState::Terminated))
        .await
    {
        Ok(state) => *state,
        Err(_) => BridgeState::Terminated,
    }
}

/// Drops the pending entry when the dispatching future ends early
/// (timeout or caller gave up). A no-op once the request was settled.
struct PendingGuard<'a> {
    registry: &'a PendingRegistry,
    id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> BridgeResult<T> {
    serde_json::from_value(value).map_err(|e| BridgeError::decode(e.to_string()))
}
