pub mod lock;
pub mod state;


use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use backon::{ConstantBuilder, Retryable};
use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::{ServiceCatalog, ServiceDefinition};
use crate::error::SlotError;
use crate::probe::{HealthProbe, ProbeOutcome};
use crate::runtime::{
    ResourceUsage, RunningContainer, RuntimeAdapter, RuntimeError, RuntimeStatus, RuntimeToken,
    StopOutcome,
};

use lock::HostLock;
use state::{ActiveServiceRecord, Operation, StateStore, TransitionMarker};

/// Log lines inspected when a container dies before becoming ready.
const CRASH_LOG_LINES: usize = 20;

/// How often, and how many times, a transition retries a host lock that is
/// held without a transition marker (another process reconciling on open).
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(100);
const LOCK_RETRY_ATTEMPTS: usize = 100;

/// Log phrases that mean the model did not fit on the GPU.
const OOM_LOG_MARKERS: &[&str] = &[
    "out of memory",
    "outofmemoryerror",
    "no available memory for the cache blocks",
    "insufficient memory",
];

/// A running service owned by the slot.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceHandle {
    pub identifier: String,
    pub token: RuntimeToken,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SlotState {
    Idle,
    Starting(String),
    Active(ServiceHandle),
    Stopping(String),
    /// Needs manual intervention: cleanup failed or several managed
    /// containers are running at once.
    Unknown {
        identifiers: Vec<String>,
        reason: String,
    },
}

impl SlotState {
    pub fn label(&self) -> &'static str {
        match self {
            SlotState::Idle => "idle",
            SlotState::Starting(_) => "starting",
            SlotState::Active(_) => "active",
            SlotState::Stopping(_) => "stopping",
            SlotState::Unknown { .. } => "unknown",
        }
    }

    /// The service the state is about, if exactly one.
    pub fn identifier(&self) -> Option<&str> {
        match self {
            SlotState::Idle => None,
            SlotState::Starting(id) | SlotState::Stopping(id) => Some(id),
            SlotState::Active(handle) => Some(&handle.identifier),
            SlotState::Unknown { identifiers, .. } if identifiers.len() == 1 => {
                Some(&identifiers[0])
            }
            SlotState::Unknown { .. } => None,
        }
    }
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotState::Unknown {
                identifiers,
                reason,
            } => write!(f, "unknown ({}): {}", identifiers.join(", "), reason),
            other => match other.identifier() {
                Some(id) => write!(f, "{} ({})", other.label(), id),
                None => f.write_str(other.label()),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatusReport {
    pub state: SlotState,
    pub identifier: Option<String>,
    pub uptime: Option<Duration>,
    pub runtime_status: Option<RuntimeStatus>,
    pub resources: Option<ResourceUsage>,
    /// A transition running in another process, if any.
    pub transition: Option<TransitionMarker>,
}

/// Holds both locks for the duration of a transition and removes the
/// transition marker when dropped.
struct TransitionGuard<'a> {
    _local: MutexGuard<'a, ()>,
    _host: HostLock,
    store: &'a StateStore,
}

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.store.end_transition() {
            warn!(error = %format!("{e:#}"), "failed to remove transition marker");
        }
    }
}

/// Correction to the persisted record implied by a reconciliation.
enum RecordFix {
    Keep,
    Clear,
    Adopt(ServiceHandle),
}

enum ReadyWait {
    Probe(ProbeOutcome),
    Exited(RuntimeStatus),
}

/// Owns the single GPU slot: decides which service runs, and moves between
/// services with stop-then-start transitions.
pub struct LifecycleManager {
    catalog: ServiceCatalog,
    runtime: Arc<dyn RuntimeAdapter>,
    probe: Arc<dyn HealthProbe>,
    store: StateStore,
    lock_path: PathBuf,
    state: watch::Sender<SlotState>,
    transition: Mutex<()>,
}

impl LifecycleManager {
    /// Build a manager and reconcile persisted state against the runtime.
    ///
    /// The host lock is held only while reconciling, and transitions in other
    /// processes wait for it. When the lock is busy, state is derived
    /// read-only from the transition marker, the record and the runtime.
    pub async fn open(
        catalog: ServiceCatalog,
        runtime: Arc<dyn RuntimeAdapter>,
        probe: Arc<dyn HealthProbe>,
        store: StateStore,
        lock_path: PathBuf,
    ) -> Result<Self, SlotError> {
        let manager = Self {
            catalog,
            runtime,
            probe,
            store,
            lock_path,
            state: watch::Sender::new(SlotState::Idle),
            transition: Mutex::new(()),
        };

        match HostLock::try_acquire(&manager.lock_path)? {
            Some(_lock) => {
                manager.reconcile().await?;
            }
            None => {
                let observed = manager.observe().await?;
                manager.set_state(observed);
            }
        }
        Ok(manager)
    }

    pub fn state(&self) -> SlotState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SlotState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: SlotState) {
        debug!(state = %next, "slot state");
        self.state.send_replace(next);
    }

    // -----------------------------------------------------------------------
    // Reconciliation
    // -----------------------------------------------------------------------

    /// Re-derive the slot state from the persisted record and the runtime.
    /// Takes the host lock; fails with `OperationInProgress` while another
    /// transition holds it.
    pub async fn refresh(&self) -> Result<SlotState, SlotError> {
        let _local = self
            .transition
            .try_lock()
            .map_err(|_| self.in_progress_locally())?;
        let _host = self.acquire_host_lock().await?;
        self.reconcile().await
    }

    /// Caller must hold the host lock.
    async fn reconcile(&self) -> Result<SlotState, SlotError> {
        let (next, fix) = self.derive().await?;
        match fix {
            RecordFix::Keep => {}
            RecordFix::Clear => {
                info!("recorded service is no longer running, clearing");
                self.clear_record();
            }
            RecordFix::Adopt(handle) => {
                warn!(
                    service = %handle.identifier,
                    container = %handle.token.container_name,
                    "adopting running container that was not recorded"
                );
                self.save_record(&handle);
            }
        }
        if let SlotState::Unknown {
            identifiers,
            reason,
        } = &next
        {
            warn!(services = ?identifiers, "{}", reason);
        }
        self.set_state(next.clone());
        Ok(next)
    }

    /// Work out the slot state from the persisted record and every managed
    /// container on the host. Writes nothing.
    async fn derive(&self) -> Result<(SlotState, RecordFix), SlotError> {
        let running = self
            .runtime
            .running_services()
            .await
            .map_err(RuntimeError::into_host_error)?;
        let mut fix = RecordFix::Keep;
        let mut active: Option<ServiceHandle> = None;

        if let Some(record) = self.store.load() {
            let id = record.current.clone().unwrap_or_default();
            match self.catalog.get(&id) {
                None => {
                    debug!(service = %id, "recorded service is not in the catalog");
                    fix = RecordFix::Clear;
                }
                Some(service) => {
                    let token = running
                        .iter()
                        .find(|c| c.is_local() && c.identifier == id)
                        .map(|c| c.token.clone())
                        .unwrap_or_else(|| RuntimeToken::for_service(service));
                    let status = self
                        .runtime
                        .status(&token)
                        .await
                        .map_err(|e| e.into_slot(&id))?;
                    if status.is_alive() {
                        active = Some(ServiceHandle {
                            identifier: id,
                            token,
                            started_at: record.since,
                        });
                    } else {
                        debug!(service = %id, %status, "recorded service is not running");
                        fix = RecordFix::Clear;
                    }
                }
            }
        }

        let others: Vec<&RunningContainer> = running
            .iter()
            .filter(|c| match &active {
                Some(a) => !(c.is_local() && a.identifier == c.identifier),
                None => true,
            })
            .collect();

        let next = match (active, others.as_slice()) {
            (Some(handle), []) => SlotState::Active(handle),
            (None, []) => SlotState::Idle,
            (None, [only]) if only.is_local() && self.catalog.get(&only.identifier).is_some() => {
                let handle = ServiceHandle {
                    identifier: only.identifier.clone(),
                    token: only.token.clone(),
                    started_at: Utc::now(),
                };
                fix = RecordFix::Adopt(handle.clone());
                SlotState::Active(handle)
            }
            (active, others) => {
                let mut identifiers: Vec<String> =
                    active.into_iter().map(|a| a.identifier).collect();
                identifiers.extend(others.iter().map(|c| c.display_name()));
                let reason = if others.iter().any(|c| !c.is_local()) {
                    "the GPU is held by a service from another project".to_string()
                } else if identifiers.len() > 1 {
                    "more than one managed container is running".to_string()
                } else {
                    "a running managed container is not in the catalog".to_string()
                };
                SlotState::Unknown {
                    identifiers,
                    reason,
                }
            }
        };

        Ok((next, fix))
    }

    /// Read-only view used while another process holds the host lock.
    async fn observe(&self) -> Result<SlotState, SlotError> {
        match self.store.current_transition() {
            Some(marker) => Ok(self.marker_state(&marker)),
            None => Ok(self.derive().await?.0),
        }
    }

    fn marker_state(&self, marker: &TransitionMarker) -> SlotState {
        let id = marker
            .identifier
            .clone()
            .or_else(|| self.store.load().and_then(|r| r.current))
            .unwrap_or_default();
        match marker.operation {
            Operation::Stop => SlotState::Stopping(id),
            Operation::Launch | Operation::Switch => SlotState::Starting(id),
        }
    }

    // -----------------------------------------------------------------------
    // Transition plumbing
    // -----------------------------------------------------------------------

    fn in_progress_locally(&self) -> SlotError {
        SlotError::OperationInProgress {
            detail: format!("this process is already running a transition ({})", self.state()),
        }
    }

    /// Take the host lock. A holder that has published a transition marker
    /// is refused at once; one without a marker is only reconciling and is
    /// waited for.
    async fn acquire_host_lock(&self) -> Result<HostLock, SlotError> {
        let attempt = || async {
            match HostLock::try_acquire(&self.lock_path)? {
                Some(lock) => Ok::<HostLock, SlotError>(lock),
                None => {
                    let detail = match self.store.current_transition() {
                        Some(marker) => marker.to_string(),
                        None => format!(
                            "lock {} is held by another process",
                            self.lock_path.display()
                        ),
                    };
                    Err(SlotError::OperationInProgress { detail })
                }
            }
        };

        attempt
            .retry(
                ConstantBuilder::default()
                    .with_delay(LOCK_RETRY_INTERVAL)
                    .with_max_times(LOCK_RETRY_ATTEMPTS),
            )
            .when(|e: &SlotError| {
                matches!(e, SlotError::OperationInProgress { .. })
                    && self.store.current_transition().is_none()
            })
            .notify(|_: &SlotError, dur: Duration| {
                debug!(lock = %self.lock_path.display(), "host lock busy, retrying in {:?}", dur);
            })
            .await
    }

    /// Take both locks, refresh state from the runtime, and publish a marker.
    async fn begin(
        &self,
        operation: Operation,
        identifier: Option<&str>,
    ) -> Result<TransitionGuard<'_>, SlotError> {
        let local = self
            .transition
            .try_lock()
            .map_err(|_| self.in_progress_locally())?;
        let host = self.acquire_host_lock().await?;

        self.reconcile().await?;

        self.store
            .begin_transition(&TransitionMarker::new(operation, identifier))?;
        Ok(TransitionGuard {
            _local: local,
            _host: host,
            store: &self.store,
        })
    }

    fn save_record(&self, handle: &ServiceHandle) {
        let record = ActiveServiceRecord {
            current: Some(handle.identifier.clone()),
            since: handle.started_at,
            container_id: handle.token.container_id.clone(),
        };
        if let Err(e) = self.store.save(&record) {
            // The next open re-adopts the container from its labels.
            warn!(service = %handle.identifier, error = %format!("{e:#}"), "failed to persist active service");
        }
    }

    fn clear_record(&self) {
        if let Err(e) = self.store.clear() {
            warn!(error = %format!("{e:#}"), "failed to clear active service record");
        }
    }

    // -----------------------------------------------------------------------
    // Launch
    // -----------------------------------------------------------------------

    /// Start a service and wait for it to become ready. Only valid when the
    /// slot is idle.
    pub async fn launch(
        &self,
        identifier: &str,
        cancel: &CancellationToken,
    ) -> Result<ServiceHandle, SlotError> {
        let service = self.catalog.lookup(identifier)?.clone();
        let _guard = self.begin(Operation::Launch, Some(identifier)).await?;
        self.launch_locked(&service, cancel).await
    }

    async fn launch_locked(
        &self,
        service: &ServiceDefinition,
        cancel: &CancellationToken,
    ) -> Result<ServiceHandle, SlotError> {
        let id = service.identifier.as_str();
        match self.state() {
            SlotState::Idle => {}
            SlotState::Active(handle) => {
                return Err(SlotError::AlreadyActive {
                    active: handle.identifier,
                    requested: id.to_string(),
                })
            }
            SlotState::Unknown { identifiers, .. } => {
                return Err(SlotError::AlreadyActive {
                    active: identifiers.join(", "),
                    requested: id.to_string(),
                })
            }
            other => {
                return Err(SlotError::OperationInProgress {
                    detail: other.to_string(),
                })
            }
        }

        self.set_state(SlotState::Starting(id.to_string()));
        info!(service = %id, image = %service.launch.image, "launching");

        let started = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SlotError::Cancelled {
                identifier: id.to_string(),
            }),
            result = self.runtime.start(service) => result.map_err(|e| e.into_slot(id)),
        };
        let token = match started {
            Ok(token) => token,
            Err(err) => return self.cleanup_after_failed_start(service, err).await,
        };
        let started_at = Utc::now();

        if cancel.is_cancelled() {
            let err = SlotError::Cancelled {
                identifier: id.to_string(),
            };
            return self.compensate(id, &token, err).await;
        }

        let wait = tokio::select! {
            outcome = self.probe.wait_until_ready(&service.readiness, cancel) => ReadyWait::Probe(outcome),
            status = self.watch_exit(&token, service.readiness.poll_interval) => ReadyWait::Exited(status),
        };

        let err = match wait {
            ReadyWait::Probe(ProbeOutcome::Ready { elapsed }) => {
                let handle = ServiceHandle {
                    identifier: id.to_string(),
                    token,
                    started_at,
                };
                self.save_record(&handle);
                self.set_state(SlotState::Active(handle.clone()));
                info!(service = %id, ready_after = ?elapsed, "service is ready");
                return Ok(handle);
            }
            ReadyWait::Probe(ProbeOutcome::TimedOut { elapsed, budget }) => SlotError::TimedOut {
                identifier: id.to_string(),
                elapsed,
                budget,
            },
            ReadyWait::Probe(ProbeOutcome::Error(reason)) => SlotError::LaunchFailed {
                identifier: id.to_string(),
                reason,
            },
            ReadyWait::Probe(ProbeOutcome::Cancelled) => SlotError::Cancelled {
                identifier: id.to_string(),
            },
            ReadyWait::Exited(status) => self.exit_error(id, &token, &status).await,
        };

        warn!(service = %id, error = %err, "launch failed, stopping container");
        self.compensate(id, &token, err).await
    }

    /// Poll until the container is seen not running.
    async fn watch_exit(&self, token: &RuntimeToken, interval: Duration) -> RuntimeStatus {
        loop {
            tokio::time::sleep(interval).await;
            match self.runtime.status(token).await {
                Ok(status @ RuntimeStatus::Exited { .. }) => return status,
                Ok(_) => {}
                Err(e) => debug!(container = %token.container_name, error = %e, "status check failed"),
            }
        }
    }

    async fn exit_error(&self, id: &str, token: &RuntimeToken, status: &RuntimeStatus) -> SlotError {
        let tail = self
            .runtime
            .logs(token, CRASH_LOG_LINES)
            .await
            .unwrap_or_default();
        let last_line = tail.iter().rev().find(|l| !l.trim().is_empty()).cloned();
        let oom_in_logs = tail.iter().any(|line| {
            let lowered = line.to_lowercase();
            OOM_LOG_MARKERS.iter().any(|m| lowered.contains(m))
        });
        let oom_killed = matches!(status, RuntimeStatus::Exited { oom_killed: true, .. });

        let mut reason = format!("container {} before becoming ready", status);
        if let Some(line) = last_line {
            reason.push_str(&format!("; last log line: {}", line.trim()));
        }

        if oom_killed || oom_in_logs {
            SlotError::ResourceExhausted {
                identifier: id.to_string(),
                reason,
            }
        } else {
            SlotError::LaunchFailed {
                identifier: id.to_string(),
                reason,
            }
        }
    }

    async fn cleanup_after_failed_start(
        &self,
        service: &ServiceDefinition,
        err: SlotError,
    ) -> Result<ServiceHandle, SlotError> {
        // A failed start normally leaves nothing behind; make sure.
        let token = RuntimeToken::for_service(service);
        match self.runtime.status(&token).await {
            Ok(status) if status.is_alive() => {
                self.compensate(&service.identifier, &token, err).await
            }
            _ => {
                self.set_state(SlotState::Idle);
                Err(err)
            }
        }
    }

    /// Stop a container whose launch failed. Returns the original error, or
    /// `CleanupFailed` if the container could not be confirmed stopped.
    async fn compensate(
        &self,
        id: &str,
        token: &RuntimeToken,
        err: SlotError,
    ) -> Result<ServiceHandle, SlotError> {
        match self.runtime.stop(token).await {
            Ok(_) => {
                self.set_state(SlotState::Idle);
                Err(err)
            }
            Err(stop_err) => {
                warn!(service = %id, error = %stop_err, "compensating stop failed");
                self.set_state(SlotState::Unknown {
                    identifiers: vec![id.to_string()],
                    reason: format!("cleanup after failed launch failed: {stop_err}"),
                });
                Err(SlotError::CleanupFailed {
                    identifier: id.to_string(),
                    reason: format!("{err}; then stop failed: {stop_err}"),
                })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Stop
    // -----------------------------------------------------------------------

    /// Stop whatever holds the slot. Idempotent; returns the identifiers
    /// that were stopped.
    pub async fn stop(&self) -> Result<Vec<String>, SlotError> {
        self.stop_matching(None).await
    }

    /// Stop the active service only if it is `identifier`; any other active
    /// service is left alone and nothing is stopped.
    pub async fn stop_matching(&self, identifier: Option<&str>) -> Result<Vec<String>, SlotError> {
        if let Some(id) = identifier {
            self.catalog.lookup(id)?;
        }
        let _guard = self.begin(Operation::Stop, identifier).await?;
        if let Some(id) = identifier {
            if self.state().identifier() != Some(id) {
                info!(service = %id, state = %self.state(), "service is not active, nothing to stop");
                return Ok(Vec::new());
            }
        }
        self.stop_locked().await
    }

    /// Stop every managed container on the host, tracked or not.
    pub async fn stop_all(&self) -> Result<Vec<String>, SlotError> {
        let _guard = self.begin(Operation::Stop, None).await?;
        self.stop_everything().await
    }

    async fn stop_locked(&self) -> Result<Vec<String>, SlotError> {
        match self.state() {
            SlotState::Idle => Ok(Vec::new()),
            SlotState::Active(handle) => {
                let id = handle.identifier.clone();
                self.set_state(SlotState::Stopping(id.clone()));
                info!(service = %id, "stopping");
                match self.runtime.stop(&handle.token).await {
                    Ok(outcome) => {
                        self.clear_record();
                        self.set_state(SlotState::Idle);
                        log_stop(&id, outcome);
                        Ok(vec![id])
                    }
                    Err(e @ RuntimeError::Unavailable(_)) => {
                        self.set_state(SlotState::Active(handle));
                        Err(e.into_slot(&id))
                    }
                    Err(e) => {
                        self.set_state(SlotState::Unknown {
                            identifiers: vec![id.clone()],
                            reason: format!("stop failed: {e}"),
                        });
                        Err(e.into_slot(&id))
                    }
                }
            }
            SlotState::Unknown { .. } => self.stop_everything().await,
            other => Err(SlotError::OperationInProgress {
                detail: other.to_string(),
            }),
        }
    }

    async fn stop_everything(&self) -> Result<Vec<String>, SlotError> {
        let before = self.state();
        let mut targets: Vec<(String, RuntimeToken)> = self
            .runtime
            .running_services()
            .await
            .map_err(RuntimeError::into_host_error)?
            .into_iter()
            .map(|c| (c.display_name(), c.token))
            .collect();

        let mut named: Vec<String> = match &before {
            SlotState::Unknown { identifiers, .. } => identifiers.clone(),
            SlotState::Active(handle) => vec![handle.identifier.clone()],
            _ => Vec::new(),
        };
        named.retain(|id| !targets.iter().any(|(t, _)| t == id));
        for id in named {
            if let Some(service) = self.catalog.get(&id) {
                targets.push((id, RuntimeToken::for_service(service)));
            }
        }

        if let Some(id) = before.identifier() {
            self.set_state(SlotState::Stopping(id.to_string()));
        }

        let mut stopped = Vec::new();
        let mut failures = Vec::new();
        for (id, token) in targets {
            match self.runtime.stop(&token).await {
                Ok(StopOutcome::AlreadyStopped) => {}
                Ok(outcome) => {
                    log_stop(&id, outcome);
                    stopped.push(id);
                }
                Err(e) => {
                    warn!(service = %id, error = %e, "stop failed");
                    failures.push((id, e));
                }
            }
        }

        if !failures.is_empty() {
            let identifiers: Vec<String> = failures.iter().map(|(id, _)| id.clone()).collect();
            let reason = failures
                .iter()
                .map(|(id, e)| format!("{id}: {e}"))
                .collect::<Vec<_>>()
                .join("; ");
            self.set_state(SlotState::Unknown {
                identifiers: identifiers.clone(),
                reason: format!("stop failed: {reason}"),
            });
            return Err(match failures.pop() {
                Some((id, err)) if identifiers.len() == 1 => err.into_slot(&id),
                _ => SlotError::RuntimeFailed {
                    identifier: identifiers.join(", "),
                    reason,
                },
            });
        }

        self.clear_record();
        self.set_state(SlotState::Idle);
        Ok(stopped)
    }

    // -----------------------------------------------------------------------
    // Switch
    // -----------------------------------------------------------------------

    /// Replace the active service with `identifier`: stop (confirmed), then
    /// launch. A failed launch leaves the slot idle.
    pub async fn switch(
        &self,
        identifier: &str,
        cancel: &CancellationToken,
    ) -> Result<ServiceHandle, SlotError> {
        let service = self.catalog.lookup(identifier)?.clone();
        let _guard = self.begin(Operation::Switch, Some(identifier)).await?;

        match self.state() {
            SlotState::Active(handle) if handle.identifier == identifier => {
                info!(service = %identifier, "already active");
                return Ok(handle);
            }
            SlotState::Active(handle) => {
                info!(from = %handle.identifier, to = %identifier, "switching");
                self.stop_locked().await?;
            }
            SlotState::Unknown { .. } => {
                self.stop_locked().await?;
            }
            _ => {}
        }

        self.launch_locked(&service, cancel).await
    }

    // -----------------------------------------------------------------------
    // Read-only queries
    // -----------------------------------------------------------------------

    pub async fn status(&self) -> Result<StatusReport, SlotError> {
        let transition = self
            .store
            .current_transition()
            .filter(|marker| marker.pid != std::process::id());

        let mut state = match &transition {
            Some(marker) => self.marker_state(marker),
            None => self.state(),
        };

        let mut runtime_status = None;
        if let SlotState::Active(handle) = state.clone() {
            let status = self
                .runtime
                .status(&handle.token)
                .await
                .map_err(|e| e.into_slot(&handle.identifier))?;
            if !status.is_alive() && transition.is_none() {
                info!(service = %handle.identifier, %status, "active service is no longer running");
                state = match (
                    self.transition.try_lock(),
                    HostLock::try_acquire(&self.lock_path)?,
                ) {
                    (Ok(_local), Some(_host)) => self.reconcile().await?,
                    _ => {
                        let observed = self.observe().await?;
                        self.set_state(observed.clone());
                        observed
                    }
                };
            }
            runtime_status = Some(status);
        }

        let resources = match self.runtime.resource_usage().await {
            Ok(usage) => Some(usage),
            Err(e) => {
                debug!(error = %e, "GPU usage unavailable");
                None
            }
        };

        let uptime = match &state {
            SlotState::Active(handle) => (Utc::now() - handle.started_at).to_std().ok(),
            _ => None,
        };

        Ok(StatusReport {
            identifier: state.identifier().map(str::to_string),
            state,
            uptime,
            runtime_status,
            resources,
            transition,
        })
    }

    /// The active identifier, if any.
    pub fn current(&self) -> Option<String> {
        match self.state() {
            SlotState::Active(handle) => Some(handle.identifier),
            _ => None,
        }
    }

    pub async fn logs(&self, identifier: &str, max_lines: usize) -> Result<Vec<String>, SlotError> {
        let service = self.catalog.lookup(identifier)?;
        let token = match self.state() {
            SlotState::Active(handle) if handle.identifier == identifier => handle.token,
            _ => RuntimeToken::for_service(service),
        };
        self.runtime
            .logs(&token, max_lines)
            .await
            .map_err(|e| e.into_slot(identifier))
    }

    pub async fn resource_usage(&self) -> Result<ResourceUsage, SlotError> {
        self.runtime.resource_usage().await.map_err(RuntimeError::into_host_error)
    }
}

fn log_stop(id: &str, outcome: StopOutcome) {
    match outcome {
        StopOutcome::Stopped => info!(service = %id, "stopped"),
        StopOutcome::Killed => warn!(service = %id, "stopped by force after grace period"),
        StopOutcome::AlreadyStopped => info!(service = %id, "was not running"),
    }
}
