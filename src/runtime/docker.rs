use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;

use crate::catalog::ServiceDefinition;
use crate::config::model::RuntimeConfig;
use crate::identity::{LABEL_PROJECT, LABEL_SERVICE};
use crate::runtime::{
    container, gpu, image, ResourceUsage, RunningContainer, RuntimeAdapter, RuntimeError,
    RuntimeStatus, RuntimeToken, StopOutcome,
};

/// Extra time allowed for the daemon to answer a stop request beyond the
/// grace period itself.
const STOP_SLACK: Duration = Duration::from_secs(15);
const KILL_TIMEOUT: Duration = Duration::from_secs(10);
const NVIDIA_SMI_TIMEOUT: Duration = Duration::from_secs(10);
/// Exit code of a process terminated by SIGKILL.
const SIGKILL_EXIT: i64 = 137;

/// Substrings in daemon errors that mean the host lacks capacity rather than
/// the request being wrong.
const EXHAUSTION_MARKERS: &[&str] = &[
    "out of memory",
    "cannot allocate memory",
    "insufficient",
    "no space left on device",
    "cuda error: out of memory",
];

/// Docker Engine implementation of [`RuntimeAdapter`].
pub struct DockerRuntime {
    docker: Docker,
    slug: String,
    config: RuntimeConfig,
}

impl DockerRuntime {
    /// Connect to the local daemon and verify it answers.
    pub async fn connect(slug: String, config: RuntimeConfig) -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Unavailable(format!("connecting to Docker daemon: {e}")))?;
        docker.ping().await.map_err(|e| {
            RuntimeError::Unavailable(format!("cannot connect to Docker daemon: {e}"))
        })?;
        Ok(Self {
            docker,
            slug,
            config,
        })
    }

    async fn confirm_stopped(&self, token: &RuntimeToken) -> Result<StopOutcome, RuntimeError> {
        let state = container::inspect_state(&self.docker, token.reference())
            .await
            .map_err(|e| classify(&e, false))?;
        let status = container::runtime_status(state.as_ref());
        if !status.is_alive() {
            let killed = matches!(status, RuntimeStatus::Exited { code: Some(SIGKILL_EXIT), .. });
            return Ok(if killed {
                StopOutcome::Killed
            } else {
                StopOutcome::Stopped
            });
        }

        tracing::warn!(
            container = %token.container_name,
            grace_secs = self.config.stop_grace_secs,
            "container still running after grace period, killing"
        );
        tokio::time::timeout(
            KILL_TIMEOUT,
            container::kill_container(&self.docker, token.reference()),
        )
        .await
        .map_err(|_| RuntimeError::Failed(format!("kill of {} timed out", token.container_name)))?
        .map_err(|e| classify(&e, false))?;

        let state = container::inspect_state(&self.docker, token.reference())
            .await
            .map_err(|e| classify(&e, false))?;
        if container::runtime_status(state.as_ref()).is_alive() {
            return Err(RuntimeError::Failed(format!(
                "container {} is still running after kill",
                token.container_name
            )));
        }
        Ok(StopOutcome::Killed)
    }
}

#[async_trait]
impl RuntimeAdapter for DockerRuntime {
    async fn start(&self, service: &ServiceDefinition) -> Result<RuntimeToken, RuntimeError> {
        let spec = &service.launch;
        let pull_budget = Duration::from_secs(self.config.pull_timeout_secs);
        tokio::time::timeout(pull_budget, image::ensure_image(&self.docker, &spec.image))
            .await
            .map_err(|_| {
                RuntimeError::LaunchFailed(format!(
                    "pulling {} did not finish within {}",
                    spec.image,
                    humantime::format_duration(pull_budget)
                ))
            })?
            .map_err(|e| classify(&e, true))?;

        let start_budget = Duration::from_secs(self.config.start_timeout_secs);
        let network = self.config.network.as_deref();
        let started = tokio::time::timeout(start_budget, async {
            let id = container::create_container(&self.docker, spec, network).await?;
            container::start_container(&self.docker, &id).await?;
            anyhow::Ok(id)
        })
        .await;

        let error = match started {
            Ok(Ok(id)) => {
                tracing::info!(
                    service = %service.identifier,
                    container = %spec.container_name,
                    "container started"
                );
                return Ok(RuntimeToken {
                    container_name: spec.container_name.clone(),
                    container_id: Some(id),
                });
            }
            Ok(Err(e)) => classify(&e, true),
            Err(_) => RuntimeError::LaunchFailed(format!(
                "container did not start within {}",
                humantime::format_duration(start_budget)
            )),
        };

        // Nothing should be left behind by a failed start.
        if let Err(e) = container::remove_container(&self.docker, &spec.container_name, true).await
        {
            tracing::warn!(
                container = %spec.container_name,
                error = %format!("{e:#}"),
                "failed to remove container after failed start"
            );
        }
        Err(error)
    }

    async fn stop(&self, token: &RuntimeToken) -> Result<StopOutcome, RuntimeError> {
        let state = container::inspect_state(&self.docker, token.reference())
            .await
            .map_err(|e| classify(&e, false))?;
        if !container::runtime_status(state.as_ref()).is_alive() {
            return Ok(StopOutcome::AlreadyStopped);
        }

        let grace = self.config.stop_grace_secs;
        let grace_i32 = i32::try_from(grace).unwrap_or(i32::MAX);
        match tokio::time::timeout(
            Duration::from_secs(grace) + STOP_SLACK,
            container::stop_container(&self.docker, token.reference(), grace_i32),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let err = classify(&e, false);
                if matches!(err, RuntimeError::Unavailable(_)) {
                    return Err(err);
                }
                tracing::warn!(
                    container = %token.container_name,
                    error = %format!("{e:#}"),
                    "graceful stop failed"
                );
            }
            Err(_) => {
                tracing::warn!(container = %token.container_name, "stop request timed out");
            }
        }

        let outcome = self.confirm_stopped(token).await?;
        if outcome == StopOutcome::Killed {
            tracing::warn!(
                container = %token.container_name,
                grace_secs = grace,
                "container did not exit within grace period and was killed"
            );
        }
        Ok(outcome)
    }

    async fn status(&self, token: &RuntimeToken) -> Result<RuntimeStatus, RuntimeError> {
        let state = container::inspect_state(&self.docker, token.reference())
            .await
            .map_err(|e| classify(&e, false))?;
        Ok(container::runtime_status(state.as_ref()))
    }

    async fn running_services(&self) -> Result<Vec<RunningContainer>, RuntimeError> {
        let summaries = container::list_running(&self.docker)
            .await
            .map_err(|e| classify(&e, false))?;

        Ok(summaries
            .into_iter()
            .filter_map(|summary| {
                let labels = summary.labels.as_ref()?;
                let identifier = labels.get(LABEL_SERVICE).cloned()?;
                let other_project = match labels.get(LABEL_PROJECT) {
                    Some(slug) if *slug == self.slug => None,
                    Some(slug) => Some(slug.clone()),
                    None => Some("unlabelled".to_string()),
                };
                let container_name = summary
                    .names
                    .as_ref()
                    .and_then(|names| names.first())
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_default();
                Some(RunningContainer {
                    identifier,
                    token: RuntimeToken {
                        container_name,
                        container_id: summary.id,
                    },
                    other_project,
                })
            })
            .collect())
    }

    async fn logs(
        &self,
        token: &RuntimeToken,
        max_lines: usize,
    ) -> Result<Vec<String>, RuntimeError> {
        container::tail_logs(&self.docker, token.reference(), max_lines)
            .await
            .map_err(|e| classify(&e, false))
    }

    async fn resource_usage(&self) -> Result<ResourceUsage, RuntimeError> {
        gpu::query(&self.config.nvidia_smi, NVIDIA_SMI_TIMEOUT)
            .await
            .map_err(|e| RuntimeError::Failed(format!("{e:#}")))
    }
}

/// Sort a Docker failure into the runtime taxonomy. Daemon answers become
/// `ResourceExhausted` when they mention capacity, otherwise `LaunchFailed`
/// (during start) or `Failed`; anything that never reached the daemon is
/// `Unavailable`.
pub fn classify(err: &anyhow::Error, launching: bool) -> RuntimeError {
    let detail = format!("{err:#}");
    let server_message = err.chain().find_map(|cause| {
        match cause.downcast_ref::<bollard::errors::Error>() {
            Some(bollard::errors::Error::DockerResponseServerError { message, .. }) => {
                Some(message.clone())
            }
            _ => None,
        }
    });
    let reached_daemon = server_message.is_some()
        || !err
            .chain()
            .any(|cause| cause.downcast_ref::<bollard::errors::Error>().is_some());

    let lowered = detail.to_lowercase();
    if EXHAUSTION_MARKERS.iter().any(|m| lowered.contains(m)) {
        return RuntimeError::ResourceExhausted(server_message.unwrap_or(detail));
    }
    if !reached_daemon {
        return RuntimeError::Unavailable(detail);
    }
    if launching {
        RuntimeError::LaunchFailed(detail)
    } else {
        RuntimeError::Failed(detail)
    }
}
