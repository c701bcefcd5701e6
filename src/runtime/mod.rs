pub mod container;
pub mod docker;
pub mod gpu;
pub mod image;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::catalog::ServiceDefinition;
use crate::error::SlotError;

pub use docker::DockerRuntime;

/// Opaque handle to a started container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeToken {
    pub container_name: String,
    pub container_id: Option<String>,
}

impl RuntimeToken {
    /// Token addressing a service's container by name only.
    pub fn for_service(service: &ServiceDefinition) -> Self {
        Self {
            container_name: service.launch.container_name.clone(),
            container_id: None,
        }
    }

    /// Name or ID accepted by the runtime API; the ID wins when known.
    pub fn reference(&self) -> &str {
        self.container_id
            .as_deref()
            .unwrap_or(self.container_name.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Exited within the grace period.
    Stopped,
    /// Had to be force-killed.
    Killed,
    /// Was not running (or did not exist).
    AlreadyStopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeStatus {
    Starting,
    Running,
    /// Not running. A container that does not exist reports `code: None`.
    Exited {
        code: Option<i64>,
        oom_killed: bool,
    },
    Unknown,
}

impl RuntimeStatus {
    pub fn is_alive(&self) -> bool {
        matches!(self, RuntimeStatus::Starting | RuntimeStatus::Running)
    }
}

impl fmt::Display for RuntimeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeStatus::Starting => write!(f, "starting"),
            RuntimeStatus::Running => write!(f, "running"),
            RuntimeStatus::Exited {
                oom_killed: true, ..
            } => write!(f, "exited (out of memory)"),
            RuntimeStatus::Exited { code: Some(c), .. } => write!(f, "exited ({c})"),
            RuntimeStatus::Exited { code: None, .. } => write!(f, "not found"),
            RuntimeStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// A managed container found running by label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningContainer {
    pub identifier: String,
    pub token: RuntimeToken,
    /// Project slug, when the container was started from another config.
    pub other_project: Option<String>,
}

impl RunningContainer {
    /// `service`, or `project/service` for another project's container.
    pub fn display_name(&self) -> String {
        match &self.other_project {
            Some(project) => format!("{}/{}", project, self.identifier),
            None => self.identifier.clone(),
        }
    }

    pub fn is_local(&self) -> bool {
        self.other_project.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpuUsage {
    pub index: u32,
    pub name: String,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub utilization_percent: u8,
}

/// Host-wide GPU snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceUsage {
    pub gpus: Vec<GpuUsage>,
    pub captured_at: DateTime<Utc>,
}

impl ResourceUsage {
    pub fn memory_used_bytes(&self) -> u64 {
        self.gpus.iter().map(|g| g.memory_used_bytes).sum()
    }

    pub fn memory_total_bytes(&self) -> u64 {
        self.gpus.iter().map(|g| g.memory_total_bytes).sum()
    }

    pub fn max_utilization_percent(&self) -> u8 {
        self.gpus
            .iter()
            .map(|g| g.utilization_percent)
            .max()
            .unwrap_or(0)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    ResourceExhausted(String),
    #[error("{0}")]
    LaunchFailed(String),
    #[error("{0}")]
    Failed(String),
}

impl RuntimeError {
    /// Attach the service identifier and lift into the caller-facing taxonomy.
    pub fn into_slot(self, identifier: &str) -> SlotError {
        let identifier = identifier.to_string();
        match self {
            RuntimeError::Unavailable(reason) => SlotError::RuntimeUnavailable {
                identifier: Some(identifier),
                reason,
            },
            RuntimeError::ResourceExhausted(reason) => {
                SlotError::ResourceExhausted { identifier, reason }
            }
            RuntimeError::LaunchFailed(reason) => SlotError::LaunchFailed { identifier, reason },
            RuntimeError::Failed(reason) => SlotError::RuntimeFailed { identifier, reason },
        }
    }

    /// Lift a failure not tied to any one service.
    pub fn into_host_error(self) -> SlotError {
        match self {
            RuntimeError::Unavailable(reason) => SlotError::RuntimeUnavailable {
                identifier: None,
                reason,
            },
            other => SlotError::Other(anyhow::anyhow!(other.to_string())),
        }
    }
}

/// Container runtime operations the lifecycle manager depends on.
#[async_trait]
pub trait RuntimeAdapter: Send + Sync {
    /// Create and start the service's container. Does not wait for readiness.
    async fn start(&self, service: &ServiceDefinition) -> Result<RuntimeToken, RuntimeError>;

    /// Stop gracefully, escalating to kill after the grace period. Returns
    /// only once the container is confirmed not running.
    async fn stop(&self, token: &RuntimeToken) -> Result<StopOutcome, RuntimeError>;

    async fn status(&self, token: &RuntimeToken) -> Result<RuntimeStatus, RuntimeError>;

    /// Managed containers currently running on this host, from any project.
    async fn running_services(&self) -> Result<Vec<RunningContainer>, RuntimeError>;

    /// Last `max_lines` log lines, oldest first.
    async fn logs(&self, token: &RuntimeToken, max_lines: usize)
        -> Result<Vec<String>, RuntimeError>;

    async fn resource_usage(&self) -> Result<ResourceUsage, RuntimeError>;
}
