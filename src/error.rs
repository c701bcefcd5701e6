// The miette/thiserror derive macros generate code that triggers false
// positive unused_assignments warnings on enum variant fields.
#![allow(unused_assignments)]

use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

/// Failures reported by the lifecycle manager to its callers.
///
/// Every variant names the service involved so the CLI can print a useful
/// message without extra context. Corrupted state files are never surfaced
/// here; they are logged and healed by reconciliation.
#[derive(Debug, Error, Diagnostic)]
pub enum SlotError {
    #[error("unknown service `{identifier}`")]
    #[diagnostic(code(llmslot::not_found))]
    NotFound {
        identifier: String,
        #[help]
        advice: Option<String>,
    },

    #[error("cannot launch `{requested}`: `{active}` is already active")]
    #[diagnostic(
        code(llmslot::already_active),
        help("stop it first, or use `llmslot switch` to replace it")
    )]
    AlreadyActive { active: String, requested: String },

    #[error("another transition is in progress: {detail}")]
    #[diagnostic(code(llmslot::operation_in_progress))]
    OperationInProgress { detail: String },

    #[error("container runtime unavailable{}: {reason}", for_service(.identifier))]
    #[diagnostic(
        code(llmslot::runtime_unavailable),
        help("is the Docker daemon running? try `llmslot doctor`")
    )]
    RuntimeUnavailable {
        identifier: Option<String>,
        reason: String,
    },

    #[error("insufficient resources to start `{identifier}`: {reason}")]
    #[diagnostic(code(llmslot::resource_exhausted))]
    ResourceExhausted { identifier: String, reason: String },

    #[error("failed to launch `{identifier}`: {reason}")]
    #[diagnostic(code(llmslot::launch_failed))]
    LaunchFailed { identifier: String, reason: String },

    #[error(
        "`{identifier}` did not become ready: timed out after {} (budget {})",
        fmt_duration(.elapsed),
        fmt_duration(.budget)
    )]
    #[diagnostic(
        code(llmslot::timed_out),
        help("check `llmslot logs <service>`; large models may need a longer readiness.timeout_ms")
    )]
    TimedOut {
        identifier: String,
        elapsed: Duration,
        budget: Duration,
    },

    #[error("launch of `{identifier}` was cancelled")]
    #[diagnostic(code(llmslot::cancelled))]
    Cancelled { identifier: String },

    #[error("runtime operation on `{identifier}` failed: {reason}")]
    #[diagnostic(code(llmslot::runtime_failed))]
    RuntimeFailed { identifier: String, reason: String },

    #[error("cleanup of `{identifier}` failed, container state is unknown: {reason}")]
    #[diagnostic(
        code(llmslot::cleanup_failed),
        help("inspect the container manually, then run `llmslot stop`")
    )]
    CleanupFailed { identifier: String, reason: String },

    #[error(transparent)]
    #[diagnostic(code(llmslot::other))]
    Other(#[from] anyhow::Error),
}

fn for_service(identifier: &Option<String>) -> String {
    match identifier {
        Some(id) => format!(" while handling `{id}`"),
        None => String::new(),
    }
}

fn fmt_duration(d: &Duration) -> String {
    humantime::format_duration(Duration::from_secs(d.as_secs())).to_string()
}

impl SlotError {
    /// The service identifier this error is about, if any.
    pub fn identifier(&self) -> Option<&str> {
        match self {
            SlotError::NotFound { identifier, .. }
            | SlotError::ResourceExhausted { identifier, .. }
            | SlotError::LaunchFailed { identifier, .. }
            | SlotError::TimedOut { identifier, .. }
            | SlotError::Cancelled { identifier }
            | SlotError::RuntimeFailed { identifier, .. }
            | SlotError::CleanupFailed { identifier, .. } => Some(identifier),
            SlotError::AlreadyActive { requested, .. } => Some(requested),
            SlotError::RuntimeUnavailable { identifier, .. } => identifier.as_deref(),
            SlotError::OperationInProgress { .. } | SlotError::Other(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timed_out_reports_elapsed_and_budget() {
        let err = SlotError::TimedOut {
            identifier: "dev".to_string(),
            elapsed: Duration::from_secs(120),
            budget: Duration::from_secs(120),
        };
        let msg = err.to_string();
        assert!(msg.contains("`dev`"), "got: {msg}");
        assert!(msg.contains("2m"), "got: {msg}");
    }

    #[test]
    fn runtime_unavailable_without_service() {
        let err = SlotError::RuntimeUnavailable {
            identifier: None,
            reason: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "container runtime unavailable: connection refused"
        );
        assert_eq!(err.identifier(), None);
    }

    #[test]
    fn already_active_names_requested_service() {
        let err = SlotError::AlreadyActive {
            active: "architect".to_string(),
            requested: "po".to_string(),
        };
        assert_eq!(err.identifier(), Some("po"));
        assert!(err.to_string().contains("`architect` is already active"));
    }
}
