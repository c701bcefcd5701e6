use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::platform::is_process_alive;

const ACTIVE_FILE: &str = "active.json";
const TRANSITION_FILE: &str = "transition.json";

/// Which service holds the slot. Only `current` is authoritative; the rest is
/// diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveServiceRecord {
    pub current: Option<String>,
    pub since: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
}

impl ActiveServiceRecord {
    pub fn new(identifier: &str, container_id: Option<String>) -> Self {
        Self {
            current: Some(identifier.to_string()),
            since: Utc::now(),
            container_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Launch,
    Stop,
    Switch,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Launch => write!(f, "launch"),
            Operation::Stop => write!(f, "stop"),
            Operation::Switch => write!(f, "switch"),
        }
    }
}

/// Written while a transition runs so other processes can report it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionMarker {
    pub operation: Operation,
    pub identifier: Option<String>,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

impl TransitionMarker {
    pub fn new(operation: Operation, identifier: Option<&str>) -> Self {
        Self {
            operation,
            identifier: identifier.map(str::to_string),
            pid: std::process::id(),
            started_at: Utc::now(),
        }
    }
}

impl fmt::Display for TransitionMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.identifier {
            Some(id) => write!(f, "{} of `{}` by pid {}", self.operation, id, self.pid),
            None => write!(f, "{} by pid {}", self.operation, self.pid),
        }
    }
}

/// JSON files under the project state directory.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn state_dir_for(project_dir: &Path) -> PathBuf {
        project_dir.join(".llmslot")
    }

    /// The persisted record, or `None` when missing, empty, or unreadable.
    /// Unreadable files are moved aside so the next save starts clean.
    pub fn load(&self) -> Option<ActiveServiceRecord> {
        let record: ActiveServiceRecord = self.read_json(ACTIVE_FILE)?;
        record.current.as_ref()?;
        Some(record)
    }

    pub fn save(&self, record: &ActiveServiceRecord) -> anyhow::Result<()> {
        self.write_json(ACTIVE_FILE, record)
    }

    pub fn clear(&self) -> anyhow::Result<()> {
        self.remove(ACTIVE_FILE)
    }

    pub fn begin_transition(&self, marker: &TransitionMarker) -> anyhow::Result<()> {
        self.write_json(TRANSITION_FILE, marker)
    }

    pub fn end_transition(&self) -> anyhow::Result<()> {
        self.remove(TRANSITION_FILE)
    }

    /// The in-flight transition, ignoring markers left by dead processes.
    pub fn current_transition(&self) -> Option<TransitionMarker> {
        let marker: TransitionMarker = self.read_json(TRANSITION_FILE)?;
        if is_process_alive(marker.pid) {
            Some(marker)
        } else {
            tracing::debug!(pid = marker.pid, "ignoring stale transition marker");
            None
        }
    }

    fn read_json<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let path = self.dir.join(name);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "state file unreadable, ignoring");
                return None;
            }
        };
        if content.trim().is_empty() {
            return None;
        }
        match serde_json::from_str(&content) {
            Ok(value) => Some(value),
            Err(e) => {
                let aside = self.dir.join(format!("{name}.corrupt"));
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    moved_to = %aside.display(),
                    "state file corrupted, treating as empty"
                );
                let _ = std::fs::rename(&path, &aside);
                None
            }
        }
    }

    /// Atomic replace: write a temp file, fsync, rename over the target.
    fn write_json<T: Serialize>(&self, name: &str, value: &T) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating state directory {}", self.dir.display()))?;
        let path = self.dir.join(name);
        let tmp_path = self.dir.join(format!("{name}.tmp"));
        let content = serde_json::to_string_pretty(value)?;

        let mut file = std::fs::File::create(&tmp_path)
            .with_context(|| format!("creating {}", tmp_path.display()))?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&tmp_path, &path)
            .with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }

    fn remove(&self, name: &str) -> anyhow::Result<()> {
        let path = self.dir.join(name);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing {}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().join(".llmslot"));
        let record = ActiveServiceRecord::new("dev", Some("abc123".to_string()));
        store.save(&record).unwrap();

        assert_eq!(store.load(), Some(record));
        assert!(!dir.path().join(".llmslot/active.json.tmp").exists());
    }

    #[test]
    fn missing_file_loads_none() {
        let dir = tempdir().unwrap();
        assert_eq!(StateStore::new(dir.path()).load(), None);
    }

    #[test]
    fn clear_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.save(&ActiveServiceRecord::new("po", None)).unwrap();
        store.clear().unwrap();
        store.clear().unwrap();
        assert_eq!(store.load(), None);
    }

    #[test]
    fn null_current_loads_none() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(ACTIVE_FILE),
            r#"{"current": null, "since": "2025-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(StateStore::new(dir.path()).load(), None);
    }

    #[test]
    fn corrupted_file_is_moved_aside() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(ACTIVE_FILE), "{not json").unwrap();
        let store = StateStore::new(dir.path());

        assert_eq!(store.load(), None);
        assert!(!dir.path().join(ACTIVE_FILE).exists());
        assert!(dir.path().join("active.json.corrupt").exists());

        // Saving afterwards works normally
        store.save(&ActiveServiceRecord::new("dev", None)).unwrap();
        assert_eq!(store.load().unwrap().current.as_deref(), Some("dev"));
    }

    #[test]
    fn record_format_is_stable() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.save(&ActiveServiceRecord::new("architect", None)).unwrap();
        let raw = std::fs::read_to_string(dir.path().join(ACTIVE_FILE)).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["current"], "architect");
        assert!(json["since"].is_string());
        assert!(json.get("container_id").is_none());
    }

    #[test]
    fn live_transition_marker_is_visible() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let marker = TransitionMarker::new(Operation::Launch, Some("dev"));
        store.begin_transition(&marker).unwrap();
        assert_eq!(store.current_transition(), Some(marker));

        store.end_transition().unwrap();
        assert_eq!(store.current_transition(), None);
    }

    #[cfg(unix)]
    #[test]
    fn stale_transition_marker_is_ignored() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());

        let mut child = std::process::Command::new("true").spawn().unwrap();
        let dead_pid = child.id();
        child.wait().unwrap();

        let mut marker = TransitionMarker::new(Operation::Switch, Some("po"));
        marker.pid = dead_pid;
        store.begin_transition(&marker).unwrap();
        assert_eq!(store.current_transition(), None);
    }

    #[test]
    fn marker_display() {
        let mut marker = TransitionMarker::new(Operation::Stop, None);
        marker.pid = 42;
        assert_eq!(marker.to_string(), "stop by pid 42");
        marker.identifier = Some("dev".to_string());
        assert_eq!(marker.to_string(), "stop of `dev` by pid 42");
    }
}
