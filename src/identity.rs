use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::config::model::SlotConfig;

/// Label keys stamped on every container llmslot creates.
pub const LABEL_PROJECT: &str = "llmslot.project";
pub const LABEL_SERVICE: &str = "llmslot.service";
pub const LABEL_MODEL: &str = "llmslot.model";

#[derive(Debug, Clone)]
pub struct ProjectIdentity {
    pub name: String,
    pub id: String,
    pub slug: String,
    pub config_path: PathBuf,
}

/// Compute a project ID by hashing the given path string with SHA-256
/// and returning the first 8 hex characters.
///
/// The path is hashed as given; callers canonicalize first.
pub fn compute_project_id(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    let hash = hasher.finalize();
    hex::encode(&hash[..4])
}

impl ProjectIdentity {
    /// Build a `ProjectIdentity` from a parsed config and its file path.
    pub fn from_config(config: &SlotConfig, config_path: &Path) -> anyhow::Result<Self> {
        let canonical = config_path.canonicalize()?;
        Ok(Self::new(&config.project.name, canonical))
    }

    pub fn new(name: &str, config_path: PathBuf) -> Self {
        let id = compute_project_id(&config_path);
        let slug = format!("{name}-{id}");
        Self {
            name: name.to_string(),
            id,
            slug,
            config_path,
        }
    }

    /// Container name used for a service that does not set `container_name`.
    pub fn default_container_name(&self, service: &str) -> String {
        default_container_name(&self.slug, service)
    }
}

pub fn default_container_name(slug: &str, service: &str) -> String {
    format!("llmslot-{slug}-{service}")
}
