use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::catalog::ServiceCatalog;
use crate::config::{self, model::SlotConfig, secrets, secrets::SecretRegistry, validate::validate};
use crate::identity::ProjectIdentity;
use crate::orchestrator::{lock::HostLock, state::StateStore, LifecycleManager};
use crate::platform::expand_home;
use crate::probe::HttpProbe;
use crate::runtime::{DockerRuntime, RuntimeError};

/// A loaded, validated project: everything needed to build a
/// [`LifecycleManager`] except the runtime connection.
pub struct Project {
    pub config: SlotConfig,
    pub identity: ProjectIdentity,
    pub catalog: ServiceCatalog,
    pub config_path: PathBuf,
    pub state_dir: PathBuf,
    pub lock_path: PathBuf,
    pub secrets: SecretRegistry,
}

impl Project {
    /// Load the config file, validate it, load the `.env` file and expand
    /// `$VAR` references, then build the service catalog.
    pub fn load(config_path: &Path) -> Result<Self> {
        let (mut config, source) = config::load_config(config_path)
            .with_context(|| format!("loading config from {}", config_path.display()))?;

        let identity = ProjectIdentity::from_config(&config, config_path)
            .context("computing project identity")?;

        let filename = config_filename(config_path);
        if let Err(errors) = validate(&config, &source, &filename, |service| {
            identity.default_container_name(service)
        }) {
            let mut msg = String::from("Configuration errors:\n");
            for err in &errors {
                msg.push_str(&format!("  - {}\n", err));
            }
            msg.push_str("run `llmslot validate` for details");
            bail!("{}", msg);
        }

        let config_dir = config_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        let env_vars = secrets::load_env_file(&config, &config_dir)?;
        let secrets = secrets::expand_config_env_vars(&mut config, &env_vars)?;

        let catalog = ServiceCatalog::from_config(&config, &identity)?;

        let state_dir = match &config.project.state_dir {
            Some(dir) => config_dir.join(expand_home(dir)),
            None => StateStore::state_dir_for(&config_dir),
        };
        let lock_path = match &config.project.lock_file {
            Some(path) => config_dir.join(expand_home(path)),
            None => HostLock::default_path()
                .unwrap_or_else(|| std::env::temp_dir().join("llmslot").join("slot.lock")),
        };

        Ok(Self {
            config,
            identity,
            catalog,
            config_path: config_path.to_path_buf(),
            state_dir,
            lock_path,
            secrets,
        })
    }

    /// Connect to Docker and reconcile the slot.
    pub async fn open_manager(&self) -> Result<LifecycleManager> {
        let runtime = DockerRuntime::connect(self.identity.slug.clone(), self.config.runtime.clone())
            .await
            .map_err(RuntimeError::into_host_error)?;
        let probe = HttpProbe::new()?;
        let manager = LifecycleManager::open(
            self.catalog.clone(),
            Arc::new(runtime),
            Arc::new(probe),
            StateStore::new(&self.state_dir),
            self.lock_path.clone(),
        )
        .await?;
        Ok(manager)
    }
}

/// File name shown in diagnostics.
pub fn config_filename(config_path: &Path) -> String {
    config_path
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| config::resolve::CONFIG_FILENAME.to_string())
}
