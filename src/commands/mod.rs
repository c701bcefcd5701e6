pub mod doctor;
pub mod init;
pub mod lifecycle;
pub mod list;
pub mod logs;
pub mod status;
pub mod test_api;
pub mod validate;

use anyhow::Result;
use std::path::Path;

use crate::config::resolve::resolve_config;
use crate::project::Project;

/// Resolve the config file and load the project.
pub fn load_project(config_file: Option<&Path>) -> Result<Project> {
    let config_path = resolve_config(config_file)?;
    Project::load(&config_path)
}
