use anyhow::Result;
use std::path::Path;

use crate::commands::load_project;
use crate::runtime::gpu;
use crate::ui::summary;

pub async fn run_status(config_file: Option<&Path>) -> Result<()> {
    let project = load_project(config_file)?;
    let manager = project.open_manager().await?;
    let report = manager.status().await?;
    summary::print_status(&report, &project.catalog);
    Ok(())
}

/// Print only the active identifier, for scripts.
pub async fn run_current(config_file: Option<&Path>) -> Result<()> {
    let project = load_project(config_file)?;
    let manager = project.open_manager().await?;
    match manager.current() {
        Some(id) => println!("{}", id),
        None => eprintln!("No service is active"),
    }
    Ok(())
}

/// GPU statistics. Does not need Docker.
pub async fn run_resource_stats(config_file: Option<&Path>) -> Result<()> {
    let nvidia_smi = match load_project(config_file) {
        Ok(project) => project.config.runtime.nvidia_smi,
        Err(_) => "nvidia-smi".to_string(),
    };
    let usage = gpu::query(&nvidia_smi, std::time::Duration::from_secs(10)).await?;
    summary::print_resources(&usage);
    Ok(())
}
