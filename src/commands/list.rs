use anyhow::Result;
use std::path::Path;

use crate::commands::load_project;
use crate::orchestrator::state::StateStore;
use crate::ui::summary;

/// Catalog in configuration order. The active marker comes from the
/// persisted record, so this works without Docker.
pub fn run(config_file: Option<&Path>, verbose: bool) -> Result<()> {
    let project = load_project(config_file)?;
    let recorded = StateStore::new(&project.state_dir)
        .load()
        .and_then(|record| record.current);
    summary::print_catalog(
        &project.catalog,
        recorded.as_deref(),
        verbose,
        &project.secrets,
    );
    Ok(())
}
