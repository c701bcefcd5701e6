use anyhow::Result;
use std::path::Path;

use crate::commands::load_project;

pub async fn run(config_file: Option<&Path>, service: &str, lines: usize) -> Result<()> {
    let project = load_project(config_file)?;
    project.catalog.lookup(service)?;

    let manager = project.open_manager().await?;
    let tail = manager.logs(service, lines).await?;
    if tail.is_empty() {
        eprintln!("No logs for {} (has it been launched?)", service);
    }
    for line in tail {
        println!("{}", line);
    }
    Ok(())
}
