use anyhow::Result;
use owo_colors::OwoColorize;
use std::path::Path;
use std::time::Duration;

use crate::commands::load_project;
use crate::probe::smoke_test;

pub async fn run(config_file: Option<&Path>, service: &str, timeout_secs: u64) -> Result<()> {
    let project = load_project(config_file)?;
    let definition = project.catalog.lookup(service)?;

    println!("Testing {} at {}", service, definition.api_base());
    let report = smoke_test(definition, Duration::from_secs(timeout_secs)).await?;

    println!("  models:  {}", report.models.join(", "));
    println!("  latency: {:?}", report.latency);
    println!("  reply:   {}", report.reply.trim());
    println!("  {} API is working", "\u{2713}".green());
    Ok(())
}
