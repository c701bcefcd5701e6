use anyhow::Result;
use owo_colors::OwoColorize;
use std::path::Path;

use crate::config;
use crate::config::resolve::resolve_config;
use crate::config::validate::validate;
use crate::identity::ProjectIdentity;
use crate::project::config_filename;

pub fn run(config_file: Option<&Path>) -> Result<()> {
    let config_path = resolve_config(config_file)?;

    let (config, source) = config::load_config(&config_path)?;
    let identity = ProjectIdentity::from_config(&config, &config_path)?;
    let filename = config_filename(&config_path);

    match validate(&config, &source, &filename, |service| {
        identity.default_container_name(service)
    }) {
        Ok(()) => {
            println!(
                "  {} {} is valid ({} services)",
                "\u{2713}".green(),
                filename,
                config.services.len(),
            );
            Ok(())
        }
        Err(errors) => {
            for err in errors {
                let report: miette::Report = err.into();
                eprintln!("{:?}", report);
            }
            std::process::exit(1);
        }
    }
}
