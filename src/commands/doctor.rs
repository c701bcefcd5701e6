use anyhow::Result;
use std::process::Command;

use crate::config::resolve::resolve_config;
use crate::platform::identify_port_owner;
use crate::project::Project;

pub fn run(config_file: Option<&std::path::Path>) -> Result<()> {
    println!("llmslot doctor");
    println!("==============");
    println!();

    // Loading the project is optional; doctor also runs outside a project.
    let project = resolve_config(config_file)
        .ok()
        .and_then(|path| Project::load(&path).ok());
    let nvidia_smi = project
        .as_ref()
        .map(|p| p.config.runtime.nvidia_smi.clone())
        .unwrap_or_else(|| "nvidia-smi".to_string());

    let checks: [(&str, &str, &[&str]); 3] = [
        ("docker", "docker", &["--version"]),
        ("docker daemon", "docker", &["info", "--format", "{{.ServerVersion}}"]),
        (
            "nvidia-smi",
            nvidia_smi.as_str(),
            &["--query-gpu=name,driver_version", "--format=csv,noheader"],
        ),
    ];

    let mut all_ok = true;

    for (label, bin, args) in &checks {
        match Command::new(bin).args(*args).output() {
            Ok(output) if output.status.success() => {
                let text = String::from_utf8_lossy(&output.stdout);
                let first = text.lines().next().unwrap_or("").trim().to_string();
                println!("  [ok] {:<16} {}", label, first);
            }
            Ok(output) => {
                let err = String::from_utf8_lossy(&output.stderr);
                println!(
                    "  [!!] {:<16} {}",
                    label,
                    err.lines().next().unwrap_or("failed").trim()
                );
                all_ok = false;
            }
            Err(_) => {
                println!("  [!!] {:<16} not found", label);
                all_ok = false;
            }
        }
    }

    if let Some(project) = &project {
        println!();
        println!("  Ports ({}):", project.identity.name);
        for service in project.catalog.iter() {
            let port = service.launch.host_port;
            let in_use = std::net::TcpListener::bind(("127.0.0.1", port)).is_err();
            if !in_use {
                println!("  [ok] {:<16} {} free", service.identifier, port);
                continue;
            }
            match identify_port_owner(port) {
                Some(owner) => println!("  [--] {:<16} {} in use by {}", service.identifier, port, owner),
                None => println!("  [--] {:<16} {} in use", service.identifier, port),
            }
        }
    }

    println!();
    if all_ok {
        println!("All checks passed.");
    } else {
        println!("Some checks failed. llmslot needs a running Docker daemon and the NVIDIA");
        println!("container toolkit to launch services.");
    }

    Ok(())
}
