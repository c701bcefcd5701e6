use anyhow::Result;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::commands::load_project;
use crate::orchestrator::{LifecycleManager, SlotState};
use crate::ui::summary;

/// Cancel `token` on the first Ctrl+C. The launch in progress then stops its
/// container before returning.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, cleaning up");
            trigger.cancel();
        }
    });
    token
}

/// Print starting/stopping lines as the slot moves. Abort the handle once the
/// operation returns.
fn follow_progress(manager: &LifecycleManager) -> tokio::task::JoinHandle<()> {
    let mut states = manager.subscribe();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = states.borrow_and_update().clone();
            summary::print_progress(&state);
        }
    })
}

pub async fn run_launch(config_file: Option<&Path>, service: &str) -> Result<()> {
    let project = load_project(config_file)?;
    // Unknown names fail before touching Docker
    let definition = project.catalog.lookup(service)?.clone();

    let manager = project.open_manager().await?;
    let cancel = cancel_on_ctrl_c();
    let progress = follow_progress(&manager);
    let launched = manager.launch(service, &cancel).await;
    progress.abort();
    launched?;

    summary::print_ready(&definition);
    Ok(())
}

pub async fn run_switch(config_file: Option<&Path>, service: &str) -> Result<()> {
    let project = load_project(config_file)?;
    let definition = project.catalog.lookup(service)?.clone();

    let manager = project.open_manager().await?;
    let previous = manager.current();
    let cancel = cancel_on_ctrl_c();
    let progress = follow_progress(&manager);
    let switched = manager.switch(service, &cancel).await;
    progress.abort();
    switched?;

    if previous.as_deref() == Some(service) {
        println!("{} is already active", service);
    } else {
        summary::print_ready(&definition);
    }
    Ok(())
}

pub async fn run_stop(config_file: Option<&Path>, service: Option<&str>, all: bool) -> Result<()> {
    let project = load_project(config_file)?;
    if let Some(id) = service {
        project.catalog.lookup(id)?;
    }

    let manager = project.open_manager().await?;
    let progress = follow_progress(&manager);
    let stopped = if all {
        manager.stop_all().await
    } else {
        manager.stop_matching(service).await
    };
    progress.abort();
    let stopped = stopped?;

    match (stopped.is_empty(), service) {
        (false, _) => {
            for id in &stopped {
                println!("Stopped {}", id);
            }
        }
        (true, Some(id)) => match manager.state() {
            SlotState::Active(handle) => {
                println!("{} is not running ({} is active); nothing stopped", id, handle.identifier)
            }
            _ => println!("{} is not running", id),
        },
        (true, None) => println!("No service is running"),
    }
    Ok(())
}
