use anyhow::{Context, Result};
use bollard::models::{
    ContainerCreateBody, ContainerState, ContainerStateStatusEnum, DeviceRequest, HostConfig,
    PortBinding,
};
use bollard::query_parameters::{
    CreateContainerOptions, InspectContainerOptions, KillContainerOptions, ListContainersOptions,
    LogsOptions, RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::Docker;
use futures_util::StreamExt;
use std::collections::HashMap;

use crate::catalog::LaunchSpec;
use crate::identity::LABEL_SERVICE;
use crate::runtime::RuntimeStatus;

fn is_status(err: &bollard::errors::Error, codes: &[u16]) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError { status_code, .. }
            if codes.contains(status_code)
    )
}

/// Translate a launch spec into the container create body.
pub fn create_body(spec: &LaunchSpec, network: Option<&str>) -> ContainerCreateBody {
    let env: Vec<String> = spec
        .env
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();

    let container_port_key = format!("{}/tcp", spec.container_port);
    let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::from([(
        container_port_key.clone(),
        Some(vec![PortBinding {
            host_ip: Some("0.0.0.0".to_string()),
            host_port: Some(spec.host_port.to_string()),
        }]),
    )]);

    let device_requests = spec.gpus.device_count().map(|count| {
        vec![DeviceRequest {
            driver: Some("nvidia".to_string()),
            count: Some(count),
            capabilities: Some(vec![vec!["gpu".to_string()]]),
            ..Default::default()
        }]
    });

    let host_config = HostConfig {
        port_bindings: Some(port_bindings),
        binds: Some(spec.volumes.clone()),
        network_mode: network.map(str::to_string),
        device_requests,
        shm_size: spec.shm_size_bytes,
        ..Default::default()
    };

    ContainerCreateBody {
        image: Some(spec.image.clone()),
        env: Some(env),
        exposed_ports: Some(vec![container_port_key]),
        host_config: Some(host_config),
        labels: Some(spec.labels.clone()),
        cmd: if spec.command.is_empty() {
            None
        } else {
            Some(spec.command.clone())
        },
        entrypoint: spec.entrypoint.clone(),
        ..Default::default()
    }
}

/// Create the container for a launch spec, replacing any stale container
/// with the same name. Returns the container ID.
pub async fn create_container(
    docker: &Docker,
    spec: &LaunchSpec,
    network: Option<&str>,
) -> Result<String> {
    let options = CreateContainerOptions {
        name: Some(spec.container_name.clone()),
        ..Default::default()
    };

    remove_container(docker, &spec.container_name, true)
        .await
        .with_context(|| format!("removing stale container {}", spec.container_name))?;

    let response = docker
        .create_container(Some(options), create_body(spec, network))
        .await
        .with_context(|| format!("creating container {}", spec.container_name))?;

    tracing::debug!(
        container = %spec.container_name,
        id = %response.id,
        "container created"
    );

    Ok(response.id)
}

/// Start a container by ID.
pub async fn start_container(docker: &Docker, container_id: &str) -> Result<()> {
    docker
        .start_container(container_id, None::<StartContainerOptions>)
        .await
        .with_context(|| format!("starting container {}", container_id))?;
    Ok(())
}

/// Stop a container by name or ID. Docker sends SIGKILL itself once
/// `timeout_secs` elapses.
pub async fn stop_container(docker: &Docker, container: &str, timeout_secs: i32) -> Result<()> {
    let options = StopContainerOptions {
        t: Some(timeout_secs),
        signal: None,
    };
    match docker.stop_container(container, Some(options)).await {
        Ok(()) => Ok(()),
        // 304: already stopped, 404: gone
        Err(e) if is_status(&e, &[304, 404]) => Ok(()),
        Err(e) => Err(e).with_context(|| format!("stopping container {}", container)),
    }
}

/// Send SIGKILL. Missing or already-stopped containers are not an error.
pub async fn kill_container(docker: &Docker, container: &str) -> Result<()> {
    match docker
        .kill_container(container, None::<KillContainerOptions>)
        .await
    {
        Ok(()) => Ok(()),
        Err(e) if is_status(&e, &[404, 409]) => Ok(()),
        Err(e) => Err(e).with_context(|| format!("killing container {}", container)),
    }
}

/// Remove a container by name or ID.
pub async fn remove_container(docker: &Docker, container: &str, force: bool) -> Result<()> {
    let options = RemoveContainerOptions {
        force,
        ..Default::default()
    };
    match docker.remove_container(container, Some(options)).await {
        Ok(()) => Ok(()),
        Err(e) if is_status(&e, &[404]) => Ok(()),
        Err(e) => Err(e).with_context(|| format!("removing container {}", container)),
    }
}

/// Inspect a container's state. `None` when the container does not exist.
pub async fn inspect_state(docker: &Docker, container: &str) -> Result<Option<ContainerState>> {
    match docker
        .inspect_container(container, None::<InspectContainerOptions>)
        .await
    {
        Ok(info) => Ok(Some(info.state.unwrap_or_default())),
        Err(e) if is_status(&e, &[404]) => Ok(None),
        Err(e) => Err(e).with_context(|| format!("inspecting container {}", container)),
    }
}

/// Map inspected state to the runtime-neutral status.
pub fn runtime_status(state: Option<&ContainerState>) -> RuntimeStatus {
    let Some(state) = state else {
        return RuntimeStatus::Exited {
            code: None,
            oom_killed: false,
        };
    };
    match state.status {
        Some(ContainerStateStatusEnum::RUNNING) => RuntimeStatus::Running,
        Some(ContainerStateStatusEnum::CREATED) | Some(ContainerStateStatusEnum::RESTARTING) => {
            RuntimeStatus::Starting
        }
        Some(ContainerStateStatusEnum::EXITED) | Some(ContainerStateStatusEnum::DEAD) => {
            RuntimeStatus::Exited {
                code: state.exit_code,
                oom_killed: state.oom_killed.unwrap_or(false),
            }
        }
        _ if state.running == Some(true) => RuntimeStatus::Running,
        _ => RuntimeStatus::Unknown,
    }
}

/// List running llmslot containers on the host, whatever project started them.
pub async fn list_running(docker: &Docker) -> Result<Vec<bollard::models::ContainerSummary>> {
    let filters = HashMap::from([
        ("label".to_string(), vec![LABEL_SERVICE.to_string()]),
        ("status".to_string(), vec!["running".to_string()]),
    ]);
    let options = ListContainersOptions {
        all: false,
        filters: Some(filters),
        ..Default::default()
    };
    docker
        .list_containers(Some(options))
        .await
        .context("listing managed containers")
}

/// Fetch the last `max_lines` lines of stdout and stderr, oldest first.
pub async fn tail_logs(docker: &Docker, container: &str, max_lines: usize) -> Result<Vec<String>> {
    let options = LogsOptions {
        follow: false,
        stdout: true,
        stderr: true,
        tail: max_lines.to_string(),
        ..Default::default()
    };

    let mut text = String::new();
    let mut stream = docker.logs(container, Some(options));
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(output) => text.push_str(&output.to_string()),
            Err(e) if is_status(&e, &[404]) => {
                anyhow::bail!("container {} does not exist", container)
            }
            Err(e) => return Err(e).with_context(|| format!("reading logs of {}", container)),
        }
    }

    Ok(last_lines(&text, max_lines))
}

fn last_lines(text: &str, max_lines: usize) -> Vec<String> {
    let lines: Vec<&str> = text.lines().collect();
    let skip = lines.len().saturating_sub(max_lines);
    lines[skip..].iter().map(|l| l.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::GpuRequest;
    use crate::identity::LABEL_PROJECT;
    use std::collections::BTreeMap;

    fn spec() -> LaunchSpec {
        LaunchSpec {
            image: "vllm/vllm-openai:v0.6.3".to_string(),
            container_name: "llmslot-agents-1234abcd-dev".to_string(),
            command: vec!["--model".to_string(), "Qwen/Qwen2.5-Coder".to_string()],
            entrypoint: None,
            env: BTreeMap::from([("HF_HOME".to_string(), "/models".to_string())]),
            volumes: vec!["/srv/models:/models".to_string()],
            host_port: 8001,
            container_port: 8000,
            gpus: GpuRequest::All,
            shm_size_bytes: Some(1 << 30),
            labels: HashMap::from([(LABEL_PROJECT.to_string(), "agents-1234abcd".to_string())]),
        }
    }

    #[test]
    fn create_body_binds_port_and_gpu() {
        let body = create_body(&spec(), Some("llm-net"));
        let host = body.host_config.unwrap();

        let bindings = host.port_bindings.unwrap();
        let binding = bindings["8000/tcp"].as_ref().unwrap();
        assert_eq!(binding[0].host_port.as_deref(), Some("8001"));

        let devices = host.device_requests.unwrap();
        assert_eq!(devices[0].driver.as_deref(), Some("nvidia"));
        assert_eq!(devices[0].count, Some(-1));
        assert_eq!(
            devices[0].capabilities,
            Some(vec![vec!["gpu".to_string()]])
        );

        assert_eq!(host.network_mode.as_deref(), Some("llm-net"));
        assert_eq!(host.shm_size, Some(1 << 30));
        assert_eq!(body.env.unwrap(), vec!["HF_HOME=/models".to_string()]);
        assert_eq!(body.cmd.unwrap().len(), 2);
    }

    #[test]
    fn create_body_without_gpu_or_command() {
        let mut spec = spec();
        spec.gpus = GpuRequest::Count(0);
        spec.command.clear();
        let body = create_body(&spec, None);
        let host = body.host_config.unwrap();
        assert!(host.device_requests.is_none());
        assert!(host.network_mode.is_none());
        assert!(body.cmd.is_none());
    }

    #[test]
    fn status_mapping() {
        assert_eq!(
            runtime_status(None),
            RuntimeStatus::Exited {
                code: None,
                oom_killed: false
            }
        );

        let running = ContainerState {
            status: Some(ContainerStateStatusEnum::RUNNING),
            running: Some(true),
            ..Default::default()
        };
        assert_eq!(runtime_status(Some(&running)), RuntimeStatus::Running);

        let oom = ContainerState {
            status: Some(ContainerStateStatusEnum::EXITED),
            exit_code: Some(137),
            oom_killed: Some(true),
            ..Default::default()
        };
        assert_eq!(
            runtime_status(Some(&oom)),
            RuntimeStatus::Exited {
                code: Some(137),
                oom_killed: true
            }
        );

        let created = ContainerState {
            status: Some(ContainerStateStatusEnum::CREATED),
            ..Default::default()
        };
        assert_eq!(runtime_status(Some(&created)), RuntimeStatus::Starting);
    }

    #[test]
    fn last_lines_keeps_tail_in_order() {
        let text = "one\ntwo\nthree\nfour\n";
        assert_eq!(last_lines(text, 2), vec!["three", "four"]);
        assert_eq!(last_lines(text, 10).len(), 4);
        assert!(last_lines("", 5).is_empty());
    }
}
