#![allow(dead_code)]
use std::net::TcpListener;
use std::path::PathBuf;
use tempfile::TempDir;
use tokio::sync::{Mutex, MutexGuard};

use llmslot::identity::ProjectIdentity;

pub struct TestProject {
    pub dir: TempDir,
    pub config_path: PathBuf,
}

impl TestProject {
    pub fn new(config_toml: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("llmslot.toml");
        std::fs::write(&config_path, config_toml).unwrap();
        Self { dir, config_path }
    }

    pub fn config_arg(&self) -> &str {
        self.config_path.to_str().unwrap()
    }

    /// Slug used in container names and labels.
    pub fn slug(&self, project_name: &str) -> String {
        ProjectIdentity::new(project_name, self.config_path.canonicalize().unwrap()).slug
    }

    pub fn recorded_service(&self) -> Option<String> {
        let path = self.dir.path().join(".llmslot/active.json");
        let content = std::fs::read_to_string(path).ok()?;
        let v: serde_json::Value = serde_json::from_str(&content).ok()?;
        v["current"].as_str().map(|s| s.to_string())
    }
}

static GPU_SLOT: Mutex<()> = Mutex::const_new(());

/// The slot is host-wide, so tests that launch containers take turns.
pub async fn exclusive_slot() -> MutexGuard<'static, ()> {
    GPU_SLOT.lock().await
}

/// Run the built binary against the project config.
pub async fn llmslot(project: &TestProject, args: &[&str]) -> std::process::Output {
    tokio::process::Command::new(env!("CARGO_BIN_EXE_llmslot"))
        .args(args)
        .args(["-f", project.config_arg()])
        .output()
        .await
        .expect("failed to run llmslot")
}

pub fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

pub fn free_ports(count: usize) -> Vec<u16> {
    // Bind all at once to avoid reuse, then drop
    let listeners: Vec<_> = (0..count)
        .map(|_| TcpListener::bind("127.0.0.1:0").unwrap())
        .collect();
    let ports: Vec<_> = listeners
        .iter()
        .map(|l| l.local_addr().unwrap().port())
        .collect();
    drop(listeners);
    ports
}

/// Two cheap services and two that never become ready. No GPU needed.
pub fn lifecycle_config(name: &str, ports: &[u16]) -> String {
    format!(
        r#"
[project]
name = "{name}"
lock_file = ".llmslot/slot.lock"

[runtime]
stop_grace_secs = 2

[[services]]
name = "a"
image = "python:3.12-alpine"
model = "test/a"
port = {pa}
gpus = 0
command = ["python", "-m", "http.server", "8000"]

[services.readiness]
path = "/"
poll_interval_ms = 200
timeout_ms = 60000

[[services]]
name = "b"
image = "python:3.12-alpine"
model = "test/b"
port = {pb}
gpus = 0
command = ["python", "-m", "http.server", "8000"]

[services.readiness]
path = "/"
poll_interval_ms = 200
timeout_ms = 60000

[[services]]
name = "slow"
image = "alpine:3.20"
model = "test/slow"
port = {pc}
gpus = 0
entrypoint = ["sleep"]
command = ["300"]

[services.readiness]
poll_interval_ms = 200
timeout_ms = 2000

[[services]]
name = "oom"
image = "alpine:3.20"
model = "test/oom"
port = {pd}
gpus = 0
entrypoint = ["sh", "-c"]
command = ["echo 'torch.OutOfMemoryError: CUDA out of memory'; exit 1"]

[services.readiness]
poll_interval_ms = 200
timeout_ms = 30000
"#,
        pa = ports[0],
        pb = ports[1],
        pc = ports[2],
        pd = ports[3],
    )
}

/// Whether a container with this name is running, via the Docker CLI.
pub fn container_running(name: &str) -> bool {
    std::process::Command::new("docker")
        .args(["inspect", "-f", "{{.State.Running}}", name])
        .output()
        .map(|o| String::from_utf8_lossy(&o.stdout).trim() == "true")
        .unwrap_or(false)
}

/// Remove containers by label as a fallback after a test.
/// Uses Docker CLI directly so it works even if llmslot state is corrupted.
pub fn docker_cleanup(slug: &str) {
    let output = std::process::Command::new("docker")
        .args([
            "ps",
            "-a",
            "--filter",
            &format!("label=llmslot.project={}", slug),
            "--format",
            "{{.ID}}",
        ])
        .output();
    if let Ok(output) = output {
        let ids = String::from_utf8_lossy(&output.stdout);
        for id in ids.lines().filter(|l| !l.is_empty()) {
            let _ = std::process::Command::new("docker")
                .args(["rm", "-f", id])
                .output();
        }
    }
}
