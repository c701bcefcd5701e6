use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::config::resolve::CONFIG_FILENAME;

pub fn run() -> Result<()> {
    let cwd = std::env::current_dir()?;
    let config_path = write_starter(&cwd)?;

    println!("Created {} in {}", CONFIG_FILENAME, cwd.display());
    println!();
    println!("  Services: architect, dev, po");
    println!();
    println!(
        "Edit {}, then run `llmslot launch <service>` to begin.",
        config_path.display()
    );
    Ok(())
}

/// Write a starter config into `dir`. Refuses to overwrite an existing one.
pub fn write_starter(dir: &Path) -> Result<PathBuf> {
    let config_path = dir.join(CONFIG_FILENAME);
    if config_path.exists() {
        anyhow::bail!("{} already exists in {}", CONFIG_FILENAME, dir.display());
    }

    let project_name = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "agents".to_string());

    std::fs::write(&config_path, starter_config(&project_name))?;
    Ok(config_path)
}

fn starter_config(project_name: &str) -> String {
    format!(
        r#"[project]
name = "{project_name}"
# env_file = ".env"              # HF_TOKEN and friends, referenced as $VAR below
# state_dir = ".llmslot"         # where the active service is recorded
# lock_file = "~/.llmslot/slot.lock"

# -- Container runtime --
# [runtime]
# stop_grace_secs = 10           # SIGTERM grace before the container is killed
# start_timeout_secs = 60        # create + start, excluding image pull
# pull_timeout_secs = 1800
# nvidia_smi = "nvidia-smi"
# network = "bridge"

# -- Services --
# Only one service runs at a time. Each gets its own host port so clients
# can be pointed at a stable URL per role.

[[services]]
name = "architect"
description = "System design and planning"
image = "vllm/vllm-openai:latest"
model = "Qwen/Qwen2.5-32B-Instruct-AWQ"
port = 8000
gpu_memory = "~13.2GB"
context_length = 32768
command = ["--model", "Qwen/Qwen2.5-32B-Instruct-AWQ", "--max-model-len", "32768", "--gpu-memory-utilization", "0.90"]
volumes = ["~/.cache/huggingface:/root/.cache/huggingface"]
shm_size_mb = 8192
# [services.env]
# HUGGING_FACE_HUB_TOKEN = "$HF_TOKEN"

[[services]]
name = "dev"
description = "Code generation"
image = "vllm/vllm-openai:latest"
model = "Qwen/Qwen2.5-Coder-32B-Instruct-AWQ"
port = 8001
gpu_memory = "~14.8GB"
context_length = 32768
command = ["--model", "Qwen/Qwen2.5-Coder-32B-Instruct-AWQ", "--max-model-len", "32768", "--gpu-memory-utilization", "0.90"]
volumes = ["~/.cache/huggingface:/root/.cache/huggingface"]
shm_size_mb = 8192

[services.readiness]
timeout_ms = 600000              # large models take a while to load

[[services]]
name = "po"
description = "Requirements and user stories"
image = "vllm/vllm-openai:latest"
model = "Qwen/Qwen2.5-7B-Instruct"
port = 8002
gpu_memory = "~3.5GB"
context_length = 16384
command = ["--model", "Qwen/Qwen2.5-7B-Instruct", "--max-model-len", "16384"]
volumes = ["~/.cache/huggingface:/root/.cache/huggingface"]
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::validate::validate;
    use crate::identity::default_container_name;

    #[test]
    fn starter_config_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_starter(dir.path()).unwrap();

        let (config, source) = crate::config::load_config(&path).unwrap();
        let names: Vec<&str> = config.services.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["architect", "dev", "po"]);
        assert!(validate(&config, &source, CONFIG_FILENAME, |s| default_container_name(
            "x", s
        ))
        .is_ok());
    }

    #[test]
    fn refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        write_starter(dir.path()).unwrap();
        let err = write_starter(dir.path()).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }
}
