use serde::{de, Deserialize, Deserializer};
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
pub struct SlotConfig {
    pub project: ProjectConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

#[derive(Debug, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    #[serde(default)]
    pub env_file: Option<String>,
    /// Directory holding `active.json`; defaults to `.llmslot` next to the config.
    #[serde(default)]
    pub state_dir: Option<String>,
    /// Host-wide transition lock; defaults to `~/.llmslot/slot.lock`.
    #[serde(default)]
    pub lock_file: Option<String>,
}

fn default_stop_grace_secs() -> u64 {
    10
}

fn default_start_timeout_secs() -> u64 {
    60
}

fn default_pull_timeout_secs() -> u64 {
    1800
}

fn default_nvidia_smi() -> String {
    "nvidia-smi".to_string()
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RuntimeConfig {
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,
    #[serde(default = "default_start_timeout_secs")]
    pub start_timeout_secs: u64,
    #[serde(default = "default_pull_timeout_secs")]
    pub pull_timeout_secs: u64,
    #[serde(default = "default_nvidia_smi")]
    pub nvidia_smi: String,
    #[serde(default)]
    pub network: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            stop_grace_secs: default_stop_grace_secs(),
            start_timeout_secs: default_start_timeout_secs(),
            pull_timeout_secs: default_pull_timeout_secs(),
            nvidia_smi: default_nvidia_smi(),
            network: None,
        }
    }
}

fn default_container_port() -> u16 {
    8000
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ServiceConfig {
    pub name: String,
    pub image: String,
    pub model: String,
    pub port: u16,
    #[serde(default = "default_container_port")]
    pub container_port: u16,
    #[serde(default)]
    pub container_name: Option<String>,
    #[serde(default)]
    pub served_model_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Display-only budget label such as "~13.2GB".
    #[serde(default)]
    pub gpu_memory: Option<String>,
    #[serde(default)]
    pub context_length: Option<u32>,
    #[serde(default)]
    pub command: Option<StringOrList>,
    #[serde(default)]
    pub entrypoint: Option<StringOrList>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub gpus: GpuRequest,
    #[serde(default)]
    pub shm_size_mb: Option<u64>,
    #[serde(default)]
    pub readiness: ReadinessConfig,
}

/// A value that can be either a single string or a list of strings.
/// When given a string, it is kept as a single-element list.
#[derive(Debug, Clone, PartialEq)]
pub struct StringOrList(pub Vec<String>);

impl StringOrList {
    pub fn into_vec(self) -> Vec<String> {
        self.0
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl<'de> Deserialize<'de> for StringOrList {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct StringOrListVisitor;

        impl<'de> de::Visitor<'de> for StringOrListVisitor {
            type Value = StringOrList;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a string or a list of strings")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<StringOrList, E> {
                Ok(StringOrList(vec![value.to_string()]))
            }

            fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<StringOrList, A::Error> {
                let mut values = Vec::new();
                while let Some(value) = seq.next_element::<String>()? {
                    values.push(value);
                }
                Ok(StringOrList(values))
            }
        }

        deserializer.deserialize_any(StringOrListVisitor)
    }
}

/// How many GPUs to hand to the container: `"all"` or a count (`0` disables
/// the device request entirely).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GpuRequest {
    #[default]
    All,
    Count(u32),
}

impl GpuRequest {
    /// Count in Docker's device-request convention, where `-1` means all.
    pub fn device_count(&self) -> Option<i64> {
        match self {
            GpuRequest::All => Some(-1),
            GpuRequest::Count(0) => None,
            GpuRequest::Count(n) => Some(i64::from(*n)),
        }
    }
}

impl<'de> Deserialize<'de> for GpuRequest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct GpuVisitor;

        impl<'de> de::Visitor<'de> for GpuVisitor {
            type Value = GpuRequest;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(f, "a GPU count or the string \"all\"")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                u32::try_from(v)
                    .map(GpuRequest::Count)
                    .map_err(|_| E::custom(format!("gpu count {v} out of range")))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                u32::try_from(v)
                    .map(GpuRequest::Count)
                    .map_err(|_| E::custom(format!("gpu count {v} out of range")))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                if v == "all" {
                    Ok(GpuRequest::All)
                } else {
                    Err(E::custom(format!("expected \"all\" but got \"{v}\"")))
                }
            }
        }

        deserializer.deserialize_any(GpuVisitor)
    }
}

fn default_probe_path() -> String {
    "/v1/models".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_readiness_timeout_ms() -> u64 {
    120_000
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ReadinessConfig {
    /// Path appended to `http://localhost:<port>` when `url` is not set.
    #[serde(default = "default_probe_path")]
    pub path: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_readiness_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            path: default_probe_path(),
            url: None,
            poll_interval_ms: default_poll_interval_ms(),
            timeout_ms: default_readiness_timeout_ms(),
        }
    }
}

impl ReadinessConfig {
    pub fn probe_url(&self, host_port: u16) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => {
                let path = if self.path.starts_with('/') {
                    self.path.clone()
                } else {
                    format!("/{}", self.path)
                };
                format!("http://localhost:{}{}", host_port, path)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let toml = r#"
            [project]
            name = "test"
        "#;
        let config: SlotConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.project.name, "test");
        assert!(config.services.is_empty());
        assert_eq!(config.runtime, RuntimeConfig::default());
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
            [project]
            name = "agents"
            state_dir = "/var/lib/llmslot"

            [runtime]
            stop_grace_secs = 20
            network = "llm-net"

            [[services]]
            name = "architect"
            image = "vllm/vllm-openai:v0.6.3"
            model = "Qwen/Qwen2.5-32B-Instruct"
            port = 8000
            gpu_memory = "~13.2GB"
            context_length = 32768
            command = ["--model", "Qwen/Qwen2.5-32B-Instruct", "--max-model-len", "32768"]
            volumes = ["~/models:/models"]

            [services.env]
            VLLM_GPU_MEMORY_UTILIZATION = "0.85"

            [services.readiness]
            poll_interval_ms = 1000
            timeout_ms = 90000

            [[services]]
            name = "po"
            image = "vllm/vllm-openai:v0.6.3"
            model = "Qwen/Qwen2.5-7B-Instruct"
            port = 8002
            gpus = 1
        "#;
        let config: SlotConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.project.state_dir.as_deref(), Some("/var/lib/llmslot"));
        assert_eq!(config.runtime.stop_grace_secs, 20);
        assert_eq!(config.runtime.start_timeout_secs, 60);
        assert_eq!(config.runtime.network.as_deref(), Some("llm-net"));
        assert_eq!(config.services.len(), 2);

        let architect = &config.services[0];
        assert_eq!(architect.name, "architect");
        assert_eq!(architect.container_port, 8000);
        assert_eq!(architect.gpus, GpuRequest::All);
        assert_eq!(architect.command.as_ref().unwrap().as_slice().len(), 4);
        assert_eq!(architect.env["VLLM_GPU_MEMORY_UTILIZATION"], "0.85");
        assert_eq!(architect.readiness.poll_interval_ms, 1000);
        assert_eq!(architect.readiness.path, "/v1/models");

        let po = &config.services[1];
        assert_eq!(po.name, "po");
        assert_eq!(po.gpus, GpuRequest::Count(1));
        assert_eq!(po.readiness, ReadinessConfig::default());
    }

    #[test]
    fn services_keep_declaration_order() {
        let toml = r#"
            [project]
            name = "order"

            [[services]]
            name = "zeta"
            image = "img"
            model = "m"
            port = 9000

            [[services]]
            name = "alpha"
            image = "img"
            model = "m"
            port = 9001
        "#;
        let config: SlotConfig = toml::from_str(toml).unwrap();
        let names: Vec<&str> = config.services.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let toml = r#"
            [project]
            name = "broken"

            [[services]]
            name = "dev"
            image = "img"
            port = 8001
        "#;
        let err = toml::from_str::<SlotConfig>(toml).unwrap_err();
        assert!(err.to_string().contains("model"), "got: {err}");
    }

    #[test]
    fn gpu_request_parsing() {
        #[derive(Deserialize)]
        struct Wrapper {
            gpus: GpuRequest,
        }
        let all: Wrapper = toml::from_str(r#"gpus = "all""#).unwrap();
        assert_eq!(all.gpus, GpuRequest::All);
        assert_eq!(all.gpus.device_count(), Some(-1));

        let none: Wrapper = toml::from_str("gpus = 0").unwrap();
        assert_eq!(none.gpus.device_count(), None);

        let two: Wrapper = toml::from_str("gpus = 2").unwrap();
        assert_eq!(two.gpus.device_count(), Some(2));

        assert!(toml::from_str::<Wrapper>(r#"gpus = "some""#).is_err());
        assert!(toml::from_str::<Wrapper>("gpus = -3").is_err());
    }

    #[test]
    fn command_accepts_single_string() {
        #[derive(Deserialize)]
        struct Wrapper {
            command: StringOrList,
        }
        let w: Wrapper = toml::from_str(r#"command = "serve""#).unwrap();
        assert_eq!(w.command.into_vec(), vec!["serve".to_string()]);
    }

    #[test]
    fn probe_url_defaults_to_models_endpoint() {
        let readiness = ReadinessConfig::default();
        assert_eq!(readiness.probe_url(8001), "http://localhost:8001/v1/models");

        let relative = ReadinessConfig {
            path: "health".to_string(),
            ..Default::default()
        };
        assert_eq!(relative.probe_url(9000), "http://localhost:9000/health");

        let explicit = ReadinessConfig {
            url: Some("http://gpu-box:8000/v1/models".to_string()),
            ..Default::default()
        };
        assert_eq!(explicit.probe_url(8000), "http://gpu-box:8000/v1/models");
    }
}
