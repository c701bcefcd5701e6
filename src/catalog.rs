use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use anyhow::bail;

use crate::config::model::{GpuRequest, ServiceConfig, SlotConfig};
use crate::config::validate::find_closest_match;
use crate::error::SlotError;
use crate::identity::{ProjectIdentity, LABEL_MODEL, LABEL_PROJECT, LABEL_SERVICE};
use crate::platform::expand_home;

/// Everything the runtime needs to create the container for one service.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSpec {
    pub image: String,
    pub container_name: String,
    pub command: Vec<String>,
    pub entrypoint: Option<Vec<String>>,
    pub env: BTreeMap<String, String>,
    pub volumes: Vec<String>,
    pub host_port: u16,
    pub container_port: u16,
    pub gpus: GpuRequest,
    pub shm_size_bytes: Option<i64>,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Readiness {
    pub probe_url: String,
    pub poll_interval: Duration,
    pub timeout: Duration,
}

/// Display metadata; never affects lifecycle decisions.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceInfo {
    pub model: String,
    pub served_model_name: String,
    pub description: Option<String>,
    pub gpu_memory: Option<String>,
    pub context_length: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceDefinition {
    pub identifier: String,
    pub launch: LaunchSpec,
    pub readiness: Readiness,
    pub info: ServiceInfo,
}

impl ServiceDefinition {
    pub fn from_config(svc: &ServiceConfig, identity: &ProjectIdentity) -> Self {
        let container_name = svc
            .container_name
            .clone()
            .unwrap_or_else(|| identity.default_container_name(&svc.name));

        let mut labels = HashMap::new();
        labels.insert(LABEL_PROJECT.to_string(), identity.slug.clone());
        labels.insert(LABEL_SERVICE.to_string(), svc.name.clone());
        labels.insert(LABEL_MODEL.to_string(), svc.model.clone());

        let volumes = svc.volumes.iter().map(|v| expand_home(v)).collect();

        Self {
            identifier: svc.name.clone(),
            launch: LaunchSpec {
                image: svc.image.clone(),
                container_name,
                command: svc
                    .command
                    .clone()
                    .map(|c| c.into_vec())
                    .unwrap_or_default(),
                entrypoint: svc.entrypoint.clone().map(|e| e.into_vec()),
                env: svc.env.clone(),
                volumes,
                host_port: svc.port,
                container_port: svc.container_port,
                gpus: svc.gpus,
                shm_size_bytes: svc
                    .shm_size_mb
                    .map(|mb| i64::try_from(mb.saturating_mul(1024 * 1024)).unwrap_or(i64::MAX)),
                labels,
            },
            readiness: Readiness {
                probe_url: svc.readiness.probe_url(svc.port),
                poll_interval: Duration::from_millis(svc.readiness.poll_interval_ms),
                timeout: Duration::from_millis(svc.readiness.timeout_ms),
            },
            info: ServiceInfo {
                model: svc.model.clone(),
                served_model_name: svc
                    .served_model_name
                    .clone()
                    .unwrap_or_else(|| svc.model.clone()),
                description: svc.description.clone(),
                gpu_memory: svc.gpu_memory.clone(),
                context_length: svc.context_length,
            },
        }
    }

    /// Base URL of the OpenAI-compatible API, e.g. `http://localhost:8001`.
    pub fn api_base(&self) -> String {
        format!("http://localhost:{}", self.launch.host_port)
    }
}

/// The fixed, ordered set of services that may occupy the slot.
#[derive(Debug, Clone, Default)]
pub struct ServiceCatalog {
    services: Vec<ServiceDefinition>,
}

impl ServiceCatalog {
    /// Build a catalog, rejecting duplicate identifiers, host ports, and
    /// container names.
    pub fn new(services: Vec<ServiceDefinition>) -> anyhow::Result<Self> {
        let mut ids = HashSet::new();
        let mut ports = HashMap::new();
        let mut containers = HashMap::new();
        for svc in &services {
            if !ids.insert(svc.identifier.as_str()) {
                bail!("duplicate service `{}`", svc.identifier);
            }
            if let Some(other) = ports.insert(svc.launch.host_port, svc.identifier.as_str()) {
                bail!(
                    "services `{}` and `{}` both use host port {}",
                    other,
                    svc.identifier,
                    svc.launch.host_port
                );
            }
            if let Some(other) =
                containers.insert(svc.launch.container_name.as_str(), svc.identifier.as_str())
            {
                bail!(
                    "services `{}` and `{}` both use container name `{}`",
                    other,
                    svc.identifier,
                    svc.launch.container_name
                );
            }
        }
        Ok(Self { services })
    }

    pub fn from_config(config: &SlotConfig, identity: &ProjectIdentity) -> anyhow::Result<Self> {
        Self::new(
            config
                .services
                .iter()
                .map(|svc| ServiceDefinition::from_config(svc, identity))
                .collect(),
        )
    }

    pub fn get(&self, identifier: &str) -> Option<&ServiceDefinition> {
        self.services.iter().find(|s| s.identifier == identifier)
    }

    pub fn lookup(&self, identifier: &str) -> Result<&ServiceDefinition, SlotError> {
        self.get(identifier).ok_or_else(|| {
            let names = self.list();
            let advice = match find_closest_match(identifier, &names) {
                Some(s) => Some(format!("did you mean `{}`?", s)),
                None if names.is_empty() => {
                    Some("no services are configured; add a [[services]] table".to_string())
                }
                None => Some(format!("available services: {}", names.join(", "))),
            };
            SlotError::NotFound {
                identifier: identifier.to_string(),
                advice,
            }
        })
    }

    /// Identifiers in declaration order.
    pub fn list(&self) -> Vec<&str> {
        self.services.iter().map(|s| s.identifier.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServiceDefinition> {
        self.services.iter()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::path::PathBuf;

    pub(crate) fn definition(identifier: &str, port: u16) -> ServiceDefinition {
        ServiceDefinition {
            identifier: identifier.to_string(),
            launch: LaunchSpec {
                image: "vllm/vllm-openai:latest".to_string(),
                container_name: format!("llmslot-test-{identifier}"),
                command: vec![],
                entrypoint: None,
                env: BTreeMap::new(),
                volumes: vec![],
                host_port: port,
                container_port: 8000,
                gpus: GpuRequest::Count(0),
                shm_size_bytes: None,
                labels: HashMap::new(),
            },
            readiness: Readiness {
                probe_url: format!("http://localhost:{port}/v1/models"),
                poll_interval: Duration::from_millis(10),
                timeout: Duration::from_millis(200),
            },
            info: ServiceInfo {
                model: format!("org/{identifier}"),
                served_model_name: format!("org/{identifier}"),
                description: None,
                gpu_memory: None,
                context_length: None,
            },
        }
    }

    fn catalog() -> ServiceCatalog {
        ServiceCatalog::new(vec![
            definition("architect", 8000),
            definition("dev", 8001),
            definition("po", 8002),
        ])
        .unwrap()
    }

    #[test]
    fn list_keeps_declaration_order() {
        assert_eq!(catalog().list(), vec!["architect", "dev", "po"]);
    }

    #[test]
    fn lookup_finds_service() {
        let c = catalog();
        let dev = c.lookup("dev").unwrap();
        assert_eq!(dev.launch.host_port, 8001);
    }

    #[test]
    fn lookup_missing_suggests_closest() {
        let err = catalog().lookup("architec").unwrap_err();
        match err {
            SlotError::NotFound { identifier, advice } => {
                assert_eq!(identifier, "architec");
                assert_eq!(advice.as_deref(), Some("did you mean `architect`?"));
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn lookup_missing_lists_available() {
        let err = catalog().lookup("zzz").unwrap_err();
        match err {
            SlotError::NotFound { advice, .. } => {
                assert_eq!(advice.as_deref(), Some("available services: architect, dev, po"));
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_identifier_rejected() {
        let err = ServiceCatalog::new(vec![definition("dev", 8001), definition("dev", 8002)])
            .unwrap_err();
        assert!(err.to_string().contains("duplicate service `dev`"));
    }

    #[test]
    fn duplicate_port_rejected() {
        let err = ServiceCatalog::new(vec![definition("dev", 8001), definition("po", 8001)])
            .unwrap_err();
        assert!(err.to_string().contains("host port 8001"), "got: {err}");
    }

    #[test]
    fn duplicate_container_rejected() {
        let mut po = definition("po", 8002);
        po.launch.container_name = "llmslot-test-dev".to_string();
        let err = ServiceCatalog::new(vec![definition("dev", 8001), po]).unwrap_err();
        assert!(err.to_string().contains("container name"), "got: {err}");
    }

    #[test]
    fn definition_from_config_applies_defaults() {
        let config: SlotConfig = toml::from_str(
            r#"
            [project]
            name = "agents"

            [[services]]
            name = "po"
            image = "vllm/vllm-openai:v0.6.3"
            model = "Qwen/Qwen2.5-7B-Instruct"
            port = 8002
            command = ["--model", "Qwen/Qwen2.5-7B-Instruct"]
            shm_size_mb = 2048
            "#,
        )
        .unwrap();
        let identity = ProjectIdentity::new("agents", PathBuf::from("/srv/agents/llmslot.toml"));
        let catalog = ServiceCatalog::from_config(&config, &identity).unwrap();
        let po = catalog.lookup("po").unwrap();

        assert_eq!(po.launch.container_name, identity.default_container_name("po"));
        assert_eq!(po.launch.labels[LABEL_PROJECT], identity.slug);
        assert_eq!(po.launch.labels[LABEL_SERVICE], "po");
        assert_eq!(po.launch.command.len(), 2);
        assert_eq!(po.launch.shm_size_bytes, Some(2048 * 1024 * 1024));
        assert_eq!(po.readiness.probe_url, "http://localhost:8002/v1/models");
        assert_eq!(po.readiness.timeout, Duration::from_secs(120));
        assert_eq!(po.info.served_model_name, "Qwen/Qwen2.5-7B-Instruct");
        assert_eq!(po.api_base(), "http://localhost:8002");
    }
}
