//! Compose manifest parsing.
//!
//! The manifest grammar is permissive the way real compose files are:
//! ports come in numeric, short-string, and long-map syntax; networks and
//! labels come as lists or maps. A service entry that does not deserialize
//! is skipped with an error log; only a manifest that fails to read or
//! parse as a whole aborts discovery.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, error, info, warn};

use shoal_core::{ServiceDescriptor, ServicePort, ShoalConfig};

use crate::error::DiscoveryError;
use crate::labels;
use crate::ServiceDiscovery;

/// Discovers services by parsing a compose-style YAML manifest.
pub struct ComposeDiscovery {
    config: ShoalConfig,
}

impl ComposeDiscovery {
    pub fn new(config: &ShoalConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    fn parse_service(&self, name: &str, raw: serde_yaml::Value) -> Option<ServiceDescriptor> {
        let service: ComposeService = match serde_yaml::from_value(raw) {
            Ok(service) => service,
            Err(e) => {
                error!(service = name, error = %e, "skipping unparseable service entry");
                return None;
            }
        };

        let ports = service
            .ports
            .iter()
            .filter_map(|entry| entry.to_port(name))
            .collect();

        let networks = match service.networks {
            Some(NetworksEntry::List(names)) => names,
            Some(NetworksEntry::Map(map)) => map.into_keys().collect(),
            None => Vec::new(),
        };

        // Service-level labels first, deploy-level labels override.
        let mut merged = BTreeMap::new();
        if let Some(entry) = service.labels {
            merged.extend(entry.into_map());
        }
        let mut replicas = 1;
        if let Some(deploy) = service.deploy {
            if let Some(declared) = deploy.replicas {
                replicas = declared;
            }
            if let Some(entry) = deploy.labels {
                merged.extend(entry.into_map());
            }
        }

        let proxy = labels::proxy_options(name, &merged);
        let scaling = labels::scaling_rule(name, &merged, &self.config);

        Some(ServiceDescriptor {
            name: name.to_string(),
            image: service.image.unwrap_or_default(),
            ports,
            networks,
            labels: merged,
            replicas,
            proxy,
            scaling,
        })
    }
}

impl ServiceDiscovery for ComposeDiscovery {
    fn list_services(&self, manifest: &Path) -> Result<Vec<ServiceDescriptor>, DiscoveryError> {
        let content =
            std::fs::read_to_string(manifest).map_err(|source| DiscoveryError::Read {
                path: manifest.to_path_buf(),
                source,
            })?;
        let file: ComposeFile =
            serde_yaml::from_str(&content).map_err(|source| DiscoveryError::Parse {
                path: manifest.to_path_buf(),
                source,
            })?;

        if file.services.is_empty() {
            warn!(manifest = %manifest.display(), "no services found in manifest");
        }

        let mut services = Vec::new();
        for (name, raw) in file.services {
            if let Some(descriptor) = self.parse_service(&name, raw) {
                debug!(service = %descriptor.name, "discovered service");
                services.push(descriptor);
            }
        }

        info!(count = services.len(), "service discovery complete");
        Ok(services)
    }
}

#[derive(Debug, Deserialize)]
struct ComposeFile {
    #[serde(default)]
    services: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ComposeService {
    image: Option<String>,
    ports: Vec<PortEntry>,
    networks: Option<NetworksEntry>,
    labels: Option<LabelsEntry>,
    deploy: Option<DeploySection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DeploySection {
    replicas: Option<u32>,
    labels: Option<LabelsEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PortEntry {
    Number(u16),
    Short(String),
    Long {
        target: u16,
        #[serde(default)]
        published: Option<NumberOrString>,
        #[serde(default)]
        protocol: Option<String>,
    },
}

impl PortEntry {
    fn to_port(&self, service: &str) -> Option<ServicePort> {
        match self {
            PortEntry::Number(port) => Some(ServicePort::tcp(*port, None)),
            PortEntry::Short(spec) => parse_short_port(spec).or_else(|| {
                warn!(service, port = spec, "ignoring unparseable port mapping");
                None
            }),
            PortEntry::Long {
                target,
                published,
                protocol,
            } => Some(ServicePort {
                container: *target,
                published: published.as_ref().and_then(NumberOrString::as_u16),
                protocol: protocol.clone().unwrap_or_else(|| "tcp".to_string()),
            }),
        }
    }
}

/// Parse short port syntax: `"80"`, `"8080:80"`, or `"8080:80/udp"`.
fn parse_short_port(spec: &str) -> Option<ServicePort> {
    let (spec, protocol) = match spec.split_once('/') {
        Some((head, protocol)) => (head, protocol.to_string()),
        None => (spec, "tcp".to_string()),
    };
    let (published, container) = match spec.split_once(':') {
        Some((published, container)) => {
            (Some(published.parse().ok()?), container.parse().ok()?)
        }
        None => (None, spec.parse().ok()?),
    };
    Some(ServicePort {
        container,
        published,
        protocol,
    })
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(u16),
    Text(String),
}

impl NumberOrString {
    fn as_u16(&self) -> Option<u16> {
        match self {
            NumberOrString::Number(n) => Some(*n),
            NumberOrString::Text(s) => s.parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NetworksEntry {
    List(Vec<String>),
    Map(BTreeMap<String, serde_yaml::Value>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LabelsEntry {
    Map(BTreeMap<String, serde_yaml::Value>),
    List(Vec<String>),
}

impl LabelsEntry {
    fn into_map(self) -> BTreeMap<String, String> {
        match self {
            LabelsEntry::Map(map) => map
                .into_iter()
                .filter_map(|(key, value)| scalar_to_string(&value).map(|v| (key, v)))
                .collect(),
            LabelsEntry::List(entries) => entries
                .into_iter()
                .filter_map(|entry| {
                    entry
                        .split_once('=')
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                })
                .collect(),
        }
    }
}

fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
