//! Docker Compose orchestrator client.
//!
//! Scales services with `docker compose up -d --scale <svc>=<n>
//! --no-recreate` and reads live endpoints from `docker ps` + `docker
//! inspect` JSON, matching containers by the compose service label.

use std::path::PathBuf;
use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::OrchestratorError;
use crate::Orchestrator;

const COMPOSE_SERVICE_LABEL: &str = "com.docker.compose.service";

pub struct ComposeOrchestrator {
    compose_file: PathBuf,
}

impl ComposeOrchestrator {
    pub fn new(compose_file: PathBuf) -> Self {
        Self { compose_file }
    }

    async fn docker(&self, args: &[&str], service: &str) -> Result<Output, OrchestratorError> {
        debug!(service, ?args, "running docker command");
        Command::new("docker")
            .args(args)
            .output()
            .await
            .map_err(|e| OrchestratorError::Unavailable {
                service: service.to_string(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl Orchestrator for ComposeOrchestrator {
    async fn set_replicas(&self, service: &str, target: u32) -> Result<(), OrchestratorError> {
        let compose_file = self.compose_file.display().to_string();
        let scale_arg = format!("{service}={target}");
        let output = self
            .docker(
                &[
                    "compose",
                    "-f",
                    &compose_file,
                    "up",
                    "-d",
                    "--scale",
                    &scale_arg,
                    "--no-recreate",
                ],
                service,
            )
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(classify_failure(service, target, stderr));
        }

        info!(service, target, "replica change acknowledged");
        Ok(())
    }

    async fn live_endpoints(&self, service: &str) -> Result<Vec<String>, OrchestratorError> {
        let filter = format!("label={COMPOSE_SERVICE_LABEL}={service}");
        let output = self
            .docker(&["ps", "--filter", &filter, "--format", "{{.ID}}"], service)
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(OrchestratorError::Inspect {
                service: service.to_string(),
                reason: stderr,
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let ids: Vec<&str> = stdout.lines().filter(|l| !l.trim().is_empty()).collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut args = vec!["inspect"];
        args.extend(ids.iter().copied());
        let output = self.docker(&args, service).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(OrchestratorError::Inspect {
                service: service.to_string(),
                reason: stderr,
            });
        }

        endpoints_from_inspect(&output.stdout).map_err(|e| OrchestratorError::Inspect {
            service: service.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Distinguish "the daemon is down" (worth retrying) from a definitive
/// rejection of the request.
fn classify_failure(service: &str, target: u32, stderr: String) -> OrchestratorError {
    let transient = stderr.contains("Cannot connect to the Docker daemon")
        || stderr.contains("connection refused")
        || stderr.contains("i/o timeout");
    if transient {
        OrchestratorError::Unavailable {
            service: service.to_string(),
            reason: stderr,
        }
    } else {
        OrchestratorError::Rejected {
            service: service.to_string(),
            target,
            reason: stderr,
        }
    }
}

/// Extract `ip:port` addresses from `docker inspect` output.
///
/// Containers without a network address or an exposed port are skipped with
/// a warning; the service simply has fewer live endpoints this tick.
fn endpoints_from_inspect(raw: &[u8]) -> Result<Vec<String>, serde_json::Error> {
    let containers: Vec<serde_json::Value> = serde_json::from_slice(raw)?;
    let mut endpoints = Vec::new();

    for container in &containers {
        let running = container
            .pointer("/State/Running")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if !running {
            continue;
        }

        let ip = container
            .pointer("/NetworkSettings/Networks")
            .and_then(|v| v.as_object())
            .and_then(|networks| {
                networks
                    .values()
                    .filter_map(|n| n.pointer("/IPAddress").and_then(|v| v.as_str()))
                    .find(|ip| !ip.is_empty())
            });

        let port = container
            .pointer("/NetworkSettings/Ports")
            .and_then(|v| v.as_object())
            .and_then(|ports| ports.keys().next())
            .and_then(|key| key.split('/').next())
            .and_then(|port| port.parse::<u16>().ok());

        match (ip, port) {
            (Some(ip), Some(port)) => endpoints.push(format!("{ip}:{port}")),
            _ => {
                let id = container
                    .pointer("/Id")
                    .and_then(|v| v.as_str())
                    .unwrap_or("<unknown>");
                warn!(container = id, "skipping container without address or port");
            }
        }
    }

    endpoints.sort();
    Ok(endpoints)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_running_containers() {
        let raw = br#"[
            {
                "Id": "abc123",
                "State": {"Running": true},
                "NetworkSettings": {
                    "Networks": {"edge": {"IPAddress": "172.18.0.5"}},
                    "Ports": {"80/tcp": null}
                }
            },
            {
                "Id": "def456",
                "State": {"Running": true},
                "NetworkSettings": {
                    "Networks": {"edge": {"IPAddress": "172.18.0.3"}},
                    "Ports": {"80/tcp": null}
                }
            }
        ]"#;
        let endpoints = endpoints_from_inspect(raw).unwrap();
        assert_eq!(endpoints, vec!["172.18.0.3:80", "172.18.0.5:80"]);
    }

    #[test]
    fn skips_stopped_containers() {
        let raw = br#"[
            {
                "Id": "abc123",
                "State": {"Running": false},
                "NetworkSettings": {
                    "Networks": {"edge": {"IPAddress": "172.18.0.5"}},
                    "Ports": {"80/tcp": null}
                }
            }
        ]"#;
        assert!(endpoints_from_inspect(raw).unwrap().is_empty());
    }

    #[test]
    fn skips_containers_without_address() {
        let raw = br#"[
            {
                "Id": "abc123",
                "State": {"Running": true},
                "NetworkSettings": {
                    "Networks": {"edge": {"IPAddress": ""}},
                    "Ports": {"80/tcp": null}
                }
            }
        ]"#;
        assert!(endpoints_from_inspect(raw).unwrap().is_empty());
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(endpoints_from_inspect(b"nope").is_err());
    }

    #[test]
    fn daemon_down_is_transient() {
        let err = classify_failure(
            "web",
            3,
            "Cannot connect to the Docker daemon at unix:///var/run/docker.sock".to_string(),
        );
        assert!(err.is_transient());
    }

    #[test]
    fn unknown_service_is_a_rejection() {
        let err = classify_failure("web", 3, "no such service: web".to_string());
        assert!(!err.is_transient());
        assert!(matches!(err, OrchestratorError::Rejected { target: 3, .. }));
    }
}
