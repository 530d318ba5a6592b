//! Snapshot-to-document projection and atomic persistence.

use std::io::Write;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info};

use shoal_core::{ServiceDescriptor, TopologySnapshot};

use crate::document::{
    BackendEntry, LoadBalancer, RouterEntry, RoutingDocument, ServerEntry,
};

/// Maps a [`TopologySnapshot`] into the proxy's routing document and writes
/// it atomically.
pub struct ConfigProjector {
    domain_suffix: String,
    output_path: PathBuf,
}

impl ConfigProjector {
    pub fn new(domain_suffix: &str, output_path: PathBuf) -> Self {
        Self {
            domain_suffix: domain_suffix.trim_start_matches('.').to_string(),
            output_path,
        }
    }

    pub fn output_path(&self) -> &PathBuf {
        &self.output_path
    }

    /// Build the document for the given services and snapshot.
    ///
    /// A service with zero live endpoints still projects its router with an
    /// empty backend pool — omitting the rule would erase any manually
    /// layered customization keyed to its name. Services labeled out of the
    /// proxy are skipped entirely.
    pub fn project(
        &self,
        services: &[ServiceDescriptor],
        snapshot: &TopologySnapshot,
    ) -> RoutingDocument {
        let mut document = RoutingDocument::default();

        for service in services {
            if !service.proxy.enabled {
                debug!(service = %service.name, "service opted out of proxy routing");
                continue;
            }

            let router_name = format!("{}-router", service.name);
            let service_name = format!("{}-service", service.name);

            let rule = service.proxy.rule.clone().unwrap_or_else(|| {
                format!("Host(`{}.{}`)", service.name, self.domain_suffix)
            });

            let servers = snapshot
                .get(&service.name)
                .map(|topology| {
                    topology
                        .endpoints
                        .iter()
                        .map(|endpoint| ServerEntry {
                            url: format!("http://{endpoint}"),
                        })
                        .collect()
                })
                .unwrap_or_default();

            document.http.routers.insert(
                router_name,
                RouterEntry {
                    rule,
                    service: service_name.clone(),
                    entry_points: vec!["websecure".to_string()],
                    middlewares: service.proxy.middlewares.clone(),
                },
            );
            document.http.services.insert(
                service_name,
                BackendEntry {
                    load_balancer: LoadBalancer { servers },
                },
            );
        }

        document
    }

    pub fn render(&self, document: &RoutingDocument) -> Result<String, ProjectionError> {
        Ok(serde_yaml::to_string(document)?)
    }

    /// Render and write the document through a temp file in the destination
    /// directory, then rename into place. A reader never observes a partial
    /// document; on failure the previous file is left intact.
    pub fn write(&self, document: &RoutingDocument) -> Result<(), ProjectionError> {
        let rendered = self.render(document)?;

        let parent = self
            .output_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&parent).map_err(|source| ProjectionError::Write {
            path: self.output_path.clone(),
            source,
        })?;

        let mut temp =
            tempfile::NamedTempFile::new_in(&parent).map_err(|source| ProjectionError::Write {
                path: self.output_path.clone(),
                source,
            })?;
        temp.write_all(rendered.as_bytes())
            .map_err(|source| ProjectionError::Write {
                path: self.output_path.clone(),
                source,
            })?;
        temp.persist(&self.output_path)
            .map_err(|e| ProjectionError::Write {
                path: self.output_path.clone(),
                source: e.error,
            })?;

        info!(
            path = %self.output_path.display(),
            routers = document.http.routers.len(),
            "routing document written"
        );
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to render routing document: {0}")]
    Render(#[from] serde_yaml::Error),

    #[error("failed to write routing document {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}
