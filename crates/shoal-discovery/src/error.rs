//! Discovery error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort a discovery pass. Both are fatal to the requesting
/// tick: without descriptors there are no valid decisions to make.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to read manifest {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse manifest {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}
