//! Transient files owned by one environment

use crate::error::{LifecycleError, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Local files named after an environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    /// `<name>-composition.yaml`
    pub claim: PathBuf,
    /// `<name>-cluster.yaml`
    pub cluster: PathBuf,
    /// `<name>.kubeconfig`, kept after a successful create
    pub kubeconfig: PathBuf,
}

impl ArtifactPaths {
    pub fn new(work_dir: &Path, name: &str) -> Self {
        Self {
            claim: work_dir.join(format!("{}-composition.yaml", name)),
            cluster: work_dir.join(format!("{}-cluster.yaml", name)),
            kubeconfig: work_dir.join(format!("{}.kubeconfig", name)),
        }
    }

    /// Remove the claim and cluster manifests
    pub async fn remove_manifests(&self) -> Result<Vec<PathBuf>> {
        remove_present([&self.claim, &self.cluster]).await
    }

    /// Remove all three files; returns the ones that existed
    pub async fn remove_all(&self) -> Result<Vec<PathBuf>> {
        remove_present([&self.claim, &self.cluster, &self.kubeconfig]).await
    }
}

async fn remove_present<const N: usize>(paths: [&PathBuf; N]) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => removed.push(path.clone()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(LifecycleError::io(path, e)),
        }
    }
    Ok(removed)
}
