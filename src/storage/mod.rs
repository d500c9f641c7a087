use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use tokio::fs;

use crate::engine::models::{ReleaseAsset, SourceRepository};
use crate::env::WorkDir;
use crate::error::StorageError;

/// Files of one run inside the working directory.
#[derive(Clone, Debug)]
pub struct StorageManager {
    layout: WorkDir,
}

impl StorageManager {
    pub fn new(layout: WorkDir) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &WorkDir {
        &self.layout
    }

    pub async fn prepare(&self) -> Result<(), StorageError> {
        fs::create_dir_all(self.layout.root()).await.map_err(|e| {
            StorageError::Io(format!("unable to create {}: {e}", self.layout.root().display()))
        })?;
        debug!("storage: working directory {}", self.layout.root().display());
        Ok(())
    }

    /// Refuse to clobber an existing output unless `overwrite` is set.
    pub async fn claim_output(&self, output: &Path, overwrite: bool) -> Result<(), StorageError> {
        if fs::metadata(output).await.is_err() {
            return Ok(());
        }
        if !overwrite {
            return Err(StorageError::OutputExists(output.display().to_string()));
        }
        warn!("storage: replacing existing output {}", output.display());
        fs::remove_file(output)
            .await
            .map_err(|e| StorageError::Io(format!("unable to remove {}: {e}", output.display())))
    }

    /// Drop the (possibly half-stripped) input and any partial output. Tool artifacts stay.
    pub async fn discard_after_failure(&self, input: &Path, output: &Path) {
        for path in [input, output] {
            match fs::remove_file(path).await {
                Ok(()) => info!("storage: removed {}", path.display()),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => warn!("storage: unable to remove {}: {err}", path.display()),
            }
        }
    }

    /// Local path of the artifact `source` takes from the fetched assets.
    pub fn artifact_for(
        &self,
        source: &SourceRepository,
        assets: &[ReleaseAsset],
    ) -> Result<PathBuf, StorageError> {
        source
            .pick(assets)
            .map(|asset| self.layout.artifact(&asset.filename))
            .ok_or_else(|| StorageError::MissingArtifact {
                role: source.role.label(),
                suffix: source.wanted_suffix.clone(),
                repository: source.owner_repo.clone(),
            })
    }
}
