use std::fs;
use std::path::{Component, Path, PathBuf};

use log::{info, warn};

use crate::storage::{publish_key, reference_file_name, GatewayError, StorageGateway};

/// Objects are plain files below `root`; references are relative paths
pub struct LocalGateway {
    root: PathBuf,
}

impl LocalGateway {
    pub fn new(root: impl Into<PathBuf>) -> LocalGateway {
        LocalGateway { root: root.into() }
    }

    fn resolve(&self, reference: &str) -> Result<PathBuf, GatewayError> {
        let relative = Path::new(reference.trim_start_matches('/'));
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if reference.is_empty() || escapes {
            return Err(GatewayError::InvalidReference(reference.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

impl StorageGateway for LocalGateway {
    async fn fetch(&self, reference: &str, dest_dir: &Path) -> Result<PathBuf, GatewayError> {
        let source = self.resolve(reference)?;
        if !source.is_file() {
            return Err(GatewayError::NotFound(reference.to_string()));
        }
        let dest = dest_dir.join(reference_file_name(reference)?);
        info!("Copying {} to {}", source.display(), dest.display());
        fs::create_dir_all(dest_dir)
            .and_then(|_| fs::copy(&source, &dest))
            .map_err(|source| GatewayError::Io { path: dest.clone(), source })?;
        Ok(dest)
    }

    async fn publish(&self, local: &Path, namespace: &str, name: &str) -> bool {
        let target = match self.resolve(&publish_key(namespace, name)) {
            Ok(target) => target,
            Err(err) => {
                warn!("Can't publish {}: {}", local.display(), err);
                return false;
            }
        };
        let copied = target
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|_| fs::copy(local, &target));
        match copied {
            Ok(_) => {
                info!("Published {} to {}", local.display(), target.display());
                true
            }
            Err(err) => {
                warn!("Failed to publish {} to {}: {}", local.display(), target.display(), err);
                false
            }
        }
    }
}
