//! Remote object storage used to fetch job inputs and publish results

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Object storage on S3 compatible services (rusoto)
pub mod s3;
/// A local directory standing in for an object store
pub mod local;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid storage reference {0:?}")]
    InvalidReference(String),
    #[error("object {0} not found")]
    NotFound(String),
    #[error("can't write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("storage request for {reference} failed: {message}")]
    Transport { reference: String, message: String },
}

/// Fetch-by-reference and publish-by-name against a remote store
///
/// `fetch` failures are fatal for a job. `publish` reports failure as `false` so that one file
/// failing to upload never stops the others.
#[allow(async_fn_in_trait)]
pub trait StorageGateway {
    /// Materialise `reference` as a file inside `dest_dir`, returning its local path
    async fn fetch(&self, reference: &str, dest_dir: &Path) -> Result<PathBuf, GatewayError>;

    /// Upload `local` as `<namespace>/<name>`
    async fn publish(&self, local: &Path, namespace: &str, name: &str) -> bool;
}

/// Last path component of a reference, used as the local file name
pub(crate) fn reference_file_name(reference: &str) -> Result<&str, GatewayError> {
    reference
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
        .ok_or_else(|| GatewayError::InvalidReference(reference.to_string()))
}

/// Object key for a published file
pub(crate) fn publish_key(namespace: &str, name: &str) -> String {
    let namespace = namespace.trim_matches('/');
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}/{name}")
    }
}
