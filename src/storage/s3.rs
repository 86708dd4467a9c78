use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::{info, warn};
use rusoto_core::{HttpClient, Region, RusotoError};
use rusoto_credential::ChainProvider;
use rusoto_s3::{GetObjectError, GetObjectRequest, PutObjectRequest, S3Client, StreamingBody, S3};
use url::Url;

use crate::storage::{publish_key, reference_file_name, GatewayError, StorageGateway};

/// Connection details for an S3 compatible store
#[derive(Debug, Clone)]
pub struct S3Settings {
    /// Bucket used for references that don't name one (`jobs/7/ligand.smi`)
    pub default_bucket: Option<String>,
    /// Bucket receiving published results
    pub output_bucket: String,
    pub region: String,
    /// Custom endpoint, e.g. a MinIO or Ceph gateway
    pub endpoint: Option<String>,
}

/// A bucket and key pair parsed from a storage reference
#[derive(Debug, PartialEq, Eq)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

pub struct S3Gateway {
    client: S3Client,
    default_bucket: Option<String>,
    output_bucket: String,
}

impl S3Gateway {
    /// Credentials come from the standard AWS provider chain (environment, profile, instance)
    pub fn connect(settings: &S3Settings) -> Result<S3Gateway, GatewayError> {
        let region = match &settings.endpoint {
            Some(endpoint) => Region::Custom { name: settings.region.clone(), endpoint: endpoint.clone() },
            None => Region::from_str(&settings.region).map_err(|err| GatewayError::Transport {
                reference: settings.region.clone(),
                message: err.to_string(),
            })?,
        };
        info!("Connecting to S3 region {}", region.name());

        let http = HttpClient::new().map_err(|err| GatewayError::Transport {
            reference: region.name().to_string(),
            message: err.to_string(),
        })?;
        let client = S3Client::new_with(http, ChainProvider::new(), region);

        Ok(S3Gateway {
            client,
            default_bucket: settings.default_bucket.clone(),
            output_bucket: settings.output_bucket.clone(),
        })
    }

    fn locate(&self, reference: &str) -> Result<ObjectLocation, GatewayError> {
        parse_reference(reference, self.default_bucket.as_deref())
    }
}

/// `s3://bucket/key` or a bare key in the default bucket
pub fn parse_reference(reference: &str, default_bucket: Option<&str>) -> Result<ObjectLocation, GatewayError> {
    let invalid = || GatewayError::InvalidReference(reference.to_string());

    if reference.contains("://") {
        let url = Url::parse(reference).map_err(|_| invalid())?;
        if url.scheme() != "s3" {
            return Err(invalid());
        }
        let bucket = url.host_str().filter(|b| !b.is_empty()).ok_or_else(invalid)?;
        let key = url.path().trim_start_matches('/');
        if key.is_empty() {
            return Err(invalid());
        }
        return Ok(ObjectLocation { bucket: bucket.to_string(), key: key.to_string() });
    }

    let key = reference.trim_start_matches('/');
    match default_bucket {
        Some(bucket) if !key.is_empty() => Ok(ObjectLocation { bucket: bucket.to_string(), key: key.to_string() }),
        _ => Err(invalid()),
    }
}

impl StorageGateway for S3Gateway {
    async fn fetch(&self, reference: &str, dest_dir: &Path) -> Result<PathBuf, GatewayError> {
        let location = self.locate(reference)?;
        let dest = dest_dir.join(reference_file_name(&location.key)?);
        info!("Downloading s3://{}/{} to {}", location.bucket, location.key, dest.display());

        let request = GetObjectRequest {
            bucket: location.bucket.clone(),
            key: location.key.clone(),
            ..Default::default()
        };
        let object = self.client.get_object(request).await.map_err(|err| match err {
            RusotoError::Service(GetObjectError::NoSuchKey(_)) => GatewayError::NotFound(reference.to_string()),
            other => GatewayError::Transport { reference: reference.to_string(), message: other.to_string() },
        })?;
        let body = object.body.ok_or_else(|| GatewayError::Transport {
            reference: reference.to_string(),
            message: "empty response body".to_string(),
        })?;

        let io_error = |source| GatewayError::Io { path: dest.clone(), source };
        tokio::fs::create_dir_all(dest_dir).await.map_err(io_error)?;
        let mut file = tokio::fs::File::create(&dest).await.map_err(io_error)?;
        let mut reader = body.into_async_read();
        tokio::io::copy(&mut reader, &mut file).await.map_err(io_error)?;

        Ok(dest)
    }

    async fn publish(&self, local: &Path, namespace: &str, name: &str) -> bool {
        let key = publish_key(namespace, name);
        let bytes = match tokio::fs::read(local).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("Can't read {} for upload: {}", local.display(), err);
                return false;
            }
        };

        info!("Uploading {} to s3://{}/{}", local.display(), self.output_bucket, key);
        let request = PutObjectRequest {
            bucket: self.output_bucket.clone(),
            key: key.clone(),
            body: Some(StreamingBody::from(bytes)),
            ..Default::default()
        };
        match self.client.put_object(request).await {
            Ok(_) => true,
            Err(err) => {
                warn!("Upload of s3://{}/{} failed: {}", self.output_bucket, key, err);
                false
            }
        }
    }
}
