use std::fmt;
use clap::ValueEnum;

/// Where job inputs are fetched from and results published to
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum StorageBackend {
    S3,
    Local
}

impl fmt::Display for StorageBackend {
      fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StorageBackend::S3 => write!(f, "s3"),
            StorageBackend::Local => write!(f, "local")
        }
    }
}
