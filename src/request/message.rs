use std::fs;
use std::path::{Path, PathBuf};

use jsonschema::JSONSchema;
use log::{info, warn};
use serde_json::Value;
use thiserror::Error;

use crate::request::job::JobRequest;

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("job request fails validation: {}", .0.join("; "))]
    JSONValidationError(Vec<String>),
    #[error("job request isn't valid JSON: {0}")]
    JSONDecodeError(#[source] serde_json::Error),
    #[error("can't deserialise job request: {0}")]
    DeserialisationError(#[source] serde_json::Error),
    #[error("can't read job request {}: {source}", .path.display())]
    MessageReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub struct Message {
    pub path: PathBuf,
    pub compiled_schema: JSONSchema,
}

impl Message {
    pub fn read(&self) -> Result<JobRequest, MessageError> {
        let json: Value = self.parse_untyped_json()?;

        match self.validate(&json) {
            Ok(_) => {
                info!("Message is valid");
                self.parse_json(json)
            }
            Err(err) => {
                warn!("Message fails validation");
                Err(err)
            }
        }
    }

    fn validate(&self, json: &Value) -> Result<(), MessageError> {
        info!("Validating raw message against JSON schema");
        self.compiled_schema.validate(json).map_err(|errors| {
            let reasons: Vec<String> = errors
                .map(|err| format!("{} at '{}'", err, err.instance_path))
                .collect();
            MessageError::JSONValidationError(reasons)
        })
    }

    fn read_file(&self) -> Result<String, MessageError> {
        let path: &Path = self.path.as_path();
        info!("Reading message at {}", path.display());
        fs::read_to_string(path).map_err(|source| {
            warn!("Can't read message job request at path {}: {}", path.display(), source);
            MessageError::MessageReadError { path: path.to_path_buf(), source }
        })
    }

    fn parse_json(&self, value: Value) -> Result<JobRequest, MessageError> {
        info!("Deserialising valid JSON into typed Rust object");
        serde_json::from_value::<JobRequest>(value).map_err(MessageError::DeserialisationError)
    }

    fn parse_untyped_json(&self) -> Result<Value, MessageError> {
        info!("Parsing JSON into untyped structure");
        let json_string = self.read_file()?;
        serde_json::from_str::<Value>(&json_string).map_err(MessageError::JSONDecodeError)
    }
}
