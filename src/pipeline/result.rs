use serde::{Deserialize, Serialize};

use crate::pipeline::state::JobState;
use crate::stages::Artifact;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Success,
    PartialSuccess,
    /// Only recorded in the ledger; a failed job returns an error instead of a result
    Failure,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Success => "success",
            JobStatus::PartialSuccess => "partial_success",
            JobStatus::Failure => "failure",
        }
    }
}

/// A deliverable and the name it's published under
#[derive(Debug, Clone)]
pub struct UploadRecord {
    pub artifact: Artifact,
    pub logical_name: String,
}

impl UploadRecord {
    /// Published under the artifact's own file name
    pub fn for_artifact(artifact: &Artifact) -> UploadRecord {
        UploadRecord { artifact: artifact.clone(), logical_name: artifact.file_name() }
    }
}

/// Terminal outcome of a job that got as far as publishing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub status: JobStatus,
    pub outputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_files: Vec<String>,
}

impl JobResult {
    /// Any failed or missing file downgrades the job to a partial success
    pub fn from_uploads(outputs: Vec<String>, failed_files: Vec<String>) -> JobResult {
        let status = if failed_files.is_empty() { JobStatus::Success } else { JobStatus::PartialSuccess };
        JobResult { status, outputs, failed_files }
    }

    pub fn terminal_state(&self) -> JobState {
        match self.status {
            JobStatus::Success => JobState::Succeeded,
            JobStatus::PartialSuccess => JobState::PartiallySucceeded,
            JobStatus::Failure => JobState::Failed,
        }
    }
}
