//! Job orchestration
//!
//! A job runs strictly in sequence: clear the workspace, fetch the three inputs, prepare the
//! ligand, prepare the receptor, dock, export the pose, publish. Any error before publishing is
//! fatal and returned as a [WorkflowError]; publishing never fails a job, it only downgrades the
//! result to a partial success.

use std::io;
use std::path::{Path, PathBuf};

use log::{info, warn};
use thiserror::Error;

use crate::command::CommandRunner;
use crate::db::Ledger;
use crate::request::job::JobRequest;
use crate::stages::ligand::CandidateSelection;
use crate::stages::receptor::ReceptorOptions;
use crate::stages::tools::ToolConfig;
use crate::stages::{docking, export, ligand, receptor};
use crate::stages::{Artifact, ArtifactRole, StageContext, StageError};
use crate::storage::{GatewayError, StorageGateway};
use crate::workspace::Workspace;

/// Job states and transition tracking
pub mod state;
/// Job result and upload bookkeeping
pub mod result;

use result::{JobResult, UploadRecord};
use state::{JobState, Tracker};

#[derive(Debug, Error)]
pub enum FailureCause {
    #[error("can't prepare workspace under {}: {source}", .path.display())]
    Workspace {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("can't fetch {reference}: {source}")]
    Fetch {
        reference: String,
        #[source]
        source: GatewayError,
    },
    #[error(transparent)]
    Stage(#[from] StageError),
}

/// A job that didn't reach publishing
#[derive(Debug, Error)]
#[error("workflow failed: {cause}")]
pub struct WorkflowError {
    pub job_id: String,
    /// Last state the job completed
    pub state: JobState,
    #[source]
    pub cause: FailureCause,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Each job works in `<scratch_base>/job-<id>`
    pub scratch_base: PathBuf,
    pub candidate: CandidateSelection,
    pub chain: String,
    pub keep_workspace: bool,
}

impl PipelineOptions {
    pub fn new(scratch_base: impl Into<PathBuf>) -> PipelineOptions {
        PipelineOptions {
            scratch_base: scratch_base.into(),
            candidate: CandidateSelection::default(),
            chain: "A".to_string(),
            keep_workspace: false,
        }
    }
}

/// Local copies of the job inputs
struct JobInputs {
    ligand: Artifact,
    receptor: Artifact,
    binding_box: Artifact,
}

pub struct Pipeline<G> {
    gateway: G,
    runner: CommandRunner,
    tools: ToolConfig,
    options: PipelineOptions,
}

impl<G: StorageGateway> Pipeline<G> {
    pub fn new(gateway: G, runner: CommandRunner, tools: ToolConfig, options: PipelineOptions) -> Pipeline<G> {
        Pipeline { gateway, runner, tools, options }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Run one job to completion
    pub async fn run(&self, job_id: &str, request: &JobRequest, ledger: Option<&Ledger>) -> Result<JobResult, WorkflowError> {
        let mut tracker = Tracker::start(job_id, request, ledger);

        let base = &self.options.scratch_base;
        let workspace = Workspace::for_job(base, job_id)
            .map_err(|source| tracker.fail(FailureCause::Workspace { path: base.clone(), source }))?;

        let outcome = self.execute(&workspace, request, &mut tracker).await;
        if !self.options.keep_workspace {
            workspace.remove();
        }

        match outcome {
            Ok(result) => {
                tracker.finish(&result);
                Ok(result)
            }
            Err(cause) => Err(tracker.fail(cause)),
        }
    }

    async fn execute(
        &self,
        workspace: &Workspace,
        request: &JobRequest,
        tracker: &mut Tracker<'_>,
    ) -> Result<JobResult, FailureCause> {
        // failures are logged by the sweep and never stop the job
        let leftovers = workspace.clear();
        if !leftovers.is_empty() {
            warn!("{} workspace entries couldn't be removed", leftovers.len());
        }
        tracker.advance(JobState::Cleaned);

        let inputs = self.fetch_inputs(workspace, request).await?;
        tracker.advance(JobState::InputsFetched);

        let ctx = StageContext { runner: &self.runner, tools: &self.tools, workspace };

        let ligand = ligand::prepare_ligand(&ctx, &inputs.ligand, self.options.candidate).await?;
        tracker.advance(JobState::LigandReady);

        let receptor_options = ReceptorOptions {
            chain: self.options.chain.clone(),
            strip_residue: request.strip_residue.clone(),
        };
        let receptor = receptor::prepare_receptor(&ctx, &inputs.receptor, &inputs.binding_box, &receptor_options).await?;
        tracker.advance(JobState::ReceptorReady);

        let docking = docking::run_docking(&ctx, &ligand, &receptor.prepared).await?;
        tracker.advance(JobState::Docked);

        let pose = export::export_pose(&ctx, &docking).await?;
        tracker.advance(JobState::Exported);

        // the hydrogenated receptor is published for visualisation
        let uploads = [&docking, &pose, &receptor.hydrogenated].map(UploadRecord::for_artifact);
        let result = self.publish(&uploads, &request.output_dir).await;
        tracker.advance(JobState::Published);

        Ok(result)
    }

    async fn fetch_inputs(&self, workspace: &Workspace, request: &JobRequest) -> Result<JobInputs, FailureCause> {
        let inputs = workspace.inputs_dir();
        // one directory per input so equal file names can't collide
        let ligand = self.fetch(&request.ligand, &inputs.join("ligand"), ArtifactRole::RawLigand).await?;
        let receptor = self.fetch(&request.receptor, &inputs.join("receptor"), ArtifactRole::RawReceptor).await?;
        let binding_box = self.fetch(&request.binding_box, &inputs.join("box"), ArtifactRole::BindingBox).await?;
        Ok(JobInputs { ligand, receptor, binding_box })
    }

    async fn fetch(&self, reference: &str, dest: &Path, role: ArtifactRole) -> Result<Artifact, FailureCause> {
        let path = self
            .gateway
            .fetch(reference, dest)
            .await
            .map_err(|source| FailureCause::Fetch { reference: reference.to_string(), source })?;
        info!("Fetched {role} {reference} to {}", path.display());
        Ok(Artifact::new(role, path))
    }

    /// Publish each deliverable independently; missing or failed files are collected
    async fn publish(&self, uploads: &[UploadRecord], namespace: &str) -> JobResult {
        let mut outputs = Vec::new();
        let mut failed_files = Vec::new();

        for upload in uploads {
            let path = upload.artifact.path();
            if !path.exists() {
                warn!("File not found: {} ({})", path.display(), upload.artifact.role);
                failed_files.push(upload.logical_name.clone());
            } else if self.gateway.publish(path, namespace, &upload.logical_name).await {
                outputs.push(upload.logical_name.clone());
            } else {
                warn!("Upload failed: {}", upload.logical_name);
                failed_files.push(upload.logical_name.clone());
            }
        }

        info!("Upload summary:");
        info!("Successfully uploaded: {outputs:?}");
        info!("Failed uploads: {failed_files:?}");
        JobResult::from_uploads(outputs, failed_files)
    }
}
