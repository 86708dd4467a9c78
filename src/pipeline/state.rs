use std::fmt;

use log::{error, info, warn};

use crate::db::Ledger;
use crate::pipeline::result::JobResult;
use crate::pipeline::{FailureCause, WorkflowError};
use crate::request::job::JobRequest;

/// Progress of a single job
///
/// States advance strictly in declaration order. A fatal error in any non-terminal state moves
/// the job straight to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Initialized,
    Cleaned,
    InputsFetched,
    LigandReady,
    ReceptorReady,
    Docked,
    Exported,
    Published,
    Succeeded,
    PartiallySucceeded,
    Failed,
}

impl JobState {
    /// db values are lower snake case
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Initialized => "initialized",
            JobState::Cleaned => "cleaned",
            JobState::InputsFetched => "inputs_fetched",
            JobState::LigandReady => "ligand_ready",
            JobState::ReceptorReady => "receptor_ready",
            JobState::Docked => "docked",
            JobState::Exported => "exported",
            JobState::Published => "published",
            JobState::Succeeded => "succeeded",
            JobState::PartiallySucceeded => "partially_succeeded",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::PartiallySucceeded | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Logs every transition and mirrors it into the ledger when one is attached
///
/// Ledger errors are logged and otherwise ignored: bookkeeping never fails a job.
pub(crate) struct Tracker<'a> {
    job_id: &'a str,
    state: JobState,
    ledger: Option<&'a Ledger>,
}

impl<'a> Tracker<'a> {
    pub(crate) fn start(job_id: &'a str, request: &JobRequest, ledger: Option<&'a Ledger>) -> Tracker<'a> {
        info!("Starting job {job_id}: ligand {}, receptor {}, box {}", request.ligand, request.receptor, request.binding_box);
        if let Some(ledger) = ledger {
            if let Err(err) = ledger.insert_job(job_id, request) {
                warn!("Can't add job {job_id} to the ledger: {err}");
            }
        }
        Tracker { job_id, state: JobState::Initialized, ledger }
    }

    pub(crate) fn advance(&mut self, next: JobState) {
        debug_assert!(!self.state.is_terminal(), "job {} already finished", self.job_id);
        info!("Job {}: {} -> {}", self.job_id, self.state, next);
        self.state = next;
        if let Some(ledger) = self.ledger {
            if let Err(err) = ledger.update_state(self.job_id, next) {
                warn!("Can't record state {next} for job {}: {err}", self.job_id);
            }
        }
    }

    pub(crate) fn finish(&mut self, result: &JobResult) {
        let terminal = result.terminal_state();
        debug_assert!(terminal.is_terminal());
        info!("Job {}: {} -> {}", self.job_id, self.state, terminal);
        self.state = terminal;
        if let Some(ledger) = self.ledger {
            if let Err(err) = ledger.finish(self.job_id, result) {
                warn!("Can't record result of job {}: {err}", self.job_id);
            }
        }
    }

    pub(crate) fn fail(&self, cause: FailureCause) -> WorkflowError {
        error!("Job {} failed after reaching {}: {}", self.job_id, self.state, cause);
        if let Some(ledger) = self.ledger {
            if let Err(err) = ledger.fail(self.job_id, self.state, &cause.to_string()) {
                warn!("Can't record failure of job {}: {err}", self.job_id);
            }
        }
        WorkflowError { job_id: self.job_id.to_string(), state: self.state, cause }
    }
}
