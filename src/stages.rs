//! Pipeline stages
//!
//! Each stage wraps one or more tool invocations behind a typed input/output contract. Stages
//! read artifacts produced upstream and write new files at fixed workspace paths; nothing is
//! modified in place.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::command::{CommandRunner, ToolError};
use crate::workspace::Workspace;

/// Tool locations and launcher prefix
pub mod tools;
/// Protomer enumeration and ligand preparation
pub mod ligand;
/// Atom extraction, crystal record merge, hydrogenation and box-aware preparation
pub mod receptor;
/// Docking solver
pub mod docking;
/// Pose export
pub mod export;

use tools::ToolConfig;

#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error("can't access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("ligand descriptor {} is empty", .0.display())]
    EmptyDescriptor(PathBuf),
    #[error("expected {} but the tool didn't produce it", .0.display())]
    MissingArtifact(PathBuf),
    #[error("invalid {what}: {value:?}")]
    InvalidOption { what: &'static str, value: String },
}

impl StageError {
    pub(crate) fn io(path: &Path) -> impl FnOnce(std::io::Error) -> StageError + '_ {
        move |source| StageError::Io { path: path.to_path_buf(), source }
    }
}

/// Everything a stage needs besides its input artifacts
pub struct StageContext<'a> {
    pub runner: &'a CommandRunner,
    pub tools: &'a ToolConfig,
    pub workspace: &'a Workspace,
}

/// Logical role of a file in the scratch workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactRole {
    RawLigand,
    ProtomerSet,
    PreparedLigand,
    RawReceptor,
    BindingBox,
    ReceptorWithoutLigand,
    ReceptorAtoms,
    ReceptorWithCrystalRecord,
    HydrogenatedReceptor,
    PreparedReceptor,
    BoxConfig,
    DockingOutput,
    Pose,
}

impl fmt::Display for ArtifactRole {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ArtifactRole::RawLigand => "raw ligand",
            ArtifactRole::ProtomerSet => "protomer set",
            ArtifactRole::PreparedLigand => "prepared ligand",
            ArtifactRole::RawReceptor => "raw receptor",
            ArtifactRole::BindingBox => "binding box",
            ArtifactRole::ReceptorWithoutLigand => "receptor without ligand",
            ArtifactRole::ReceptorAtoms => "receptor atoms",
            ArtifactRole::ReceptorWithCrystalRecord => "receptor with crystal record",
            ArtifactRole::HydrogenatedReceptor => "hydrogenated receptor",
            ArtifactRole::PreparedReceptor => "prepared receptor",
            ArtifactRole::BoxConfig => "box configuration",
            ArtifactRole::DockingOutput => "docking output",
            ArtifactRole::Pose => "pose",
        };
        write!(f, "{name}")
    }
}

/// A file in the workspace tagged with what it is
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub role: ArtifactRole,
    pub path: PathBuf,
}

impl Artifact {
    pub fn new(role: ArtifactRole, path: impl Into<PathBuf>) -> Artifact {
        Artifact { role, path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name used when the artifact is published
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}
