use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::info;

use crate::stages::{Artifact, ArtifactRole, StageContext, StageError};

/// Protonation window for protomer enumeration
const PH_LOW: &str = "5";
const PH_HIGH: &str = "9";

/// Which of the per-molecule files written by ligand preparation is docked
///
/// Preparation of a protomer set writes one `..._i<N>.pdbqt` file per protomer and only one of them
/// is docked. The choice is deterministic but not a ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSelection {
    /// The candidate with exactly this index; missing is an error
    Index(usize),
    /// The lowest index present
    FirstAvailable,
}

impl Default for CandidateSelection {
    fn default() -> CandidateSelection {
        CandidateSelection::Index(0)
    }
}

impl FromStr for CandidateSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<CandidateSelection, String> {
        match s {
            "first-available" => Ok(CandidateSelection::FirstAvailable),
            index => index
                .parse::<usize>()
                .map(CandidateSelection::Index)
                .map_err(|_| format!("expected `first-available` or a candidate index, got {index:?}")),
        }
    }
}

/// Protomer enumeration followed by ligand preparation
pub async fn prepare_ligand(
    ctx: &StageContext<'_>,
    descriptor: &Artifact,
    selection: CandidateSelection,
) -> Result<Artifact, StageError> {
    info!("Preparing ligand...");
    let protomers = add_protomers(ctx, descriptor).await?;

    let out_dir = ctx.workspace.ligand_candidates_dir();
    let invocation = ctx
        .tools
        .launch(&ctx.tools.prepare_ligand)
        .arg("-i")
        .arg(protomers.path().to_string_lossy())
        .arg("--multimol_outdir")
        .arg(out_dir.to_string_lossy());
    ctx.runner.execute(&invocation).await?;

    let prepared = select_candidate(&out_dir, selection)?;
    info!("Prepared ligand: {}", prepared.display());
    Ok(Artifact::new(ArtifactRole::PreparedLigand, prepared))
}

/// Enumerate protomers of the SMILES in `descriptor` into a multi-molecule SDF
async fn add_protomers(ctx: &StageContext<'_>, descriptor: &Artifact) -> Result<Artifact, StageError> {
    let output = ctx.workspace.ligand_protomers();

    let smiles = fs::read_to_string(descriptor.path()).map_err(StageError::io(descriptor.path()))?;
    let smiles = smiles.trim();
    if smiles.is_empty() {
        return Err(StageError::EmptyDescriptor(descriptor.path.clone()));
    }

    let invocation = ctx
        .tools
        .launch(&ctx.tools.scrub)
        .arg(smiles)
        .arg("-o")
        .arg(output.to_string_lossy())
        .args(["--skip_tautomers", "--ph_low", PH_LOW, "--ph_high", PH_HIGH]);
    ctx.runner.execute(&invocation).await?;

    Ok(Artifact::new(ArtifactRole::ProtomerSet, output))
}

/// Pick the prepared ligand out of the per-molecule output directory
pub fn select_candidate(dir: &Path, selection: CandidateSelection) -> Result<PathBuf, StageError> {
    let candidates = list_candidates(dir)?;
    let chosen = match selection {
        CandidateSelection::Index(wanted) => candidates.into_iter().find(|(index, _)| *index == wanted),
        CandidateSelection::FirstAvailable => candidates.into_iter().next(),
    };

    chosen.map(|(_, path)| path).ok_or_else(|| {
        let expected = match selection {
            CandidateSelection::Index(index) => dir.join(format!("_i{index}.pdbqt")),
            CandidateSelection::FirstAvailable => dir.join("_i*.pdbqt"),
        };
        StageError::MissingArtifact(expected)
    })
}

/// `(index, path)` of every `<name>_i<index>.pdbqt` in `dir`, ordered by index then path
fn list_candidates(dir: &Path) -> Result<Vec<(usize, PathBuf)>, StageError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(StageError::io(dir)(err)),
    };

    let mut candidates = Vec::new();
    for entry in entries {
        let path = entry.map_err(StageError::io(dir))?.path();
        if let Some(index) = path.file_name().and_then(|name| candidate_index(&name.to_string_lossy())) {
            candidates.push((index, path));
        }
    }
    candidates.sort();
    Ok(candidates)
}

fn candidate_index(file_name: &str) -> Option<usize> {
    let stem = file_name.strip_suffix(".pdbqt")?;
    let (_, index) = stem.rsplit_once("_i")?;
    if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    index.parse().ok()
}
