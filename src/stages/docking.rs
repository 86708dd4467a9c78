use log::info;

use crate::stages::{Artifact, ArtifactRole, StageContext, StageError};
use crate::workspace::box_config_path;

/// Dock the prepared ligand into the prepared receptor
///
/// The search box is read from the configuration file written next to the receptor during
/// preparation (`X.pdbqt` -> `X.box.txt`).
pub async fn run_docking(
    ctx: &StageContext<'_>,
    ligand: &Artifact,
    receptor: &Artifact,
) -> Result<Artifact, StageError> {
    info!("Running docking...");
    let output = ctx.workspace.docking_output();
    let config = Artifact::new(ArtifactRole::BoxConfig, box_config_path(receptor.path()));

    let invocation = ctx
        .tools
        .launch(&ctx.tools.vina)
        .arg("--ligand")
        .arg(ligand.path().to_string_lossy())
        .arg("--receptor")
        .arg(receptor.path().to_string_lossy())
        .arg("--config")
        .arg(config.path().to_string_lossy())
        .arg("--out")
        .arg(output.to_string_lossy());
    ctx.runner.execute(&invocation).await?;

    Ok(Artifact::new(ArtifactRole::DockingOutput, output))
}
