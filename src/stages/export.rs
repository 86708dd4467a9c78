use log::info;

use crate::stages::{Artifact, ArtifactRole, StageContext, StageError};

/// Convert the docked poses to SDF
pub async fn export_pose(ctx: &StageContext<'_>, docking: &Artifact) -> Result<Artifact, StageError> {
    info!("Exporting docked pose...");
    let output = ctx.workspace.pose();
    let invocation = ctx
        .tools
        .launch(&ctx.tools.export)
        .arg(docking.path().to_string_lossy())
        .arg("-s")
        .arg(output.to_string_lossy());
    ctx.runner.execute(&invocation).await?;
    Ok(Artifact::new(ArtifactRole::Pose, output))
}
