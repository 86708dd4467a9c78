use std::fs;

use log::{debug, info};
use serde::Serialize;
use tinytemplate::{format_unescaped, TinyTemplate};

use crate::command::Invocation;
use crate::stages::{Artifact, ArtifactRole, StageContext, StageError};
use crate::workspace::hydrogenated_path;

/// Padding (Å) around the box descriptor when sizing the docking box
const BOX_PADDING: &str = "5";

/// reduce2 options: add hydrogens and optimise flippable side chains
const REDUCE_OPTIONS: [&str; 2] = ["approach=add", "add_flip_movers=True"];

/// prody script selecting receptor atoms, rendered with the chain to keep
static EXTRACT_ATOMS: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/extract_atoms.py"));

/// pymol script removing one residue name, static
static REMOVE_RESIDUE: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/remove_residue.py"));

/// Receptor preparation settings that aren't part of the job request
#[derive(Debug, Clone)]
pub struct ReceptorOptions {
    /// Chain whose protein atoms are kept
    pub chain: String,
    /// Co-crystallised ligand to remove first
    pub strip_residue: Option<String>,
}

/// Outputs of receptor preparation
#[derive(Debug, Clone)]
pub struct PreparedReceptor {
    /// Hydrogenated full-atom structure, published for visualisation
    pub hydrogenated: Artifact,
    /// Docking-ready receptor; its box configuration sits next to it
    pub prepared: Artifact,
}

#[derive(Serialize)]
struct SelectionContext {
    selection: String,
}

/// Four dependent steps, each writing a new file in the workspace
pub async fn prepare_receptor(
    ctx: &StageContext<'_>,
    receptor: &Artifact,
    binding_box: &Artifact,
    options: &ReceptorOptions,
) -> Result<PreparedReceptor, StageError> {
    info!("Preparing receptor...");
    let source = match &options.strip_residue {
        Some(residue) => remove_residue(ctx, receptor, residue).await?,
        None => receptor.clone(),
    };

    let atoms = extract_receptor_atoms(ctx, &source, &options.chain).await?;
    info!("Receptor atoms extracted: saved to {}", atoms.path().display());

    // the unit cell record comes from the raw upload
    let merged = merge_crystal_record(ctx, receptor, &atoms).await?;
    info!("CRYST1 combined: saved to {}", merged.path().display());

    let hydrogenated = add_hydrogens_and_optimize(ctx, &merged).await?;
    info!("Hydrogens added and optimized: saved to {}", hydrogenated.path().display());

    let prepared = prepare_for_docking(ctx, &hydrogenated, binding_box).await?;
    info!("Receptor preparation complete.");

    Ok(PreparedReceptor { hydrogenated, prepared })
}

/// Drop a bound ligand (by residue name) from the raw structure
async fn remove_residue(ctx: &StageContext<'_>, receptor: &Artifact, residue: &str) -> Result<Artifact, StageError> {
    check_identifier("residue name", residue)?;
    let output = ctx.workspace.receptor_without_ligand();
    let invocation = ctx
        .tools
        .launch(&ctx.tools.python)
        .arg("-")
        .arg(receptor.path().to_string_lossy())
        .arg(output.to_string_lossy())
        .arg(residue)
        .stdin(REMOVE_RESIDUE);
    ctx.runner.execute(&invocation).await?;
    info!("Ligand {residue} removed: saved to {}", output.display());
    Ok(Artifact::new(ArtifactRole::ReceptorWithoutLigand, output))
}

/// Keep one chain's protein atoms, dropping water and heteroatoms
async fn extract_receptor_atoms(ctx: &StageContext<'_>, receptor: &Artifact, chain: &str) -> Result<Artifact, StageError> {
    check_identifier("chain", chain)?;
    let output = ctx.workspace.receptor_atoms();
    let invocation = ctx
        .tools
        .launch(&ctx.tools.python)
        .arg("-")
        .arg(receptor.path().to_string_lossy())
        .arg(output.to_string_lossy())
        .stdin(render_extract_script(chain));
    ctx.runner.execute(&invocation).await?;
    Ok(Artifact::new(ArtifactRole::ReceptorAtoms, output))
}

fn render_extract_script(chain: &str) -> String {
    let mut tt = TinyTemplate::new();
    tt.set_default_formatter(&format_unescaped);
    tt.add_template("extract", EXTRACT_ATOMS).expect("Template");
    let context = SelectionContext { selection: format!("chain {chain} and not water and not hetero") };
    tt.render("extract", &context).expect("Rendered script")
}

/// Prepend the CRYST1 record of the raw structure (if it has one) to the extracted atoms
async fn merge_crystal_record(ctx: &StageContext<'_>, raw: &Artifact, atoms: &Artifact) -> Result<Artifact, StageError> {
    info!("Extracting CRYST1 and combining with receptor atoms...");
    let output = ctx.workspace.receptor_with_crystal_record();

    let probe = Invocation::new(&ctx.tools.grep)
        .args(["-m", "1", "^CRYST1"])
        .arg(raw.path().to_string_lossy())
        .tolerate_failure();
    let found = ctx.runner.execute(&probe).await?;
    let record = found.stdout.trim();
    if record.is_empty() {
        debug!("No CRYST1 record in {}", raw.path().display());
    }

    let extracted = fs::read_to_string(atoms.path()).map_err(StageError::io(atoms.path()))?;
    let merged = merge_record(Some(record).filter(|r| !r.is_empty()), &extracted);
    fs::write(&output, merged).map_err(StageError::io(&output))?;

    Ok(Artifact::new(ArtifactRole::ReceptorWithCrystalRecord, output))
}

/// File content with `record` as its first line; unchanged without a record
pub fn merge_record(record: Option<&str>, atoms: &str) -> String {
    match record {
        Some(record) => format!("{record}\n{atoms}"),
        None => atoms.to_string(),
    }
}

/// Run reduce2 in the workspace root, where it writes `<input stem>FH.pdb`
///
/// The monomer library variable and the working directory are set on the child process only.
async fn add_hydrogens_and_optimize(ctx: &StageContext<'_>, merged: &Artifact) -> Result<Artifact, StageError> {
    info!("Adding hydrogens and optimizing with reduce2.py...");
    let root = ctx.workspace.root();
    let output = hydrogenated_path(root, merged.path());

    let invocation = ctx
        .tools
        .launch(&ctx.tools.python)
        .arg(ctx.tools.reduce2_script.to_string_lossy())
        .arg(merged.path().to_string_lossy())
        .args(REDUCE_OPTIONS)
        .env("MMTBX_CCP4_MONOMER_LIB", ctx.tools.monomer_library.to_string_lossy())
        .current_dir(root);
    ctx.runner.execute(&invocation).await?;

    Ok(Artifact::new(ArtifactRole::HydrogenatedReceptor, output))
}

/// Write the docking-ready receptor and its box configuration
async fn prepare_for_docking(
    ctx: &StageContext<'_>,
    hydrogenated: &Artifact,
    binding_box: &Artifact,
) -> Result<Artifact, StageError> {
    let stem = ctx.workspace.prepared_receptor_stem();
    let invocation = ctx
        .tools
        .launch(&ctx.tools.prepare_receptor)
        .arg("--read_pdb")
        .arg(hydrogenated.path().to_string_lossy())
        .arg("-o")
        .arg(stem.to_string_lossy())
        .args(["-p", "-v", "--box_enveloping"])
        .arg(binding_box.path().to_string_lossy())
        .args(["--padding", BOX_PADDING]);
    ctx.runner.execute(&invocation).await?;

    Ok(Artifact::new(ArtifactRole::PreparedReceptor, ctx.workspace.prepared_receptor()))
}

/// Chain ids and residue names end up inside tool selection strings
fn check_identifier(what: &'static str, value: &str) -> Result<(), StageError> {
    let valid = (1..=4).contains(&value.len()) && value.bytes().all(|b| b.is_ascii_alphanumeric());
    if valid {
        Ok(())
    } else {
        Err(StageError::InvalidOption { what, value: value.to_string() })
    }
}
