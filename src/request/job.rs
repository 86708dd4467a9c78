use serde::{Deserialize, Serialize};

/// A docking job as submitted by a client
///
/// Field names on the wire follow the public API (`candidate`, `target`, `box`, `outputDir`).
/// All references are resolved through the storage gateway before the pipeline starts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    /// Text file containing a single-line SMILES string
    #[serde(rename = "candidate")]
    pub ligand: String,
    /// Receptor structure (PDB)
    #[serde(rename = "target")]
    pub receptor: String,
    /// Binding site box descriptor
    #[serde(rename = "box")]
    pub binding_box: String,
    /// Namespace for published results
    pub output_dir: String,
    /// Residue name to remove from the receptor before preparation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strip_residue: Option<String>,
}
