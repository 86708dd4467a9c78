use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};

use crate::command::Invocation;

/// Names and locations of the external tools
///
/// Every tool is started through `launcher` (by default the `dwa_env` micromamba environment), so
/// tool names are resolved inside that environment. Missing keys in a JSON override keep their
/// default value.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ToolConfig {
    pub launcher: Vec<String>,
    pub python: String,
    /// Protomer and tautomer enumeration (`scrub.py`)
    pub scrub: String,
    pub prepare_ligand: String,
    pub prepare_receptor: String,
    /// `reduce2.py` inside the environment's site-packages
    pub reduce2_script: PathBuf,
    /// Monomer library handed to reduce2 through `MMTBX_CCP4_MONOMER_LIB`
    pub monomer_library: PathBuf,
    pub vina: String,
    pub export: String,
    /// Used directly, not through the launcher
    pub grep: String,
}

impl Default for ToolConfig {
    fn default() -> ToolConfig {
        ToolConfig {
            launcher: ["micromamba", "run", "-n", "dwa_env"].map(String::from).to_vec(),
            python: "python3".to_string(),
            scrub: "scrub.py".to_string(),
            prepare_ligand: "mk_prepare_ligand.py".to_string(),
            prepare_receptor: "mk_prepare_receptor.py".to_string(),
            reduce2_script: PathBuf::from(
                "/opt/conda/envs/dwa_env/lib/python3.11/site-packages/mmtbx/command_line/reduce2.py",
            ),
            monomer_library: PathBuf::from("geostd"),
            vina: "vina".to_string(),
            export: "mk_export.py".to_string(),
            grep: "grep".to_string(),
        }
    }
}

impl ToolConfig {
    /// Read a JSON tool table
    pub fn load(path: &Path) -> Result<ToolConfig> {
        info!("Reading tool configuration {}", path.display());
        let json = fs::read_to_string(path)
            .with_context(|| format!("Can't read tool configuration {}", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("Invalid tool configuration {}", path.display()))
    }

    /// Resolve relative resource directories against the current directory
    ///
    /// Tools run with other working directories, so this has to happen once at startup.
    pub fn absolutize(mut self) -> io::Result<ToolConfig> {
        let cwd = env::current_dir()?;
        if self.monomer_library.is_relative() {
            self.monomer_library = cwd.join(&self.monomer_library);
        }
        if self.reduce2_script.is_relative() {
            self.reduce2_script = cwd.join(&self.reduce2_script);
        }
        Ok(self)
    }

    /// Start an invocation of `tool` through the launcher
    pub fn launch(&self, tool: &str) -> Invocation {
        Invocation::launched(&self.launcher, tool)
    }
}
