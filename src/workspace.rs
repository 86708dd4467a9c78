//! Per-job scratch workspace
//!
//! Each job owns a directory `<scratch base>/job-<id>`. Stages never invent paths of their own:
//! every intermediate artifact lives at a fixed, well-known name inside the job root, handed out
//! by the accessors below. The root is swept clean before a job starts so nothing from an earlier
//! run with the same id can leak into the new one.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{info, warn};

/// Process-wide lock around working directory changes
static CWD_LOCK: Mutex<()> = Mutex::new(());

/// An entry that couldn't be removed during [Workspace::clear]
#[derive(Debug)]
pub struct CleanupFailure {
    pub path: PathBuf,
    pub error: io::Error,
}

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Create (if needed) the workspace for a job under the scratch base directory
    pub fn for_job(base: &Path, job_id: &str) -> io::Result<Workspace> {
        Workspace::at(base.join(format!("job-{job_id}")))
    }

    pub fn at(root: impl Into<PathBuf>) -> io::Result<Workspace> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        // stages hand these paths to tools that run in other directories
        let root = root.canonicalize()?;
        Ok(Workspace { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Delete every file, symlink and directory directly under the root
    ///
    /// Best-effort: an entry that can't be removed is logged and collected, the sweep carries on
    /// with the remaining entries and never fails.
    pub fn clear(&self) -> Vec<CleanupFailure> {
        info!("Clearing workspace {}", self.root.display());
        sweep(&self.root, remove_entry)
    }

    /// Remove the whole job root, logging rather than failing
    pub fn remove(self) {
        info!("Removing workspace {}", self.root.display());
        if let Err(err) = fs::remove_dir_all(&self.root) {
            warn!("Failed to remove workspace {}: {}", self.root.display(), err);
        }
    }

    /// Directory receiving fetched remote inputs
    pub fn inputs_dir(&self) -> PathBuf {
        self.root.join("inputs")
    }

    pub fn ligand_protomers(&self) -> PathBuf {
        self.root.join("ligand_with_protomers.sdf")
    }

    /// Output directory of the multi-molecule ligand preparation
    pub fn ligand_candidates_dir(&self) -> PathBuf {
        self.root.join("ligand_protomers")
    }

    pub fn receptor_without_ligand(&self) -> PathBuf {
        self.root.join("receptor_no_ligand.pdb")
    }

    pub fn receptor_atoms(&self) -> PathBuf {
        self.root.join("receptor_atoms.pdb")
    }

    pub fn receptor_with_crystal_record(&self) -> PathBuf {
        self.root.join("receptor_cryst1.pdb")
    }

    /// Output stem handed to the receptor preparation tool; it appends its own extensions
    pub fn prepared_receptor_stem(&self) -> PathBuf {
        self.root.join("receptor_prepared")
    }

    pub fn prepared_receptor(&self) -> PathBuf {
        self.prepared_receptor_stem().with_extension("pdbqt")
    }

    pub fn docking_output(&self) -> PathBuf {
        self.root.join("docking.pdbqt")
    }

    pub fn pose(&self) -> PathBuf {
        self.root.join("pose.sdf")
    }
}

/// Apply `remove` to every entry directly under `dir`, collecting the ones that fail
fn sweep<R>(dir: &Path, remove: R) -> Vec<CleanupFailure>
where
    R: Fn(&Path) -> io::Result<()>,
{
    let mut failures = Vec::new();

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(error) => {
            warn!("Can't list workspace {}: {}", dir.display(), error);
            failures.push(CleanupFailure { path: dir.to_path_buf(), error });
            return failures;
        }
    };

    for entry in entries {
        let path = match entry {
            Ok(entry) => entry.path(),
            Err(error) => {
                warn!("Can't read workspace entry: {error}");
                failures.push(CleanupFailure { path: dir.to_path_buf(), error });
                continue;
            }
        };
        if let Err(error) = remove(&path) {
            warn!("Failed to delete {}: {}", path.display(), error);
            failures.push(CleanupFailure { path, error });
        }
    }

    failures
}

fn remove_entry(path: &Path) -> io::Result<()> {
    // symlink_metadata so a link to a directory is unlinked, not followed
    let file_type = fs::symlink_metadata(path)?.file_type();
    if file_type.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Box configuration written next to a prepared receptor: `X.pdbqt` -> `X.box.txt`
pub fn box_config_path(prepared_receptor: &Path) -> PathBuf {
    prepared_receptor.with_extension("box.txt")
}

/// File the hydrogenation tool writes into its working directory: `X.pdb` -> `<dir>/XFH.pdb`
pub fn hydrogenated_path(working_dir: &Path, input: &Path) -> PathBuf {
    let stem = input.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    working_dir.join(format!("{stem}FH.pdb"))
}

/// Run `body` with the process working directory set to `path`
///
/// The working directory is process-wide state: this holds a global lock for the duration of the
/// body and restores the previous directory on every exit path, including panics.
pub fn with_working_directory<T, F>(path: &Path, body: F) -> io::Result<T>
where
    F: FnOnce() -> T,
{
    let _lock = CWD_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let previous = env::current_dir()?;
    env::set_current_dir(path)?;
    let _restore = RestoreDir { previous };
    Ok(body())
}

struct RestoreDir {
    previous: PathBuf,
}

impl Drop for RestoreDir {
    fn drop(&mut self) {
        if let Err(err) = env::set_current_dir(&self.previous) {
            warn!("Can't restore working directory {}: {}", self.previous.display(), err);
        }
    }
}
