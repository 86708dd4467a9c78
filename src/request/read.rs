use std::{fs, io};
use std::io::Error;
use std::path::{Path, PathBuf};

/// JSON messages in a directory, in name order
pub fn get_message_paths(dir: &Path) -> Result<Vec<PathBuf>, Error> {
    let mut paths = fs::read_dir(dir)?
        .map(|res| res.map(|e| e.path()))
        .collect::<Result<Vec<PathBuf>, io::Error>>()?;
    paths.retain(|path| path.is_file() && path.extension().map_or(false, |ext| ext == "json"));
    paths.sort();
    Ok(paths)
}
