//! PID file handling (spec.md §6 "Persistent state"). Grounded on
//! `examples/original_source/nsd/pidfile.c`: write a single line on start,
//! remove on clean shutdown, tolerate a missing file on read, reject
//! malformed contents.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{AdpError, Result};

pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        fs::write(&path, format!("{}\n", std::process::id()))?;
        Ok(Self { path })
    }

    /// Tolerates a missing file (returns `Ok(None)`); a present-but-malformed
    /// file is an error.
    pub fn read(path: impl AsRef<Path>) -> Result<Option<u32>> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let trimmed = contents.trim();
        if trimmed.is_empty() {
            return Err(AdpError::PidFile(format!("{} is empty", path.display())));
        }
        trimmed
            .parse::<u32>()
            .map(Some)
            .map_err(|_| AdpError::PidFile(format!("{} does not contain a valid pid", path.display())))
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
