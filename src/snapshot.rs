use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::SnapshotConfig;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("cannot open {path}: {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("failed writing {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

/// Saves raw compressed frames as `<prefix>_NNNN.<extension>`.
///
/// The counter advances on every attempt, including ones whose file could
/// not be opened, so a name is never handed out twice.
#[derive(Debug)]
pub struct SnapshotWriter {
    directory: PathBuf,
    prefix: String,
    extension: String,
    counter: u32,
}

impl SnapshotWriter {
    pub fn new(config: &SnapshotConfig) -> Self {
        Self {
            directory: config.directory.clone(),
            prefix: config.prefix.clone(),
            extension: config.extension.clone(),
            counter: 0,
        }
    }

    /// Number of names handed out so far
    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// File name for a given counter value
    pub fn file_name(&self, counter: u32) -> String {
        format!("{}_{:04}.{}", self.prefix, counter, self.extension)
    }

    /// Writes `frame` verbatim to the next file and returns its path
    pub fn persist(&mut self, frame: &[u8]) -> Result<PathBuf, SnapshotError> {
        let path = self.directory.join(self.file_name(self.counter));
        self.counter += 1;

        let mut file = open_truncated(&path).map_err(|source| SnapshotError::Open {
            path: path.clone(),
            source,
        })?;
        file.write_all(frame)
            .and_then(|_| file.flush())
            .map_err(|source| SnapshotError::Write {
                path: path.clone(),
                source,
            })?;

        Ok(path)
    }
}

fn open_truncated(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .mode(0o666)
        .open(path)
}
