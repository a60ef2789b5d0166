//! File-backed execution store using JSON lines.

use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use super::{latest_matching, TimeWindow};
use crate::core::error::StoreError;
use crate::core::ledger::ExecutionStore;
use crate::core::record::ExecutionRecord;
use crate::util::serde::ExecutionFilter;

/// Appends one JSON line per execution snapshot.
///
/// A record is written at submission and again at its terminal transition;
/// readers keep the last line per execution id.
pub struct JsonlExecutionStore {
    path: PathBuf,
    file: File,
}

impl JsonlExecutionStore {
    /// Open (or create) the log at `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` when the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    /// Location of the log.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every snapshot in write order. Malformed lines are skipped.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` when the file cannot be read.
    pub fn read_all(&self) -> Result<Vec<ExecutionRecord>, StoreError> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut records = Vec::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ExecutionRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    path = %self.path.display(),
                    line = index + 1,
                    error = %e,
                    "skipping malformed execution snapshot"
                ),
            }
        }
        Ok(records)
    }

    /// Latest snapshot of one execution.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` when the file cannot be read.
    pub fn get(&self, execution_id: &str) -> Result<Option<ExecutionRecord>, StoreError> {
        Ok(self
            .read_all()?
            .into_iter()
            .rev()
            .find(|r| r.execution_id == execution_id))
    }

    /// Latest snapshots matching `filter` and submitted inside `window`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` when the file cannot be read.
    pub fn query(
        &self,
        filter: &ExecutionFilter,
        window: TimeWindow,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        let records = self.read_all()?;
        Ok(latest_matching(records.iter(), filter, window))
    }
}

impl ExecutionStore for JsonlExecutionStore {
    fn append(&mut self, record: &ExecutionRecord) -> Result<(), StoreError> {
        let line = serde_json::to_string(record)?;
        writeln!(self.file, "{line}")?;
        self.file.flush()?;
        Ok(())
    }
}
