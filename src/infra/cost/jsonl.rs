//! File-backed cost store using JSON lines.
//!
//! Every write is one tagged line in `<dir>/budget.jsonl`. Loading replays
//! the log: entries accumulate, rules and alerts keep their last version, and
//! rule deletions are tombstones.

use std::collections::HashMap;
use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::budget::store::{CostSnapshot, CostStore};
use crate::budget::types::{BudgetRule, CostAlert, CostEntry};
use crate::core::error::StoreError;

const LOG_FILE: &str = "budget.jsonl";

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum LogLine<'a> {
    Entry(&'a CostEntry),
    Rule(&'a BudgetRule),
    RuleDeleted { rule_id: &'a str },
    Alert(&'a CostAlert),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OwnedLogLine {
    Entry(CostEntry),
    Rule(BudgetRule),
    RuleDeleted { rule_id: String },
    Alert(CostAlert),
}

/// Append-only cost log on disk.
pub struct JsonlCostStore {
    path: PathBuf,
    file: File,
}

impl JsonlCostStore {
    /// Open (or create) the log inside `dir`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` when the directory or file cannot be created.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        create_dir_all(dir)?;
        let path = dir.join(LOG_FILE);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    /// Location of the log.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&mut self, line: &LogLine<'_>) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(line)?;
        writeln!(self.file, "{encoded}")?;
        self.file.flush()?;
        Ok(())
    }
}

impl CostStore for JsonlCostStore {
    fn append_entry(&mut self, entry: &CostEntry) -> Result<(), StoreError> {
        self.write(&LogLine::Entry(entry))
    }

    fn save_rule(&mut self, rule: &BudgetRule) -> Result<(), StoreError> {
        self.write(&LogLine::Rule(rule))
    }

    fn delete_rule(&mut self, rule_id: &str) -> Result<(), StoreError> {
        self.write(&LogLine::RuleDeleted { rule_id })
    }

    fn save_alert(&mut self, alert: &CostAlert) -> Result<(), StoreError> {
        self.write(&LogLine::Alert(alert))
    }

    fn load(&self) -> Result<CostSnapshot, StoreError> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut entries = Vec::new();
        let mut rules: Vec<BudgetRule> = Vec::new();
        let mut alerts: Vec<CostAlert> = Vec::new();
        let mut alert_index: HashMap<String, usize> = HashMap::new();

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let parsed = match serde_json::from_str::<OwnedLogLine>(&line) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        line = index + 1,
                        error = %e,
                        "skipping malformed cost log line"
                    );
                    continue;
                }
            };
            match parsed {
                OwnedLogLine::Entry(entry) => entries.push(entry),
                OwnedLogLine::Rule(rule) => match rules.iter_mut().find(|r| r.id == rule.id) {
                    Some(existing) => *existing = rule,
                    None => rules.push(rule),
                },
                OwnedLogLine::RuleDeleted { rule_id } => rules.retain(|r| r.id != rule_id),
                OwnedLogLine::Alert(alert) => match alert_index.get(&alert.id) {
                    Some(&pos) => alerts[pos] = alert,
                    None => {
                        alert_index.insert(alert.id.clone(), alerts.len());
                        alerts.push(alert);
                    }
                },
            }
        }
        Ok(CostSnapshot {
            entries,
            rules,
            alerts,
        })
    }
}
