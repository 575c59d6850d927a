//! Crash-safe progress for long annotation runs.
//!
//! Finished rows are buffered in memory and appended to
//! `<output>.journal` (one JSON object per line) every few completions,
//! so a checkpoint costs O(dirty rows) instead of a full CSV rewrite. The
//! next run replays the journal onto the freshly loaded table. When a run
//! ends, the table is written once and the journal is removed.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::{Table, TableError};

/// Errors that can occur while checkpointing.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Journal IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode journal entry: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Table(#[from] TableError),
}

/// One journal line: the cells written for a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowUpdate {
    pub row: usize,
    pub values: BTreeMap<String, String>,
}

/// Dirty-row buffer backed by an append-only journal file.
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    dirty: Vec<RowUpdate>,
}

impl Journal {
    /// Journal living next to `output`.
    pub fn for_output(output: &Path) -> Self {
        let mut name = output.as_os_str().to_owned();
        name.push(".journal");
        Self {
            path: PathBuf::from(name),
            dirty: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Rows buffered since the last flush.
    pub fn pending(&self) -> usize {
        self.dirty.len()
    }

    /// Buffer the cells written for `row`.
    pub fn record(&mut self, row: usize, values: &[(String, String)]) {
        self.dirty.push(RowUpdate {
            row,
            values: values.iter().cloned().collect(),
        });
    }

    /// Append buffered rows to the journal and fsync. Returns rows written.
    pub fn flush(&mut self) -> Result<usize, CheckpointError> {
        if self.dirty.is_empty() {
            return Ok(0);
        }

        let mut buf = Vec::new();
        for update in &self.dirty {
            serde_json::to_writer(&mut buf, update)?;
            buf.push(b'\n');
        }

        let io_err = |source: std::io::Error| CheckpointError::Io {
            path: self.path.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;
        file.write_all(&buf).map_err(io_err)?;
        file.sync_data().map_err(io_err)?;

        let written = self.dirty.len();
        self.dirty.clear();
        debug!("Journaled {} row(s) to {}", written, self.path.display());
        Ok(written)
    }

    /// Apply a previous run's journal to `table`. Returns rows applied.
    ///
    /// Unreadable lines (a torn final write, typically) and rows outside
    /// the table are skipped.
    pub fn replay(&self, table: &mut Table) -> Result<usize, CheckpointError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(source) => {
                return Err(CheckpointError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let mut applied = 0;
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|source| CheckpointError::Io {
                path: self.path.clone(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }

            let update: RowUpdate = match serde_json::from_str(&line) {
                Ok(u) => u,
                Err(e) => {
                    warn!(
                        "Skipping unreadable journal line {} in {}: {}",
                        lineno + 1,
                        self.path.display(),
                        e
                    );
                    continue;
                }
            };

            if update.row >= table.len() {
                warn!(
                    "Journal row {} is outside the table ({} rows), skipping",
                    update.row,
                    table.len()
                );
                continue;
            }

            for (column, value) in &update.values {
                table.set(update.row, column, value.as_str())?;
            }
            applied += 1;
        }

        if applied > 0 {
            info!("Replayed {} row(s) from {}", applied, self.path.display());
        }
        Ok(applied)
    }

    /// Forget buffered rows and delete the journal file.
    pub fn discard(&mut self) -> Result<(), CheckpointError> {
        self.dirty.clear();
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CheckpointError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Write the whole table to `output` atomically, then drop the journal.
    ///
    /// Rows still in the buffer are already in `table`. If the write fails
    /// the journal is kept for the next run.
    pub fn finish(mut self, table: &Table, output: &Path) -> Result<(), CheckpointError> {
        table.save(output)?;
        self.discard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Table {
        Table::new(
            vec!["id".into()],
            vec![vec!["a".into()], vec!["b".into()], vec!["c".into()]],
        )
    }

    fn cells(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(c, v)| (c.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_journal_path() {
        let journal = Journal::for_output(Path::new("/data/posts.csv"));
        assert_eq!(journal.path(), Path::new("/data/posts.csv.journal"));
    }

    #[test]
    fn test_flush_then_replay() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("posts.csv");

        let mut journal = Journal::for_output(&output);
        journal.record(0, &cells(&[("is_flood_related", "True"), ("done", "True")]));
        journal.record(2, &cells(&[("is_flood_related", "False"), ("done", "True")]));
        assert_eq!(journal.flush().unwrap(), 2);
        assert_eq!(journal.pending(), 0);

        journal.record(1, &cells(&[("done", "True")]));
        journal.flush().unwrap();

        let mut fresh = table();
        let applied = Journal::for_output(&output).replay(&mut fresh).unwrap();
        assert_eq!(applied, 3);
        assert_eq!(fresh.get(0, "is_flood_related"), Some("True"));
        assert_eq!(fresh.get(2, "is_flood_related"), Some("False"));
        assert_eq!(fresh.get(1, "done"), Some("True"));
        assert_eq!(fresh.get(1, "is_flood_related"), Some(""));
    }

    #[test]
    fn test_torn_line_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("posts.csv");
        let journal = Journal::for_output(&output);
        fs::write(
            journal.path(),
            "{\"row\":1,\"values\":{\"done\":\"True\"}}\n{\"row\":9,\"values\":{}}\n{\"row\":2,\"val",
        )
        .unwrap();

        let mut fresh = table();
        assert_eq!(journal.replay(&mut fresh).unwrap(), 1);
        assert_eq!(fresh.get(1, "done"), Some("True"));
    }

    #[test]
    fn test_missing_journal_replays_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::for_output(&dir.path().join("posts.csv"));
        let mut fresh = table();
        assert_eq!(journal.replay(&mut fresh).unwrap(), 0);
        assert!(!journal.exists());
    }

    #[test]
    fn test_finish_writes_table_and_removes_journal() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("posts.csv");

        let mut journal = Journal::for_output(&output);
        journal.record(0, &cells(&[("done", "True")]));
        journal.flush().unwrap();
        assert!(journal.exists());
        let journal_path = journal.path().to_path_buf();

        let mut t = table();
        t.set(0, "done", "True").unwrap();
        journal.finish(&t, &output).unwrap();

        assert!(!journal_path.exists());
        assert_eq!(Table::load(&output).unwrap().get(0, "done"), Some("True"));
    }
}
