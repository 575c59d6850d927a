//! Types shared across annotation tasks.

use std::collections::BTreeMap;
use std::path::PathBuf;

use thiserror::Error;

use crate::media::ResolvedMedia;
use crate::models::Record;

/// Reason written for rows that had nothing to send to the model.
pub const NO_EVIDENCE_REASON: &str = "No evidence available";

/// Events emitted during an annotation run.
/// Used by the CLI to drive progress bars and status messages.
#[derive(Debug, Clone)]
pub enum AnnotationEvent {
    Started {
        /// Rows in the selected range
        total_rows: usize,
        /// Rows that will be sent to the model
        pending: usize,
        /// Rows already complete
        skipped: usize,
        /// Complete rows reset because their note recorded an error
        healed: usize,
        /// Rows given the no-evidence default without a request
        defaulted: usize,
    },
    WarmingUp {
        model: String,
    },
    WarmUpFailed {
        error: String,
    },
    RowCompleted {
        row: usize,
        summary: String,
    },
    RowFailed {
        row: usize,
        error: String,
    },
    Checkpoint {
        completed: usize,
        pending: usize,
    },
    Complete {
        succeeded: usize,
        failed: usize,
        skipped: usize,
        defaulted: usize,
        flagged: Option<usize>,
    },
}

/// Flattened result of one row, ready to write into the table.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationOutput {
    /// `(column, cell)` pairs, status column excluded
    pub columns: Vec<(String, String)>,
    /// One-line description for progress output
    pub summary: String,
}

impl AnnotationOutput {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v.as_str())
    }
}

/// Result of a batch annotation run.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchAnnotationResult {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub defaulted: usize,
    pub healed: usize,
    /// Rows with the task's headline flag set, for tasks that have one
    pub flagged: Option<usize>,
    pub output: PathBuf,
}

/// A row has nothing the model could look at.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvidenceError {
    #[error("No evidence available (no text and no resolvable images)")]
    Missing,
}

/// Text and images gathered for one row before any request is made.
#[derive(Debug, Clone, PartialEq)]
pub struct Evidence {
    row: usize,
    text: BTreeMap<&'static str, String>,
    media: ResolvedMedia,
}

impl Evidence {
    /// Collect the present text of `columns` and pair it with `media`.
    pub fn gather(
        record: &Record<'_>,
        columns: &[&'static str],
        media: ResolvedMedia,
    ) -> Result<Self, EvidenceError> {
        let text: BTreeMap<_, _> = columns
            .iter()
            .filter_map(|&col| record.text(col).map(|v| (col, v.to_string())))
            .collect();

        if text.is_empty() && media.is_empty() {
            return Err(EvidenceError::Missing);
        }

        Ok(Self {
            row: record.index(),
            text,
            media,
        })
    }

    pub fn row(&self) -> usize {
        self.row
    }

    pub fn text(&self, column: &str) -> Option<&str> {
        self.text.get(column).map(String::as_str)
    }

    pub fn has_text(&self) -> bool {
        !self.text.is_empty()
    }

    pub fn media(&self) -> &ResolvedMedia {
        &self.media
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Table;

    #[test]
    fn test_gather_requires_text_or_images() {
        let table = Table::new(
            vec!["title".into(), "hashtags".into()],
            vec![
                vec!["nan".into(), "  ".into()],
                vec!["Assam flood".into(), "".into()],
            ],
        );

        let err = Evidence::gather(&table.record(0).unwrap(), &["title", "hashtags"], ResolvedMedia::default());
        assert_eq!(err, Err(EvidenceError::Missing));

        let ev = Evidence::gather(&table.record(1).unwrap(), &["title", "hashtags"], ResolvedMedia::default())
            .unwrap();
        assert_eq!(ev.row(), 1);
        assert_eq!(ev.text("title"), Some("Assam flood"));
        assert_eq!(ev.text("hashtags"), None);
    }

    #[test]
    fn test_images_alone_are_evidence() {
        let table = Table::new(vec!["title".into()], vec![vec!["".into()]]);
        let media = ResolvedMedia {
            paths: vec!["frame.jpg".into()],
            declared: 1,
        };
        let ev = Evidence::gather(&table.record(0).unwrap(), &["title"], media).unwrap();
        assert!(!ev.has_text());
        assert_eq!(ev.media().paths.len(), 1);
    }
}
