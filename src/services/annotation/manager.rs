//! Annotation manager: the resumable, concurrency-bounded loop over a table.
//!
//! The manager owns the table and the run counters. Worker tasks only encode
//! images, call the model and parse the reply; every table write, journal
//! flush and counter update happens on the manager's side of the `JoinSet`,
//! so no lock is needed around them.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::RunConfig;
use crate::llm::{ChatRequest, InferenceClient, InferenceError};
use crate::media::{ImageCodec, MediaResolver};
use crate::models::{is_truthy, Table, TableError};
use crate::services::checkpoint::{CheckpointError, Journal};

use super::annotator::Annotator;
use super::parser::truncate_chars;
use super::types::{AnnotationEvent, AnnotationOutput, BatchAnnotationResult, Evidence};

/// Characters of a row error kept in logs and events.
const ERROR_EXCERPT_CHARS: usize = 200;

/// Errors that abort a whole run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to load {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: TableError,
    },

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// Why a single row produced no result. Never fatal to the run.
#[derive(Debug, Error)]
pub enum RowError {
    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error("Worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// Counters for one run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunState {
    /// Rows dispatched to the model
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
}

impl RunState {
    pub fn remaining(&self) -> usize {
        self.total - self.completed - self.failed
    }
}

/// Runs an [`Annotator`] over every pending row of a table.
pub struct AnnotationManager {
    client: InferenceClient,
    model: Arc<str>,
    warm_up_timeout: Duration,
}

impl AnnotationManager {
    pub fn new(client: InferenceClient, model: &str) -> Self {
        Self {
            client,
            model: model.into(),
            warm_up_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_warm_up_timeout(mut self, timeout: Duration) -> Self {
        self.warm_up_timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Annotate the selected rows of `input` and write the result to
    /// `config.output`.
    ///
    /// Rows that fail are left null and counted; they are picked up by the
    /// next resumed run. Only table and journal IO abort the run.
    pub async fn run(
        &self,
        annotator: Arc<dyn Annotator>,
        input: &Path,
        config: &RunConfig,
        event_tx: mpsc::Sender<AnnotationEvent>,
    ) -> Result<BatchAnnotationResult, PipelineError> {
        let mut table = load_table(input, config)?;
        let all_columns = annotator.all_columns();
        for column in &all_columns {
            table.ensure_column(column);
        }

        let mut journal = Journal::for_output(&config.output);
        if config.resume {
            journal.replay(&mut table)?;
        } else {
            journal.discard()?;
        }

        let range = config.row_range(table.len());
        let total_rows = range.len();
        let resolver =
            MediaResolver::new(config.project_root_for(input)).with_seed(config.seed);

        // Scan
        let mut pending: Vec<Evidence> = Vec::new();
        let mut no_evidence: Vec<usize> = Vec::new();
        let mut skipped = 0;
        let mut healed = 0;
        for row in range {
            let Some(record) = table.record(row) else {
                continue;
            };

            if config.resume && annotator.is_done(&record) {
                if !annotator.has_error_note(&record) {
                    skipped += 1;
                    continue;
                }
                debug!("Row {} has a stored error, retrying", row);
                healed += 1;
            }

            let media = resolver.resolve(&record, annotator.image_columns(&record));
            match Evidence::gather(&record, annotator.text_columns(), media) {
                Ok(evidence) => pending.push(evidence),
                Err(_) => no_evidence.push(row),
            }
        }

        // Rows about to be sent start out null so a failure leaves them null.
        for evidence in &pending {
            table.clear(evidence.row(), &all_columns)?;
        }

        for &row in &no_evidence {
            let columns = annotator.completed_columns(annotator.no_evidence_output());
            table.set_many(row, &columns)?;
            journal.record(row, &columns);
        }
        journal.flush()?;

        info!(
            "{}: {} rows selected, {} pending, {} already complete, {} without evidence",
            annotator.annotation_type(),
            total_rows,
            pending.len(),
            skipped,
            no_evidence.len()
        );
        let _ = event_tx
            .send(AnnotationEvent::Started {
                total_rows,
                pending: pending.len(),
                skipped,
                healed,
                defaulted: no_evidence.len(),
            })
            .await;

        if config.warm_up && annotator.wants_warm_up() && !pending.is_empty() {
            self.warm_up(annotator.as_ref(), &event_tx).await;
        }

        let interval = config.checkpoint_interval(annotator.checkpoint_interval());
        let codec = Arc::new(ImageCodec::new(annotator.max_short_side()));
        let limit = self.client.max_concurrent();

        let mut state = RunState {
            total: pending.len(),
            ..Default::default()
        };
        let mut in_flight: JoinSet<(usize, Result<AnnotationOutput, RowError>)> = JoinSet::new();
        let mut queue = pending.into_iter();

        loop {
            while in_flight.len() < limit {
                let Some(evidence) = queue.next() else {
                    break;
                };
                in_flight.spawn(annotate_row(
                    self.client.clone(),
                    annotator.clone(),
                    codec.clone(),
                    self.model.clone(),
                    evidence,
                ));
            }

            let (row, outcome) = match in_flight.join_next().await {
                None => break,
                Some(Ok(joined)) => joined,
                Some(Err(e)) => {
                    // Row unknown; it stays null for the next run.
                    state.failed += 1;
                    warn!("Worker task failed: {}", e);
                    continue;
                }
            };

            match outcome {
                Ok(output) => {
                    let summary = output.summary.clone();
                    let columns = annotator.completed_columns(output);
                    table.set_many(row, &columns)?;
                    journal.record(row, &columns);
                    state.completed += 1;

                    let _ = event_tx
                        .send(AnnotationEvent::RowCompleted { row, summary })
                        .await;

                    if state.completed % interval == 0 {
                        journal.flush()?;
                        let _ = event_tx
                            .send(AnnotationEvent::Checkpoint {
                                completed: state.completed,
                                pending: state.remaining(),
                            })
                            .await;
                    }
                }
                Err(e) => {
                    state.failed += 1;
                    let message = e.to_string();
                    let excerpt = truncate_chars(&message, ERROR_EXCERPT_CHARS);
                    warn!("Row {} failed: {}", row, excerpt);
                    let _ = event_tx
                        .send(AnnotationEvent::RowFailed {
                            row,
                            error: excerpt.to_string(),
                        })
                        .await;
                }
            }
        }

        journal.finish(&table, &config.output)?;

        let flagged = annotator.flag_column().map(|column| {
            (0..table.len())
                .filter(|&row| table.get(row, column).is_some_and(is_truthy))
                .count()
        });

        let _ = event_tx
            .send(AnnotationEvent::Complete {
                succeeded: state.completed,
                failed: state.failed,
                skipped,
                defaulted: no_evidence.len(),
                flagged,
            })
            .await;

        Ok(BatchAnnotationResult {
            succeeded: state.completed,
            failed: state.failed,
            skipped,
            defaulted: no_evidence.len(),
            healed,
            flagged,
            output: config.output.clone(),
        })
    }

    /// Load the model before the batch. Failures are reported, not fatal.
    async fn warm_up(&self, annotator: &dyn Annotator, event_tx: &mpsc::Sender<AnnotationEvent>) {
        let _ = event_tx
            .send(AnnotationEvent::WarmingUp {
                model: self.model.to_string(),
            })
            .await;

        let request = ChatRequest::new(
            &self.model,
            &annotator.request_profile(),
            annotator.warm_up_messages(),
        )
        .with_timeout(self.warm_up_timeout);

        if let Err(e) = self.client.warm_up(&request).await {
            warn!("Warm-up failed for {}: {}", self.model, e);
            let _ = event_tx
                .send(AnnotationEvent::WarmUpFailed {
                    error: e.to_string(),
                })
                .await;
        }
    }
}

/// Resuming picks up where the last run wrote; a fresh run starts from the input.
fn load_table(input: &Path, config: &RunConfig) -> Result<Table, PipelineError> {
    let source = if config.resume && config.output != input && config.output.is_file() {
        info!("Resuming from {}", config.output.display());
        config.output.as_path()
    } else {
        input
    };
    Table::load(source).map_err(|source_err| PipelineError::Load {
        path: source.to_path_buf(),
        source: source_err,
    })
}

/// One row: encode images, ask the model, parse the reply.
///
/// The work runs in its own task so a panic is reported against its row.
async fn annotate_row(
    client: InferenceClient,
    annotator: Arc<dyn Annotator>,
    codec: Arc<ImageCodec>,
    model: Arc<str>,
    evidence: Evidence,
) -> (usize, Result<AnnotationOutput, RowError>) {
    let row = evidence.row();
    let outcome =
        match tokio::spawn(request_row(client, annotator, codec, model, evidence)).await {
            Ok(outcome) => outcome,
            Err(e) => Err(RowError::Worker(e)),
        };
    (row, outcome)
}

async fn request_row(
    client: InferenceClient,
    annotator: Arc<dyn Annotator>,
    codec: Arc<ImageCodec>,
    model: Arc<str>,
    evidence: Evidence,
) -> Result<AnnotationOutput, RowError> {
    let paths = evidence.media().paths.clone();
    let images = tokio::task::spawn_blocking(move || {
        paths
            .iter()
            .filter_map(|path| match codec.encode(path) {
                Ok(encoded) => Some(encoded),
                Err(e) => {
                    warn!("Skipping image: {}", e);
                    None
                }
            })
            .collect::<Vec<_>>()
    })
    .await?;

    let messages = annotator.build_messages(&evidence, images);
    let request = ChatRequest::new(&model, &annotator.request_profile(), messages);
    let raw = client.send(&request).await?;
    Ok(annotator.parse(&raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_state_remaining() {
        let state = RunState {
            total: 10,
            completed: 6,
            failed: 1,
        };
        assert_eq!(state.remaining(), 3);
    }

    #[test]
    fn test_load_prefers_existing_output_when_resuming() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.csv");
        let output = dir.path().join("out.csv");
        std::fs::write(&input, "id\n1\n").unwrap();
        std::fs::write(&output, "id,done\n1,True\n").unwrap();

        let resumed = load_table(&input, &RunConfig::new(&output)).unwrap();
        assert!(resumed.has_column("done"));

        let fresh = load_table(&input, &RunConfig::new(&output).with_resume(false)).unwrap();
        assert!(!fresh.has_column("done"));
    }

    #[test]
    fn test_missing_input_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("missing.csv");
        let err = load_table(&input, &RunConfig::new(&input)).unwrap_err();
        assert!(matches!(err, PipelineError::Load { .. }));
    }
}
