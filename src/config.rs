//! Per-run configuration.
//!
//! Endpoint and model settings live in [`crate::llm::VlmConfig`]; this holds
//! the knobs that shape a single pass over a table.

use std::path::{Path, PathBuf};

/// Options for one annotation run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// Where the annotated table is written. Often the input itself.
    pub output: PathBuf,
    /// First row index considered.
    pub start_idx: usize,
    /// Number of rows considered from `start_idx`; all remaining if unset.
    pub max_rows: Option<usize>,
    /// Skip rows already marked complete and replay any journal.
    pub resume: bool,
    /// Inference calls allowed in flight at once.
    pub max_concurrent: usize,
    /// Successful rows between journal flushes; the task's default if unset.
    pub checkpoint_every: Option<usize>,
    /// Base directory for relative image paths; detected from the input
    /// path if unset.
    pub project_root: Option<PathBuf>,
    /// Send a warm-up request first, for tasks that use one.
    pub warm_up: bool,
    /// Seed for sampled image selection.
    pub seed: u64,
}

impl RunConfig {
    /// Defaults for a run writing to `output`.
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
            start_idx: 0,
            max_rows: None,
            resume: true,
            max_concurrent: 2,
            checkpoint_every: None,
            project_root: None,
            warm_up: true,
            seed: 0,
        }
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn with_range(mut self, start_idx: usize, max_rows: Option<usize>) -> Self {
        self.start_idx = start_idx;
        self.max_rows = max_rows;
        self
    }

    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn with_warm_up(mut self, warm_up: bool) -> Self {
        self.warm_up = warm_up;
        self
    }

    pub fn with_checkpoint_every(mut self, every: Option<usize>) -> Self {
        self.checkpoint_every = every;
        self
    }

    pub fn with_project_root(mut self, root: Option<PathBuf>) -> Self {
        self.project_root = root;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Row range `[start, end)` selected within a table of `len` rows.
    pub fn row_range(&self, len: usize) -> std::ops::Range<usize> {
        let start = self.start_idx.min(len);
        let end = match self.max_rows {
            Some(n) => start.saturating_add(n).min(len),
            None => len,
        };
        start..end
    }

    /// Checkpoint interval, falling back to `task_default`. Never zero.
    pub fn checkpoint_interval(&self, task_default: usize) -> usize {
        self.checkpoint_every.unwrap_or(task_default).max(1)
    }

    /// Project root for `input`, explicit or detected.
    pub fn project_root_for(&self, input: &Path) -> PathBuf {
        self.project_root
            .clone()
            .unwrap_or_else(|| crate::media::detect_project_root(input))
    }
}
