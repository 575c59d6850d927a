//! Annotator trait shared by the annotation tasks.

use std::sync::Arc;

use crate::llm::prompts::WARM_UP_PROMPT;
use crate::llm::{ChatMessage, RequestProfile, DEFAULT_CLASSIFY_MODEL, DEFAULT_DETAILED_MODEL};
use crate::media::ImageColumn;
use crate::models::{bool_cell, Record};

use super::damage_annotator::DamageAnnotator;
use super::flood_annotator::FloodAnnotator;
use super::impact_annotator::ImpactAnnotator;
use super::parser::{mentions_error, scrub_error_words};
use super::types::{AnnotationOutput, Evidence, NO_EVIDENCE_REASON};

/// One kind of per-row VLM annotation.
///
/// Implementations own everything task-specific: which columns they read
/// and write, the fixed instructions, and a total parser for the reply. The
/// `AnnotationManager` runs every task through the same resumable loop.
pub trait Annotator: Send + Sync {
    /// Short machine name, used in logs.
    fn annotation_type(&self) -> &str;

    /// Human-readable name for CLI progress output.
    fn display_name(&self) -> &str;

    /// Boolean column marking a row as done.
    fn status_column(&self) -> &str;

    /// Free-text reason/note column. A value mentioning "error" here marks
    /// a complete row as needing another attempt.
    fn note_column(&self) -> &str;

    /// Every result column written on success, the note included and the
    /// status column excluded.
    fn output_columns(&self) -> Vec<String>;

    /// Text columns read as evidence.
    fn text_columns(&self) -> &[&'static str];

    /// Image columns read as evidence for this record.
    fn image_columns(&self, record: &Record<'_>) -> &'static [ImageColumn];

    /// Cap on the shorter image side before encoding.
    fn max_short_side(&self) -> u32;

    /// Successful rows between checkpoint flushes.
    fn checkpoint_interval(&self) -> usize;

    /// Server-side options sent with every request.
    fn request_profile(&self) -> RequestProfile;

    /// Fixed system message, if the task uses one.
    fn system_prompt(&self) -> Option<&'static str> {
        None
    }

    /// Whether to send a warm-up request before the batch.
    fn wants_warm_up(&self) -> bool {
        false
    }

    /// Boolean column counted in the run summary.
    fn flag_column(&self) -> Option<&str> {
        None
    }

    /// User prompt text for one row; `attached` images accompany it.
    fn build_prompt(&self, evidence: &Evidence, attached: usize) -> String;

    /// Parse a raw model reply. Never fails.
    fn parse(&self, raw: &str) -> AnnotationOutput;

    /// Schema defaults with the given note.
    fn default_output(&self, note: &str) -> AnnotationOutput;

    /// Result for rows with nothing to send.
    fn no_evidence_output(&self) -> AnnotationOutput {
        self.default_output(NO_EVIDENCE_REASON)
    }

    /// Full message list for one row.
    fn build_messages(&self, evidence: &Evidence, images: Vec<Arc<str>>) -> Vec<ChatMessage> {
        let prompt = self.build_prompt(evidence, images.len());
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = self.system_prompt() {
            messages.push(ChatMessage::system(system));
        }
        messages.push(ChatMessage::user(prompt).with_images(images));
        messages
    }

    /// Messages for the warm-up request.
    fn warm_up_messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = self.system_prompt() {
            messages.push(ChatMessage::system(system));
        }
        messages.push(ChatMessage::user(WARM_UP_PROMPT));
        messages
    }

    /// Whether the row is marked complete.
    fn is_done(&self, record: &Record<'_>) -> bool {
        record.is_truthy(self.status_column())
    }

    /// Whether the row's note records a stored error.
    fn has_error_note(&self, record: &Record<'_>) -> bool {
        record.raw(self.note_column()).is_some_and(mentions_error)
    }

    /// Output columns plus the status marker, as written on completion.
    ///
    /// The note is scrubbed of the error marker so a completed row is
    /// skipped by the next resume even when the model's own words said
    /// "error".
    fn completed_columns(&self, output: AnnotationOutput) -> Vec<(String, String)> {
        let mut columns = output.columns;
        for (column, value) in columns.iter_mut() {
            if column.as_str() == self.note_column() && mentions_error(value) {
                *value = scrub_error_words(value);
            }
        }
        columns.push((self.status_column().to_string(), bool_cell(true)));
        columns
    }

    /// Output columns plus the status column, for resets.
    fn all_columns(&self) -> Vec<String> {
        let mut columns = self.output_columns();
        columns.push(self.status_column().to_string());
        columns
    }
}

/// Source platform of a table, selecting columns for the impact task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Platform {
    Tiktok,
    Twitter,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Tiktok => "tiktok",
            Platform::Twitter => "twitter",
        }
    }
}

/// The annotation tasks available from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Flood relevance
    Classify,
    /// Non-economic humanitarian impact
    Impact(Platform),
    /// Visible damage categories and a short description
    Damage,
}

impl TaskKind {
    pub fn default_model(&self) -> &'static str {
        match self {
            TaskKind::Classify => DEFAULT_CLASSIFY_MODEL,
            TaskKind::Impact(_) | TaskKind::Damage => DEFAULT_DETAILED_MODEL,
        }
    }

    pub fn default_concurrency(&self) -> usize {
        match self {
            TaskKind::Classify => 3,
            TaskKind::Impact(_) | TaskKind::Damage => 2,
        }
    }

    pub fn annotator(&self) -> Arc<dyn Annotator> {
        match self {
            TaskKind::Classify => Arc::new(FloodAnnotator::new()),
            TaskKind::Impact(platform) => Arc::new(ImpactAnnotator::new(*platform)),
            TaskKind::Damage => Arc::new(DamageAnnotator::new()),
        }
    }
}

/// Prompt line stating how many images were attached out of how many.
pub fn attachment_line(noun: &str, attached: usize, declared: usize) -> String {
    if declared > attached {
        format!(
            "{} {}(s) attached (selected from {} total).",
            attached, noun, declared
        )
    } else {
        format!("{} {}(s) attached.", attached, noun)
    }
}

/// Canonical cell encoding for scores.
pub fn float_cell(value: f64) -> String {
    format!("{:?}", value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Table;

    #[test]
    fn test_attachment_line() {
        assert_eq!(
            attachment_line("key frame", 3, 7),
            "3 key frame(s) attached (selected from 7 total)."
        );
        assert_eq!(attachment_line("image", 2, 2), "2 image(s) attached.");
    }

    #[test]
    fn test_float_cell() {
        assert_eq!(float_cell(0.0), "0.0");
        assert_eq!(float_cell(0.85), "0.85");
        assert_eq!(float_cell(1.0), "1.0");
    }

    #[test]
    fn test_error_note_detection() {
        let annotator = TaskKind::Damage.annotator();
        let table = Table::new(
            vec![annotator.status_column().into(), annotator.note_column().into()],
            vec![
                vec!["True".into(), "Processing ERROR: timeout".into()],
                vec!["True".into(), "ok".into()],
                vec!["False".into(), "".into()],
            ],
        );
        assert!(annotator.has_error_note(&table.record(0).unwrap()));
        assert!(!annotator.has_error_note(&table.record(1).unwrap()));
        assert!(annotator.is_done(&table.record(1).unwrap()));
        assert!(!annotator.is_done(&table.record(2).unwrap()));
    }

    #[test]
    fn test_completed_note_never_reads_as_error() {
        let annotator = TaskKind::Classify.annotator();
        let output = annotator.parse("Sorry, an error occurred while viewing the images.");
        let columns = annotator.completed_columns(output);

        let table = Table::new(
            columns.iter().map(|(c, _)| c.clone()).collect(),
            vec![columns.iter().map(|(_, v)| v.clone()).collect()],
        );
        let record = table.record(0).unwrap();
        assert!(annotator.is_done(&record));
        assert!(!annotator.has_error_note(&record));
        assert_eq!(
            record.raw(annotator.note_column()),
            Some("Unparseable response: Sorry, an issue occurred while viewing the images.")
        );
    }

    #[test]
    fn test_task_defaults() {
        assert_eq!(TaskKind::Classify.default_concurrency(), 3);
        assert_eq!(TaskKind::Damage.default_concurrency(), 2);
        assert_eq!(TaskKind::Classify.default_model(), DEFAULT_CLASSIFY_MODEL);
        assert_eq!(
            TaskKind::Impact(Platform::Twitter).default_model(),
            DEFAULT_DETAILED_MODEL
        );
    }

    #[test]
    fn test_warm_up_messages_carry_system_prompt() {
        let impact = TaskKind::Impact(Platform::Tiktok).annotator();
        let messages = impact.warm_up_messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].content, WARM_UP_PROMPT);

        let flood = TaskKind::Classify.annotator();
        assert_eq!(flood.warm_up_messages().len(), 1);
    }
}
