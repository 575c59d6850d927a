//! Flood-relevance classification of TikTok posts.

use crate::llm::prompts::{FLOOD_INSTRUCTIONS, FLOOD_RESPONSE_FORMAT};
use crate::llm::RequestProfile;
use crate::media::{ImageColumn, CLASSIFY_SHORT_SIDE};
use crate::models::{bool_cell, Record};

use super::annotator::{attachment_line, Annotator};
use super::parser::{
    as_bool, as_text, extract_object, keyword_guess, loose_bool, truncate_chars, ParseSource,
};
use super::types::{AnnotationOutput, Evidence};

pub const FLOOD_COLUMN: &str = "is_flood_related";
pub const CONFIDENCE_COLUMN: &str = "flood_classification_confidence";
pub const REASON_COLUMN: &str = "flood_classification_reason";
pub const STATUS_COLUMN: &str = "flood_classification_complete";

const TEXT_COLUMNS: &[&str] = &["title", "hashtags", "transcription_english"];
const IMAGE_COLUMNS: &[ImageColumn] = &[ImageColumn::KEY_FRAMES];

const POSITIVE_WORDS: &[&str] = &["related", "flood", "floods", "flooding", "flooded", "yes", "true"];
const NEGATIVE_WORDS: &[&str] = &["not", "unrelated", "false", "no"];

/// How much of an unparseable reply is kept in the reason.
const FALLBACK_EXCERPT_CHARS: usize = 200;

/// Coarse model confidence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Confidence {
    High,
    Medium,
    #[default]
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }

    /// Lenient parse; anything unrecognized is `Low`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "high" => Confidence::High,
            "medium" => Confidence::Medium,
            _ => Confidence::Low,
        }
    }
}

/// Typed flood-relevance result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FloodVerdict {
    pub is_flood_related: bool,
    pub confidence: Confidence,
    pub reason: String,
}

impl FloodVerdict {
    pub fn to_columns(&self) -> Vec<(String, String)> {
        vec![
            (FLOOD_COLUMN.to_string(), bool_cell(self.is_flood_related)),
            (CONFIDENCE_COLUMN.to_string(), self.confidence.as_str().to_string()),
            (REASON_COLUMN.to_string(), self.reason.clone()),
        ]
    }
}

/// Parse a classification reply, strictest strategy first.
pub fn parse_flood_response(raw: &str) -> (FloodVerdict, ParseSource) {
    if let Some(map) = extract_object(raw, FLOOD_COLUMN) {
        let verdict = FloodVerdict {
            is_flood_related: as_bool(map.get(FLOOD_COLUMN)),
            confidence: Confidence::parse(&as_text(map.get("confidence"))),
            reason: as_text(map.get("reason")),
        };
        return (verdict, ParseSource::Json);
    }

    if let Some(is_flood_related) = loose_bool(raw, FLOOD_COLUMN) {
        let verdict = FloodVerdict {
            is_flood_related,
            confidence: Confidence::Medium,
            reason: "Parsed from response".to_string(),
        };
        return (verdict, ParseSource::Pattern);
    }

    let excerpt = truncate_chars(raw.trim(), FALLBACK_EXCERPT_CHARS);
    if let Some(is_flood_related) = keyword_guess(raw, POSITIVE_WORDS, NEGATIVE_WORDS) {
        let verdict = FloodVerdict {
            is_flood_related,
            confidence: Confidence::Low,
            reason: format!("Fallback parsing: {}", excerpt),
        };
        return (verdict, ParseSource::Keywords);
    }

    let verdict = FloodVerdict {
        reason: format!("Unparseable response: {}", excerpt).trim_end().to_string(),
        ..Default::default()
    };
    (verdict, ParseSource::Default)
}

/// Annotator deciding whether flooding is the primary subject of a post.
#[derive(Debug, Default)]
pub struct FloodAnnotator;

impl FloodAnnotator {
    pub fn new() -> Self {
        Self
    }

    fn output(verdict: &FloodVerdict) -> AnnotationOutput {
        let label = if verdict.is_flood_related {
            "RELATED"
        } else {
            "NOT RELATED"
        };
        AnnotationOutput {
            columns: verdict.to_columns(),
            summary: format!(
                "{} (confidence: {})",
                label,
                verdict.confidence.as_str().to_uppercase()
            ),
        }
    }
}

impl Annotator for FloodAnnotator {
    fn annotation_type(&self) -> &str {
        "flood_classification"
    }

    fn display_name(&self) -> &str {
        "Flood Relevance"
    }

    fn status_column(&self) -> &str {
        STATUS_COLUMN
    }

    fn note_column(&self) -> &str {
        REASON_COLUMN
    }

    fn output_columns(&self) -> Vec<String> {
        [FLOOD_COLUMN, CONFIDENCE_COLUMN, REASON_COLUMN]
            .iter()
            .map(|c| c.to_string())
            .collect()
    }

    fn text_columns(&self) -> &[&'static str] {
        TEXT_COLUMNS
    }

    fn image_columns(&self, _record: &Record<'_>) -> &'static [ImageColumn] {
        IMAGE_COLUMNS
    }

    fn max_short_side(&self) -> u32 {
        CLASSIFY_SHORT_SIDE
    }

    fn checkpoint_interval(&self) -> usize {
        5
    }

    fn request_profile(&self) -> RequestProfile {
        RequestProfile::classification()
    }

    fn flag_column(&self) -> Option<&str> {
        Some(FLOOD_COLUMN)
    }

    fn build_prompt(&self, evidence: &Evidence, attached: usize) -> String {
        let mut parts = vec![FLOOD_INSTRUCTIONS.to_string()];

        // Title and hashtags are reliable; the transcript often is not.
        let reliable: Vec<String> = [("Title", "title"), ("Hashtags", "hashtags")]
            .iter()
            .filter_map(|(label, col)| evidence.text(col).map(|v| format!("{}: {}", label, v)))
            .collect();
        if !reliable.is_empty() {
            parts.push(format!("Title/Hashtags: {}", reliable.join("\n")));
            parts.push(String::new());
        }

        if let Some(transcript) = evidence.text("transcription_english") {
            parts.push(format!(
                "Audio/Speech (less reliable, may contain transcription errors): {}",
                transcript
            ));
            parts.push(String::new());
        }

        let declared = evidence.media().declared;
        let visual = if attached == 0 && declared == 0 {
            "no key frames attached.".to_string()
        } else {
            attachment_line("key frame", attached, declared)
        };
        parts.push(format!("Visual: {}", visual));
        parts.push(String::new());
        parts.push(FLOOD_RESPONSE_FORMAT.to_string());

        parts.join("\n")
    }

    fn parse(&self, raw: &str) -> AnnotationOutput {
        let (verdict, _) = parse_flood_response(raw);
        Self::output(&verdict)
    }

    fn default_output(&self, note: &str) -> AnnotationOutput {
        Self::output(&FloodVerdict {
            reason: note.to_string(),
            ..Default::default()
        })
    }
}
