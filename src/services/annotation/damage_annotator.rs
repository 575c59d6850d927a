//! Visible damage categories and a short scene description.

use serde_json::{Map, Value};

use crate::llm::prompts::{DAMAGE_SYSTEM_PROMPT, DAMAGE_USER_PROMPT};
use crate::llm::RequestProfile;
use crate::media::{ImageColumn, DETAILED_SHORT_SIDE};
use crate::models::{bool_cell, Record};

use super::annotator::{attachment_line, Annotator};
use super::parser::{as_bool, as_text, extract_object, field, loose_bool, truncate_chars, ParseSource};
use super::types::{AnnotationOutput, Evidence};

pub const STATUS_COLUMN: &str = "damage_extraction_complete";
pub const NOTE_COLUMN: &str = "damage_extraction_note";
pub const DESCRIPTION_COLUMN: &str = "image_description";

pub const DAMAGE_CATEGORIES: [&str; 5] = ["car", "house", "crops", "road", "bridge"];

const MAX_DESCRIPTION_CHARS: usize = 1000;

const TIKTOK_IMAGES: &[ImageColumn] = &[ImageColumn::KEY_FRAMES];
const OTHER_IMAGES: &[ImageColumn] = &[ImageColumn::ALL_IMAGES];

/// Typed damage result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DamageReport {
    /// In `DAMAGE_CATEGORIES` order
    pub categories: [bool; 5],
    pub description: String,
}

impl DamageReport {
    pub fn from_json(map: &Map<String, Value>) -> Self {
        let mut report = Self::default();
        if let Some(cats) = field(map, "damage_categories") {
            for (slot, name) in report.categories.iter_mut().zip(DAMAGE_CATEGORIES) {
                *slot = as_bool(cats.get(name));
            }
        }
        report.description =
            truncate_chars(&as_text(map.get("image_description")), MAX_DESCRIPTION_CHARS).to_string();
        report
    }

    pub fn visible(&self) -> Vec<&'static str> {
        DAMAGE_CATEGORIES
            .iter()
            .zip(self.categories)
            .filter_map(|(name, present)| present.then_some(*name))
            .collect()
    }

    pub fn to_columns(&self) -> Vec<(String, String)> {
        let mut cols: Vec<(String, String)> = DAMAGE_CATEGORIES
            .iter()
            .zip(self.categories)
            .map(|(name, present)| (format!("damage_{}", name), bool_cell(present)))
            .collect();
        cols.push((DESCRIPTION_COLUMN.to_string(), self.description.clone()));
        cols
    }
}

/// Parse a damage reply, strictest strategy first.
///
/// A reply with no JSON at all is usually a plain description, so it is
/// kept as the description with every category left false.
pub fn parse_damage_response(raw: &str) -> (DamageReport, ParseSource) {
    if let Some(map) = extract_object(raw, "damage_categories") {
        return (DamageReport::from_json(&map), ParseSource::Json);
    }

    let mut report = DamageReport::default();
    let mut found = false;
    for (slot, name) in report.categories.iter_mut().zip(DAMAGE_CATEGORIES) {
        if let Some(present) = loose_bool(raw, name) {
            *slot = present;
            found = true;
        }
    }
    if found {
        return (report, ParseSource::Pattern);
    }

    let prose = raw.trim();
    if !prose.is_empty() && !prose.contains('{') {
        report.description = truncate_chars(prose, MAX_DESCRIPTION_CHARS).to_string();
        return (report, ParseSource::Keywords);
    }

    (report, ParseSource::Default)
}

/// Annotator listing visible flood damage.
#[derive(Debug, Default)]
pub struct DamageAnnotator;

impl DamageAnnotator {
    pub fn new() -> Self {
        Self
    }

    fn output(report: &DamageReport, note: &str) -> AnnotationOutput {
        let visible = report.visible();
        let summary = if visible.is_empty() {
            "Damages: none".to_string()
        } else {
            format!("Damages: [{}]", visible.join(", "))
        };
        let mut columns = report.to_columns();
        columns.push((NOTE_COLUMN.to_string(), note.to_string()));
        AnnotationOutput { columns, summary }
    }
}

impl Annotator for DamageAnnotator {
    fn annotation_type(&self) -> &str {
        "damage_extraction"
    }

    fn display_name(&self) -> &str {
        "Damage Description"
    }

    fn status_column(&self) -> &str {
        STATUS_COLUMN
    }

    fn note_column(&self) -> &str {
        NOTE_COLUMN
    }

    fn output_columns(&self) -> Vec<String> {
        Self::output(&DamageReport::default(), "")
            .columns
            .into_iter()
            .map(|(c, _)| c)
            .collect()
    }

    fn text_columns(&self) -> &[&'static str] {
        &[]
    }

    fn image_columns(&self, record: &Record<'_>) -> &'static [ImageColumn] {
        match record.text("source") {
            Some(source) if source.eq_ignore_ascii_case("tiktok") => TIKTOK_IMAGES,
            _ => OTHER_IMAGES,
        }
    }

    fn max_short_side(&self) -> u32 {
        DETAILED_SHORT_SIDE
    }

    fn checkpoint_interval(&self) -> usize {
        10
    }

    fn request_profile(&self) -> RequestProfile {
        RequestProfile::detailed()
    }

    fn system_prompt(&self) -> Option<&'static str> {
        Some(DAMAGE_SYSTEM_PROMPT)
    }

    fn wants_warm_up(&self) -> bool {
        true
    }

    fn build_prompt(&self, evidence: &Evidence, attached: usize) -> String {
        DAMAGE_USER_PROMPT.replace(
            "{image_count}",
            &attachment_line("image", attached, evidence.media().declared),
        )
    }

    fn parse(&self, raw: &str) -> AnnotationOutput {
        let (report, source) = parse_damage_response(raw);
        let note = match source {
            ParseSource::Json => "Extracted",
            ParseSource::Pattern => "Partially parsed from response",
            ParseSource::Keywords => "Description only, no categories returned",
            ParseSource::Default => "Unparseable response, defaults used",
        };
        Self::output(&report, note)
    }

    fn default_output(&self, note: &str) -> AnnotationOutput {
        Self::output(&DamageReport::default(), note)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Table;

    #[test]
    fn test_parse_json() {
        let raw = r#"{"damage_categories": {"car": true, "road": "yes", "bridge": false}, "image_description": "Submerged cars on a flooded road."}"#;
        let (report, source) = parse_damage_response(raw);
        assert_eq!(source, ParseSource::Json);
        assert_eq!(report.categories, [true, false, false, true, false]);
        assert_eq!(report.visible(), vec!["car", "road"]);
        assert_eq!(report.description, "Submerged cars on a flooded road.");
    }

    #[test]
    fn test_parse_fallbacks() {
        let (report, source) = parse_damage_response(r#"{"damage_categories": {"house": true, "crops": fal"#);
        assert_eq!(source, ParseSource::Pattern);
        assert_eq!(report.visible(), vec!["house"]);

        let (report, source) = parse_damage_response("A flooded village with houses under water.");
        assert_eq!(source, ParseSource::Keywords);
        assert!(report.visible().is_empty());
        assert!(report.description.starts_with("A flooded village"));

        let (report, source) = parse_damage_response("");
        assert_eq!(source, ParseSource::Default);
        assert_eq!(report, DamageReport::default());
    }

    #[test]
    fn test_output_columns() {
        let output = DamageAnnotator.parse(
            r#"{"damage_categories": {"bridge": true}, "image_description": "Broken bridge."}"#,
        );
        assert_eq!(output.get("damage_bridge"), Some("True"));
        assert_eq!(output.get("damage_car"), Some("False"));
        assert_eq!(output.get(DESCRIPTION_COLUMN), Some("Broken bridge."));
        assert_eq!(output.get(NOTE_COLUMN), Some("Extracted"));
        assert_eq!(output.summary, "Damages: [bridge]");
        assert_eq!(output.columns.len(), DamageAnnotator.output_columns().len());
    }

    #[test]
    fn test_image_columns_follow_source() {
        let table = Table::new(
            vec!["source".into()],
            vec![vec!["tiktok".into()], vec!["twitter".into()], vec!["".into()]],
        );
        let annotator = DamageAnnotator;
        assert_eq!(annotator.image_columns(&table.record(0).unwrap()), TIKTOK_IMAGES);
        assert_eq!(annotator.image_columns(&table.record(1).unwrap()), OTHER_IMAGES);
        assert_eq!(annotator.image_columns(&table.record(2).unwrap()), OTHER_IMAGES);
    }

    #[test]
    fn test_no_evidence_default() {
        let output = DamageAnnotator.no_evidence_output();
        assert_eq!(output.get(NOTE_COLUMN), Some("No evidence available"));
        assert_eq!(output.get(DESCRIPTION_COLUMN), Some(""));
    }
}
