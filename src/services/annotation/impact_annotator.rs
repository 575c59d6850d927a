//! Non-economic humanitarian impact extraction.
//!
//! The model fills a fixed nested schema (loss types, urgency, visual cues,
//! visible demography, scene, sentiment, recovery); it is flattened into one
//! column per leaf.

use serde_json::{Map, Value};

use crate::llm::prompts::{IMPACT_SYSTEM_PROMPT, IMPACT_USER_PROMPT};
use crate::llm::RequestProfile;
use crate::media::{ImageColumn, DETAILED_SHORT_SIDE};
use crate::models::{bool_cell, Record};

use super::annotator::{attachment_line, float_cell, Annotator, Platform};
use super::parser::{
    as_bool, as_choice, as_choice_list, as_confidence, as_number, as_text, extract_object, field,
    loose_bool, loose_nested_bool, truncate_chars, ParseSource,
};
use super::types::{AnnotationOutput, Evidence};

pub const STATUS_COLUMN: &str = "humanitarian_analysis_complete";
pub const NOTE_COLUMN: &str = "humanitarian_analysis_note";

pub const LOSS_TYPES: [&str; 9] = [
    "displacement",
    "education_disruption",
    "health_trauma",
    "social_ties_loss",
    "cultural_ritual_disruption",
    "caregiving_burden",
    "water_food_insecurity",
    "infrastructure_access",
    "psychosocial_distress",
];

pub const DEMOGRAPHY: [&str; 6] = ["children", "elderly", "pregnant", "disabled_aid", "male", "female"];

pub const SCENES: [&str; 3] = ["aerial", "ground_outdoor", "indoor"];

pub const SENTIMENTS: [&str; 7] = [
    "fear",
    "hopelessness",
    "grief",
    "anger",
    "resilience",
    "neutral",
    "mixed",
];

const WATER_DEPTH_BINS: &[&str] = &[
    "none",
    "ankle",
    "knee",
    "waist",
    "vehicle_height",
    "indoor_flood",
    "unknown",
];
const CROWD_SIZE_BINS: &[&str] = &["1", "2-5", "6-20", ">20", "unknown"];
const RELIEF_ACTORS: &[&str] = &["ngo", "government", "community", "unknown", "none"];
const DAMAGE_SIGNS: &[&str] = &[
    "road_blocked",
    "house_inundated",
    "bridge_damage",
    "school_closed_sign",
    "clinic_closed_sign",
    "power_outage_sign",
    "other",
    "none",
];
const CONTEXT_AREAS: &[&str] = &[
    "settlement",
    "farmland",
    "roadway",
    "riverbank",
    "school_or_health_facility",
    "mixed",
    "unknown",
];

const MAX_URGENCY: u8 = 5;
const MAX_EVIDENCE_CHARS: usize = 200;

/// Confidence given to flags recovered from a malformed reply.
const PATTERN_CONFIDENCE: f64 = 0.3;

/// A present/absent label with the model's confidence.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Signal {
    pub present: bool,
    pub confidence: f64,
}

impl Signal {
    fn from_value(value: Option<&Value>) -> Self {
        match value {
            Some(Value::Object(obj)) => Self {
                present: as_bool(obj.get("present")),
                confidence: as_confidence(obj.get("confidence")),
            },
            other => Self {
                present: as_bool(other),
                confidence: 0.0,
            },
        }
    }

    fn from_pattern(present: bool) -> Self {
        Self {
            present,
            confidence: if present { PATTERN_CONFIDENCE } else { 0.0 },
        }
    }
}

/// Typed humanitarian impact result.
#[derive(Debug, Clone, PartialEq)]
pub struct ImpactAnalysis {
    /// In `LOSS_TYPES` order
    pub loss: [Signal; 9],
    pub urgency: u8,
    pub water_depth: String,
    pub crowd_size: String,
    pub relief_visible: bool,
    pub relief_actor: String,
    pub damage_signs: Vec<String>,
    /// In `DEMOGRAPHY` order
    pub demography: [bool; 6],
    /// In `SCENES` order
    pub scene: [bool; 3],
    pub context_area: Vec<String>,
    /// In `SENTIMENTS` order
    pub sentiment: [Signal; 7],
    pub recovery_signals: bool,
    pub recovery_evidence: String,
}

impl Default for ImpactAnalysis {
    fn default() -> Self {
        Self {
            loss: [Signal::default(); 9],
            urgency: 0,
            water_depth: "unknown".to_string(),
            crowd_size: "unknown".to_string(),
            relief_visible: false,
            relief_actor: "none".to_string(),
            damage_signs: vec!["none".to_string()],
            demography: [false; 6],
            scene: [false; 3],
            context_area: vec!["unknown".to_string()],
            sentiment: [Signal::default(); 7],
            recovery_signals: false,
            recovery_evidence: String::new(),
        }
    }
}

impl ImpactAnalysis {
    /// Read a decoded reply, defaulting anything missing or invalid.
    pub fn from_json(map: &Map<String, Value>) -> Self {
        let mut analysis = Self::default();

        if let Some(losses) = field(map, "loss_types") {
            for (slot, name) in analysis.loss.iter_mut().zip(LOSS_TYPES) {
                *slot = Signal::from_value(losses.get(name));
            }
        }

        analysis.urgency = as_number(map.get("urgency_score_0_5"))
            .map_or(0, |f| f.round().clamp(0.0, f64::from(MAX_URGENCY)) as u8);

        if let Some(cues) = field(map, "visual_cues") {
            analysis.water_depth = as_choice(cues.get("water_depth_bin"), WATER_DEPTH_BINS, "unknown");
            analysis.crowd_size = as_choice(cues.get("crowd_size_bin"), CROWD_SIZE_BINS, "unknown");
            analysis.relief_visible = as_bool(cues.get("relief_visible"));
            analysis.relief_actor = as_choice(cues.get("relief_actor_type"), RELIEF_ACTORS, "none");
            analysis.damage_signs = as_choice_list(cues.get("damage_signs"), DAMAGE_SIGNS, "none");
        }

        if let Some(demo) = field(map, "demography_presence") {
            for (slot, name) in analysis.demography.iter_mut().zip(DEMOGRAPHY) {
                *slot = as_bool(demo.get(name));
            }
        }

        if let Some(scene) = field(map, "scene_type") {
            for (slot, name) in analysis.scene.iter_mut().zip(SCENES) {
                *slot = as_bool(scene.get(name));
            }
        }

        analysis.context_area = as_choice_list(map.get("context_area"), CONTEXT_AREAS, "unknown");

        match map.get("sentiment") {
            Some(Value::Array(items)) => {
                for item in items {
                    let label = as_text(item.get("label")).to_lowercase();
                    if let Some(idx) = SENTIMENTS.iter().position(|s| *s == label) {
                        analysis.sentiment[idx] = Signal::from_value(Some(item));
                    }
                }
            }
            Some(Value::Object(by_label)) => {
                for (slot, name) in analysis.sentiment.iter_mut().zip(SENTIMENTS) {
                    *slot = Signal::from_value(by_label.get(name));
                }
            }
            _ => {}
        }

        if let Some(recovery) = field(map, "recovery") {
            analysis.recovery_signals = as_bool(recovery.get("recovery_signals"));
            analysis.recovery_evidence =
                truncate_chars(&as_text(recovery.get("evidence")), MAX_EVIDENCE_CHARS).to_string();
        }

        analysis
    }

    /// Recover boolean flags from a reply that is not valid JSON.
    /// `None` if no flag could be found.
    pub fn from_patterns(raw: &str) -> Option<Self> {
        let mut analysis = Self::default();
        let mut found = false;

        for (slot, name) in analysis.loss.iter_mut().zip(LOSS_TYPES) {
            if let Some(present) = loose_nested_bool(raw, name, "present") {
                *slot = Signal::from_pattern(present);
                found = true;
            }
        }
        for (slot, name) in analysis.demography.iter_mut().zip(DEMOGRAPHY) {
            if let Some(present) = loose_bool(raw, name) {
                *slot = present;
                found = true;
            }
        }
        for (slot, name) in analysis.scene.iter_mut().zip(SCENES) {
            if let Some(present) = loose_bool(raw, name) {
                *slot = present;
                found = true;
            }
        }
        if let Some(visible) = loose_bool(raw, "relief_visible") {
            analysis.relief_visible = visible;
            found = true;
        }
        if let Some(signals) = loose_bool(raw, "recovery_signals") {
            analysis.recovery_signals = signals;
            found = true;
        }

        found.then_some(analysis)
    }

    pub fn to_columns(&self) -> Vec<(String, String)> {
        let mut cols = Vec::with_capacity(64);

        for (name, signal) in LOSS_TYPES.iter().zip(&self.loss) {
            cols.push((format!("loss_{}_present", name), bool_cell(signal.present)));
            cols.push((format!("loss_{}_confidence", name), float_cell(signal.confidence)));
        }

        cols.push(("urgency_score".to_string(), self.urgency.to_string()));
        cols.push(("water_depth_bin".to_string(), self.water_depth.clone()));
        cols.push(("crowd_size_bin".to_string(), self.crowd_size.clone()));
        cols.push(("relief_visible".to_string(), bool_cell(self.relief_visible)));
        cols.push(("relief_actor_type".to_string(), self.relief_actor.clone()));
        cols.push(("damage_signs".to_string(), Value::from(self.damage_signs.clone()).to_string()));

        for (name, present) in DEMOGRAPHY.iter().zip(self.demography) {
            cols.push((format!("demo_{}", name), bool_cell(present)));
        }
        for (name, present) in SCENES.iter().zip(self.scene) {
            cols.push((format!("scene_{}", name), bool_cell(present)));
        }

        cols.push(("context_area".to_string(), Value::from(self.context_area.clone()).to_string()));

        for (name, signal) in SENTIMENTS.iter().zip(&self.sentiment) {
            cols.push((format!("sentiment_{}_present", name), bool_cell(signal.present)));
            cols.push((format!("sentiment_{}_confidence", name), float_cell(signal.confidence)));
        }

        cols.push(("recovery_signals".to_string(), bool_cell(self.recovery_signals)));
        cols.push(("recovery_evidence".to_string(), self.recovery_evidence.clone()));
        cols
    }
}

/// Parse an impact reply, strictest strategy first.
pub fn parse_impact_response(raw: &str) -> (ImpactAnalysis, ParseSource) {
    if let Some(map) = extract_object(raw, "loss_types") {
        return (ImpactAnalysis::from_json(&map), ParseSource::Json);
    }
    if let Some(analysis) = ImpactAnalysis::from_patterns(raw) {
        return (analysis, ParseSource::Pattern);
    }
    (ImpactAnalysis::default(), ParseSource::Default)
}

/// Merge caption and hashtags the way posts display them.
fn merge_hashtags(title: Option<&str>, hashtags: Option<&str>) -> String {
    let tags: Vec<String> = hashtags
        .unwrap_or_default()
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(|t| t.trim_start_matches('#'))
        .filter(|t| !t.is_empty())
        .map(|t| format!("#{}", t))
        .collect();

    match (title, tags.is_empty()) {
        (Some(title), false) => format!("{} {}", title, tags.join(" ")),
        (Some(title), true) => title.to_string(),
        (None, _) => tags.join(" "),
    }
}

fn quoted(text: Option<&str>) -> String {
    let text = match text {
        Some(t) if !t.is_empty() => t,
        _ => "N/A",
    };
    format!("<<<{}>>>", text)
}

const TIKTOK_TEXT: &[&str] = &["title", "hashtags", "transcription_english"];
const TWITTER_TEXT: &[&str] = &["text"];
const TIKTOK_IMAGES: &[ImageColumn] = &[ImageColumn::KEY_FRAMES];
const TWITTER_IMAGES: &[ImageColumn] = &[ImageColumn::ALL_IMAGES];

/// Annotator extracting humanitarian impact signals from one post.
#[derive(Debug)]
pub struct ImpactAnnotator {
    platform: Platform,
}

impl ImpactAnnotator {
    pub fn new(platform: Platform) -> Self {
        Self { platform }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    fn output(analysis: &ImpactAnalysis, note: &str) -> AnnotationOutput {
        let mut columns = analysis.to_columns();
        columns.push((NOTE_COLUMN.to_string(), note.to_string()));
        AnnotationOutput {
            columns,
            summary: format!("Analyzed (urgency: {}/{})", analysis.urgency, MAX_URGENCY),
        }
    }

    fn post_context(&self, evidence: &Evidence) -> String {
        match self.platform {
            Platform::Tiktok => {
                let title = evidence.text("title");
                let merged = merge_hashtags(title, evidence.text("hashtags"));
                let mut context = format!(
                    "TITLE:\n{}\n\nTEXT (caption/hashtags/OCR merged):\n{}",
                    quoted(title),
                    quoted(Some(&merged))
                );
                if let Some(transcript) = evidence.text("transcription_english") {
                    context.push_str(&format!(
                        "\n\nTRANSCRIPTION (speech-to-text, less reliable):\n{}",
                        quoted(Some(transcript))
                    ));
                }
                context
            }
            Platform::Twitter => {
                format!("TEXT (tweet content):\n{}", quoted(evidence.text("text")))
            }
        }
    }
}

impl Annotator for ImpactAnnotator {
    fn annotation_type(&self) -> &str {
        "humanitarian_impact"
    }

    fn display_name(&self) -> &str {
        "Humanitarian Impact"
    }

    fn status_column(&self) -> &str {
        STATUS_COLUMN
    }

    fn note_column(&self) -> &str {
        NOTE_COLUMN
    }

    fn output_columns(&self) -> Vec<String> {
        Self::output(&ImpactAnalysis::default(), "")
            .columns
            .into_iter()
            .map(|(c, _)| c)
            .collect()
    }

    fn text_columns(&self) -> &[&'static str] {
        match self.platform {
            Platform::Tiktok => TIKTOK_TEXT,
            Platform::Twitter => TWITTER_TEXT,
        }
    }

    fn image_columns(&self, _record: &Record<'_>) -> &'static [ImageColumn] {
        match self.platform {
            Platform::Tiktok => TIKTOK_IMAGES,
            Platform::Twitter => TWITTER_IMAGES,
        }
    }

    fn max_short_side(&self) -> u32 {
        DETAILED_SHORT_SIDE
    }

    fn checkpoint_interval(&self) -> usize {
        5
    }

    fn request_profile(&self) -> RequestProfile {
        RequestProfile::detailed()
    }

    fn system_prompt(&self) -> Option<&'static str> {
        Some(IMPACT_SYSTEM_PROMPT)
    }

    fn wants_warm_up(&self) -> bool {
        true
    }

    fn build_prompt(&self, evidence: &Evidence, attached: usize) -> String {
        // Post text goes in last so it is never scanned for placeholders.
        IMPACT_USER_PROMPT
            .replace(
                "{image_count}",
                &attachment_line("image", attached, evidence.media().declared),
            )
            .replace("{context}", &self.post_context(evidence))
    }

    fn parse(&self, raw: &str) -> AnnotationOutput {
        let (analysis, source) = parse_impact_response(raw);
        let note = match source {
            ParseSource::Json => "Analyzed".to_string(),
            ParseSource::Pattern | ParseSource::Keywords => {
                "Partially parsed from response".to_string()
            }
            ParseSource::Default => format!(
                "Unparseable response, defaults used: {}",
                truncate_chars(raw.trim(), MAX_EVIDENCE_CHARS)
            ),
        };
        Self::output(&analysis, note.trim_end())
    }

    fn default_output(&self, note: &str) -> AnnotationOutput {
        Self::output(&ImpactAnalysis::default(), note)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::ResolvedMedia;
    use crate::models::Table;

    const FULL_REPLY: &str = r#"```json
{
  "loss_types": {
    "displacement": {"present": true, "confidence": 0.8},
    "infrastructure_access": {"present": "true", "confidence": "1.4"}
  },
  "urgency_score_0_5": 4.6,
  "visual_cues": {
    "water_depth_bin": "Waist",
    "crowd_size_bin": "lots",
    "relief_visible": true,
    "relief_actor_type": "NGO",
    "damage_signs": ["road_blocked", "meteor"]
  },
  "demography_presence": {"children": true, "female": true},
  "scene_type": {"ground_outdoor": true},
  "context_area": ["settlement", "riverbank"],
  "sentiment": [
    {"label": "Fear", "present": true, "confidence": 0.6},
    {"label": "joy", "present": true, "confidence": 0.9}
  ],
  "recovery": {"recovery_signals": false, "evidence": ""}
}
```"#;

    #[test]
    fn test_parse_full_reply() {
        let (analysis, source) = parse_impact_response(FULL_REPLY);
        assert_eq!(source, ParseSource::Json);

        assert_eq!(analysis.loss[0], Signal { present: true, confidence: 0.8 });
        assert_eq!(analysis.loss[7], Signal { present: true, confidence: 1.0 });
        assert_eq!(analysis.loss[1], Signal::default());
        assert_eq!(analysis.urgency, 5);
        assert_eq!(analysis.water_depth, "waist");
        assert_eq!(analysis.crowd_size, "unknown");
        assert_eq!(analysis.relief_actor, "ngo");
        assert_eq!(analysis.damage_signs, vec!["road_blocked"]);
        assert_eq!(analysis.demography, [true, false, false, false, false, true]);
        assert_eq!(analysis.scene, [false, true, false]);
        assert_eq!(analysis.context_area, vec!["settlement", "riverbank"]);
        assert_eq!(analysis.sentiment[0], Signal { present: true, confidence: 0.6 });
        assert!(analysis.sentiment[1..].iter().all(|s| !s.present));
    }

    #[test]
    fn test_columns_are_flattened() {
        let (analysis, _) = parse_impact_response(FULL_REPLY);
        let columns = analysis.to_columns();
        let get = |name: &str| {
            columns
                .iter()
                .find(|(c, _)| c == name)
                .map(|(_, v)| v.as_str())
        };

        assert_eq!(get("loss_displacement_present"), Some("True"));
        assert_eq!(get("loss_displacement_confidence"), Some("0.8"));
        assert_eq!(get("urgency_score"), Some("5"));
        assert_eq!(get("damage_signs"), Some(r#"["road_blocked"]"#));
        assert_eq!(get("context_area"), Some(r#"["settlement","riverbank"]"#));
        assert_eq!(get("demo_female"), Some("True"));
        assert_eq!(get("sentiment_fear_confidence"), Some("0.6"));
        assert_eq!(get("recovery_evidence"), Some(""));
    }

    #[test]
    fn test_pattern_fallback() {
        let raw = r#"{"loss_types": {"displacement": {"present": true, "confidence": 0.9}, "demography_presence": {"children": true"#;
        let (analysis, source) = parse_impact_response(raw);
        assert_eq!(source, ParseSource::Pattern);
        assert!(analysis.loss[0].present);
        assert_eq!(analysis.loss[0].confidence, PATTERN_CONFIDENCE);
        assert!(analysis.demography[0]);
    }

    #[test]
    fn test_parse_is_total() {
        let annotator = ImpactAnnotator::new(Platform::Twitter);
        let width = annotator.output_columns().len();
        for raw in ["", "OK", "{}", "{\"loss_types\": 7}", "null", "[{\"label\": \"fear\"}]"] {
            let output = annotator.parse(raw);
            assert_eq!(output.columns.len(), width, "reply {raw:?}");
            assert!(!output.get(NOTE_COLUMN).unwrap().to_lowercase().contains("error"));
        }
        // 9*2 loss + urgency + 5 cues + 6 demo + 3 scene + context + 7*2 sentiment + 2 recovery + note
        assert_eq!(width, 18 + 1 + 5 + 6 + 3 + 1 + 14 + 2 + 1);
    }

    #[test]
    fn test_tiktok_prompt() {
        let table = Table::new(
            vec!["title".into(), "hashtags".into(), "transcription_english".into()],
            vec![vec!["Village underwater".into(), "flood, #assam".into(), "".into()]],
        );
        let annotator = ImpactAnnotator::new(Platform::Tiktok);
        let media = ResolvedMedia {
            paths: vec!["k1.jpg".into()],
            declared: 1,
        };
        let evidence = Evidence::gather(
            &table.record(0).unwrap(),
            annotator.text_columns(),
            media,
        )
        .unwrap();
        let prompt = annotator.build_prompt(&evidence, 1);

        assert!(prompt.contains("TITLE:\n<<<Village underwater>>>"));
        assert!(prompt.contains("<<<Village underwater #flood #assam>>>"));
        assert!(!prompt.contains("TRANSCRIPTION"));
        assert!(prompt.contains("1 image(s) attached."));
        assert!(!prompt.contains("{context}"));
    }

    #[test]
    fn test_twitter_prompt_without_text() {
        let table = Table::new(vec!["text".into()], vec![vec!["nan".into()]]);
        let annotator = ImpactAnnotator::new(Platform::Twitter);
        let media = ResolvedMedia {
            paths: vec!["a.jpg".into(), "b.jpg".into(), "c.jpg".into()],
            declared: 5,
        };
        let evidence = Evidence::gather(
            &table.record(0).unwrap(),
            annotator.text_columns(),
            media,
        )
        .unwrap();
        let prompt = annotator.build_prompt(&evidence, 3);

        assert!(prompt.contains("TEXT (tweet content):\n<<<N/A>>>"));
        assert!(prompt.contains("3 image(s) attached (selected from 5 total)."));
    }

    #[test]
    fn test_merge_hashtags() {
        assert_eq!(merge_hashtags(Some("t"), Some("a,b")), "t #a #b");
        assert_eq!(merge_hashtags(None, Some("#a #b")), "#a #b");
        assert_eq!(merge_hashtags(Some("t"), None), "t");
    }
}
