//! Building blocks for total response parsers.
//!
//! Models wrap JSON in prose or code fences, drop fields, and emit strings
//! where booleans belong. Each task's parser chains these helpers from
//! strictest to loosest and always ends with a fully-populated default.

use regex::Regex;
use serde_json::{Map, Value};

/// Where a parsed result came from, strictest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseSource {
    /// A JSON object carrying the task's sentinel key.
    Json,
    /// Loose `"field": true|false` patterns.
    Pattern,
    /// Keyword heuristic over the raw text.
    Keywords,
    /// Nothing usable; schema defaults.
    Default,
}

/// Find the first JSON object in `raw` that has `sentinel` as a top-level key.
///
/// Every `{` is tried as a start position, so objects wrapped in prose,
/// markdown fences or an outer envelope are still found.
pub fn extract_object(raw: &str, sentinel: &str) -> Option<Map<String, Value>> {
    for (start, _) in raw.match_indices('{') {
        let mut stream = serde_json::Deserializer::from_str(&raw[start..]).into_iter::<Value>();
        if let Some(Ok(Value::Object(map))) = stream.next() {
            if map.contains_key(sentinel) {
                return Some(map);
            }
        }
    }
    None
}

/// First `"field": true|false` in `raw`, quotes and case optional. The key
/// must start at a word boundary, so `male` does not match `"female"`.
pub fn loose_bool(raw: &str, field: &str) -> Option<bool> {
    let pattern = format!(
        r#"(?i)(?:^|[^\w])"?{}"?\s*:\s*"?(true|false)\b"#,
        regex::escape(field)
    );
    let re = Regex::new(&pattern).ok()?;
    let caps = re.captures(raw)?;
    Some(caps[1].eq_ignore_ascii_case("true"))
}

/// `"field": {... "present": true|false ...}` for nested signal objects.
pub fn loose_nested_bool(raw: &str, field: &str, inner: &str) -> Option<bool> {
    let pattern = format!(
        r#"(?i)"{}"\s*:\s*\{{[^{{}}]*?"{}"\s*:\s*"?(true|false)\b"#,
        regex::escape(field),
        regex::escape(inner)
    );
    let re = Regex::new(&pattern).ok()?;
    let caps = re.captures(raw)?;
    Some(caps[1].eq_ignore_ascii_case("true"))
}

/// Lowercased alphanumeric words of `raw`.
fn words(raw: &str) -> impl Iterator<Item = String> + '_ {
    raw.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

/// Keyword vote: `Some(true)` if a positive word appears and no negation
/// does, `Some(false)` if any keyword appears otherwise, `None` if the text
/// mentions neither.
pub fn keyword_guess(raw: &str, positives: &[&str], negatives: &[&str]) -> Option<bool> {
    let mut positive = false;
    let mut negative = false;
    for word in words(raw) {
        positive |= positives.contains(&word.as_str());
        negative |= negatives.contains(&word.as_str());
    }
    match (positive, negative) {
        (false, false) => None,
        (true, false) => Some(true),
        _ => Some(false),
    }
}

/// Truthiness of a JSON value the way a lenient reader would see it.
pub fn as_bool(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => crate::models::is_truthy(s),
        _ => false,
    }
}

/// A number or numeric string, if any.
pub fn as_number(value: Option<&Value>) -> Option<f64> {
    let number = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|f| f.is_finite())
}

/// Confidence in `[0, 1]`; missing or garbage becomes 0.
pub fn as_confidence(value: Option<&Value>) -> f64 {
    as_number(value).map_or(0.0, |f| f.clamp(0.0, 1.0))
}

/// String form of a scalar; `null` and missing become empty.
pub fn as_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(other) => other.to_string(),
    }
}

/// Lowercased value if it is one of `allowed`, else `default`.
pub fn as_choice(value: Option<&Value>, allowed: &[&str], default: &str) -> String {
    let text = as_text(value).to_lowercase();
    if allowed.contains(&text.as_str()) {
        text
    } else {
        default.to_string()
    }
}

/// Allowed members of a list (or a single string), deduplicated in order.
/// Empty results become `[default]`.
pub fn as_choice_list(value: Option<&Value>, allowed: &[&str], default: &str) -> Vec<String> {
    let items: Vec<&Value> = match value {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(single @ Value::String(_)) => vec![single],
        _ => Vec::new(),
    };

    let mut out: Vec<String> = Vec::new();
    for item in items {
        let choice = as_text(Some(item)).to_lowercase();
        if allowed.contains(&choice.as_str()) && !out.contains(&choice) {
            out.push(choice);
        }
    }
    if out.len() > 1 {
        out.retain(|c| c != default);
    }
    if out.is_empty() {
        out.push(default.to_string());
    }
    out
}

/// Nested object lookup that tolerates missing or mistyped parents.
pub fn field<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a Map<String, Value>> {
    map.get(key).and_then(Value::as_object)
}

/// Cut `text` to at most `max` characters.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Whole-word "error" or "errors", any case.
const ERROR_WORD: &str = r"(?i)\berror(s?)\b";

/// Whether a stored note reads as a failure record.
pub fn mentions_error(note: &str) -> bool {
    Regex::new(ERROR_WORD).is_ok_and(|re| re.is_match(note))
}

/// Reword model-written text so a completed row's note never reads as a
/// failure record on the next resume.
pub fn scrub_error_words(note: &str) -> String {
    match Regex::new(ERROR_WORD) {
        Ok(re) => re.replace_all(note, "issue${1}").into_owned(),
        Err(_) => note.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_object_from_prose_and_fences() {
        let raw = "Sure! ```json\n{\"is_flood_related\": true, \"reason\": \"water {everywhere}\"}\n```";
        let map = extract_object(raw, "is_flood_related").unwrap();
        assert_eq!(map["is_flood_related"], json!(true));
        assert_eq!(map["reason"], json!("water {everywhere}"));
    }

    #[test]
    fn test_extract_object_finds_inner_object() {
        let raw = r#"{"result": {"damage_categories": {"car": true}, "image_description": "x"}}"#;
        let map = extract_object(raw, "damage_categories").unwrap();
        assert!(map.contains_key("image_description"));
        assert!(extract_object(raw, "loss_types").is_none());
    }

    #[test]
    fn test_extract_object_rejects_broken_json() {
        assert!(extract_object(r#"{"is_flood_related": tru"#, "is_flood_related").is_none());
        assert!(extract_object("", "is_flood_related").is_none());
    }

    #[test]
    fn test_loose_bool() {
        assert_eq!(loose_bool(r#"... "is_flood_related": TRUE, "conf"#, "is_flood_related"), Some(true));
        assert_eq!(loose_bool("is_flood_related : false", "is_flood_related"), Some(false));
        assert_eq!(loose_bool(r#""is_flood_related": "trueish""#, "is_flood_related"), None);
        assert_eq!(loose_bool("nothing here", "is_flood_related"), None);
        assert_eq!(loose_bool(r#"{"female": true, "male": false}"#, "male"), Some(false));
    }

    #[test]
    fn test_loose_nested_bool() {
        let raw = r#""displacement": {"present": true, "confidence": 0.7"#;
        assert_eq!(loose_nested_bool(raw, "displacement", "present"), Some(true));
        assert_eq!(loose_nested_bool(raw, "grief", "present"), None);
    }

    #[test]
    fn test_keyword_guess() {
        let pos = ["flood", "related", "yes"];
        let neg = ["not", "unrelated", "no"];
        assert_eq!(keyword_guess("Yes, this shows a flood.", &pos, &neg), Some(true));
        assert_eq!(keyword_guess("This is not flood content", &pos, &neg), Some(false));
        assert_eq!(keyword_guess("A cooking video", &pos, &neg), None);
        // whole words only: "know" is not "no"
        assert_eq!(keyword_guess("I know it's a flood", &pos, &neg), Some(true));
    }

    #[test]
    fn test_coercions() {
        assert!(as_bool(Some(&json!("True"))));
        assert!(as_bool(Some(&json!(1))));
        assert!(!as_bool(Some(&json!("no"))));
        assert!(!as_bool(None));

        assert_eq!(as_confidence(Some(&json!(1.7))), 1.0);
        assert_eq!(as_confidence(Some(&json!("0.25"))), 0.25);
        assert_eq!(as_confidence(Some(&json!(-3))), 0.0);
        assert_eq!(as_confidence(Some(&json!("high"))), 0.0);

        assert_eq!(as_choice(Some(&json!("KNEE")), &["knee", "unknown"], "unknown"), "knee");
        assert_eq!(as_choice(Some(&json!("chest")), &["knee", "unknown"], "unknown"), "unknown");
    }

    #[test]
    fn test_choice_list() {
        let allowed = ["road_blocked", "house_inundated", "none"];
        assert_eq!(
            as_choice_list(Some(&json!(["Road_Blocked", "lava", "road_blocked", "none"])), &allowed, "none"),
            vec!["road_blocked"]
        );
        assert_eq!(as_choice_list(Some(&json!([])), &allowed, "none"), vec!["none"]);
        assert_eq!(as_choice_list(Some(&json!("house_inundated")), &allowed, "none"), vec!["house_inundated"]);
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("বন্যা flood", 3), "বন্");
        assert_eq!(truncate_chars("short", 200), "short");
    }

    #[test]
    fn test_error_words() {
        assert!(mentions_error("Processing error"));
        assert!(mentions_error("ERROR: timed out"));
        assert!(mentions_error("transcription errors"));
        assert!(!mentions_error("Flood terror in Sylhet"));
        assert!(!mentions_error("Analyzed"));

        let scrubbed = scrub_error_words("Sorry, an Error occurred; transcription errors. Terror.");
        assert_eq!(scrubbed, "Sorry, an issue occurred; transcription issues. Terror.");
        assert!(!mentions_error(&scrubbed));
    }
}
