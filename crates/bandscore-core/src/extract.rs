//! Extraction and validation of structured assessments from free-text replies.
//!
//! Evaluation providers are asked to wrap a JSON object in a marker pair, but
//! nothing guarantees they do. Everything here returns an `ExtractError`
//! instead of panicking so the evaluators can turn any drift into a failed
//! score.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::band::{round_band, MAX_BAND, MIN_BAND};
use crate::model::Feedback;

/// A pair of strings delimiting the structured part of a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Markers {
    pub open: &'static str,
    pub close: &'static str,
}

/// The pair providers are instructed to use.
pub const ASSESSMENT_MARKERS: Markers = Markers {
    open: "<assessment>",
    close: "</assessment>",
};

/// Fallback for replies that ignore the instruction and use a fenced block.
pub const JSON_FENCE: Markers = Markers {
    open: "```json",
    close: "```",
};

/// Marker pairs tried in order.
pub const DEFAULT_MARKERS: &[Markers] = &[ASSESSMENT_MARKERS, JSON_FENCE];

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractError {
    #[error("no delimited block in response")]
    NoBlock,

    #[error("block opened with `{0}` is never closed")]
    Unterminated(&'static str),

    #[error("delimited block is empty")]
    EmptyBlock,

    #[error("payload is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("missing criterion `{0}`")]
    MissingCriterion(&'static str),

    #[error("criterion `{name}` is not numeric: {value}")]
    NonNumeric { name: String, value: String },

    #[error("criterion `{name}` out of range: {value}")]
    OutOfRange { name: String, value: f64 },
}

/// A criterion the provider must score, with accepted spellings.
#[derive(Debug, Clone, Copy)]
pub struct CriterionSpec {
    pub key: &'static str,
    pub aliases: &'static [&'static str],
}

pub const WRITING_CRITERIA: &[CriterionSpec] = &[
    CriterionSpec {
        key: "task_achievement",
        aliases: &["task_response", "task_achievement_response"],
    },
    CriterionSpec {
        key: "coherence_cohesion",
        aliases: &["coherence"],
    },
    CriterionSpec {
        key: "lexical_resource",
        aliases: &["vocabulary"],
    },
    CriterionSpec {
        key: "grammatical_accuracy",
        aliases: &["grammatical_range_accuracy", "grammar"],
    },
];

pub const SPEAKING_CRITERIA: &[CriterionSpec] = &[
    CriterionSpec {
        key: "fluency",
        aliases: &["fluency_coherence"],
    },
    CriterionSpec {
        key: "lexical_resource",
        aliases: &["vocabulary"],
    },
    CriterionSpec {
        key: "grammar",
        aliases: &["grammatical_range_accuracy", "grammatical_accuracy"],
    },
    CriterionSpec {
        key: "pronunciation",
        aliases: &[],
    },
];

const OVERALL_KEYS: &[&str] = &["overall", "overall_band", "band"];
const STRENGTH_KEYS: &[&str] = &["strengths"];
const IMPROVEMENT_KEYS: &[&str] = &["improvements", "areas_for_improvement", "weaknesses"];

/// A validated assessment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedAssessment {
    /// Canonical criterion key → band, already rounded.
    pub criteria: BTreeMap<String, f64>,
    /// Canonical criterion key → supporting examples.
    pub evidence: BTreeMap<String, Vec<String>>,
    /// Holistic band stated by the provider, if any.
    pub overall: Option<f64>,
    pub feedback: Feedback,
}

/// Return the substring between the first marker pair found in `text`.
///
/// Pairs are tried in order; marker matching ignores ASCII case. An opening
/// marker without a closing one is reported only if no later pair succeeds.
pub fn extract_delimited<'a>(text: &'a str, markers: &[Markers]) -> Result<&'a str, ExtractError> {
    let folded = text.to_ascii_lowercase();
    let mut first_error = None;

    for pair in markers {
        let open = pair.open.to_ascii_lowercase();
        let close = pair.close.to_ascii_lowercase();
        let Some(open_at) = folded.find(&open) else {
            continue;
        };
        let body_start = open_at + open.len();
        let Some(close_rel) = folded[body_start..].find(&close) else {
            first_error.get_or_insert(ExtractError::Unterminated(pair.open));
            continue;
        };
        let payload = text[body_start..body_start + close_rel].trim();
        if payload.is_empty() {
            first_error.get_or_insert(ExtractError::EmptyBlock);
            continue;
        }
        return Ok(payload);
    }

    Err(first_error.unwrap_or(ExtractError::NoBlock))
}

/// Extract and validate an assessment that must score every criterion in `required`.
pub fn parse_assessment(
    response: &str,
    required: &[CriterionSpec],
) -> Result<ParsedAssessment, ExtractError> {
    let payload = extract_delimited(response, DEFAULT_MARKERS)?;
    let value: Value =
        serde_json::from_str(payload).map_err(|e| ExtractError::InvalidJson(e.to_string()))?;
    let Value::Object(root) = value else {
        return Err(ExtractError::NotAnObject);
    };

    let criteria_obj = match lookup(&root, &["criteria", "scores"]) {
        Some(Value::Object(nested)) => nested,
        _ => &root,
    };
    let examples_obj = match lookup(&root, &["examples", "evidence"]) {
        Some(Value::Object(examples)) => Some(examples),
        _ => None,
    };

    let mut parsed = ParsedAssessment::default();
    for spec in required {
        let mut names = vec![spec.key];
        names.extend_from_slice(spec.aliases);
        let raw = lookup(criteria_obj, &names).ok_or(ExtractError::MissingCriterion(spec.key))?;

        let (score, examples) = criterion_value(spec.key, raw)?;
        parsed.criteria.insert(spec.key.to_string(), score);

        let mut examples = examples;
        if examples.is_empty() {
            if let Some(list) = examples_obj.and_then(|obj| lookup(obj, &names)) {
                examples = string_list(list);
            }
        }
        if !examples.is_empty() {
            parsed.evidence.insert(spec.key.to_string(), examples);
        }
    }

    parsed.overall = match lookup(&root, OVERALL_KEYS) {
        Some(raw) => Some(band_value("overall", raw)?),
        None => None,
    };
    parsed.feedback = Feedback {
        strengths: lookup(&root, STRENGTH_KEYS)
            .map(string_list)
            .unwrap_or_default(),
        improvements: lookup(&root, IMPROVEMENT_KEYS)
            .map(string_list)
            .unwrap_or_default(),
    };

    Ok(parsed)
}

/// Canonical form of a JSON key: lowercase words joined by `_`, with `and`/`&` dropped.
pub fn normalize_key(key: &str) -> String {
    key.to_lowercase()
        .replace('&', " ")
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty() && *word != "and")
        .collect::<Vec<_>>()
        .join("_")
}

fn lookup<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    obj.iter()
        .find(|(key, _)| {
            let normalized = normalize_key(key);
            names.iter().any(|name| normalized == *name)
        })
        .map(|(_, value)| value)
}

fn criterion_value(name: &str, raw: &Value) -> Result<(f64, Vec<String>), ExtractError> {
    match raw {
        Value::Object(obj) => {
            let score = lookup(obj, &["score", "band"]).ok_or_else(|| ExtractError::NonNumeric {
                name: name.to_string(),
                value: raw.to_string(),
            })?;
            let examples = lookup(obj, &["examples", "evidence"])
                .map(string_list)
                .unwrap_or_default();
            Ok((band_value(name, score)?, examples))
        }
        other => Ok((band_value(name, other)?, Vec::new())),
    }
}

fn band_value(name: &str, raw: &Value) -> Result<f64, ExtractError> {
    let number = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    let Some(number) = number.filter(|n| n.is_finite()) else {
        return Err(ExtractError::NonNumeric {
            name: name.to_string(),
            value: raw.to_string(),
        });
    };
    if !(MIN_BAND..=MAX_BAND).contains(&number) {
        return Err(ExtractError::OutOfRange {
            name: name.to_string(),
            value: number,
        });
    }
    Ok(round_band(number))
}

fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => vec![s.trim().to_string()],
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WRITING_REPLY: &str = r#"Here is my assessment.

<assessment>
{
  "criteria": {
    "Task Achievement": {"score": 6.5, "examples": ["addresses both views"]},
    "Coherence and Cohesion": 7,
    "lexical_resource": "6.5",
    "grammatical_accuracy": {"score": 6.0}
  },
  "strengths": ["clear position"],
  "improvements": ["vary sentence structure", "check articles"]
}
</assessment>

Good luck!"#;

    #[test]
    fn extracts_marked_block() {
        let payload = extract_delimited("a <assessment>{\"x\":1}</assessment> b", DEFAULT_MARKERS);
        assert_eq!(payload, Ok("{\"x\":1}"));
    }

    #[test]
    fn marker_matching_ignores_case() {
        let payload = extract_delimited("<ASSESSMENT> {} </Assessment>", DEFAULT_MARKERS);
        assert_eq!(payload, Ok("{}"));
    }

    #[test]
    fn falls_back_to_json_fence() {
        let text = "Sure:\n```json\n{\"a\": 1}\n```\n";
        assert_eq!(extract_delimited(text, DEFAULT_MARKERS), Ok("{\"a\": 1}"));
    }

    #[test]
    fn no_block_is_an_error() {
        assert_eq!(
            extract_delimited("Band 7 overall, well done.", DEFAULT_MARKERS),
            Err(ExtractError::NoBlock)
        );
        // Bare JSON without markers is not accepted.
        assert_eq!(
            extract_delimited("{\"fluency\": 7}", DEFAULT_MARKERS),
            Err(ExtractError::NoBlock)
        );
        assert_eq!(extract_delimited("", DEFAULT_MARKERS), Err(ExtractError::NoBlock));
    }

    #[test]
    fn unterminated_block_is_an_error() {
        assert_eq!(
            extract_delimited("<assessment>{\"a\": 1}", DEFAULT_MARKERS),
            Err(ExtractError::Unterminated("<assessment>"))
        );
    }

    #[test]
    fn empty_block_is_an_error() {
        assert_eq!(
            extract_delimited("<assessment>   </assessment>", DEFAULT_MARKERS),
            Err(ExtractError::EmptyBlock)
        );
    }

    #[test]
    fn close_marker_before_open_is_ignored() {
        assert_eq!(
            extract_delimited("</assessment> <assessment>{}", &[ASSESSMENT_MARKERS]),
            Err(ExtractError::Unterminated("<assessment>"))
        );
    }

    #[test]
    fn parses_writing_assessment() {
        let parsed = parse_assessment(WRITING_REPLY, WRITING_CRITERIA).unwrap();
        assert_eq!(parsed.criteria["task_achievement"], 6.5);
        assert_eq!(parsed.criteria["coherence_cohesion"], 7.0);
        assert_eq!(parsed.criteria["lexical_resource"], 6.5);
        assert_eq!(parsed.criteria["grammatical_accuracy"], 6.0);
        assert_eq!(parsed.evidence["task_achievement"], vec!["addresses both views"]);
        assert_eq!(parsed.feedback.strengths, vec!["clear position"]);
        assert_eq!(parsed.feedback.improvements.len(), 2);
        assert_eq!(parsed.overall, None);
    }

    #[test]
    fn parses_top_level_criteria_with_overall() {
        let reply = r#"<assessment>{"fluency": 7, "lexical_resource": 6.5, "grammar": 6,
            "pronunciation": 7, "overall": 6.5, "strengths": "good pace"}</assessment>"#;
        let parsed = parse_assessment(reply, SPEAKING_CRITERIA).unwrap();
        assert_eq!(parsed.criteria.len(), 4);
        assert_eq!(parsed.overall, Some(6.5));
        assert_eq!(parsed.feedback.strengths, vec!["good pace"]);
        assert!(parsed.feedback.improvements.is_empty());
    }

    #[test]
    fn criterion_scores_snap_to_half_bands() {
        let reply = r#"<assessment>{"fluency": 6.3, "lexical_resource": 6.75,
            "grammar": 6, "pronunciation": 6}</assessment>"#;
        let parsed = parse_assessment(reply, SPEAKING_CRITERIA).unwrap();
        assert_eq!(parsed.criteria["fluency"], 6.5);
        assert_eq!(parsed.criteria["lexical_resource"], 7.0);
    }

    #[test]
    fn missing_criterion_is_an_error() {
        let reply = r#"<assessment>{"task_achievement": 6, "coherence_cohesion": 6,
            "lexical_resource": 6}</assessment>"#;
        assert_eq!(
            parse_assessment(reply, WRITING_CRITERIA),
            Err(ExtractError::MissingCriterion("grammatical_accuracy"))
        );
    }

    #[test]
    fn non_numeric_criterion_is_an_error() {
        let reply = r#"<assessment>{"task_achievement": "good", "coherence_cohesion": 6,
            "lexical_resource": 6, "grammatical_accuracy": 6}</assessment>"#;
        assert!(matches!(
            parse_assessment(reply, WRITING_CRITERIA),
            Err(ExtractError::NonNumeric { ref name, .. }) if name == "task_achievement"
        ));

        let reply = r#"<assessment>{"task_achievement": null, "coherence_cohesion": 6,
            "lexical_resource": 6, "grammatical_accuracy": 6}</assessment>"#;
        assert!(matches!(
            parse_assessment(reply, WRITING_CRITERIA),
            Err(ExtractError::NonNumeric { .. })
        ));

        let reply = r#"<assessment>{"task_achievement": {"comment": "ok"}, "coherence_cohesion": 6,
            "lexical_resource": 6, "grammatical_accuracy": 6}</assessment>"#;
        assert!(matches!(
            parse_assessment(reply, WRITING_CRITERIA),
            Err(ExtractError::NonNumeric { .. })
        ));
    }

    #[test]
    fn out_of_range_criterion_is_an_error() {
        let reply = r#"<assessment>{"task_achievement": 12, "coherence_cohesion": 6,
            "lexical_resource": 6, "grammatical_accuracy": -1}</assessment>"#;
        assert!(matches!(
            parse_assessment(reply, WRITING_CRITERIA),
            Err(ExtractError::OutOfRange { value, .. }) if value == 12.0
        ));
    }

    #[test]
    fn invalid_json_is_an_error() {
        let reply = "<assessment>{task_achievement: 6,}</assessment>";
        assert!(matches!(
            parse_assessment(reply, WRITING_CRITERIA),
            Err(ExtractError::InvalidJson(_))
        ));
    }

    #[test]
    fn non_object_payload_is_an_error() {
        let reply = "<assessment>[6, 6, 6, 6]</assessment>";
        assert_eq!(
            parse_assessment(reply, WRITING_CRITERIA),
            Err(ExtractError::NotAnObject)
        );
    }

    #[test]
    fn invalid_overall_is_an_error() {
        let reply = r#"<assessment>{"fluency": 7, "lexical_resource": 6.5, "grammar": 6,
            "pronunciation": 7, "overall": "excellent"}</assessment>"#;
        assert!(matches!(
            parse_assessment(reply, SPEAKING_CRITERIA),
            Err(ExtractError::NonNumeric { ref name, .. }) if name == "overall"
        ));
    }

    #[test]
    fn normalize_key_variants() {
        assert_eq!(normalize_key("Coherence & Cohesion"), "coherence_cohesion");
        assert_eq!(normalize_key("coherence_and_cohesion"), "coherence_cohesion");
        assert_eq!(
            normalize_key("Grammatical Range and Accuracy"),
            "grammatical_range_accuracy"
        );
        assert_eq!(normalize_key("  Overall-Band "), "overall_band");
    }
}
