//! Core data model types for bandscore.
//!
//! These are the types the whole pipeline passes around: test definitions,
//! attempts and their state machine stages, raw answer sets, and the scores
//! produced from them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One of the four test sections.
///
/// Variant order is the canonical full-test order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    Listening,
    Reading,
    Writing,
    Speaking,
}

impl ModuleKind {
    /// All modules in canonical order.
    pub const ALL: [ModuleKind; 4] = [
        ModuleKind::Listening,
        ModuleKind::Reading,
        ModuleKind::Writing,
        ModuleKind::Speaking,
    ];

    /// Listening and reading are graded against a fixed key.
    pub fn is_objective(self) -> bool {
        matches!(self, ModuleKind::Listening | ModuleKind::Reading)
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleKind::Listening => write!(f, "listening"),
            ModuleKind::Reading => write!(f, "reading"),
            ModuleKind::Writing => write!(f, "writing"),
            ModuleKind::Speaking => write!(f, "speaking"),
        }
    }
}

impl FromStr for ModuleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "listening" => Ok(ModuleKind::Listening),
            "reading" => Ok(ModuleKind::Reading),
            "writing" => Ok(ModuleKind::Writing),
            "speaking" => Ok(ModuleKind::Speaking),
            other => Err(format!("unknown module: {other}")),
        }
    }
}

/// How many modules an attempt covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "module", rename_all = "kebab-case")]
pub enum TestMode {
    /// A single module practised on its own.
    Practice(ModuleKind),
    /// All four modules in canonical order.
    FullTest,
}

impl TestMode {
    /// Modules this mode requires, in the order they must be taken.
    pub fn required_modules(&self) -> Vec<ModuleKind> {
        match self {
            TestMode::Practice(module) => vec![*module],
            TestMode::FullTest => ModuleKind::ALL.to_vec(),
        }
    }

    pub fn first_module(&self) -> ModuleKind {
        match self {
            TestMode::Practice(module) => *module,
            TestMode::FullTest => ModuleKind::Listening,
        }
    }
}

impl fmt::Display for TestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestMode::Practice(module) => write!(f, "practice ({module})"),
            TestMode::FullTest => write!(f, "full test"),
        }
    }
}

/// States of the per-attempt state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStage {
    Listening,
    Reading,
    Writing,
    Speaking,
    Aggregating,
    Completed,
    Failed,
}

impl AttemptStage {
    /// The module that is currently accepting answers, if any.
    pub fn module(self) -> Option<ModuleKind> {
        match self {
            AttemptStage::Listening => Some(ModuleKind::Listening),
            AttemptStage::Reading => Some(ModuleKind::Reading),
            AttemptStage::Writing => Some(ModuleKind::Writing),
            AttemptStage::Speaking => Some(ModuleKind::Speaking),
            AttemptStage::Aggregating | AttemptStage::Completed | AttemptStage::Failed => None,
        }
    }

    pub fn status(self) -> AttemptStatus {
        match self {
            AttemptStage::Completed => AttemptStatus::Completed,
            AttemptStage::Failed => AttemptStatus::Failed,
            _ => AttemptStatus::InProgress,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, AttemptStage::Completed | AttemptStage::Failed)
    }
}

impl From<ModuleKind> for AttemptStage {
    fn from(module: ModuleKind) -> Self {
        match module {
            ModuleKind::Listening => AttemptStage::Listening,
            ModuleKind::Reading => AttemptStage::Reading,
            ModuleKind::Writing => AttemptStage::Writing,
            ModuleKind::Speaking => AttemptStage::Speaking,
        }
    }
}

impl fmt::Display for AttemptStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.module() {
            Some(module) => write!(f, "{module}"),
            None => match self {
                AttemptStage::Aggregating => write!(f, "aggregating"),
                AttemptStage::Completed => write!(f, "completed"),
                _ => write!(f, "failed"),
            },
        }
    }
}

/// Coarse attempt status derived from the stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttemptStatus {
    InProgress,
    Completed,
    Failed,
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptStatus::InProgress => write!(f, "in-progress"),
            AttemptStatus::Completed => write!(f, "completed"),
            AttemptStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Why an attempt ended in `failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    /// Idle longer than the configured time-to-live.
    Expired,
    /// One module failed evaluation too many times.
    EvaluationExhausted { module: ModuleKind, attempts: u32 },
    /// Every module failed evaluation, so there is nothing to aggregate.
    NoScoredModules,
    /// A transition could not be recorded.
    Persistence { detail: String },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Expired => write!(f, "attempt expired"),
            FailureReason::EvaluationExhausted { module, attempts } => {
                write!(f, "{module} could not be scored after {attempts} attempts")
            }
            FailureReason::NoScoredModules => write!(f, "no module could be scored"),
            FailureReason::Persistence { detail } => write!(f, "persistence failure: {detail}"),
        }
    }
}

/// One learner's pass through a test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestAttempt {
    pub attempt_id: Uuid,
    pub test_id: String,
    pub user_id: String,
    pub mode: TestMode,
    pub stage: AttemptStage,
    /// Modules already scored and advanced past, in order.
    #[serde(default)]
    pub completed_modules: Vec<ModuleKind>,
    /// How many evaluations of each module came back failed.
    #[serde(default)]
    pub failed_evaluations: BTreeMap<ModuleKind, u32>,
    #[serde(default)]
    pub failure_reason: Option<FailureReason>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TestAttempt {
    pub fn new(test_id: &str, user_id: &str, mode: TestMode) -> Self {
        let now = Utc::now();
        Self {
            attempt_id: Uuid::new_v4(),
            test_id: test_id.to_string(),
            user_id: user_id.to_string(),
            mode,
            stage: mode.first_module().into(),
            completed_modules: Vec::new(),
            failed_evaluations: BTreeMap::new(),
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> AttemptStatus {
        self.stage.status()
    }

    pub fn current_module(&self) -> Option<ModuleKind> {
        self.stage.module()
    }

    /// Required modules that have not been advanced past yet.
    pub fn remaining_modules(&self) -> Vec<ModuleKind> {
        self.mode
            .required_modules()
            .into_iter()
            .filter(|m| !self.completed_modules.contains(m))
            .collect()
    }

    /// Record `module` as done and move to the next required module, or to
    /// `aggregating` if it was the last one.
    pub fn advance_past(&mut self, module: ModuleKind) {
        if !self.completed_modules.contains(&module) {
            self.completed_modules.push(module);
        }
        self.stage = self
            .remaining_modules()
            .first()
            .map(|m| AttemptStage::from(*m))
            .unwrap_or(AttemptStage::Aggregating);
        self.touch();
    }

    /// Count a failed evaluation of `module`, returning the new total.
    pub fn record_failed_evaluation(&mut self, module: ModuleKind) -> u32 {
        let count = self.failed_evaluations.entry(module).or_insert(0);
        *count += 1;
        let total = *count;
        self.touch();
        total
    }

    pub fn complete(&mut self) {
        self.stage = AttemptStage::Completed;
        self.touch();
    }

    pub fn fail(&mut self, reason: FailureReason) {
        self.stage = AttemptStage::Failed;
        self.failure_reason = Some(reason);
        self.touch();
    }

    /// An in-progress attempt expires once it has been idle for `ttl`.
    pub fn is_expired(&self, ttl: Option<Duration>, now: DateTime<Utc>) -> bool {
        let Some(ttl) = ttl else {
            return false;
        };
        if self.stage.is_terminal() {
            return false;
        }
        let idle = now.signed_duration_since(self.updated_at);
        idle.to_std().map(|idle| idle > ttl).unwrap_or(false)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

// ---------------------------------------------------------------------------
// Answers
// ---------------------------------------------------------------------------

/// Question id → the learner's text answer.
pub type ObjectiveAnswers = BTreeMap<String, String>;

/// One written task response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WritingResponse {
    pub task_id: String,
    pub text: String,
    /// Word count reported by the client; recounted when zero.
    #[serde(default)]
    pub word_count: u32,
}

impl WritingResponse {
    pub fn effective_word_count(&self) -> u32 {
        if self.word_count > 0 {
            self.word_count
        } else {
            self.text.split_whitespace().count() as u32
        }
    }
}

/// One recorded speaking part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakingResponse {
    pub part_id: String,
    /// Local path or URL of the recording.
    pub audio_reference: String,
    pub duration_seconds: f64,
}

/// Raw answers submitted for one module. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "module", content = "answers", rename_all = "lowercase")]
pub enum ModuleAnswerSet {
    Listening(ObjectiveAnswers),
    Reading(ObjectiveAnswers),
    Writing(Vec<WritingResponse>),
    Speaking(Vec<SpeakingResponse>),
}

impl ModuleAnswerSet {
    pub fn module(&self) -> ModuleKind {
        match self {
            ModuleAnswerSet::Listening(_) => ModuleKind::Listening,
            ModuleAnswerSet::Reading(_) => ModuleKind::Reading,
            ModuleAnswerSet::Writing(_) => ModuleKind::Writing,
            ModuleAnswerSet::Speaking(_) => ModuleKind::Speaking,
        }
    }
}

// ---------------------------------------------------------------------------
// Scores
// ---------------------------------------------------------------------------

/// Outcome of evaluating one module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationStatus {
    Ok,
    /// Scored, but part of the expected output was missing.
    Partial,
    /// Could not be scored; the band is a placeholder.
    Failed,
}

impl fmt::Display for EvaluationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvaluationStatus::Ok => write!(f, "ok"),
            EvaluationStatus::Partial => write!(f, "partial"),
            EvaluationStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub improvements: Vec<String>,
}

impl Feedback {
    pub fn is_empty(&self) -> bool {
        self.strengths.is_empty() && self.improvements.is_empty()
    }
}

/// Raw objective result before band conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectCount {
    pub correct: u32,
    pub total: u32,
}

/// Normalized result of evaluating one `ModuleAnswerSet`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleScore {
    pub module: ModuleKind,
    pub band: f64,
    /// Criterion name → score. Empty for objective modules.
    #[serde(default)]
    pub criteria: BTreeMap<String, f64>,
    /// Criterion name → supporting examples quoted by the evaluator.
    #[serde(default)]
    pub evidence: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub feedback: Feedback,
    #[serde(default)]
    pub correct_answers: Option<CorrectCount>,
    #[serde(default)]
    pub transcript: Option<String>,
    pub evaluated_at: DateTime<Utc>,
    pub evaluation_status: EvaluationStatus,
    /// Operator-facing reason for a failed evaluation. Never shown to learners.
    #[serde(default)]
    pub failure_detail: Option<String>,
}

impl ModuleScore {
    /// A placeholder score for a module that could not be evaluated.
    pub fn failed(module: ModuleKind, detail: impl Into<String>) -> Self {
        Self {
            module,
            band: 0.0,
            criteria: BTreeMap::new(),
            evidence: BTreeMap::new(),
            feedback: Feedback::default(),
            correct_answers: None,
            transcript: None,
            evaluated_at: Utc::now(),
            evaluation_status: EvaluationStatus::Failed,
            failure_detail: Some(detail.into()),
        }
    }

    /// `true` unless the evaluation failed.
    pub fn is_scored(&self) -> bool {
        self.evaluation_status != EvaluationStatus::Failed
    }
}

/// Per-module feedback carried into the overall result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleFeedback {
    pub module: ModuleKind,
    pub status: EvaluationStatus,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub improvements: Vec<String>,
    /// Learner-facing note, set for modules that could not be scored.
    #[serde(default)]
    pub note: Option<String>,
}

/// Reduction of all module scores of one attempt. Never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverallResult {
    pub id: Uuid,
    pub attempt_id: Uuid,
    pub overall_band: f64,
    pub module_scores: Vec<ModuleScore>,
    pub feedback: Vec<ModuleFeedback>,
    pub created_at: DateTime<Utc>,
}

impl OverallResult {
    pub fn score_for(&self, module: ModuleKind) -> Option<&ModuleScore> {
        self.module_scores.iter().find(|s| s.module == module)
    }
}

// ---------------------------------------------------------------------------
// Test definitions
// ---------------------------------------------------------------------------

/// Answer key for a listening or reading module.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveSection {
    /// Question id → accepted answers.
    pub answers: BTreeMap<String, Vec<String>>,
}

impl ObjectiveSection {
    pub fn question_count(&self) -> usize {
        self.answers.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WritingTask {
    pub id: String,
    pub prompt: String,
    #[serde(default)]
    pub min_words: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakingPart {
    pub id: String,
    pub prompt: String,
}

/// Everything needed to evaluate the modules of one test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub listening: Option<ObjectiveSection>,
    #[serde(default)]
    pub reading: Option<ObjectiveSection>,
    #[serde(default)]
    pub writing_tasks: Vec<WritingTask>,
    #[serde(default)]
    pub speaking_parts: Vec<SpeakingPart>,
}

impl TestDefinition {
    /// Whether the test has content for `module`.
    pub fn offers(&self, module: ModuleKind) -> bool {
        match module {
            ModuleKind::Listening => self.listening.is_some(),
            ModuleKind::Reading => self.reading.is_some(),
            ModuleKind::Writing => !self.writing_tasks.is_empty(),
            ModuleKind::Speaking => !self.speaking_parts.is_empty(),
        }
    }

    pub fn objective_section(&self, module: ModuleKind) -> Option<&ObjectiveSection> {
        match module {
            ModuleKind::Listening => self.listening.as_ref(),
            ModuleKind::Reading => self.reading.as_ref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_display_and_parse() {
        assert_eq!(ModuleKind::Writing.to_string(), "writing");
        assert_eq!("Reading".parse::<ModuleKind>().unwrap(), ModuleKind::Reading);
        assert!("maths".parse::<ModuleKind>().is_err());
    }

    #[test]
    fn full_test_advances_in_canonical_order() {
        let mut attempt = TestAttempt::new("t1", "u1", TestMode::FullTest);
        assert_eq!(attempt.current_module(), Some(ModuleKind::Listening));

        attempt.advance_past(ModuleKind::Listening);
        assert_eq!(attempt.current_module(), Some(ModuleKind::Reading));
        attempt.advance_past(ModuleKind::Reading);
        attempt.advance_past(ModuleKind::Writing);
        assert_eq!(attempt.stage, AttemptStage::Speaking);
        attempt.advance_past(ModuleKind::Speaking);
        assert_eq!(attempt.stage, AttemptStage::Aggregating);
        assert_eq!(attempt.status(), AttemptStatus::InProgress);
        assert_eq!(attempt.completed_modules, ModuleKind::ALL.to_vec());
    }

    #[test]
    fn practice_goes_straight_to_aggregating() {
        let mut attempt = TestAttempt::new("t1", "u1", TestMode::Practice(ModuleKind::Writing));
        assert_eq!(attempt.stage, AttemptStage::Writing);
        attempt.advance_past(ModuleKind::Writing);
        assert_eq!(attempt.stage, AttemptStage::Aggregating);
    }

    #[test]
    fn expiry_only_applies_to_idle_in_progress_attempts() {
        let mut attempt = TestAttempt::new("t1", "u1", TestMode::FullTest);
        let ttl = Some(Duration::from_secs(3600));
        let later = attempt.updated_at + chrono::Duration::hours(2);

        assert!(attempt.is_expired(ttl, later));
        assert!(!attempt.is_expired(None, later));
        assert!(!attempt.is_expired(ttl, attempt.updated_at));

        attempt.complete();
        let later = attempt.updated_at + chrono::Duration::hours(2);
        assert!(!attempt.is_expired(ttl, later));
    }

    #[test]
    fn answer_set_serde_shape() {
        let json = r#"{"module":"writing","answers":[{"task_id":"task1","text":"one two three"}]}"#;
        let answers: ModuleAnswerSet = serde_json::from_str(json).unwrap();
        assert_eq!(answers.module(), ModuleKind::Writing);
        let ModuleAnswerSet::Writing(tasks) = answers else {
            panic!("expected writing answers");
        };
        assert_eq!(tasks[0].effective_word_count(), 3);
    }

    #[test]
    fn failed_score_is_not_scored() {
        let score = ModuleScore::failed(ModuleKind::Speaking, "transcription timed out");
        assert!(!score.is_scored());
        assert_eq!(score.band, 0.0);
        assert!(score.criteria.is_empty());
    }
}
