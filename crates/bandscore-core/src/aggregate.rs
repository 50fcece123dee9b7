//! Reduction of module scores to the overall band.

use chrono::Utc;
use uuid::Uuid;

use crate::band::mean_band;
use crate::model::{EvaluationStatus, ModuleFeedback, ModuleScore, OverallResult};

/// Learner-facing note attached to modules that could not be scored.
pub const UNSCORED_NOTE: &str = "could not be scored, showing partial results";

/// Build the overall result for an attempt.
///
/// The overall band is the rounded mean of every scored module's band.
/// Failed modules are kept in the result with a placeholder band of 0 and
/// excluded from the mean. With nothing scored the overall band is 0.
pub fn aggregate(attempt_id: Uuid, scores: &[ModuleScore]) -> OverallResult {
    let mut module_scores: Vec<ModuleScore> = scores.to_vec();
    module_scores.sort_by_key(|s| s.module);

    let bands: Vec<f64> = module_scores
        .iter()
        .filter(|s| s.is_scored())
        .map(|s| s.band)
        .collect();
    let overall_band = mean_band(&bands).unwrap_or_default();

    let feedback = module_scores.iter().map(module_feedback).collect();
    for score in module_scores.iter_mut().filter(|s| !s.is_scored()) {
        score.band = 0.0;
    }

    OverallResult {
        id: Uuid::new_v4(),
        attempt_id,
        overall_band,
        module_scores,
        feedback,
        created_at: Utc::now(),
    }
}

fn module_feedback(score: &ModuleScore) -> ModuleFeedback {
    ModuleFeedback {
        module: score.module,
        status: score.evaluation_status,
        strengths: score.feedback.strengths.clone(),
        improvements: score.feedback.improvements.clone(),
        note: (score.evaluation_status == EvaluationStatus::Failed)
            .then(|| UNSCORED_NOTE.to_string()),
    }
}
