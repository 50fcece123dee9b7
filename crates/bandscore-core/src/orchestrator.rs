//! Session orchestrator.
//!
//! Owns the attempt state machine: which module accepts answers, when a
//! score advances the attempt, and when the attempt is aggregated into an
//! overall result. Every transition of one attempt happens under that
//! attempt's lock; evaluation itself runs outside the lock on a spawned task,
//! so a caller that goes away mid-evaluation never leaves a module without a
//! terminal score.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::aggregate::aggregate;
use crate::error::{StoreError, SubmitError};
use crate::evaluator::{check_answers, EvaluatorSet};
use crate::model::{
    AttemptStage, AttemptStatus, FailureReason, ModuleAnswerSet, ModuleKind, ModuleScore,
    OverallResult, TestAttempt, TestDefinition, TestMode,
};
use crate::store::{AttemptRecord, ResultStore};

/// What happens when a module's evaluation fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompletionPolicy {
    /// The module stays current and may be resubmitted; the attempt fails
    /// after `max_evaluation_attempts` failed evaluations of one module.
    #[default]
    RequireAllScored,
    /// The attempt moves on and the overall band excludes the failed module.
    AllowPartial,
}

/// Configuration for the session orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub completion_policy: CompletionPolicy,
    /// Failed evaluations of one module before the attempt is failed.
    /// Only used with `CompletionPolicy::RequireAllScored`.
    pub max_evaluation_attempts: u32,
    /// Upper bound on one module's evaluation, transcription included.
    pub module_deadline: Duration,
    /// Idle time after which an in-progress attempt expires. `None` disables expiry.
    pub attempt_ttl: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            completion_policy: CompletionPolicy::default(),
            max_evaluation_attempts: 3,
            module_deadline: Duration::from_secs(300),
            attempt_ttl: Some(Duration::from_secs(168 * 3600)),
        }
    }
}

/// Who is acting on which attempt.
#[derive(Debug, Clone)]
pub struct SubmissionContext {
    pub user_id: String,
    pub attempt_id: Uuid,
}

impl SubmissionContext {
    pub fn new(user_id: impl Into<String>, attempt_id: Uuid) -> Self {
        Self {
            user_id: user_id.into(),
            attempt_id,
        }
    }
}

/// Result of a single-module submission.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    /// Attempt state after the score was recorded.
    pub attempt: TestAttempt,
    pub score: ModuleScore,
    /// Set when this submission completed the attempt.
    pub result: Option<OverallResult>,
}

/// Result of submitting every remaining module at once.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub attempt: TestAttempt,
    /// Scores recorded by this batch, in canonical order.
    pub scores: Vec<ModuleScore>,
    pub result: Option<OverallResult>,
}

/// Progress callbacks.
pub trait SessionObserver: Send + Sync {
    fn on_submitted(&self, attempt: &TestAttempt, module: ModuleKind);
    fn on_scored(&self, attempt: &TestAttempt, score: &ModuleScore);
    fn on_completed(&self, attempt: &TestAttempt, result: &OverallResult);
    fn on_failed(&self, attempt: &TestAttempt, reason: &FailureReason);
}

/// No-op observer.
pub struct NoopObserver;

impl SessionObserver for NoopObserver {
    fn on_submitted(&self, _: &TestAttempt, _: ModuleKind) {}
    fn on_scored(&self, _: &TestAttempt, _: &ModuleScore) {}
    fn on_completed(&self, _: &TestAttempt, _: &OverallResult) {}
    fn on_failed(&self, _: &TestAttempt, _: &FailureReason) {}
}

/// Per-attempt serialization point. The revision counters identify the
/// newest submission of each module so stale evaluations can be discarded.
#[derive(Default)]
struct AttemptSlot {
    revisions: BTreeMap<ModuleKind, u64>,
}

impl AttemptSlot {
    fn bump(&mut self, module: ModuleKind) -> u64 {
        let revision = self.revisions.entry(module).or_insert(0);
        *revision += 1;
        *revision
    }

    fn current(&self, module: ModuleKind) -> u64 {
        self.revisions.get(&module).copied().unwrap_or(0)
    }
}

struct Evaluated {
    module: ModuleKind,
    revision: u64,
    score: ModuleScore,
}

/// Coordinates attempts across the four modules.
#[derive(Clone)]
pub struct SessionOrchestrator {
    store: Arc<dyn ResultStore>,
    evaluators: EvaluatorSet,
    catalog: Arc<HashMap<String, Arc<TestDefinition>>>,
    config: OrchestratorConfig,
    observer: Arc<dyn SessionObserver>,
    slots: Arc<Mutex<HashMap<Uuid, Arc<Mutex<AttemptSlot>>>>>,
}

impl SessionOrchestrator {
    pub fn new(
        store: Arc<dyn ResultStore>,
        evaluators: EvaluatorSet,
        tests: impl IntoIterator<Item = TestDefinition>,
        config: OrchestratorConfig,
    ) -> Self {
        let catalog = tests
            .into_iter()
            .map(|test| (test.id.clone(), Arc::new(test)))
            .collect();
        Self {
            store,
            evaluators,
            catalog: Arc::new(catalog),
            config,
            observer: Arc::new(NoopObserver),
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn test(&self, test_id: &str) -> Option<&TestDefinition> {
        self.catalog.get(test_id).map(|test| test.as_ref())
    }

    /// Create an attempt positioned at the first module `mode` requires.
    #[tracing::instrument(skip(self))]
    pub async fn start_attempt(
        &self,
        user_id: &str,
        test_id: &str,
        mode: TestMode,
    ) -> Result<TestAttempt, SubmitError> {
        let test = self
            .catalog
            .get(test_id)
            .ok_or_else(|| SubmitError::UnknownTest(test_id.to_string()))?;
        if let Some(module) = mode.required_modules().into_iter().find(|m| !test.offers(*m)) {
            return Err(SubmitError::ModuleNotOffered {
                test_id: test_id.to_string(),
                module,
            });
        }

        let attempt = TestAttempt::new(test_id, user_id, mode);
        self.store.create_attempt(&attempt).await?;
        tracing::info!(attempt = %attempt.attempt_id, "attempt started at {}", attempt.stage);
        Ok(attempt)
    }

    /// Submit the answers for the attempt's current module, evaluate them,
    /// and advance the attempt.
    ///
    /// Caller errors (wrong module, missing fields, foreign or closed
    /// attempt) are rejected before anything is stored. A failed evaluation
    /// is not an error: it comes back as a score with status `failed`.
    #[tracing::instrument(skip(self, ctx, answers), fields(attempt = %ctx.attempt_id))]
    pub async fn submit_module(
        &self,
        ctx: &SubmissionContext,
        module: ModuleKind,
        answers: ModuleAnswerSet,
    ) -> Result<SubmitOutcome, SubmitError> {
        if answers.module() != module {
            return Err(SubmitError::AnswerShapeMismatch {
                module,
                answers: answers.module(),
            });
        }

        let slot = self.slot(ctx.attempt_id).await;
        let admitted = self.admit_module(ctx, &slot, module, &answers).await;
        let (test, revision) = match admitted {
            Ok(admitted) => admitted,
            Err(e) => {
                drop(slot);
                self.release_slot(ctx.attempt_id).await;
                return Err(e);
            }
        };
        tracing::info!("{module} answers accepted");

        let this = self.clone();
        let attempt_id = ctx.attempt_id;
        let task = tokio::spawn(async move {
            let score = this.evaluate(&test, &answers).await;
            let evaluated = Evaluated {
                module,
                revision,
                score,
            };
            let outcome = this.record(attempt_id, &slot, vec![evaluated]).await;
            drop(slot);
            this.release_slot(attempt_id).await;
            outcome
        });
        let mut outcome = task
            .await
            .map_err(|e| SubmitError::Internal(format!("evaluation task failed: {e}")))??;

        let score = outcome
            .scores
            .pop()
            .ok_or_else(|| SubmitError::Internal("no score recorded".into()))?;
        Ok(SubmitOutcome {
            attempt: outcome.attempt,
            score,
            result: outcome.result,
        })
    }

    /// Submit answers for every module the attempt still requires.
    ///
    /// All answer sets are checked before any is stored; they are then
    /// evaluated concurrently and recorded in canonical order. Recording
    /// stops at the first module that does not advance the attempt; its
    /// later modules keep their stored answers and can be submitted again.
    #[tracing::instrument(skip(self, ctx, answers), fields(attempt = %ctx.attempt_id))]
    pub async fn submit_remaining(
        &self,
        ctx: &SubmissionContext,
        answers: Vec<ModuleAnswerSet>,
    ) -> Result<BatchOutcome, SubmitError> {
        let slot = self.slot(ctx.attempt_id).await;
        let admitted = self.admit_remaining(ctx, &slot, answers).await;
        let (test, batch) = match admitted {
            Ok(admitted) => admitted,
            Err(e) => {
                drop(slot);
                self.release_slot(ctx.attempt_id).await;
                return Err(e);
            }
        };
        tracing::info!(modules = batch.len(), "answers accepted for remaining modules");

        let this = self.clone();
        let attempt_id = ctx.attempt_id;
        let task = tokio::spawn(async move {
            let evaluated = {
                let mut pending: FuturesUnordered<_> = batch
                    .iter()
                    .map(|(revision, answers)| {
                        let this = &this;
                        let test = &test;
                        async move {
                            Evaluated {
                                module: answers.module(),
                                revision: *revision,
                                score: this.evaluate(test, answers).await,
                            }
                        }
                    })
                    .collect();
                let mut evaluated = Vec::with_capacity(batch.len());
                while let Some(done) = pending.next().await {
                    evaluated.push(done);
                }
                evaluated
            };
            let outcome = this.record(attempt_id, &slot, evaluated).await;
            drop(slot);
            this.release_slot(attempt_id).await;
            outcome
        });
        task.await
            .map_err(|e| SubmitError::Internal(format!("evaluation task failed: {e}")))?
    }

    /// The stored record of an attempt.
    pub async fn get_attempt(&self, attempt_id: Uuid) -> Result<AttemptRecord, SubmitError> {
        self.store
            .get_attempt(attempt_id)
            .await?
            .ok_or(SubmitError::AttemptNotFound(attempt_id))
    }

    /// Produce a new overall result for a completed attempt.
    ///
    /// Modules whose latest score failed are evaluated again from their
    /// stored answers first. Earlier results are kept.
    #[tracing::instrument(skip(self, ctx), fields(attempt = %ctx.attempt_id))]
    pub async fn rescore(&self, ctx: &SubmissionContext) -> Result<OverallResult, SubmitError> {
        let this = self.clone();
        let ctx = ctx.clone();
        let task = tokio::spawn(async move {
            let slot = this.slot(ctx.attempt_id).await;
            let outcome = this.rescore_in(&ctx, &slot).await;
            drop(slot);
            this.release_slot(ctx.attempt_id).await;
            outcome
        });
        task.await
            .map_err(|e| SubmitError::Internal(format!("re-scoring task failed: {e}")))?
    }

    /// Finish an attempt whose aggregation was interrupted, for example by a
    /// store outage after its last module was scored.
    ///
    /// Returns the latest overall result once the attempt is completed, and
    /// `None` while a module is still waiting for answers.
    #[tracing::instrument(skip(self, ctx), fields(attempt = %ctx.attempt_id))]
    pub async fn resume(
        &self,
        ctx: &SubmissionContext,
    ) -> Result<Option<OverallResult>, SubmitError> {
        let this = self.clone();
        let ctx = ctx.clone();
        let task = tokio::spawn(async move {
            let slot = this.slot(ctx.attempt_id).await;
            let outcome = this.resume_in(&ctx, &slot).await;
            drop(slot);
            this.release_slot(ctx.attempt_id).await;
            outcome
        });
        task.await
            .map_err(|e| SubmitError::Internal(format!("resume task failed: {e}")))?
    }

    /// Check a single-module submission and store its answers. Returns the
    /// test and the submission's revision.
    async fn admit_module(
        &self,
        ctx: &SubmissionContext,
        slot: &Mutex<AttemptSlot>,
        module: ModuleKind,
        answers: &ModuleAnswerSet,
    ) -> Result<(Arc<TestDefinition>, u64), SubmitError> {
        let mut guard = slot.lock().await;
        let (record, test) = self.load_open(ctx).await?;
        let mut attempt = record.attempt;

        let expected = attempt.current_module();
        if expected != Some(module) {
            return Err(SubmitError::OutOfSequence {
                expected,
                submitted: module,
            });
        }
        check_answers(&test, answers)?;

        attempt.touch();
        if let Err(e) = self.store.put_answers(&attempt, answers).await {
            return Err(self.fail_persistence(attempt, e).await);
        }
        self.observer.on_submitted(&attempt, module);
        Ok((test, guard.bump(module)))
    }

    /// Check every remaining answer set, then store them all.
    async fn admit_remaining(
        &self,
        ctx: &SubmissionContext,
        slot: &Mutex<AttemptSlot>,
        answers: Vec<ModuleAnswerSet>,
    ) -> Result<(Arc<TestDefinition>, Vec<(u64, ModuleAnswerSet)>), SubmitError> {
        let mut guard = slot.lock().await;
        let (record, test) = self.load_open(ctx).await?;
        let mut attempt = record.attempt;
        let remaining = attempt.remaining_modules();

        let mut by_module = BTreeMap::new();
        for set in answers {
            let module = set.module();
            if !remaining.contains(&module) {
                return Err(SubmitError::OutOfSequence {
                    expected: attempt.current_module(),
                    submitted: module,
                });
            }
            if by_module.insert(module, set).is_some() {
                return Err(SubmitError::MissingAnswers {
                    module,
                    detail: "answers submitted more than once".into(),
                });
            }
        }
        for module in &remaining {
            let set = by_module
                .get(module)
                .ok_or_else(|| SubmitError::MissingAnswers {
                    module: *module,
                    detail: "no answers submitted".into(),
                })?;
            check_answers(&test, set)?;
        }

        attempt.touch();
        let mut batch = Vec::with_capacity(by_module.len());
        for (module, set) in by_module {
            if let Err(e) = self.store.put_answers(&attempt, &set).await {
                return Err(self.fail_persistence(attempt, e).await);
            }
            self.observer.on_submitted(&attempt, module);
            batch.push((guard.bump(module), set));
        }
        Ok((test, batch))
    }

    async fn resume_in(
        &self,
        ctx: &SubmissionContext,
        slot: &Mutex<AttemptSlot>,
    ) -> Result<Option<OverallResult>, SubmitError> {
        let _guard = slot.lock().await;
        let record = self.get_attempt(ctx.attempt_id).await?;
        if record.attempt.user_id != ctx.user_id {
            return Err(SubmitError::NotOwner(ctx.attempt_id));
        }
        let mut attempt = record.attempt;
        match attempt.stage {
            AttemptStage::Aggregating => {
                tracing::info!("resuming interrupted aggregation");
                self.settle(&mut attempt, &record.scores).await
            }
            AttemptStage::Completed => Ok(record.results.last().cloned()),
            AttemptStage::Failed => Err(SubmitError::AttemptClosed(attempt.status())),
            _ => Ok(None),
        }
    }

    async fn rescore_in(
        &self,
        ctx: &SubmissionContext,
        slot: &Mutex<AttemptSlot>,
    ) -> Result<OverallResult, SubmitError> {
        let (record, test) = {
            let _guard = slot.lock().await;
            self.load_completed(ctx).await?
        };

        // Provider calls happen without the attempt lock.
        let mut rescored = Vec::new();
        for module in record.attempt.mode.required_modules() {
            let (Some(previous), Some(answers)) =
                (record.scores.get(&module), record.answers.get(&module))
            else {
                continue;
            };
            if !previous.is_scored() {
                rescored.push(self.evaluate(&test, answers).await);
            }
        }

        let _guard = slot.lock().await;
        let (record, _) = self.load_completed(ctx).await?;
        let mut scores = record.scores;
        for score in rescored {
            if scores.get(&score.module).is_some_and(ModuleScore::is_scored) {
                continue;
            }
            self.store
                .append_module_score(&record.attempt, &score)
                .await?;
            self.observer.on_scored(&record.attempt, &score);
            scores.insert(score.module, score);
        }

        let latest: Vec<ModuleScore> = record
            .attempt
            .mode
            .required_modules()
            .iter()
            .filter_map(|m| scores.get(m).cloned())
            .collect();
        let result = aggregate(ctx.attempt_id, &latest);
        self.store.append_result(&result).await?;
        tracing::info!(overall_band = result.overall_band, "attempt re-scored");
        self.observer.on_completed(&record.attempt, &result);
        Ok(result)
    }

    async fn slot(&self, attempt_id: Uuid) -> Arc<Mutex<AttemptSlot>> {
        let mut slots = self.slots.lock().await;
        Arc::clone(slots.entry(attempt_id).or_default())
    }

    /// Drop the attempt's slot once no caller or evaluation holds it.
    /// Callers drop their own handle first.
    async fn release_slot(&self, attempt_id: Uuid) {
        let mut slots = self.slots.lock().await;
        if slots
            .get(&attempt_id)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&attempt_id);
        }
    }

    /// Load a completed attempt the caller owns. Must be called with the
    /// attempt's slot locked.
    async fn load_completed(
        &self,
        ctx: &SubmissionContext,
    ) -> Result<(AttemptRecord, Arc<TestDefinition>), SubmitError> {
        let record = self.get_attempt(ctx.attempt_id).await?;
        if record.attempt.user_id != ctx.user_id {
            return Err(SubmitError::NotOwner(ctx.attempt_id));
        }
        if record.attempt.status() != AttemptStatus::Completed {
            return Err(SubmitError::NotCompleted(record.attempt.status()));
        }
        let test = self
            .catalog
            .get(&record.attempt.test_id)
            .cloned()
            .ok_or_else(|| SubmitError::UnknownTest(record.attempt.test_id.clone()))?;
        Ok((record, test))
    }

    /// Load an attempt the caller owns and that still accepts answers.
    /// Must be called with the attempt's slot locked.
    async fn load_open(
        &self,
        ctx: &SubmissionContext,
    ) -> Result<(AttemptRecord, Arc<TestDefinition>), SubmitError> {
        let record = self.get_attempt(ctx.attempt_id).await?;
        if record.attempt.user_id != ctx.user_id {
            return Err(SubmitError::NotOwner(ctx.attempt_id));
        }
        if record.attempt.stage.is_terminal() {
            return Err(SubmitError::AttemptClosed(record.attempt.status()));
        }
        if record
            .attempt
            .is_expired(self.config.attempt_ttl, Utc::now())
        {
            let mut attempt = record.attempt;
            attempt.fail(FailureReason::Expired);
            self.store.update_attempt(&attempt).await?;
            tracing::info!("attempt expired after inactivity");
            self.observer.on_failed(&attempt, &FailureReason::Expired);
            return Err(SubmitError::AttemptExpired(ctx.attempt_id));
        }
        let test = self
            .catalog
            .get(&record.attempt.test_id)
            .cloned()
            .ok_or_else(|| SubmitError::UnknownTest(record.attempt.test_id.clone()))?;
        Ok((record, test))
    }

    async fn evaluate(&self, test: &TestDefinition, answers: &ModuleAnswerSet) -> ModuleScore {
        let module = answers.module();
        let Some(evaluator) = self.evaluators.get(module) else {
            return ModuleScore::failed(module, format!("no evaluator configured for {module}"));
        };
        match tokio::time::timeout(self.config.module_deadline, evaluator.evaluate(test, answers))
            .await
        {
            Ok(score) => score,
            Err(_) => {
                tracing::warn!("{module} evaluation exceeded its deadline");
                ModuleScore::failed(
                    module,
                    format!(
                        "evaluation exceeded the {}s deadline",
                        self.config.module_deadline.as_secs()
                    ),
                )
            }
        }
    }

    /// Record evaluated modules in canonical order and settle the attempt.
    ///
    /// The first entry must be recordable or the call fails; later entries
    /// are skipped once one of them cannot be recorded.
    async fn record(
        &self,
        attempt_id: Uuid,
        slot: &Mutex<AttemptSlot>,
        mut evaluated: Vec<Evaluated>,
    ) -> Result<BatchOutcome, SubmitError> {
        evaluated.sort_by_key(|e| e.module);

        let guard = slot.lock().await;
        let record = self.get_attempt(attempt_id).await?;
        let mut attempt = record.attempt;
        let mut scores = record.scores;
        let mut recorded = Vec::new();

        for (index, Evaluated { module, revision, score }) in evaluated.into_iter().enumerate() {
            let rejection = if guard.current(module) != revision {
                Some(SubmitError::Superseded(module))
            } else if attempt.stage.is_terminal() {
                Some(SubmitError::AttemptClosed(attempt.status()))
            } else if attempt.current_module() != Some(module) {
                Some(SubmitError::OutOfSequence {
                    expected: attempt.current_module(),
                    submitted: module,
                })
            } else {
                None
            };
            if let Some(err) = rejection {
                tracing::info!("discarding {module} evaluation: {err}");
                if index == 0 {
                    return Err(err);
                }
                break;
            }

            self.apply_score(&mut attempt, &score);
            if let Err(e) = self.store.append_module_score(&attempt, &score).await {
                return Err(self.fail_persistence(attempt, e).await);
            }
            tracing::info!(
                band = score.band,
                status = %score.evaluation_status,
                "{module} scored, attempt now at {}",
                attempt.stage
            );
            self.observer.on_scored(&attempt, &score);
            scores.insert(module, score.clone());
            recorded.push(score);
        }

        let result = self.settle(&mut attempt, &scores).await?;
        drop(guard);
        Ok(BatchOutcome {
            attempt,
            scores: recorded,
            result,
        })
    }

    fn apply_score(&self, attempt: &mut TestAttempt, score: &ModuleScore) {
        let module = score.module;
        if score.is_scored() {
            attempt.advance_past(module);
            return;
        }

        let failures = attempt.record_failed_evaluation(module);
        tracing::warn!(
            failures,
            detail = score.failure_detail.as_deref().unwrap_or_default(),
            "{module} could not be scored"
        );
        match self.config.completion_policy {
            CompletionPolicy::AllowPartial => attempt.advance_past(module),
            CompletionPolicy::RequireAllScored
                if failures >= self.config.max_evaluation_attempts =>
            {
                attempt.fail(FailureReason::EvaluationExhausted {
                    module,
                    attempts: failures,
                });
            }
            CompletionPolicy::RequireAllScored => {}
        }
    }

    /// Aggregate and complete the attempt once no module is left, or report
    /// a failure the last score caused.
    async fn settle(
        &self,
        attempt: &mut TestAttempt,
        scores: &BTreeMap<ModuleKind, ModuleScore>,
    ) -> Result<Option<OverallResult>, SubmitError> {
        match attempt.stage {
            AttemptStage::Failed => {
                if let Some(reason) = &attempt.failure_reason {
                    tracing::warn!("attempt failed: {reason}");
                    self.observer.on_failed(attempt, reason);
                }
                return Ok(None);
            }
            AttemptStage::Aggregating => {}
            _ => return Ok(None),
        }

        let latest: Vec<ModuleScore> = attempt
            .mode
            .required_modules()
            .iter()
            .filter_map(|m| scores.get(m).cloned())
            .collect();

        if !latest.iter().any(ModuleScore::is_scored) {
            attempt.fail(FailureReason::NoScoredModules);
            if let Err(e) = self.store.update_attempt(attempt).await {
                return Err(self.fail_persistence(attempt.clone(), e).await);
            }
            tracing::warn!("attempt failed: no module could be scored");
            self.observer
                .on_failed(attempt, &FailureReason::NoScoredModules);
            return Ok(None);
        }

        let result = aggregate(attempt.attempt_id, &latest);
        attempt.complete();
        if let Err(e) = self.store.finalize_attempt(attempt, &result).await {
            return Err(self.fail_persistence(attempt.clone(), e).await);
        }
        tracing::info!(overall_band = result.overall_band, "attempt completed");
        self.observer.on_completed(attempt, &result);
        Ok(Some(result))
    }

    /// Mark the attempt failed after a store write was lost. Best effort:
    /// the store may reject this write too.
    async fn fail_persistence(&self, mut attempt: TestAttempt, err: StoreError) -> SubmitError {
        tracing::error!("persistence failure: {err}");
        let reason = FailureReason::Persistence {
            detail: err.to_string(),
        };
        attempt.fail(reason.clone());
        if let Err(e) = self.store.update_attempt(&attempt).await {
            tracing::error!("could not record persistence failure: {e}");
        }
        self.observer.on_failed(&attempt, &reason);
        SubmitError::Persistence(err)
    }
}
