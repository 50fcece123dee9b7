//! Persistence of attempts, answers, scores, and overall results.
//!
//! Every write replaces one attempt's whole record, so a record is always
//! internally consistent: the attempt's stage never runs ahead of the scores
//! and results stored next to it.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{ModuleAnswerSet, ModuleKind, ModuleScore, OverallResult, TestAttempt};

/// Everything stored for one attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: TestAttempt,
    /// Latest submitted answers per module.
    #[serde(default)]
    pub answers: BTreeMap<ModuleKind, ModuleAnswerSet>,
    /// Latest score per module.
    #[serde(default)]
    pub scores: BTreeMap<ModuleKind, ModuleScore>,
    /// Overall results, oldest first. Re-scoring appends.
    #[serde(default)]
    pub results: Vec<OverallResult>,
}

impl AttemptRecord {
    pub fn new(attempt: TestAttempt) -> Self {
        Self {
            attempt,
            answers: BTreeMap::new(),
            scores: BTreeMap::new(),
            results: Vec::new(),
        }
    }

    pub fn latest_result(&self) -> Option<&OverallResult> {
        self.results.last()
    }

    /// Latest scores in canonical module order.
    pub fn scores_in_order(&self) -> Vec<ModuleScore> {
        self.scores.values().cloned().collect()
    }
}

/// Storage backend for attempt records.
///
/// Implementations must apply each call to one record atomically.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn create_attempt(&self, attempt: &TestAttempt) -> Result<(), StoreError>;

    async fn get_attempt(&self, attempt_id: Uuid) -> Result<Option<AttemptRecord>, StoreError>;

    /// Persist a state change of the attempt alone.
    async fn update_attempt(&self, attempt: &TestAttempt) -> Result<(), StoreError>;

    /// Store `answers`, replacing any earlier answers for the same module.
    async fn put_answers(
        &self,
        attempt: &TestAttempt,
        answers: &ModuleAnswerSet,
    ) -> Result<(), StoreError>;

    /// Store `score` as the module's latest score together with the
    /// attempt state it led to.
    async fn append_module_score(
        &self,
        attempt: &TestAttempt,
        score: &ModuleScore,
    ) -> Result<(), StoreError>;

    /// Store the overall result and the completed attempt together.
    async fn finalize_attempt(
        &self,
        attempt: &TestAttempt,
        result: &OverallResult,
    ) -> Result<(), StoreError>;

    /// Add a further overall result to an already completed attempt.
    async fn append_result(&self, result: &OverallResult) -> Result<(), StoreError>;
}

enum Change<'a> {
    Attempt(&'a TestAttempt),
    Answers(&'a TestAttempt, &'a ModuleAnswerSet),
    Score(&'a TestAttempt, &'a ModuleScore),
    Finalize(&'a TestAttempt, &'a OverallResult),
    Result(&'a OverallResult),
}

impl Change<'_> {
    fn attempt_id(&self) -> Uuid {
        match self {
            Change::Attempt(a)
            | Change::Answers(a, _)
            | Change::Score(a, _)
            | Change::Finalize(a, _) => a.attempt_id,
            Change::Result(r) => r.attempt_id,
        }
    }

    fn apply(self, record: &mut AttemptRecord) {
        match self {
            Change::Attempt(attempt) => record.attempt = attempt.clone(),
            Change::Answers(attempt, answers) => {
                record.attempt = attempt.clone();
                record.answers.insert(answers.module(), answers.clone());
            }
            Change::Score(attempt, score) => {
                record.attempt = attempt.clone();
                record.scores.insert(score.module, score.clone());
            }
            Change::Finalize(attempt, result) => {
                record.attempt = attempt.clone();
                record.results.push(result.clone());
            }
            Change::Result(result) => record.results.push(result.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Process-local store, used by tests and single-shot runs.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<Uuid, AttemptRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    async fn change(&self, change: Change<'_>) -> Result<(), StoreError> {
        let id = change.attempt_id();
        let mut records = self.records.write().await;
        let record = records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        change.apply(record);
        Ok(())
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn create_attempt(&self, attempt: &TestAttempt) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        if records.contains_key(&attempt.attempt_id) {
            return Err(StoreError::AlreadyExists(attempt.attempt_id));
        }
        records.insert(attempt.attempt_id, AttemptRecord::new(attempt.clone()));
        Ok(())
    }

    async fn get_attempt(&self, attempt_id: Uuid) -> Result<Option<AttemptRecord>, StoreError> {
        Ok(self.records.read().await.get(&attempt_id).cloned())
    }

    async fn update_attempt(&self, attempt: &TestAttempt) -> Result<(), StoreError> {
        self.change(Change::Attempt(attempt)).await
    }

    async fn put_answers(
        &self,
        attempt: &TestAttempt,
        answers: &ModuleAnswerSet,
    ) -> Result<(), StoreError> {
        self.change(Change::Answers(attempt, answers)).await
    }

    async fn append_module_score(
        &self,
        attempt: &TestAttempt,
        score: &ModuleScore,
    ) -> Result<(), StoreError> {
        self.change(Change::Score(attempt, score)).await
    }

    async fn finalize_attempt(
        &self,
        attempt: &TestAttempt,
        result: &OverallResult,
    ) -> Result<(), StoreError> {
        self.change(Change::Finalize(attempt, result)).await
    }

    async fn append_result(&self, result: &OverallResult) -> Result<(), StoreError> {
        self.change(Change::Result(result)).await
    }
}

// ---------------------------------------------------------------------------
// JSON file store
// ---------------------------------------------------------------------------

/// One pretty-printed JSON file per attempt under a directory.
///
/// Files are written to a temporary sibling and renamed into place, so a
/// reader never sees a half-written record.
pub struct JsonFileStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, attempt_id: Uuid) -> PathBuf {
        self.dir.join(format!("{attempt_id}.json"))
    }

    async fn load(&self, attempt_id: Uuid) -> Result<Option<AttemptRecord>, StoreError> {
        let path = self.record_path(attempt_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    async fn save(&self, record: &AttemptRecord) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.record_path(record.attempt.attempt_id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(record)?;
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn change(&self, change: Change<'_>) -> Result<(), StoreError> {
        let id = change.attempt_id();
        let _guard = self.write_lock.lock().await;
        let mut record = self.load(id).await?.ok_or(StoreError::NotFound(id))?;
        change.apply(&mut record);
        self.save(&record).await
    }
}

#[async_trait]
impl ResultStore for JsonFileStore {
    async fn create_attempt(&self, attempt: &TestAttempt) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        if self.load(attempt.attempt_id).await?.is_some() {
            return Err(StoreError::AlreadyExists(attempt.attempt_id));
        }
        self.save(&AttemptRecord::new(attempt.clone())).await
    }

    async fn get_attempt(&self, attempt_id: Uuid) -> Result<Option<AttemptRecord>, StoreError> {
        self.load(attempt_id).await
    }

    async fn update_attempt(&self, attempt: &TestAttempt) -> Result<(), StoreError> {
        self.change(Change::Attempt(attempt)).await
    }

    async fn put_answers(
        &self,
        attempt: &TestAttempt,
        answers: &ModuleAnswerSet,
    ) -> Result<(), StoreError> {
        self.change(Change::Answers(attempt, answers)).await
    }

    async fn append_module_score(
        &self,
        attempt: &TestAttempt,
        score: &ModuleScore,
    ) -> Result<(), StoreError> {
        self.change(Change::Score(attempt, score)).await
    }

    async fn finalize_attempt(
        &self,
        attempt: &TestAttempt,
        result: &OverallResult,
    ) -> Result<(), StoreError> {
        self.change(Change::Finalize(attempt, result)).await
    }

    async fn append_result(&self, result: &OverallResult) -> Result<(), StoreError> {
        self.change(Change::Result(result)).await
    }
}
