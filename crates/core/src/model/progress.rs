use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::curriculum::Module;
use crate::model::ids::{AttemptId, LearnerId, LessonId, ModuleId, QuestionId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

/// Learner state that does not fit its module or breaks the unlock chain.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("invalid lesson status: {0}")]
    InvalidStatus(String),

    #[error("progress references lesson {0}, which the module does not contain")]
    UnknownLesson(LessonId),

    #[error("progress has no entry for lesson {0}")]
    MissingLesson(LessonId),

    #[error("progress lists lesson {0} more than once")]
    DuplicateLesson(LessonId),

    #[error("first lesson must never be locked")]
    FirstLessonLocked,

    #[error("lesson at index {index} is {status} but its predecessor is {previous}")]
    BrokenUnlockChain {
        index: usize,
        status: LessonStatus,
        previous: LessonStatus,
    },

    #[error("watched percent must be 0..=100, got {0}")]
    InvalidWatchedPercent(u8),
}

//
// ─── LESSON STATUS ─────────────────────────────────────────────────────────────
//

/// Where a lesson sits in its Locked → Unlocked → Completed lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonStatus {
    Locked,
    Unlocked,
    Completed,
}

impl LessonStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LessonStatus::Locked => "locked",
            LessonStatus::Unlocked => "unlocked",
            LessonStatus::Completed => "completed",
        }
    }

    /// Parse the storage representation produced by [`LessonStatus::as_str`].
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::InvalidStatus` for unknown values.
    pub fn parse(raw: &str) -> Result<Self, ProgressError> {
        match raw {
            "locked" => Ok(LessonStatus::Locked),
            "unlocked" => Ok(LessonStatus::Unlocked),
            "completed" => Ok(LessonStatus::Completed),
            other => Err(ProgressError::InvalidStatus(other.to_owned())),
        }
    }

    #[must_use]
    pub fn is_accessible(self) -> bool {
        self != LessonStatus::Locked
    }
}

impl std::fmt::Display for LessonStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

//
// ─── QUIZ ATTEMPT ──────────────────────────────────────────────────────────────
//

/// One scored quiz submission. Attempts are only ever appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizAttempt {
    pub id: AttemptId,
    pub answers: BTreeMap<QuestionId, usize>,
    pub score_percent: u8,
    pub passed: bool,
    pub submitted_at: DateTime<Utc>,
}

//
// ─── LESSON PROGRESS ───────────────────────────────────────────────────────────
//

/// A learner's state in one lesson.
///
/// Mutators are crate-private: status only moves forward and the progress
/// flags never decrease, so the only way to change a lesson is through
/// [`crate::progression`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonProgress {
    lesson_id: LessonId,
    status: LessonStatus,
    video_watched_percent: u8,
    content_read: bool,
    resource_acknowledged: bool,
    quiz_attempts: Vec<QuizAttempt>,
}

impl LessonProgress {
    #[must_use]
    pub fn new(lesson_id: LessonId, status: LessonStatus) -> Self {
        Self {
            lesson_id,
            status,
            video_watched_percent: 0,
            content_read: false,
            resource_acknowledged: false,
            quiz_attempts: Vec::new(),
        }
    }

    /// Rehydrate lesson state from storage.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::InvalidWatchedPercent` if the stored percentage exceeds 100.
    pub fn from_persisted(
        lesson_id: LessonId,
        status: LessonStatus,
        video_watched_percent: u8,
        content_read: bool,
        resource_acknowledged: bool,
        quiz_attempts: Vec<QuizAttempt>,
    ) -> Result<Self, ProgressError> {
        if video_watched_percent > 100 {
            return Err(ProgressError::InvalidWatchedPercent(video_watched_percent));
        }
        Ok(Self {
            lesson_id,
            status,
            video_watched_percent,
            content_read,
            resource_acknowledged,
            quiz_attempts,
        })
    }

    #[must_use]
    pub fn lesson_id(&self) -> LessonId {
        self.lesson_id
    }

    #[must_use]
    pub fn status(&self) -> LessonStatus {
        self.status
    }

    #[must_use]
    pub fn video_watched_percent(&self) -> u8 {
        self.video_watched_percent
    }

    #[must_use]
    pub fn content_read(&self) -> bool {
        self.content_read
    }

    #[must_use]
    pub fn resource_acknowledged(&self) -> bool {
        self.resource_acknowledged
    }

    /// Attempt history, oldest first.
    #[must_use]
    pub fn quiz_attempts(&self) -> &[QuizAttempt] {
        &self.quiz_attempts
    }

    #[must_use]
    pub fn latest_attempt(&self) -> Option<&QuizAttempt> {
        self.quiz_attempts.last()
    }

    #[must_use]
    pub fn best_score(&self) -> Option<u8> {
        self.quiz_attempts.iter().map(|a| a.score_percent).max()
    }

    #[must_use]
    pub fn attempt(&self, id: AttemptId) -> Option<&QuizAttempt> {
        self.quiz_attempts.iter().find(|a| a.id == id)
    }

    pub(crate) fn record_video_watched(&mut self, percent: u8) {
        self.video_watched_percent = self.video_watched_percent.max(percent.min(100));
    }

    pub(crate) fn mark_content_read(&mut self) {
        self.content_read = true;
    }

    pub(crate) fn acknowledge_resource(&mut self) {
        self.resource_acknowledged = true;
    }

    pub(crate) fn push_attempt(&mut self, attempt: QuizAttempt) {
        self.quiz_attempts.push(attempt);
    }

    /// Locked → Unlocked. Other states are left alone.
    pub(crate) fn unlock(&mut self) -> bool {
        if self.status == LessonStatus::Locked {
            self.status = LessonStatus::Unlocked;
            true
        } else {
            false
        }
    }

    /// Unlocked → Completed. Returns false if the lesson was already completed.
    pub(crate) fn complete(&mut self) -> bool {
        if self.status == LessonStatus::Completed {
            false
        } else {
            self.status = LessonStatus::Completed;
            true
        }
    }
}

//
// ─── MODULE PROGRESS ───────────────────────────────────────────────────────────
//

/// A learner's state across one module, one entry per lesson in module order.
///
/// `revision` counts the writes a store has accepted for this state. A fresh
/// state is revision 0; stores refuse a write whose revision is not the one
/// they hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleProgress {
    learner_id: LearnerId,
    module_id: ModuleId,
    revision: u64,
    lessons: Vec<LessonProgress>,
}

impl ModuleProgress {
    /// Fresh state for a learner opening the module for the first time:
    /// the first lesson is unlocked, the rest are locked.
    #[must_use]
    pub fn new(learner_id: LearnerId, module: &Module) -> Self {
        let lessons = module
            .lessons()
            .iter()
            .enumerate()
            .map(|(i, lesson)| {
                let status = if i == 0 {
                    LessonStatus::Unlocked
                } else {
                    LessonStatus::Locked
                };
                LessonProgress::new(lesson.id(), status)
            })
            .collect();

        Self {
            learner_id,
            module_id: module.id(),
            revision: 0,
            lessons,
        }
    }

    /// Rehydrate persisted lesson entries against their module.
    ///
    /// Entries may arrive in any order; they are arranged in module order and
    /// the unlock chain is checked.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError` if entries do not match the module's lessons
    /// one-to-one or the stored statuses break the unlock chain.
    pub fn from_persisted(
        learner_id: LearnerId,
        module: &Module,
        revision: u64,
        entries: Vec<LessonProgress>,
    ) -> Result<Self, ProgressError> {
        let mut slots: Vec<Option<LessonProgress>> = vec![None; module.lesson_count()];

        for entry in entries {
            let index = module
                .index_of(entry.lesson_id)
                .ok_or(ProgressError::UnknownLesson(entry.lesson_id))?;
            if slots[index].is_some() {
                return Err(ProgressError::DuplicateLesson(entry.lesson_id));
            }
            slots[index] = Some(entry);
        }

        let mut lessons = Vec::with_capacity(slots.len());
        for (slot, lesson) in slots.into_iter().zip(module.lessons()) {
            lessons.push(slot.ok_or(ProgressError::MissingLesson(lesson.id()))?);
        }

        let progress = Self {
            learner_id,
            module_id: module.id(),
            revision,
            lessons,
        };
        progress.check_invariants()?;
        Ok(progress)
    }

    #[must_use]
    pub fn learner_id(&self) -> LearnerId {
        self.learner_id
    }

    #[must_use]
    pub fn module_id(&self) -> ModuleId {
        self.module_id
    }

    /// Store revision this state was loaded at.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// The same state stamped with another store revision.
    #[must_use]
    pub fn with_revision(mut self, revision: u64) -> Self {
        self.revision = revision;
        self
    }

    #[must_use]
    pub fn lessons(&self) -> &[LessonProgress] {
        &self.lessons
    }

    #[must_use]
    pub fn lesson(&self, index: usize) -> Option<&LessonProgress> {
        self.lessons.get(index)
    }

    pub(crate) fn lesson_mut(&mut self, index: usize) -> Option<&mut LessonProgress> {
        self.lessons.get_mut(index)
    }

    #[must_use]
    pub fn status_of(&self, index: usize) -> Option<LessonStatus> {
        self.lessons.get(index).map(LessonProgress::status)
    }

    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.lessons
            .iter()
            .filter(|l| l.status == LessonStatus::Completed)
            .count()
    }

    /// Completed lessons over total lessons, in `0.0..=1.0`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn completion_ratio(&self) -> f64 {
        if self.lessons.is_empty() {
            return 0.0;
        }
        self.completed_count() as f64 / self.lessons.len() as f64
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        !self.lessons.is_empty() && self.completed_count() == self.lessons.len()
    }

    /// Index of the first lesson not yet completed, if any.
    #[must_use]
    pub fn current_index(&self) -> Option<usize> {
        self.lessons
            .iter()
            .position(|l| l.status != LessonStatus::Completed)
    }

    /// Check the unlock chain: the first lesson is never locked, and every
    /// later lesson is accessible exactly when its predecessor is completed.
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn check_invariants(&self) -> Result<(), ProgressError> {
        if self
            .lessons
            .first()
            .is_some_and(|first| first.status == LessonStatus::Locked)
        {
            return Err(ProgressError::FirstLessonLocked);
        }

        for (index, pair) in self.lessons.windows(2).enumerate() {
            let (previous, current) = (pair[0].status, pair[1].status);
            let expect_accessible = previous == LessonStatus::Completed;
            if current.is_accessible() != expect_accessible {
                return Err(ProgressError::BrokenUnlockChain {
                    index: index + 1,
                    status: current,
                    previous,
                });
            }
        }
        Ok(())
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
