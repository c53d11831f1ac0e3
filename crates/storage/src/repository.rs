use async_trait::async_trait;
use lesson_core::model::{AttemptId, LearnerId, LessonId, Module, ModuleId, ModuleProgress};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// The write was based on an outdated revision, or would drop or
    /// rewrite quiz attempts already stored.
    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    /// Whether retrying the same operation later may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Connection(_))
    }
}

/// Learner progress store.
///
/// Implementations hold no business rules. They must make `put_progress`
/// atomic for a (learner, module) pair, accept it only when the state's
/// revision matches the stored one, and refuse writes that would shrink a
/// lesson's quiz attempt history.
#[async_trait]
pub trait ProgressRepository: Send + Sync {
    /// Load a learner's progress through a module.
    ///
    /// A learner without stored progress gets the initial state at revision
    /// 0: first lesson unlocked, every other lesson locked.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if stored progress cannot be read or does not
    /// fit the module.
    async fn get_progress(
        &self,
        learner_id: LearnerId,
        module: &Module,
    ) -> Result<ModuleProgress, StorageError>;

    /// Replace the stored progress for the learner and module of `progress`
    /// and advance the stored revision by one.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if another write landed since
    /// `progress` was loaded or stored attempts would be lost, or other
    /// storage errors if the write fails.
    async fn put_progress(&self, progress: &ModuleProgress) -> Result<(), StorageError>;
}

/// Reject a write that does not extend every stored attempt history.
///
/// `stored` yields each lesson's recorded attempt ids, oldest first. The
/// incoming lesson must start with exactly those attempts.
///
/// # Errors
///
/// Returns `StorageError::Conflict` on the first lesson that would lose or
/// rewrite history.
pub fn ensure_append_only(
    stored: impl IntoIterator<Item = (LessonId, Vec<AttemptId>)>,
    incoming: &ModuleProgress,
) -> Result<(), StorageError> {
    for (lesson_id, stored_ids) in stored {
        let incoming_ids: Vec<AttemptId> = incoming
            .lessons()
            .iter()
            .find(|l| l.lesson_id() == lesson_id)
            .map(|l| l.quiz_attempts().iter().map(|a| a.id).collect())
            .unwrap_or_default();
        if !incoming_ids.starts_with(&stored_ids) {
            return Err(StorageError::Conflict);
        }
    }
    Ok(())
}

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    progress: Arc<Mutex<HashMap<(LearnerId, ModuleId), ModuleProgress>>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProgressRepository for InMemoryRepository {
    async fn get_progress(
        &self,
        learner_id: LearnerId,
        module: &Module,
    ) -> Result<ModuleProgress, StorageError> {
        let guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard
            .get(&(learner_id, module.id()))
            .cloned()
            .unwrap_or_else(|| ModuleProgress::new(learner_id, module)))
    }

    async fn put_progress(&self, progress: &ModuleProgress) -> Result<(), StorageError> {
        let mut guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let key = (progress.learner_id(), progress.module_id());
        let stored_revision = guard.get(&key).map_or(0, ModuleProgress::revision);
        if stored_revision != progress.revision() {
            return Err(StorageError::Conflict);
        }
        if let Some(stored) = guard.get(&key) {
            ensure_append_only(
                stored
                    .lessons()
                    .iter()
                    .map(|l| (l.lesson_id(), l.quiz_attempts().iter().map(|a| a.id).collect())),
                progress,
            )?;
        }
        guard.insert(key, progress.clone().with_revision(stored_revision + 1));
        Ok(())
    }
}

/// Aggregates repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub progress: Arc<dyn ProgressRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let progress: Arc<dyn ProgressRepository> = Arc::new(InMemoryRepository::new());
        Self { progress }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lesson_core::model::{LessonDraft, LessonKind, LessonStatus, ModuleDraft};
    use lesson_core::progression::{ProgressSignal, QuizSubmission, apply_signal, apply_submission};
    use lesson_core::time::fixed_now;

    fn build_module() -> Module {
        let quiz = lesson_core::model::QuizDraft {
            passing_score_percent: 50,
            questions: vec![lesson_core::model::QuestionDraft {
                id: lesson_core::model::QuestionId::new(1),
                prompt: "?".into(),
                options: vec!["yes".into(), "no".into()],
                correct_option: 0,
            }],
        };
        ModuleDraft {
            id: ModuleId::new(5),
            title: "Storage".into(),
            lessons: vec![
                LessonDraft {
                    id: LessonId::new(1),
                    title: String::new(),
                    kind: LessonKind::Video {
                        watch_threshold_percent: 50,
                    },
                    quiz: Some(quiz),
                },
                LessonDraft {
                    id: LessonId::new(2),
                    title: String::new(),
                    kind: LessonKind::Video {
                        watch_threshold_percent: 50,
                    },
                    quiz: None,
                },
            ],
        }
        .validate()
        .unwrap()
    }

    fn one_answer(choice: usize) -> QuizSubmission {
        QuizSubmission::new([(lesson_core::model::QuestionId::new(1), choice)].into())
    }

    #[tokio::test]
    async fn first_access_returns_initial_state() {
        let repo = InMemoryRepository::new();
        let module = build_module();
        let progress = repo.get_progress(LearnerId::new(1), &module).await.unwrap();
        assert_eq!(progress.status_of(0), Some(LessonStatus::Unlocked));
        assert_eq!(progress.status_of(1), Some(LessonStatus::Locked));
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let repo = InMemoryRepository::new();
        let module = build_module();
        let mut progress = repo.get_progress(LearnerId::new(1), &module).await.unwrap();
        apply_signal(&module, &mut progress, 0, ProgressSignal::VideoWatched(60)).unwrap();
        repo.put_progress(&progress).await.unwrap();

        let fetched = repo.get_progress(LearnerId::new(1), &module).await.unwrap();
        assert_eq!(fetched.revision(), 1);
        assert_eq!(fetched, progress.with_revision(1));

        let other = repo.get_progress(LearnerId::new(2), &module).await.unwrap();
        assert_eq!(other.lesson(0).unwrap().video_watched_percent(), 0);
    }

    #[tokio::test]
    async fn stale_write_that_drops_attempts_conflicts() {
        let repo = InMemoryRepository::new();
        let module = build_module();
        let mut stale = repo.get_progress(LearnerId::new(1), &module).await.unwrap();
        apply_signal(&module, &mut stale, 0, ProgressSignal::VideoWatched(60)).unwrap();

        let mut fresh = stale.clone();
        apply_submission(&module, &mut fresh, 0, &one_answer(1), fixed_now()).unwrap();
        repo.put_progress(&fresh).await.unwrap();

        let err = repo.put_progress(&stale).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn rewriting_an_attempt_conflicts() {
        let repo = InMemoryRepository::new();
        let module = build_module();
        let mut base = repo.get_progress(LearnerId::new(1), &module).await.unwrap();
        apply_signal(&module, &mut base, 0, ProgressSignal::VideoWatched(60)).unwrap();

        let mut first = base.clone();
        apply_submission(&module, &mut first, 0, &one_answer(1), fixed_now()).unwrap();
        repo.put_progress(&first).await.unwrap();

        let mut rival = base;
        apply_submission(&module, &mut rival, 0, &one_answer(0), fixed_now()).unwrap();
        let err = repo.put_progress(&rival).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict));
    }

    #[tokio::test]
    async fn stale_signal_write_cannot_lower_progress() {
        let repo = InMemoryRepository::new();
        let module = build_module();
        let base = repo.get_progress(LearnerId::new(1), &module).await.unwrap();

        let mut ahead = base.clone();
        apply_signal(&module, &mut ahead, 0, ProgressSignal::VideoWatched(90)).unwrap();
        repo.put_progress(&ahead).await.unwrap();

        let mut behind = base;
        apply_signal(&module, &mut behind, 0, ProgressSignal::VideoWatched(10)).unwrap();
        let err = repo.put_progress(&behind).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict));

        let stored = repo.get_progress(LearnerId::new(1), &module).await.unwrap();
        assert_eq!(stored.lesson(0).unwrap().video_watched_percent(), 90);
        assert_eq!(stored.revision(), 1);
    }
}
