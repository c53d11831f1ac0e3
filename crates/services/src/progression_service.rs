use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use lesson_core::{
    model::{LearnerId, Lesson, LessonProgress, Module, ModuleId, ModuleProgress, QuizAttempt},
    progression::{
        self, LessonOverview, ModuleSummary, ProgressSignal, ProgressionError, QuizSubmission,
        SignalOutcome, SubmissionOutcome, Transition,
    },
    time::Clock,
};
use storage::repository::ProgressRepository;

use crate::catalog::ModuleCatalog;
use crate::error::ProgressionServiceError;
use crate::locks::LockTable;

//
// ─── LESSON ACCESS ─────────────────────────────────────────────────────────────
//

/// An accessible lesson together with the learner's state in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonAccess {
    pub lesson: Lesson,
    pub progress: LessonProgress,
}

//
// ─── SERVICE ───────────────────────────────────────────────────────────────────
//

/// Applies learner actions to stored progress.
///
/// Every mutating call holds the (learner, module) lock across load, the
/// pure update and the write, so concurrent calls for the same pair behave
/// as if run one after another. Nothing is written unless the update
/// succeeded.
pub struct ProgressionService {
    clock: Clock,
    progress: Arc<dyn ProgressRepository>,
    catalog: ModuleCatalog,
    locks: LockTable,
}

impl ProgressionService {
    #[must_use]
    pub fn new(catalog: ModuleCatalog, progress: Arc<dyn ProgressRepository>) -> Self {
        Self {
            clock: Clock::default(),
            progress,
            catalog,
            locks: LockTable::new(),
        }
    }

    /// Override the clock (usually for deterministic testing).
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn catalog(&self) -> &ModuleCatalog {
        &self.catalog
    }

    /// Return the lesson and the learner's state in it.
    ///
    /// # Errors
    ///
    /// Returns `LessonLocked` for a locked lesson, `UnknownModule` for an
    /// unregistered module, or storage errors.
    #[instrument(skip(self))]
    pub async fn access_lesson(
        &self,
        learner_id: LearnerId,
        module_id: ModuleId,
        index: usize,
    ) -> Result<LessonAccess, ProgressionServiceError> {
        let module = self.module(module_id)?;
        let progress = self.progress.get_progress(learner_id, &module).await?;
        let (lesson, state) = progression::access_lesson(&module, &progress, index)?;
        Ok(LessonAccess {
            lesson: lesson.clone(),
            progress: state.clone(),
        })
    }

    /// Record a progress signal for a lesson.
    ///
    /// # Errors
    ///
    /// Returns `LessonLocked` or `SignalMismatch` wrapped in
    /// `ProgressionServiceError::Progression`, `UnknownModule`, or storage
    /// errors. On error nothing is stored.
    #[instrument(skip(self))]
    pub async fn report_progress(
        &self,
        learner_id: LearnerId,
        module_id: ModuleId,
        index: usize,
        signal: ProgressSignal,
    ) -> Result<SignalOutcome, ProgressionServiceError> {
        let module = self.module(module_id)?;
        let _guard = self.locks.acquire(learner_id, module_id).await;

        let mut progress = self.progress.get_progress(learner_id, &module).await?;
        let outcome = match progression::apply_signal(&module, &mut progress, index, signal) {
            Ok(outcome) => outcome,
            Err(err) => {
                if matches!(err, ProgressionError::SignalMismatch { .. }) {
                    warn!(error = %err, "rejected progress signal");
                }
                return Err(err.into());
            }
        };

        self.store(&progress).await?;
        log_transition(index, outcome.transition);
        Ok(outcome)
    }

    /// Whether the learner may take the lesson's quiz now.
    ///
    /// # Errors
    ///
    /// Returns `UnknownModule` for an unregistered module or storage errors.
    pub async fn can_take_quiz(
        &self,
        learner_id: LearnerId,
        module_id: ModuleId,
        index: usize,
    ) -> Result<bool, ProgressionServiceError> {
        let module = self.module(module_id)?;
        let progress = self.progress.get_progress(learner_id, &module).await?;
        Ok(progression::can_take_quiz(&module, &progress, index))
    }

    /// Score and record a quiz submission.
    ///
    /// Resubmitting an attempt id already recorded for the lesson returns the
    /// recorded attempt and writes nothing.
    ///
    /// # Errors
    ///
    /// Returns `LessonLocked`, `NoQuiz`, `RequirementsNotMet` or
    /// `IncompleteSubmission` wrapped in `ProgressionServiceError::Progression`,
    /// `UnknownModule`, or storage errors. On error nothing is stored.
    #[instrument(skip(self, submission), fields(attempt = %submission.attempt_id))]
    pub async fn submit_quiz(
        &self,
        learner_id: LearnerId,
        module_id: ModuleId,
        index: usize,
        submission: QuizSubmission,
    ) -> Result<SubmissionOutcome, ProgressionServiceError> {
        let module = self.module(module_id)?;
        let _guard = self.locks.acquire(learner_id, module_id).await;

        let mut progress = self.progress.get_progress(learner_id, &module).await?;
        let outcome = progression::apply_submission(
            &module,
            &mut progress,
            index,
            &submission,
            self.clock.now(),
        )?;

        if outcome.duplicate {
            debug!("attempt already recorded");
            return Ok(outcome);
        }

        self.store(&progress).await?;
        info!(
            score = outcome.attempt.score_percent,
            passed = outcome.attempt.passed,
            "quiz attempt recorded"
        );
        log_transition(index, outcome.transition);
        Ok(outcome)
    }

    /// Completion figures for the learner's progress through a module.
    ///
    /// # Errors
    ///
    /// Returns `UnknownModule` for an unregistered module or storage errors.
    pub async fn module_summary(
        &self,
        learner_id: LearnerId,
        module_id: ModuleId,
    ) -> Result<ModuleSummary, ProgressionServiceError> {
        let module = self.module(module_id)?;
        let progress = self.progress.get_progress(learner_id, &module).await?;
        Ok(progression::module_summary(&progress))
    }

    /// Status of every lesson in module order.
    ///
    /// # Errors
    ///
    /// Returns `UnknownModule` for an unregistered module or storage errors.
    pub async fn lesson_overview(
        &self,
        learner_id: LearnerId,
        module_id: ModuleId,
    ) -> Result<Vec<LessonOverview>, ProgressionServiceError> {
        let module = self.module(module_id)?;
        let progress = self.progress.get_progress(learner_id, &module).await?;
        Ok(progression::lesson_overview(&module, &progress)?)
    }

    /// Attempt history of a lesson, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `LessonOutOfRange` for a bad index, `UnknownModule` for an
    /// unregistered module, or storage errors.
    pub async fn quiz_attempts(
        &self,
        learner_id: LearnerId,
        module_id: ModuleId,
        index: usize,
    ) -> Result<Vec<QuizAttempt>, ProgressionServiceError> {
        let module = self.module(module_id)?;
        let progress = self.progress.get_progress(learner_id, &module).await?;
        let state = progress
            .lesson(index)
            .ok_or(ProgressionError::LessonOutOfRange {
                index,
                count: progress.lessons().len(),
            })?;
        Ok(state.quiz_attempts().to_vec())
    }

    fn module(&self, module_id: ModuleId) -> Result<Arc<Module>, ProgressionServiceError> {
        self.catalog
            .get(module_id)
            .ok_or(ProgressionServiceError::UnknownModule(module_id))
    }

    async fn store(&self, progress: &ModuleProgress) -> Result<(), ProgressionServiceError> {
        debug_assert!(progress.check_invariants().is_ok());
        self.progress.put_progress(progress).await?;
        Ok(())
    }
}

fn log_transition(index: usize, transition: Transition) {
    if transition.completed {
        info!(lesson = index, "lesson completed");
    }
    if let Some(next) = transition.unlocked_next {
        info!(lesson = next, "lesson unlocked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lesson_core::model::{
        LessonDraft, LessonId, LessonKind, LessonStatus, ModuleDraft, QuestionDraft, QuestionId,
        QuizDraft,
    };
    use lesson_core::time::fixed_now;
    use storage::repository::InMemoryRepository;

    fn service() -> ProgressionService {
        let module = ModuleDraft {
            id: ModuleId::new(1),
            title: "Unit".into(),
            lessons: vec![
                LessonDraft {
                    id: LessonId::new(1),
                    title: "Read me".into(),
                    kind: LessonKind::Content {
                        requires_read_acknowledgment: true,
                        requires_resource_acknowledgment: false,
                    },
                    quiz: Some(QuizDraft {
                        passing_score_percent: 100,
                        questions: vec![QuestionDraft {
                            id: QuestionId::new(1),
                            prompt: "?".into(),
                            options: vec!["a".into(), "b".into()],
                            correct_option: 1,
                        }],
                    }),
                },
                LessonDraft {
                    id: LessonId::new(2),
                    title: "Then me".into(),
                    kind: LessonKind::Video {
                        watch_threshold_percent: 50,
                    },
                    quiz: None,
                },
            ],
        }
        .validate()
        .unwrap();
        let mut catalog = ModuleCatalog::new();
        catalog.register(module).unwrap();
        ProgressionService::new(catalog, Arc::new(InMemoryRepository::new()))
            .with_clock(Clock::fixed(fixed_now()))
    }

    #[tokio::test]
    async fn unknown_module_is_reported() {
        let svc = service();
        let err = svc
            .module_summary(LearnerId::new(1), ModuleId::new(99))
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressionServiceError::UnknownModule(id) if id == ModuleId::new(99)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn submission_is_stamped_with_service_clock() {
        let svc = service();
        let learner = LearnerId::new(1);
        let module = ModuleId::new(1);
        svc.report_progress(learner, module, 0, ProgressSignal::ContentRead)
            .await
            .unwrap();

        let outcome = svc
            .submit_quiz(
                learner,
                module,
                0,
                QuizSubmission::new([(QuestionId::new(1), 1)].into()),
            )
            .await
            .unwrap();
        assert_eq!(outcome.attempt.submitted_at, fixed_now());
        assert_eq!(outcome.transition.unlocked_next, Some(1));

        let access = svc.access_lesson(learner, module, 1).await.unwrap();
        assert_eq!(access.progress.status(), LessonStatus::Unlocked);
        assert_eq!(access.lesson.id(), LessonId::new(2));
    }

    #[tokio::test]
    async fn quiz_attempts_rejects_bad_index() {
        let svc = service();
        let err = svc
            .quiz_attempts(LearnerId::new(1), ModuleId::new(1), 7)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProgressionServiceError::Progression(ProgressionError::LessonOutOfRange {
                index: 7,
                count: 2
            })
        ));
    }
}
