//! Progression rules: lesson access, completion requirements, quiz gating,
//! scoring and the unlock cascade.
//!
//! Everything here is a pure function of a [`Module`] and a learner's
//! [`ModuleProgress`]. Mutating operations validate their whole input before
//! touching state, so a returned error always means nothing changed.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{
    AttemptId, Lesson, LessonId, LessonKind, LessonProgress, LessonStatus, Module, ModuleId,
    ModuleProgress, QuestionId, Quiz, QuizAttempt,
};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProgressionError {
    #[error("lesson index {index} is out of range for a module of {count} lessons")]
    LessonOutOfRange { index: usize, count: usize },

    #[error("lesson {index} is locked")]
    LessonLocked { index: usize },

    #[error("signal `{signal}` does not apply to {kind} lesson {index}")]
    SignalMismatch {
        index: usize,
        kind: &'static str,
        signal: &'static str,
    },

    #[error("lesson {index} has no quiz")]
    NoQuiz { index: usize },

    #[error("lesson {index} requirements are not met yet")]
    RequirementsNotMet { index: usize },

    #[error(
        "quiz submission must answer every question exactly once (missing: {missing:?}, unexpected: {unexpected:?})"
    )]
    IncompleteSubmission {
        missing: Vec<QuestionId>,
        unexpected: Vec<QuestionId>,
    },

    #[error("progress belongs to module {actual}, not {expected}")]
    ModuleMismatch {
        expected: ModuleId,
        actual: ModuleId,
    },
}

//
// ─── INPUTS ────────────────────────────────────────────────────────────────────
//

/// A learner action reported by the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", content = "percent", rename_all = "snake_case")]
pub enum ProgressSignal {
    VideoWatched(u8),
    ContentRead,
    ResourceAcknowledged,
}

impl ProgressSignal {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressSignal::VideoWatched(_) => "video_watched",
            ProgressSignal::ContentRead => "content_read",
            ProgressSignal::ResourceAcknowledged => "resource_acknowledged",
        }
    }
}

/// Answers for one quiz attempt, keyed by question id.
///
/// The attempt id is generated fresh by [`QuizSubmission::new`]. A caller that
/// may retry a submission should pin the id with
/// [`QuizSubmission::with_attempt_id`]; a retry carrying an id that is already
/// recorded returns the recorded attempt instead of appending a second one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizSubmission {
    pub attempt_id: AttemptId,
    pub answers: BTreeMap<QuestionId, usize>,
}

impl QuizSubmission {
    #[must_use]
    pub fn new(answers: BTreeMap<QuestionId, usize>) -> Self {
        Self {
            attempt_id: AttemptId::new_v4(),
            answers,
        }
    }

    #[must_use]
    pub fn with_attempt_id(mut self, attempt_id: AttemptId) -> Self {
        self.attempt_id = attempt_id;
        self
    }
}

//
// ─── OUTPUTS ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuizScore {
    pub correct: usize,
    pub total: usize,
    pub score_percent: u8,
    pub passed: bool,
}

/// State changes caused by one operation, beyond the flags it set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Transition {
    /// The lesson moved to `Completed` during this operation.
    pub completed: bool,
    /// Index of the lesson this operation unlocked, if any.
    pub unlocked_next: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignalOutcome {
    pub lesson: LessonProgress,
    pub transition: Transition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionOutcome {
    pub attempt: QuizAttempt,
    pub lesson: LessonProgress,
    pub transition: Transition,
    /// The attempt id was already recorded; nothing was appended.
    pub duplicate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ModuleSummary {
    pub module_id: ModuleId,
    pub completed_lessons: usize,
    pub total_lessons: usize,
    pub completion_ratio: f64,
    pub is_finished: bool,
    /// First lesson that is not completed yet.
    pub current_lesson: Option<usize>,
}

/// One row of the lesson list a player renders (lock icons, quiz badges).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LessonOverview {
    pub index: usize,
    pub lesson_id: LessonId,
    pub title: String,
    pub kind: &'static str,
    pub status: LessonStatus,
    pub has_quiz: bool,
    pub can_take_quiz: bool,
    pub best_score: Option<u8>,
}

//
// ─── READ-ONLY RULES ───────────────────────────────────────────────────────────
//

fn ensure_same_module(module: &Module, progress: &ModuleProgress) -> Result<(), ProgressionError> {
    if module.id() == progress.module_id() {
        Ok(())
    } else {
        Err(ProgressionError::ModuleMismatch {
            expected: module.id(),
            actual: progress.module_id(),
        })
    }
}

fn locate<'m, 'p>(
    module: &'m Module,
    progress: &'p ModuleProgress,
    index: usize,
) -> Result<(&'m Lesson, &'p LessonProgress), ProgressionError> {
    ensure_same_module(module, progress)?;
    let out_of_range = ProgressionError::LessonOutOfRange {
        index,
        count: module.lesson_count(),
    };
    let lesson = module.lesson_at(index).ok_or_else(|| out_of_range.clone())?;
    let state = progress.lesson(index).ok_or(out_of_range)?;
    Ok((lesson, state))
}

/// Whether the lesson's type-specific requirements are satisfied.
///
/// Video lessons need the watch threshold; content lessons need the read
/// acknowledgment (when required) and the resource acknowledgment (when the
/// lesson has a resource).
#[must_use]
pub fn requirements_met(lesson: &Lesson, state: &LessonProgress) -> bool {
    match lesson.kind() {
        LessonKind::Video {
            watch_threshold_percent,
        } => state.video_watched_percent() >= watch_threshold_percent,
        LessonKind::Content {
            requires_read_acknowledgment,
            requires_resource_acknowledgment,
        } => {
            (!requires_read_acknowledgment || state.content_read())
                && (!requires_resource_acknowledgment || state.resource_acknowledged())
        }
    }
}

/// Return the lesson and the learner's state in it if it is not locked.
///
/// # Errors
///
/// Returns `LessonLocked` for a locked lesson and `LessonOutOfRange` for a
/// bad index.
pub fn access_lesson<'m, 'p>(
    module: &'m Module,
    progress: &'p ModuleProgress,
    index: usize,
) -> Result<(&'m Lesson, &'p LessonProgress), ProgressionError> {
    let (lesson, state) = locate(module, progress, index)?;
    if !state.status().is_accessible() {
        return Err(ProgressionError::LessonLocked { index });
    }
    Ok((lesson, state))
}

/// True iff the lesson is accessible, has a quiz, and its requirements are met.
#[must_use]
pub fn can_take_quiz(module: &Module, progress: &ModuleProgress, index: usize) -> bool {
    match access_lesson(module, progress, index) {
        Ok((lesson, state)) => lesson.quiz().is_some() && requirements_met(lesson, state),
        Err(_) => false,
    }
}

/// Integer percentage `100 * correct / total`, rounded half up.
#[must_use]
pub fn score_percent(correct: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let correct = correct.min(total);
    let rounded = (200 * correct + total) / (2 * total);
    u8::try_from(rounded).unwrap_or(100)
}

/// Score a full set of answers against a quiz.
///
/// An option index outside the question's options counts as incorrect.
///
/// # Errors
///
/// Returns `IncompleteSubmission` unless the answers cover every question id
/// of the quiz and nothing else.
pub fn score_quiz(
    quiz: &Quiz,
    answers: &BTreeMap<QuestionId, usize>,
) -> Result<QuizScore, ProgressionError> {
    let missing: Vec<QuestionId> = quiz
        .questions()
        .iter()
        .map(|q| q.id())
        .filter(|id| !answers.contains_key(id))
        .collect();
    let unexpected: Vec<QuestionId> = answers
        .keys()
        .copied()
        .filter(|id| !quiz.questions().iter().any(|q| q.id() == *id))
        .collect();
    if !missing.is_empty() || !unexpected.is_empty() {
        return Err(ProgressionError::IncompleteSubmission {
            missing,
            unexpected,
        });
    }

    let correct = quiz
        .questions()
        .iter()
        .filter(|q| answers.get(&q.id()).is_some_and(|&choice| q.is_correct(choice)))
        .count();
    let total = quiz.question_count();
    let score_percent = score_percent(correct, total);

    Ok(QuizScore {
        correct,
        total,
        score_percent,
        passed: score_percent >= quiz.passing_score_percent(),
    })
}

#[must_use]
pub fn module_summary(progress: &ModuleProgress) -> ModuleSummary {
    ModuleSummary {
        module_id: progress.module_id(),
        completed_lessons: progress.completed_count(),
        total_lessons: progress.lessons().len(),
        completion_ratio: progress.completion_ratio(),
        is_finished: progress.is_finished(),
        current_lesson: progress.current_index(),
    }
}

/// Status rows for every lesson, in module order.
///
/// # Errors
///
/// Returns `ModuleMismatch` if the progress belongs to another module.
pub fn lesson_overview(
    module: &Module,
    progress: &ModuleProgress,
) -> Result<Vec<LessonOverview>, ProgressionError> {
    ensure_same_module(module, progress)?;
    Ok(module
        .lessons()
        .iter()
        .zip(progress.lessons())
        .enumerate()
        .map(|(index, (lesson, state))| LessonOverview {
            index,
            lesson_id: lesson.id(),
            title: lesson.title().to_owned(),
            kind: lesson.kind().as_str(),
            status: state.status(),
            has_quiz: lesson.quiz().is_some(),
            can_take_quiz: can_take_quiz(module, progress, index),
            best_score: state.best_score(),
        })
        .collect())
}

//
// ─── TRANSITIONS ───────────────────────────────────────────────────────────────
//

/// Complete lesson `index` and unlock its successor.
///
/// A lesson that is already completed is left as is and nothing is unlocked:
/// the cascade fires once.
fn complete_lesson(progress: &mut ModuleProgress, index: usize) -> Transition {
    let completed = progress.lesson_mut(index).is_some_and(LessonProgress::complete);
    if !completed {
        return Transition::default();
    }
    let unlocked_next = progress
        .lesson_mut(index + 1)
        .is_some_and(LessonProgress::unlock)
        .then_some(index + 1);
    Transition {
        completed,
        unlocked_next,
    }
}

fn lesson_state(
    progress: &ModuleProgress,
    index: usize,
) -> Result<LessonProgress, ProgressionError> {
    progress
        .lesson(index)
        .cloned()
        .ok_or(ProgressionError::LessonOutOfRange {
            index,
            count: progress.lessons().len(),
        })
}

/// Record a progress signal for lesson `index`.
///
/// Percentages only ever grow and flags only ever turn on. A lesson without
/// a quiz completes as soon as its requirements are met, which also unlocks
/// the next lesson.
///
/// # Errors
///
/// Returns `LessonLocked` for a locked lesson and `SignalMismatch` when the
/// signal does not fit the lesson kind (including a resource acknowledgment
/// on a lesson without a resource).
pub fn apply_signal(
    module: &Module,
    progress: &mut ModuleProgress,
    index: usize,
    signal: ProgressSignal,
) -> Result<SignalOutcome, ProgressionError> {
    let (lesson, _) = access_lesson(module, progress, index)?;

    let fits = matches!(
        (lesson.kind(), signal),
        (LessonKind::Video { .. }, ProgressSignal::VideoWatched(_))
            | (LessonKind::Content { .. }, ProgressSignal::ContentRead)
            | (
                LessonKind::Content {
                    requires_resource_acknowledgment: true,
                    ..
                },
                ProgressSignal::ResourceAcknowledged
            )
    );
    if !fits {
        return Err(ProgressionError::SignalMismatch {
            index,
            kind: lesson.kind().as_str(),
            signal: signal.as_str(),
        });
    }

    let completes_without_quiz = match progress.lesson_mut(index) {
        Some(state) => {
            match signal {
                ProgressSignal::VideoWatched(percent) => state.record_video_watched(percent),
                ProgressSignal::ContentRead => state.mark_content_read(),
                ProgressSignal::ResourceAcknowledged => state.acknowledge_resource(),
            }
            lesson.quiz().is_none()
                && state.status() == LessonStatus::Unlocked
                && requirements_met(lesson, state)
        }
        None => false,
    };
    let transition = if completes_without_quiz {
        complete_lesson(progress, index)
    } else {
        Transition::default()
    };

    Ok(SignalOutcome {
        lesson: lesson_state(progress, index)?,
        transition,
    })
}

/// Score and record a quiz submission for lesson `index`.
///
/// A passing attempt completes the lesson (unlocking the next one) unless it
/// was completed already. A failing attempt never changes the status, so a
/// completed lesson stays completed.
///
/// # Errors
///
/// Returns `LessonLocked`, `NoQuiz`, `RequirementsNotMet` or
/// `IncompleteSubmission`; in every case no attempt is recorded.
pub fn apply_submission(
    module: &Module,
    progress: &mut ModuleProgress,
    index: usize,
    submission: &QuizSubmission,
    submitted_at: DateTime<Utc>,
) -> Result<SubmissionOutcome, ProgressionError> {
    let (lesson, state) = access_lesson(module, progress, index)?;

    if let Some(recorded) = state.attempt(submission.attempt_id) {
        return Ok(SubmissionOutcome {
            attempt: recorded.clone(),
            lesson: state.clone(),
            transition: Transition::default(),
            duplicate: true,
        });
    }

    let quiz = lesson.quiz().ok_or(ProgressionError::NoQuiz { index })?;
    if !requirements_met(lesson, state) {
        return Err(ProgressionError::RequirementsNotMet { index });
    }
    let score = score_quiz(quiz, &submission.answers)?;

    let attempt = QuizAttempt {
        id: submission.attempt_id,
        answers: submission.answers.clone(),
        score_percent: score.score_percent,
        passed: score.passed,
        submitted_at,
    };

    if let Some(state) = progress.lesson_mut(index) {
        state.push_attempt(attempt.clone());
    }
    let transition = if score.passed {
        complete_lesson(progress, index)
    } else {
        Transition::default()
    };

    Ok(SubmissionOutcome {
        attempt,
        lesson: lesson_state(progress, index)?,
        transition,
        duplicate: false,
    })
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
