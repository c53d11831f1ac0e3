use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{LessonId, ModuleId, QuestionId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

/// Malformed authored curriculum. Raised once, when a module is loaded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CurriculumError {
    #[error("module has no lessons")]
    EmptyModule,

    #[error("lesson id {0} appears more than once")]
    DuplicateLessonId(LessonId),

    #[error("quiz of lesson {lesson} has no questions")]
    EmptyQuiz { lesson: LessonId },

    #[error("question id {question} appears more than once in the quiz of lesson {lesson}")]
    DuplicateQuestionId {
        lesson: LessonId,
        question: QuestionId,
    },

    #[error("question {question} needs at least 2 options, has {count}")]
    TooFewOptions { question: QuestionId, count: usize },

    #[error("question {question} marks option {index} correct but has only {options} options")]
    CorrectOptionOutOfRange {
        question: QuestionId,
        index: usize,
        options: usize,
    },

    #[error("lesson {lesson} watch threshold must be 0..=100, got {value}")]
    WatchThresholdOutOfRange { lesson: LessonId, value: u8 },

    #[error("lesson {lesson} passing score must be 0..=100, got {value}")]
    PassingScoreOutOfRange { lesson: LessonId, value: u8 },

    #[error("module definition is not valid JSON: {0}")]
    Parse(String),
}

//
// ─── LESSON KIND ───────────────────────────────────────────────────────────────
//

/// What a learner has to do before a lesson counts as worked through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LessonKind {
    Video {
        watch_threshold_percent: u8,
    },
    Content {
        #[serde(default = "default_true")]
        requires_read_acknowledgment: bool,
        /// True iff the lesson ships a downloadable resource.
        #[serde(default)]
        requires_resource_acknowledgment: bool,
    },
}

fn default_true() -> bool {
    true
}

impl LessonKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            LessonKind::Video { .. } => "video",
            LessonKind::Content { .. } => "content",
        }
    }
}

//
// ─── DRAFTS ────────────────────────────────────────────────────────────────────
//

/// Authored module as it arrives from the content store, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDraft {
    pub id: ModuleId,
    #[serde(default)]
    pub title: String,
    pub lessons: Vec<LessonDraft>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonDraft {
    pub id: LessonId,
    #[serde(default)]
    pub title: String,
    #[serde(flatten)]
    pub kind: LessonKind,
    #[serde(default)]
    pub quiz: Option<QuizDraft>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizDraft {
    pub passing_score_percent: u8,
    pub questions: Vec<QuestionDraft>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionDraft {
    pub id: QuestionId,
    pub prompt: String,
    pub options: Vec<String>,
    pub correct_option: usize,
}

impl ModuleDraft {
    /// Validate the authored module and freeze it.
    ///
    /// # Errors
    ///
    /// Returns `CurriculumError` for an empty lesson list, repeated lesson or
    /// question ids, empty quizzes, questions with fewer than two options,
    /// correct-option indexes out of bounds, or percentages above 100.
    pub fn validate(self) -> Result<Module, CurriculumError> {
        if self.lessons.is_empty() {
            return Err(CurriculumError::EmptyModule);
        }

        let mut seen = HashSet::with_capacity(self.lessons.len());
        let mut lessons = Vec::with_capacity(self.lessons.len());
        for draft in self.lessons {
            if !seen.insert(draft.id) {
                return Err(CurriculumError::DuplicateLessonId(draft.id));
            }
            lessons.push(draft.validate()?);
        }

        Ok(Module {
            id: self.id,
            title: self.title,
            lessons,
        })
    }
}

impl LessonDraft {
    fn validate(self) -> Result<Lesson, CurriculumError> {
        match self.kind {
            LessonKind::Video {
                watch_threshold_percent,
            } if watch_threshold_percent > 100 => {
                return Err(CurriculumError::WatchThresholdOutOfRange {
                    lesson: self.id,
                    value: watch_threshold_percent,
                });
            }
            _ => {}
        }

        let quiz = self.quiz.map(|q| q.validate(self.id)).transpose()?;

        Ok(Lesson {
            id: self.id,
            title: self.title,
            kind: self.kind,
            quiz,
        })
    }
}

impl QuizDraft {
    fn validate(self, lesson: LessonId) -> Result<Quiz, CurriculumError> {
        if self.passing_score_percent > 100 {
            return Err(CurriculumError::PassingScoreOutOfRange {
                lesson,
                value: self.passing_score_percent,
            });
        }
        if self.questions.is_empty() {
            return Err(CurriculumError::EmptyQuiz { lesson });
        }

        let mut seen = HashSet::with_capacity(self.questions.len());
        let mut questions = Vec::with_capacity(self.questions.len());
        for q in self.questions {
            if !seen.insert(q.id) {
                return Err(CurriculumError::DuplicateQuestionId {
                    lesson,
                    question: q.id,
                });
            }
            if q.options.len() < 2 {
                return Err(CurriculumError::TooFewOptions {
                    question: q.id,
                    count: q.options.len(),
                });
            }
            if q.correct_option >= q.options.len() {
                return Err(CurriculumError::CorrectOptionOutOfRange {
                    question: q.id,
                    index: q.correct_option,
                    options: q.options.len(),
                });
            }
            questions.push(Question {
                id: q.id,
                prompt: q.prompt,
                options: q.options,
                correct_option: q.correct_option,
            });
        }

        Ok(Quiz {
            passing_score_percent: self.passing_score_percent,
            questions,
        })
    }
}

//
// ─── VALIDATED CURRICULUM ──────────────────────────────────────────────────────
//

/// A validated, immutable module: an ordered, non-empty list of lessons.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Module {
    id: ModuleId,
    title: String,
    lessons: Vec<Lesson>,
}

impl Module {
    /// Parse a JSON module definition and validate it.
    ///
    /// # Errors
    ///
    /// Returns `CurriculumError::Parse` for malformed JSON and any validation
    /// error from [`ModuleDraft::validate`].
    pub fn from_json(raw: &str) -> Result<Self, CurriculumError> {
        let draft: ModuleDraft =
            serde_json::from_str(raw).map_err(|e| CurriculumError::Parse(e.to_string()))?;
        draft.validate()
    }

    #[must_use]
    pub fn id(&self) -> ModuleId {
        self.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn lessons(&self) -> &[Lesson] {
        &self.lessons
    }

    #[must_use]
    pub fn lesson_at(&self, index: usize) -> Option<&Lesson> {
        self.lessons.get(index)
    }

    /// Never zero for a validated module.
    #[must_use]
    pub fn lesson_count(&self) -> usize {
        self.lessons.len()
    }

    #[must_use]
    pub fn index_of(&self, lesson: LessonId) -> Option<usize> {
        self.lessons.iter().position(|l| l.id == lesson)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lesson {
    id: LessonId,
    title: String,
    #[serde(flatten)]
    kind: LessonKind,
    quiz: Option<Quiz>,
}

impl Lesson {
    #[must_use]
    pub fn id(&self) -> LessonId {
        self.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn kind(&self) -> LessonKind {
        self.kind
    }

    #[must_use]
    pub fn quiz(&self) -> Option<&Quiz> {
        self.quiz.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Quiz {
    passing_score_percent: u8,
    questions: Vec<Question>,
}

impl Quiz {
    #[must_use]
    pub fn passing_score_percent(&self) -> u8 {
        self.passing_score_percent
    }

    /// Questions in display order.
    #[must_use]
    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    #[must_use]
    pub fn question_count(&self) -> usize {
        self.questions.len()
    }
}

/// A single-choice question. The answer key is not serialized so lesson
/// snapshots can be handed to a player as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Question {
    id: QuestionId,
    prompt: String,
    options: Vec<String>,
    #[serde(skip)]
    correct_option: usize,
}

impl Question {
    #[must_use]
    pub fn id(&self) -> QuestionId {
        self.id
    }

    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    #[must_use]
    pub fn options(&self) -> &[String] {
        &self.options
    }

    #[must_use]
    pub fn correct_option(&self) -> usize {
        self.correct_option
    }

    #[must_use]
    pub fn is_correct(&self, selected: usize) -> bool {
        selected == self.correct_option
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;

    fn question(id: u64, correct: usize) -> QuestionDraft {
        QuestionDraft {
            id: QuestionId::new(id),
            prompt: format!("Q{id}"),
            options: vec!["a".into(), "b".into(), "c".into()],
            correct_option: correct,
        }
    }

    fn video_lesson(id: u64, quiz: Option<QuizDraft>) -> LessonDraft {
        LessonDraft {
            id: LessonId::new(id),
            title: format!("Lesson {id}"),
            kind: LessonKind::Video {
                watch_threshold_percent: 80,
            },
            quiz,
        }
    }

    fn module(lessons: Vec<LessonDraft>) -> ModuleDraft {
        ModuleDraft {
            id: ModuleId::new(1),
            title: "Intro".into(),
            lessons,
        }
    }

    #[test]
    fn empty_module_is_rejected() {
        let err = module(vec![]).validate().unwrap_err();
        assert_eq!(err, CurriculumError::EmptyModule);
    }

    #[test]
    fn quiz_without_questions_is_rejected() {
        let quiz = QuizDraft {
            passing_score_percent: 70,
            questions: vec![],
        };
        let err = module(vec![video_lesson(1, Some(quiz))])
            .validate()
            .unwrap_err();
        assert!(matches!(err, CurriculumError::EmptyQuiz { .. }));
    }

    #[test]
    fn correct_option_must_be_in_bounds() {
        let quiz = QuizDraft {
            passing_score_percent: 70,
            questions: vec![question(1, 3)],
        };
        let err = module(vec![video_lesson(1, Some(quiz))])
            .validate()
            .unwrap_err();
        assert_eq!(
            err,
            CurriculumError::CorrectOptionOutOfRange {
                question: QuestionId::new(1),
                index: 3,
                options: 3,
            }
        );
    }

    #[test]
    fn single_option_question_is_rejected() {
        let mut q = question(1, 0);
        q.options.truncate(1);
        let quiz = QuizDraft {
            passing_score_percent: 70,
            questions: vec![q],
        };
        let err = module(vec![video_lesson(1, Some(quiz))])
            .validate()
            .unwrap_err();
        assert!(matches!(err, CurriculumError::TooFewOptions { count: 1, .. }));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = module(vec![video_lesson(1, None), video_lesson(1, None)])
            .validate()
            .unwrap_err();
        assert_eq!(err, CurriculumError::DuplicateLessonId(LessonId::new(1)));

        let quiz = QuizDraft {
            passing_score_percent: 70,
            questions: vec![question(4, 0), question(4, 1)],
        };
        let err = module(vec![video_lesson(1, Some(quiz))])
            .validate()
            .unwrap_err();
        assert!(matches!(err, CurriculumError::DuplicateQuestionId { .. }));
    }

    #[test]
    fn percentages_above_hundred_are_rejected() {
        let mut lesson = video_lesson(1, None);
        lesson.kind = LessonKind::Video {
            watch_threshold_percent: 101,
        };
        let err = module(vec![lesson]).validate().unwrap_err();
        assert!(matches!(err, CurriculumError::WatchThresholdOutOfRange { .. }));

        let quiz = QuizDraft {
            passing_score_percent: 150,
            questions: vec![question(1, 0)],
        };
        let err = module(vec![video_lesson(1, Some(quiz))])
            .validate()
            .unwrap_err();
        assert!(matches!(err, CurriculumError::PassingScoreOutOfRange { .. }));
    }

    #[test]
    fn valid_module_exposes_lessons_in_order() {
        let quiz = QuizDraft {
            passing_score_percent: 70,
            questions: vec![question(1, 0), question(2, 1)],
        };
        let m = module(vec![video_lesson(10, Some(quiz)), video_lesson(20, None)])
            .validate()
            .unwrap();

        assert_eq!(m.lesson_count(), 2);
        assert_eq!(m.lesson_at(0).unwrap().id(), LessonId::new(10));
        assert_eq!(m.lesson_at(1).unwrap().id(), LessonId::new(20));
        assert!(m.lesson_at(2).is_none());
        assert_eq!(m.index_of(LessonId::new(20)), Some(1));
        assert_eq!(m.lesson_at(0).unwrap().quiz().unwrap().question_count(), 2);
        assert!(m.lesson_at(1).unwrap().quiz().is_none());
    }

    #[test]
    fn module_loads_from_json() {
        let raw = r#"{
            "id": 3,
            "title": "Fractions",
            "lessons": [
                { "id": 1, "kind": "video", "watch_threshold_percent": 80 },
                {
                    "id": 2,
                    "kind": "content",
                    "requires_resource_acknowledgment": true,
                    "quiz": {
                        "passing_score_percent": 70,
                        "questions": [
                            { "id": 1, "prompt": "1/2 + 1/2?", "options": ["1", "2"], "correct_option": 0 }
                        ]
                    }
                }
            ]
        }"#;

        let m = Module::from_json(raw).unwrap();
        assert_eq!(m.id(), ModuleId::new(3));
        assert_eq!(
            m.lesson_at(1).unwrap().kind(),
            LessonKind::Content {
                requires_read_acknowledgment: true,
                requires_resource_acknowledgment: true,
            }
        );
    }

    #[test]
    fn malformed_json_is_a_curriculum_error() {
        let err = Module::from_json("{ not json").unwrap_err();
        assert!(matches!(err, CurriculumError::Parse(_)));
    }

    #[test]
    fn serialized_questions_hide_the_answer_key() {
        let quiz = QuizDraft {
            passing_score_percent: 70,
            questions: vec![question(1, 2)],
        };
        let m = module(vec![video_lesson(1, Some(quiz))]).validate().unwrap();
        let json = serde_json::to_string(m.lesson_at(0).unwrap()).unwrap();
        assert!(!json.contains("correct_option"));
        assert!(json.contains("\"kind\":\"video\""));
    }
}
