mod curriculum;
mod ids;
mod progress;

pub use ids::{AttemptId, LearnerId, LessonId, ModuleId, ParseIdError, QuestionId};

pub use curriculum::{
    CurriculumError, Lesson, LessonDraft, LessonKind, Module, ModuleDraft, Question,
    QuestionDraft, Quiz, QuizDraft,
};
pub use progress::{
    LessonProgress, LessonStatus, ModuleProgress, ProgressError, QuizAttempt,
};
