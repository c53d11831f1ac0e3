#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use lesson_core::model::{
    LessonDraft, LessonId, LessonKind, Module, ModuleDraft, ModuleId, QuestionDraft, QuestionId,
    QuizDraft,
};
use lesson_core::time::fixed_now;
use services::{Clock, ModuleCatalog, ProgressionService};
use storage::repository::{InMemoryRepository, ProgressRepository};

pub const MODULE_ID: ModuleId = ModuleId::new(1);

fn quiz(questions: u64) -> QuizDraft {
    QuizDraft {
        passing_score_percent: 70,
        questions: (1..=questions)
            .map(|id| QuestionDraft {
                id: QuestionId::new(id),
                prompt: format!("Question {id}"),
                options: vec!["right".into(), "wrong".into(), "also wrong".into()],
                correct_option: 0,
            })
            .collect(),
    }
}

/// L0 video (threshold 80, 3 questions), L1 content (3 questions), L2 video
/// without a quiz. Every quiz passes at 70.
pub fn module() -> Module {
    ModuleDraft {
        id: MODULE_ID,
        title: "Getting started".into(),
        lessons: vec![
            LessonDraft {
                id: LessonId::new(10),
                title: "Welcome video".into(),
                kind: LessonKind::Video {
                    watch_threshold_percent: 80,
                },
                quiz: Some(quiz(3)),
            },
            LessonDraft {
                id: LessonId::new(20),
                title: "Reading".into(),
                kind: LessonKind::Content {
                    requires_read_acknowledgment: true,
                    requires_resource_acknowledgment: false,
                },
                quiz: Some(quiz(3)),
            },
            LessonDraft {
                id: LessonId::new(30),
                title: "Wrap-up".into(),
                kind: LessonKind::Video {
                    watch_threshold_percent: 90,
                },
                quiz: None,
            },
        ],
    }
    .validate()
    .unwrap()
}

/// Answers for a three-question quiz with the first `correct` answered right.
pub fn answers(correct: u64) -> BTreeMap<QuestionId, usize> {
    (1..=3)
        .map(|id| (QuestionId::new(id), usize::from(id > correct)))
        .collect()
}

pub fn service_with(repo: Arc<dyn ProgressRepository>) -> ProgressionService {
    let mut catalog = ModuleCatalog::new();
    catalog.register(module()).unwrap();
    ProgressionService::new(catalog, repo).with_clock(Clock::fixed(fixed_now()))
}

pub fn service() -> (ProgressionService, InMemoryRepository) {
    let repo = InMemoryRepository::new();
    (service_with(Arc::new(repo.clone())), repo)
}
