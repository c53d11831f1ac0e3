use std::collections::BTreeMap;

use lesson_core::model::{
    AttemptId, LessonId, LessonProgress, LessonStatus, QuestionId, QuizAttempt,
};
use sqlx::Row;

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn id_to_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

fn percent_from_i64(field: &'static str, v: i64) -> Result<u8, StorageError> {
    u8::try_from(v)
        .ok()
        .filter(|p| *p <= 100)
        .ok_or_else(|| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(crate) fn revision_from_i64(v: i64) -> Result<u64, StorageError> {
    i64_to_u64("revision", v)
}

pub(crate) fn lesson_id_from_i64(v: i64) -> Result<LessonId, StorageError> {
    Ok(LessonId::new(i64_to_u64("lesson_id", v)?))
}

pub(crate) fn answers_to_json(answers: &BTreeMap<QuestionId, usize>) -> Result<String, StorageError> {
    serde_json::to_string(answers).map_err(ser)
}

/// Maps a `quiz_attempts` row. Returns the owning lesson alongside the attempt.
pub(crate) fn map_attempt_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<(LessonId, QuizAttempt), StorageError> {
    let lesson_id = lesson_id_from_i64(row.try_get::<i64, _>("lesson_id").map_err(ser)?)?;
    let id: AttemptId = row
        .try_get::<String, _>("id")
        .map_err(ser)?
        .parse()
        .map_err(ser)?;
    let answers: BTreeMap<QuestionId, usize> =
        serde_json::from_str(&row.try_get::<String, _>("answers").map_err(ser)?).map_err(ser)?;

    Ok((
        lesson_id,
        QuizAttempt {
            id,
            answers,
            score_percent: percent_from_i64(
                "score_percent",
                row.try_get::<i64, _>("score_percent").map_err(ser)?,
            )?,
            passed: row.try_get("passed").map_err(ser)?,
            submitted_at: row.try_get("submitted_at").map_err(ser)?,
        },
    ))
}

/// Maps a `lesson_progress` row, attaching the lesson's attempts in order.
pub(crate) fn map_lesson_row(
    row: &sqlx::sqlite::SqliteRow,
    attempts: Vec<QuizAttempt>,
) -> Result<LessonProgress, StorageError> {
    let status_str: String = row.try_get("status").map_err(ser)?;

    LessonProgress::from_persisted(
        lesson_id_from_i64(row.try_get::<i64, _>("lesson_id").map_err(ser)?)?,
        LessonStatus::parse(&status_str).map_err(ser)?,
        percent_from_i64(
            "video_watched_percent",
            row.try_get::<i64, _>("video_watched_percent").map_err(ser)?,
        )?,
        row.try_get("content_read").map_err(ser)?,
        row.try_get("resource_acknowledged").map_err(ser)?,
        attempts,
    )
    .map_err(ser)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers_json_uses_question_ids_as_keys() {
        let answers: BTreeMap<QuestionId, usize> =
            [(QuestionId::new(1), 2), (QuestionId::new(3), 0)].into();
        let json = answers_to_json(&answers).unwrap();
        assert_eq!(json, r#"{"1":2,"3":0}"#);
        let back: BTreeMap<QuestionId, usize> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, answers);
    }

    #[test]
    fn percent_outside_range_is_rejected() {
        assert_eq!(percent_from_i64("p", 100).unwrap(), 100);
        assert!(percent_from_i64("p", 101).is_err());
        assert!(percent_from_i64("p", -1).is_err());
    }
}
