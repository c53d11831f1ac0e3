use std::collections::HashMap;

use lesson_core::model::{AttemptId, LearnerId, LessonId, Module, ModuleProgress, QuizAttempt};
use sqlx::Row;

use super::{
    SqliteRepository,
    mapping::{
        answers_to_json, id_to_i64, lesson_id_from_i64, map_attempt_row, map_lesson_row,
        revision_from_i64, ser,
    },
};
use crate::repository::{ProgressRepository, StorageError, ensure_append_only};

fn conn(e: sqlx::Error) -> StorageError {
    StorageError::Connection(e.to_string())
}

#[async_trait::async_trait]
impl ProgressRepository for SqliteRepository {
    async fn get_progress(
        &self,
        learner_id: LearnerId,
        module: &Module,
    ) -> Result<ModuleProgress, StorageError> {
        let learner = id_to_i64("learner_id", learner_id.value())?;
        let module_key = id_to_i64("module_id", module.id().value())?;

        // one read transaction, so every row comes from the same snapshot
        let mut tx = self.pool.begin().await.map_err(conn)?;

        let revision = sqlx::query_scalar::<_, i64>(
            r"
            SELECT revision
            FROM module_progress
            WHERE learner_id = ?1 AND module_id = ?2
            ",
        )
        .bind(learner)
        .bind(module_key)
        .fetch_optional(&mut *tx)
        .await
        .map_err(conn)?;

        let Some(revision) = revision else {
            return Ok(ModuleProgress::new(learner_id, module));
        };

        let lesson_rows = sqlx::query(
            r"
            SELECT lesson_id, status, video_watched_percent, content_read, resource_acknowledged
            FROM lesson_progress
            WHERE learner_id = ?1 AND module_id = ?2
            ",
        )
        .bind(learner)
        .bind(module_key)
        .fetch_all(&mut *tx)
        .await
        .map_err(conn)?;

        let attempt_rows = sqlx::query(
            r"
            SELECT id, lesson_id, seq, answers, score_percent, passed, submitted_at
            FROM quiz_attempts
            WHERE learner_id = ?1 AND module_id = ?2
            ORDER BY lesson_id ASC, seq ASC
            ",
        )
        .bind(learner)
        .bind(module_key)
        .fetch_all(&mut *tx)
        .await
        .map_err(conn)?;

        tx.commit().await.map_err(conn)?;

        let mut attempts: HashMap<LessonId, Vec<QuizAttempt>> = HashMap::new();
        for row in attempt_rows {
            let (lesson_id, attempt) = map_attempt_row(&row)?;
            attempts.entry(lesson_id).or_default().push(attempt);
        }

        let mut entries = Vec::with_capacity(lesson_rows.len());
        for row in lesson_rows {
            let lesson_id = lesson_id_from_i64(row.try_get::<i64, _>("lesson_id").map_err(ser)?)?;
            let lesson_attempts = attempts.remove(&lesson_id).unwrap_or_default();
            entries.push(map_lesson_row(&row, lesson_attempts)?);
        }

        ModuleProgress::from_persisted(learner_id, module, revision_from_i64(revision)?, entries)
            .map_err(ser)
    }

    async fn put_progress(&self, progress: &ModuleProgress) -> Result<(), StorageError> {
        let learner = id_to_i64("learner_id", progress.learner_id().value())?;
        let module_key = id_to_i64("module_id", progress.module_id().value())?;
        let expected = id_to_i64("revision", progress.revision())?;

        let mut tx = self.pool.begin().await.map_err(conn)?;

        // Claim the next revision first. The write takes SQLite's write lock,
        // so a writer that loaded the same revision finds zero rows to claim.
        let claim = if expected == 0 {
            sqlx::query(
                r"
                INSERT INTO module_progress (learner_id, module_id, revision)
                VALUES (?1, ?2, 1)
                ON CONFLICT(learner_id, module_id) DO NOTHING
                ",
            )
            .bind(learner)
            .bind(module_key)
            .execute(&mut *tx)
            .await
        } else {
            sqlx::query(
                r"
                UPDATE module_progress
                SET revision = revision + 1
                WHERE learner_id = ?1 AND module_id = ?2 AND revision = ?3
                ",
            )
            .bind(learner)
            .bind(module_key)
            .bind(expected)
            .execute(&mut *tx)
            .await
        };
        if claim.map_err(conn)?.rows_affected() != 1 {
            return Err(StorageError::Conflict);
        }

        let stored_rows = sqlx::query(
            r"
            SELECT id, lesson_id
            FROM quiz_attempts
            WHERE learner_id = ?1 AND module_id = ?2
            ORDER BY lesson_id ASC, seq ASC
            ",
        )
        .bind(learner)
        .bind(module_key)
        .fetch_all(&mut *tx)
        .await
        .map_err(conn)?;

        let mut stored: HashMap<LessonId, Vec<AttemptId>> = HashMap::new();
        for row in stored_rows {
            let lesson_id = lesson_id_from_i64(row.try_get::<i64, _>("lesson_id").map_err(ser)?)?;
            let id: AttemptId = row
                .try_get::<String, _>("id")
                .map_err(ser)?
                .parse()
                .map_err(ser)?;
            stored.entry(lesson_id).or_default().push(id);
        }
        let stored_counts: HashMap<LessonId, usize> =
            stored.iter().map(|(lesson, ids)| (*lesson, ids.len())).collect();
        ensure_append_only(stored, progress)?;

        for lesson in progress.lessons() {
            let lesson_key = id_to_i64("lesson_id", lesson.lesson_id().value())?;

            sqlx::query(
                r"
                INSERT INTO lesson_progress (
                    learner_id, module_id, lesson_id, status,
                    video_watched_percent, content_read, resource_acknowledged
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(learner_id, module_id, lesson_id) DO UPDATE SET
                    status = excluded.status,
                    video_watched_percent = excluded.video_watched_percent,
                    content_read = excluded.content_read,
                    resource_acknowledged = excluded.resource_acknowledged
                ",
            )
            .bind(learner)
            .bind(module_key)
            .bind(lesson_key)
            .bind(lesson.status().as_str())
            .bind(i64::from(lesson.video_watched_percent()))
            .bind(lesson.content_read())
            .bind(lesson.resource_acknowledged())
            .execute(&mut *tx)
            .await
            .map_err(conn)?;

            // stored attempts are a verified prefix; only the tail is new
            let already = stored_counts.get(&lesson.lesson_id()).copied().unwrap_or(0);
            for (seq, attempt) in lesson.quiz_attempts().iter().enumerate().skip(already) {
                sqlx::query(
                    r"
                    INSERT INTO quiz_attempts (
                        id, learner_id, module_id, lesson_id, seq,
                        answers, score_percent, passed, submitted_at
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                    ",
                )
                .bind(attempt.id.to_string())
                .bind(learner)
                .bind(module_key)
                .bind(lesson_key)
                .bind(i64::try_from(seq).map_err(ser)?)
                .bind(answers_to_json(&attempt.answers)?)
                .bind(i64::from(attempt.score_percent))
                .bind(attempt.passed)
                .bind(attempt.submitted_at)
                .execute(&mut *tx)
                .await
                .map_err(conn)?;
            }
        }

        tx.commit().await.map_err(conn)?;
        Ok(())
    }
}
