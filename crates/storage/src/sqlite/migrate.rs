use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

/// Applies pending schema versions in order.
///
/// Version 1 creates the per-module revision row, per-lesson learner
/// progress and the append-only quiz attempt log.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    if !is_applied(pool, 1).await? {
        tracing::debug!(version = 1, "applying schema migration");
        let mut tx = pool.begin().await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS module_progress (
                    learner_id INTEGER NOT NULL,
                    module_id INTEGER NOT NULL,
                    revision INTEGER NOT NULL CHECK (revision >= 1),
                    PRIMARY KEY (learner_id, module_id)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS lesson_progress (
                    learner_id INTEGER NOT NULL,
                    module_id INTEGER NOT NULL,
                    lesson_id INTEGER NOT NULL,
                    status TEXT NOT NULL CHECK (status IN ('locked', 'unlocked', 'completed')),
                    video_watched_percent INTEGER NOT NULL
                        CHECK (video_watched_percent BETWEEN 0 AND 100),
                    content_read INTEGER NOT NULL CHECK (content_read IN (0, 1)),
                    resource_acknowledged INTEGER NOT NULL CHECK (resource_acknowledged IN (0, 1)),
                    PRIMARY KEY (learner_id, module_id, lesson_id),
                    FOREIGN KEY (learner_id, module_id)
                        REFERENCES module_progress(learner_id, module_id)
                        ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS quiz_attempts (
                    id TEXT NOT NULL,
                    learner_id INTEGER NOT NULL,
                    module_id INTEGER NOT NULL,
                    lesson_id INTEGER NOT NULL,
                    seq INTEGER NOT NULL CHECK (seq >= 0),
                    answers TEXT NOT NULL,
                    score_percent INTEGER NOT NULL CHECK (score_percent BETWEEN 0 AND 100),
                    passed INTEGER NOT NULL CHECK (passed IN (0, 1)),
                    submitted_at TEXT NOT NULL,
                    PRIMARY KEY (learner_id, module_id, lesson_id, id),
                    UNIQUE (learner_id, module_id, lesson_id, seq),
                    FOREIGN KEY (learner_id, module_id, lesson_id)
                        REFERENCES lesson_progress(learner_id, module_id, lesson_id)
                        ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_quiz_attempts_learner_module
                    ON quiz_attempts (learner_id, module_id, lesson_id, seq);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(1_i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
    }

    Ok(())
}
