use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Safe to run repeatedly.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // One row per published course; `version` bumps on every import.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS courses (
            course_key TEXT PRIMARY KEY,
            version INTEGER NOT NULL,
            root TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS course_blocks (
            course_key TEXT NOT NULL,
            usage_key TEXT NOT NULL,
            block_type TEXT NOT NULL,
            data_json TEXT NOT NULL,
            PRIMARY KEY (course_key, usage_key),
            FOREIGN KEY (course_key) REFERENCES courses(course_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS course_edges (
            course_key TEXT NOT NULL,
            parent TEXT NOT NULL,
            child TEXT NOT NULL,
            position INTEGER NOT NULL,
            PRIMARY KEY (course_key, parent, child),
            FOREIGN KEY (course_key) REFERENCES courses(course_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS learners (
            id INTEGER PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            is_staff INTEGER NOT NULL DEFAULT 0,
            groups_json TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scores (
            learner_id INTEGER NOT NULL,
            usage_key TEXT NOT NULL,
            course_key TEXT NOT NULL,
            earned REAL NOT NULL,
            possible REAL NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (learner_id, usage_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS subsection_grades (
            learner_id INTEGER NOT NULL,
            subsection TEXT NOT NULL,
            course_key TEXT NOT NULL,
            display_name TEXT NOT NULL,
            course_version INTEGER NOT NULL,
            graded INTEGER NOT NULL,
            all_earned REAL NOT NULL,
            all_possible REAL NOT NULL,
            graded_earned REAL NOT NULL,
            graded_possible REAL NOT NULL,
            visible_blocks_hash TEXT NOT NULL,
            computed_at TEXT NOT NULL,
            PRIMARY KEY (learner_id, subsection)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_scores_course ON scores(learner_id, course_key)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_grades_course ON subsection_grades(learner_id, course_key)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_edges_course ON course_edges(course_key)")
        .execute(pool)
        .await?;

    Ok(())
}
