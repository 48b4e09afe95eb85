//! SQLite-backed store implementations.
//!
//! One [`SqliteStore`] implements every storage trait the pipeline needs:
//! [`StructureProvider`] (rebuilds a course snapshot from `courses`,
//! `course_blocks`, and `course_edges`), [`LearnerDirectory`],
//! [`ScoreStore`], and [`GradeStore`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::{BTreeSet, HashMap};

use grade_recompute_core::cache::StructureProvider;
use grade_recompute_core::grade::{AggregatedScore, Score, SubsectionGrade};
use grade_recompute_core::store::{GradeStore, LearnerDirectory, ScoreStore};
use grade_recompute_core::structure::{BlockData, CourseStructure, CourseStructureBuilder};
use grade_recompute_core::view::Learner;
use grade_recompute_core::{CourseKey, LearnerId, UsageKey};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert or update a learner profile.
    pub async fn upsert_learner(&self, learner: &Learner) -> Result<()> {
        let groups_json = serde_json::to_string(&learner.groups)?;
        sqlx::query(
            r#"
            INSERT INTO learners (id, username, is_staff, groups_json)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                username = excluded.username,
                is_staff = excluded.is_staff,
                groups_json = excluded.groups_json
            "#,
        )
        .bind(learner_id_to_db(learner.id)?)
        .bind(&learner.username)
        .bind(learner.is_staff)
        .bind(&groups_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Current content version of a course, if it has been imported.
    pub async fn course_version(&self, course: &CourseKey) -> Result<Option<u64>> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM courses WHERE course_key = ?")
                .bind(course.to_string())
                .fetch_optional(&self.pool)
                .await?;
        Ok(version.map(|v| v as u64))
    }
}

fn learner_id_to_db(id: LearnerId) -> Result<i64> {
    i64::try_from(id.0).with_context(|| format!("learner id {} out of range", id))
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("bad timestamp in database: {}", s))?
        .with_timezone(&Utc))
}

fn row_to_grade(row: &SqliteRow) -> Result<SubsectionGrade> {
    let learner_id: i64 = row.get("learner_id");
    let subsection: String = row.get("subsection");
    let course: String = row.get("course_key");
    let course_version: i64 = row.get("course_version");
    let computed_at: String = row.get("computed_at");

    Ok(SubsectionGrade {
        learner: LearnerId(learner_id as u64),
        course: course.parse()?,
        subsection: subsection.parse()?,
        display_name: row.get("display_name"),
        course_version: course_version as u64,
        graded: row.get("graded"),
        all_total: AggregatedScore {
            earned: row.get("all_earned"),
            possible: row.get("all_possible"),
        },
        graded_total: AggregatedScore {
            earned: row.get("graded_earned"),
            possible: row.get("graded_possible"),
        },
        visible_blocks_hash: row.get("visible_blocks_hash"),
        computed_at: parse_ts(&computed_at)?,
    })
}

const GRADE_COLUMNS: &str = "learner_id, subsection, course_key, display_name, course_version, \
    graded, all_earned, all_possible, graded_earned, graded_possible, visible_blocks_hash, computed_at";

#[async_trait]
impl StructureProvider for SqliteStore {
    async fn build(&self, course: &CourseKey) -> Result<Option<CourseStructure>> {
        let course_id = course.to_string();
        let Some(row) = sqlx::query("SELECT version, root FROM courses WHERE course_key = ?")
            .bind(&course_id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let version: i64 = row.get("version");
        let root: String = row.get("root");
        let root = UsageKey::parse_in_course(&root, course)?;

        let mut builder = CourseStructureBuilder::new(course.clone(), version as u64, root);

        let blocks: Vec<String> = sqlx::query_scalar(
            "SELECT data_json FROM course_blocks WHERE course_key = ? ORDER BY usage_key",
        )
        .bind(&course_id)
        .fetch_all(&self.pool)
        .await?;
        for data_json in &blocks {
            let block: BlockData = serde_json::from_str(data_json)
                .with_context(|| format!("corrupt block data in course {}", course))?;
            builder.add_block(block);
        }

        let edges = sqlx::query(
            "SELECT parent, child FROM course_edges WHERE course_key = ? ORDER BY parent, position",
        )
        .bind(&course_id)
        .fetch_all(&self.pool)
        .await?;
        for edge in &edges {
            let parent: String = edge.get("parent");
            let child: String = edge.get("child");
            builder.add_edge(
                UsageKey::parse_in_course(&parent, course)?,
                UsageKey::parse_in_course(&child, course)?,
            );
        }

        let structure = builder.build()?;
        tracing::debug!(
            %course,
            version = structure.version(),
            blocks = structure.len(),
            "built course structure from database"
        );
        Ok(Some(structure))
    }
}

#[async_trait]
impl LearnerDirectory for SqliteStore {
    async fn learner(&self, id: LearnerId) -> Result<Option<Learner>> {
        let row = sqlx::query("SELECT id, username, is_staff, groups_json FROM learners WHERE id = ?")
            .bind(learner_id_to_db(id)?)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let groups_json: String = row.get("groups_json");
        let groups: BTreeSet<u32> = serde_json::from_str(&groups_json)
            .with_context(|| format!("corrupt groups for learner {}", id))?;

        Ok(Some(Learner {
            id,
            username: row.get("username"),
            is_staff: row.get("is_staff"),
            groups,
        }))
    }
}

#[async_trait]
impl ScoreStore for SqliteStore {
    async fn scores_for_course(
        &self,
        learner: LearnerId,
        course: &CourseKey,
    ) -> Result<HashMap<UsageKey, Score>> {
        let rows = sqlx::query(
            "SELECT usage_key, earned, possible FROM scores WHERE learner_id = ? AND course_key = ?",
        )
        .bind(learner_id_to_db(learner)?)
        .bind(course.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut scores = HashMap::with_capacity(rows.len());
        for row in &rows {
            let usage: String = row.get("usage_key");
            scores.insert(
                UsageKey::parse_in_course(&usage, course)?,
                Score::new(row.get("earned"), row.get("possible")),
            );
        }
        Ok(scores)
    }

    async fn record_score(&self, learner: LearnerId, usage: &UsageKey, score: Score) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scores (learner_id, usage_key, course_key, earned, possible, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(learner_id, usage_key) DO UPDATE SET
                earned = excluded.earned,
                possible = excluded.possible,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(learner_id_to_db(learner)?)
        .bind(usage.to_string())
        .bind(usage.course_key().to_string())
        .bind(score.earned)
        .bind(score.possible)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl GradeStore for SqliteStore {
    async fn upsert_grade(&self, grade: &SubsectionGrade) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO subsection_grades (learner_id, subsection, course_key, display_name,
                                           course_version, graded, all_earned, all_possible,
                                           graded_earned, graded_possible, visible_blocks_hash,
                                           computed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(learner_id, subsection) DO UPDATE SET
                course_key = excluded.course_key,
                display_name = excluded.display_name,
                course_version = excluded.course_version,
                graded = excluded.graded,
                all_earned = excluded.all_earned,
                all_possible = excluded.all_possible,
                graded_earned = excluded.graded_earned,
                graded_possible = excluded.graded_possible,
                visible_blocks_hash = excluded.visible_blocks_hash,
                computed_at = excluded.computed_at
            "#,
        )
        .bind(learner_id_to_db(grade.learner)?)
        .bind(grade.subsection.to_string())
        .bind(grade.course.to_string())
        .bind(&grade.display_name)
        .bind(grade.course_version as i64)
        .bind(grade.graded)
        .bind(grade.all_total.earned)
        .bind(grade.all_total.possible)
        .bind(grade.graded_total.earned)
        .bind(grade.graded_total.possible)
        .bind(&grade.visible_blocks_hash)
        .bind(format_ts(grade.computed_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_grade(
        &self,
        learner: LearnerId,
        subsection: &UsageKey,
    ) -> Result<Option<SubsectionGrade>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM subsection_grades WHERE learner_id = ? AND subsection = ?",
            GRADE_COLUMNS
        ))
        .bind(learner_id_to_db(learner)?)
        .bind(subsection.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_grade).transpose()
    }

    async fn grades_for_course(
        &self,
        learner: LearnerId,
        course: &CourseKey,
    ) -> Result<Vec<SubsectionGrade>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM subsection_grades WHERE learner_id = ? AND course_key = ?",
            GRADE_COLUMNS
        ))
        .bind(learner_id_to_db(learner)?)
        .bind(course.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut grades = rows.iter().map(row_to_grade).collect::<Result<Vec<_>>>()?;
        grades.sort_by(|a, b| a.subsection.cmp(&b.subsection));
        Ok(grades)
    }
}
