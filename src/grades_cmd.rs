//! `gradectl grades show`.

use anyhow::Result;
use serde::Serialize;

use grade_recompute_core::grade::SubsectionGrade;
use grade_recompute_core::store::GradeStore;
use grade_recompute_core::{CourseKey, LearnerId};

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

#[derive(Debug, Serialize)]
pub struct GradesResponse {
    pub learner: LearnerId,
    pub course: CourseKey,
    pub subsections: Vec<SubsectionGrade>,
}

pub async fn get_grades(config: &Config, user: u64, course: &str) -> Result<GradesResponse> {
    let course: CourseKey = course.parse()?;
    let learner = LearnerId(user);

    let store = SqliteStore::new(db::connect(config).await?);
    let subsections = store.grades_for_course(learner, &course).await?;
    store.pool().close().await;

    Ok(GradesResponse {
        learner,
        course,
        subsections,
    })
}

pub async fn run_show(config: &Config, user: u64, course: &str, json: bool) -> Result<()> {
    let response = get_grades(config, user, course).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    if response.subsections.is_empty() {
        println!("No grades for learner {} in {}", response.learner, response.course);
        return Ok(());
    }

    println!("--- Grades: learner {} in {} ---", response.learner, response.course);
    for grade in &response.subsections {
        println!(
            "{:<40} {:>6.2}/{:<6.2} {:>5.1}%{}  (v{})",
            grade.display_name,
            grade.all_total.earned,
            grade.all_total.possible,
            grade.all_total.percent() * 100.0,
            if grade.graded { "  graded" } else { "" },
            grade.course_version,
        );
    }
    Ok(())
}
