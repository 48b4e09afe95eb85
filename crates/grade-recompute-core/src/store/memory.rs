//! In-memory store implementation for testing and WASM targets.
//!
//! Uses `HashMap` behind `std::sync::RwLock` for thread safety. Course
//! structures are kept as built snapshots and cloned out on every
//! [`StructureProvider::build`] call, mimicking a fresh build.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::cache::StructureProvider;
use crate::grade::{Score, SubsectionGrade};
use crate::keys::{CourseKey, LearnerId, UsageKey};
use crate::structure::CourseStructure;
use crate::view::Learner;

use super::{GradeStore, LearnerDirectory, ScoreStore};

/// In-memory store for testing and WASM environments.
pub struct InMemoryStore {
    courses: RwLock<HashMap<CourseKey, CourseStructure>>,
    learners: RwLock<HashMap<LearnerId, Learner>>,
    scores: RwLock<HashMap<(LearnerId, UsageKey), Score>>,
    grades: RwLock<HashMap<(LearnerId, UsageKey), SubsectionGrade>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            courses: RwLock::new(HashMap::new()),
            learners: RwLock::new(HashMap::new()),
            scores: RwLock::new(HashMap::new()),
            grades: RwLock::new(HashMap::new()),
        }
    }

    /// Publish (or replace) a course's content.
    pub fn put_course(&self, structure: CourseStructure) {
        self.courses
            .write()
            .unwrap()
            .insert(structure.course().clone(), structure);
    }

    /// Delete a course's content entirely.
    pub fn remove_course(&self, course: &CourseKey) {
        self.courses.write().unwrap().remove(course);
    }

    pub fn put_learner(&self, learner: Learner) {
        self.learners.write().unwrap().insert(learner.id, learner);
    }

    /// Number of persisted subsection grades across all learners.
    pub fn grade_count(&self) -> usize {
        self.grades.read().unwrap().len()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StructureProvider for InMemoryStore {
    async fn build(&self, course: &CourseKey) -> Result<Option<CourseStructure>> {
        Ok(self.courses.read().unwrap().get(course).cloned())
    }
}

#[async_trait]
impl LearnerDirectory for InMemoryStore {
    async fn learner(&self, id: LearnerId) -> Result<Option<Learner>> {
        Ok(self.learners.read().unwrap().get(&id).cloned())
    }
}

#[async_trait]
impl ScoreStore for InMemoryStore {
    async fn scores_for_course(
        &self,
        learner: LearnerId,
        course: &CourseKey,
    ) -> Result<HashMap<UsageKey, Score>> {
        let scores = self.scores.read().unwrap();
        Ok(scores
            .iter()
            .filter(|((id, usage), _)| *id == learner && usage.course_key() == course)
            .map(|((_, usage), score)| (usage.clone(), *score))
            .collect())
    }

    async fn record_score(
        &self,
        learner: LearnerId,
        usage: &UsageKey,
        score: Score,
    ) -> Result<()> {
        self.scores
            .write()
            .unwrap()
            .insert((learner, usage.clone()), score);
        Ok(())
    }
}

#[async_trait]
impl GradeStore for InMemoryStore {
    async fn upsert_grade(&self, grade: &SubsectionGrade) -> Result<()> {
        self.grades
            .write()
            .unwrap()
            .insert((grade.learner, grade.subsection.clone()), grade.clone());
        Ok(())
    }

    async fn get_grade(
        &self,
        learner: LearnerId,
        subsection: &UsageKey,
    ) -> Result<Option<SubsectionGrade>> {
        Ok(self
            .grades
            .read()
            .unwrap()
            .get(&(learner, subsection.clone()))
            .cloned())
    }

    async fn grades_for_course(
        &self,
        learner: LearnerId,
        course: &CourseKey,
    ) -> Result<Vec<SubsectionGrade>> {
        let grades = self.grades.read().unwrap();
        let mut out: Vec<SubsectionGrade> = grades
            .values()
            .filter(|g| g.learner == learner && &g.course == course)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.subsection.cmp(&b.subsection));
        Ok(out)
    }
}
