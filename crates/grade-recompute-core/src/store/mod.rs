//! Storage abstractions for Grade Recompute.
//!
//! These traits are the pipeline's boundary with durable state. Every
//! backend (SQLite in the application crate, [`memory::InMemoryStore`]
//! here) implements all of them so one store value can be shared behind
//! several `Arc<dyn …>` handles.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! | Trait | Reads | Writes |
//! |-------|-------|--------|
//! | [`LearnerDirectory`] | learner profile | none |
//! | [`ScoreStore`] | latest (learner, leaf) score | recorded scores |
//! | [`GradeStore`] | persisted subsection grades | one grade per (learner, subsection) |

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

use crate::grade::{Score, SubsectionGrade};
use crate::keys::{CourseKey, LearnerId, UsageKey};
use crate::view::Learner;

/// Looks up learners by id.
#[async_trait]
pub trait LearnerDirectory: Send + Sync {
    async fn learner(&self, id: LearnerId) -> Result<Option<Learner>>;
}

/// Latest raw score per (learner, leaf).
#[async_trait]
pub trait ScoreStore: Send + Sync {
    /// Every score the learner has in `course`, keyed by leaf.
    async fn scores_for_course(
        &self,
        learner: LearnerId,
        course: &CourseKey,
    ) -> Result<HashMap<UsageKey, Score>>;

    /// Record a score, replacing the previous one for the same leaf.
    async fn record_score(&self, learner: LearnerId, usage: &UsageKey, score: Score)
        -> Result<()>;
}

/// Persisted subsection grades, one per (learner, subsection).
///
/// Writes are last-write-wins: each grade is a full re-derivation, so a
/// later write never needs anything from the one it replaces.
#[async_trait]
pub trait GradeStore: Send + Sync {
    async fn upsert_grade(&self, grade: &SubsectionGrade) -> Result<()>;

    async fn get_grade(
        &self,
        learner: LearnerId,
        subsection: &UsageKey,
    ) -> Result<Option<SubsectionGrade>>;

    /// All of the learner's subsection grades in `course`, ordered by
    /// subsection key.
    async fn grades_for_course(
        &self,
        learner: LearnerId,
        course: &CourseKey,
    ) -> Result<Vec<SubsectionGrade>>;
}
