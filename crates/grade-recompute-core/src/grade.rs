//! Subsection grade computation and persistence.
//!
//! A subsection grade is always re-derived from scratch: every scorable
//! leaf visible to the learner contributes its latest recorded score, so
//! recomputation is idempotent and concurrent runs can simply overwrite
//! each other.
//!
//! # Weighting
//!
//! | Leaf state | earned | possible |
//! |------------|--------|----------|
//! | scored, `weight` set, raw possible > 0 | `raw_earned × weight / raw_possible` | `weight` |
//! | scored, no `weight` | `raw_earned` | `raw_possible` |
//! | unscored | `0` | `weight`, else `max_score`, else `0` |

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;

use crate::keys::{CourseKey, LearnerId, UsageKey};
use crate::store::{GradeStore, ScoreStore};
use crate::structure::BlockData;
use crate::view::{Learner, LearnerView};

/// A learner's latest raw score on one leaf.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub earned: f64,
    pub possible: f64,
}

impl Score {
    pub fn new(earned: f64, possible: f64) -> Self {
        Self { earned, possible }
    }
}

/// Earned and possible points summed over a set of leaves.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AggregatedScore {
    pub earned: f64,
    pub possible: f64,
}

impl AggregatedScore {
    pub fn add(&mut self, other: AggregatedScore) {
        self.earned += other.earned;
        self.possible += other.possible;
    }

    /// Fraction earned in `[0, 1]`; zero when nothing is possible.
    pub fn percent(&self) -> f64 {
        if self.possible > 0.0 {
            (self.earned / self.possible).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// Persisted grade of one subsection for one learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubsectionGrade {
    pub learner: LearnerId,
    pub course: CourseKey,
    pub subsection: UsageKey,
    pub display_name: String,
    /// Content version of the snapshot the grade was computed from.
    pub course_version: u64,
    pub graded: bool,
    pub all_total: AggregatedScore,
    pub graded_total: AggregatedScore,
    /// SHA-256 over the sorted keys of the blocks the learner could see.
    pub visible_blocks_hash: String,
    pub computed_at: DateTime<Utc>,
}

/// Contribution of one leaf, applying the weighting table above.
pub fn leaf_score(block: &BlockData, raw: Option<&Score>) -> AggregatedScore {
    match (raw, block.weight) {
        (Some(score), Some(weight)) if score.possible > 0.0 => AggregatedScore {
            earned: score.earned * weight / score.possible,
            possible: weight,
        },
        // Nothing was possible; a weight cannot rescale zero.
        (Some(_), Some(_)) => AggregatedScore::default(),
        (Some(score), None) => AggregatedScore {
            earned: score.earned,
            possible: score.possible,
        },
        (None, weight) => AggregatedScore {
            earned: 0.0,
            possible: weight.or(block.max_score).unwrap_or(0.0),
        },
    }
}

/// Hash of the visible block set. Stable across traversal order.
pub fn visible_blocks_hash(view: &LearnerView) -> String {
    let mut keys: Vec<String> = view.block_keys().iter().map(|k| k.to_string()).collect();
    keys.sort();

    let mut hasher = Sha256::new();
    for key in &keys {
        hasher.update(key.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

/// Computes and persists subsection grades for one learner in one course.
///
/// Scores are fetched once when the factory is created, so the number of
/// score-store round-trips per run does not grow with the number of
/// problems or affected subsections.
pub struct SubsectionGradeFactory {
    learner: Learner,
    course: CourseKey,
    scores: HashMap<UsageKey, Score>,
    grades: Arc<dyn GradeStore>,
}

impl SubsectionGradeFactory {
    pub async fn load(
        learner: Learner,
        course: CourseKey,
        scores: &dyn ScoreStore,
        grades: Arc<dyn GradeStore>,
    ) -> Result<Self> {
        let scores = scores.scores_for_course(learner.id, &course).await?;
        Ok(Self {
            learner,
            course,
            scores,
            grades,
        })
    }

    pub fn learner(&self) -> &Learner {
        &self.learner
    }

    /// Aggregate a grade without persisting it.
    pub fn compute(&self, view: &LearnerView, now: DateTime<Utc>) -> SubsectionGrade {
        let mut all_total = AggregatedScore::default();
        let mut graded_total = AggregatedScore::default();

        for block in view.scorable_blocks() {
            let contribution = leaf_score(block, self.scores.get(&block.usage));
            all_total.add(contribution);
            if block.graded {
                graded_total.add(contribution);
            }
        }

        let (display_name, graded) = view
            .subsection_block()
            .map(|b| (b.display_name.clone(), b.graded))
            .unwrap_or_default();

        SubsectionGrade {
            learner: self.learner.id,
            course: self.course.clone(),
            subsection: view.subsection().clone(),
            display_name,
            course_version: view.structure().version(),
            graded,
            all_total,
            graded_total,
            visible_blocks_hash: visible_blocks_hash(view),
            computed_at: now,
        }
    }

    /// Compute the grade for `view` and write it, replacing any previous
    /// grade for the same learner and subsection.
    pub async fn update(&self, view: &LearnerView, now: DateTime<Utc>) -> Result<SubsectionGrade> {
        let grade = self.compute(view, now);
        self.grades.upsert_grade(&grade).await?;
        tracing::debug!(
            learner = %grade.learner,
            subsection = %grade.subsection,
            earned = grade.all_total.earned,
            possible = grade.all_total.possible,
            "subsection grade updated"
        );
        Ok(grade)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::CourseKey;

    fn block(weight: Option<f64>, max_score: Option<f64>) -> BlockData {
        let c: CourseKey = "course-v1:edX+DemoX+2024".parse().unwrap();
        let mut b = BlockData::new(c.make_usage_key("problem", "p1"));
        b.has_score = true;
        b.weight = weight;
        b.max_score = max_score;
        b
    }

    #[test]
    fn test_unweighted_score_passes_through() {
        let s = leaf_score(&block(None, Some(10.0)), Some(&Score::new(5.0, 10.0)));
        assert_eq!(s, AggregatedScore { earned: 5.0, possible: 10.0 });
    }

    #[test]
    fn test_weight_rescales() {
        let s = leaf_score(&block(Some(2.0), None), Some(&Score::new(5.0, 10.0)));
        assert_eq!(s, AggregatedScore { earned: 1.0, possible: 2.0 });
    }

    #[test]
    fn test_weight_with_zero_possible() {
        let s = leaf_score(&block(Some(2.0), None), Some(&Score::new(0.0, 0.0)));
        assert_eq!(s, AggregatedScore::default());
    }

    #[test]
    fn test_unscored_leaf_counts_possible() {
        assert_eq!(
            leaf_score(&block(None, Some(4.0)), None),
            AggregatedScore { earned: 0.0, possible: 4.0 }
        );
        assert_eq!(
            leaf_score(&block(Some(3.0), Some(4.0)), None),
            AggregatedScore { earned: 0.0, possible: 3.0 }
        );
        assert_eq!(leaf_score(&block(None, None), None), AggregatedScore::default());
    }

    #[test]
    fn test_percent() {
        assert_eq!(AggregatedScore::default().percent(), 0.0);
        let a = AggregatedScore { earned: 3.0, possible: 4.0 };
        assert!((a.percent() - 0.75).abs() < 1e-9);
    }
}
