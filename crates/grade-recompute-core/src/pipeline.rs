//! Subsection grade recalculation pipeline.
//!
//! One run per [`ScoreEvent`]:
//!
//! 1. Check the [`FeatureGate`]. Disabled → done, nothing else is touched.
//! 2. Load the course snapshot once from the [`StructureLoader`].
//! 3. Resolve the subsections that aggregate the scored leaf. None → done.
//! 4. For each affected subsection: materialize the learner's view, then
//!    recompute and persist its grade.
//!
//! Iterations share only the read-only snapshot and the learner's score
//! map, so each subsection's grade is independent of the others. A failed
//! write does not stop later subsections, and earlier writes are never
//! rolled back; every failure is reported in [`RecalcError::PersistFailed`].

use serde_json::{Map, Value};
use std::sync::Arc;

use crate::cache::StructureLoader;
use crate::clock::{Clock, SystemClock};
use crate::error::RecalcError;
use crate::event::ScoreEvent;
use crate::gate::FeatureGate;
use crate::grade::{SubsectionGrade, SubsectionGradeFactory};
use crate::store::{GradeStore, LearnerDirectory, ScoreStore};
use crate::transform::affected_subsections;
use crate::view::{AccessRules, Materializer};

/// How a successful run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RecalcOutcome {
    /// Recalculation is switched off for the course.
    Disabled,
    /// The scored leaf feeds no subsection (or no longer exists).
    NoAffectedSubsections,
    /// Grades written, in subsection key order.
    Updated(Vec<SubsectionGrade>),
}

/// Runs the pipeline against injected collaborators.
pub struct Recalculator {
    gate: Arc<dyn FeatureGate>,
    structures: Arc<dyn StructureLoader>,
    learners: Arc<dyn LearnerDirectory>,
    scores: Arc<dyn ScoreStore>,
    grades: Arc<dyn GradeStore>,
    materializer: Arc<dyn Materializer>,
    clock: Arc<dyn Clock>,
}

impl Recalculator {
    pub fn new(
        gate: Arc<dyn FeatureGate>,
        structures: Arc<dyn StructureLoader>,
        learners: Arc<dyn LearnerDirectory>,
        scores: Arc<dyn ScoreStore>,
        grades: Arc<dyn GradeStore>,
    ) -> Self {
        Self {
            gate,
            structures,
            learners,
            scores,
            grades,
            materializer: Arc::new(AccessRules),
            clock: Arc::new(SystemClock),
        }
    }

    /// Wire learners, scores, and grades to a single backing store.
    pub fn with_store<S>(
        gate: Arc<dyn FeatureGate>,
        structures: Arc<dyn StructureLoader>,
        store: Arc<S>,
    ) -> Self
    where
        S: LearnerDirectory + ScoreStore + GradeStore + 'static,
    {
        Self::new(gate, structures, store.clone(), store.clone(), store)
    }

    pub fn materializer(mut self, materializer: Arc<dyn Materializer>) -> Self {
        self.materializer = materializer;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Parse raw task arguments and run. Malformed arguments fail before
    /// any collaborator is called.
    pub async fn recalculate_task(
        &self,
        args: &Map<String, Value>,
    ) -> Result<RecalcOutcome, RecalcError> {
        let event = ScoreEvent::from_task_args(args)?;
        self.recalculate(&event).await
    }

    #[tracing::instrument(
        name = "recalculate_subsection_grade",
        skip_all,
        fields(learner = %event.learner, course = %event.course, usage = %event.usage)
    )]
    pub async fn recalculate(&self, event: &ScoreEvent) -> Result<RecalcOutcome, RecalcError> {
        if !self.gate.enabled(&event.course) {
            tracing::debug!("persistent grades disabled for course");
            return Ok(RecalcOutcome::Disabled);
        }

        let structure = self
            .structures
            .load(&event.course)
            .await?
            .ok_or_else(|| RecalcError::CourseNotFound(event.course.clone()))?;

        let leaf = event.usage.map_into_course(&event.course);
        let affected = affected_subsections(&structure, &leaf);
        if affected.is_empty() {
            tracing::debug!("scored block feeds no subsection");
            return Ok(RecalcOutcome::NoAffectedSubsections);
        }

        let learner = self
            .learners
            .learner(event.learner)
            .await?
            .ok_or(RecalcError::LearnerNotFound(event.learner))?;

        let now = self.clock.now();
        let factory = SubsectionGradeFactory::load(
            learner,
            event.course.clone(),
            self.scores.as_ref(),
            Arc::clone(&self.grades),
        )
        .await?;

        let mut updated = Vec::with_capacity(affected.len());
        let mut failed = Vec::new();

        for subsection in &affected {
            let view = self
                .materializer
                .materialize(factory.learner(), subsection, &structure, now);
            match factory.update(&view, now).await {
                Ok(grade) => updated.push(grade),
                Err(e) => {
                    tracing::warn!(%subsection, error = %e, "failed to persist subsection grade");
                    failed.push((subsection.clone(), format!("{:#}", e)));
                }
            }
        }

        if !failed.is_empty() {
            return Err(RecalcError::PersistFailed {
                persisted: updated.into_iter().map(|g| g.subsection).collect(),
                failed,
            });
        }

        tracing::info!(
            subsections = updated.len(),
            version = structure.version(),
            "subsection grades recalculated"
        );
        Ok(RecalcOutcome::Updated(updated))
    }
}
