//! # Grade Recompute Core
//!
//! Shared, WASM-safe logic for Grade Recompute: opaque course and usage
//! keys, immutable course structure snapshots, the grades transformer,
//! learner access rules, subsection grading, store abstractions, and the
//! recalculation pipeline that ties them together.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or other
//! native-only dependencies. Durable stores and task dispatch live in the
//! `grade-recompute` application crate.
//!
//! ## Pipeline
//!
//! ```text
//! ScoreEvent ─▶ FeatureGate ─▶ StructureLoader ─▶ affected_subsections
//!                                                       │
//!                          ┌────────────────────────────┘
//!                          ▼  (per subsection)
//!                    Materializer ─▶ SubsectionGradeFactory ─▶ GradeStore
//! ```

pub mod cache;
pub mod clock;
pub mod error;
pub mod event;
pub mod gate;
pub mod grade;
pub mod keys;
pub mod pipeline;
pub mod store;
pub mod structure;
pub mod transform;
pub mod view;

pub use error::RecalcError;
pub use event::ScoreEvent;
pub use keys::{CourseKey, LearnerId, UsageKey};
pub use pipeline::{RecalcOutcome, Recalculator};
