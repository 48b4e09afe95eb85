//! # Grade Recompute
//!
//! Asynchronous recalculation of persisted subsection grades.
//!
//! When a learner's score on a leaf block changes, a task is queued. A
//! worker re-derives the grade of every subsection that aggregates that
//! leaf, as the learner sees it, and stores the result in SQLite. The
//! pipeline itself lives in [`grade_recompute_core`]; this crate supplies
//! configuration, storage, the dispatcher, and the `gradectl` CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌────────────┐   ┌──────────────┐   ┌──────────┐
//! │ score set / │──▶│ Dispatcher │──▶│ Recalculator │──▶│  SQLite  │
//! │ replay      │   │ mpsc+pool  │   │ (core crate) │   │  grades  │
//! └─────────────┘   └────────────┘   └──────┬───────┘   └──────────┘
//!                                           │
//!                                    ┌──────▼───────┐
//!                                    │ Structure    │
//!                                    │ cache (moka) │
//!                                    └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! gradectl init
//! gradectl course import ./outline.toml
//! gradectl learner add 42 ada
//! gradectl score set --user 42 --course course-v1:edX+DemoX+2024 \
//!     --usage problem/p1 --earned 5 --possible 10
//! gradectl grades show --user 42 --course course-v1:edX+DemoX+2024
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementations of the core store traits |
//! | [`course_import`] | Course outline import |
//! | [`dispatch`] | Task queue and worker pool |
//! | [`service`] | Pipeline wiring |
//! | [`logging`] | Tracing subscriber setup |

pub mod config;
pub mod course_import;
pub mod db;
pub mod dispatch;
pub mod grades_cmd;
pub mod learners_cmd;
pub mod logging;
pub mod migrate;
pub mod recalc_cmd;
pub mod score_cmd;
pub mod service;
pub mod sqlite_store;
