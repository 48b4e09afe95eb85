//! # Grade Recompute CLI (`gradectl`)
//!
//! ## Usage
//!
//! ```bash
//! gradectl --config ./config/grades.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `gradectl init` | Create the SQLite database and run schema migrations |
//! | `gradectl course import <outline>` | Publish a course outline |
//! | `gradectl learner add <id> <username>` | Create or update a learner |
//! | `gradectl score set ...` | Record a score and queue a recalculation |
//! | `gradectl recalc ...` | Recalculate synchronously for one scored block |
//! | `gradectl replay <tasks.jsonl>` | Queue task arguments from a file |
//! | `gradectl grades show ...` | Print a learner's subsection grades |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use grade_recompute::{
    config, course_import, grades_cmd, learners_cmd, logging, migrate, recalc_cmd, score_cmd,
};

/// Grade Recompute CLI: asynchronous subsection grade recalculation.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/grades.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "gradectl",
    about = "Grade Recompute: recalculate and persist subsection grades",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/grades.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run more than once.
    Init,

    /// Manage course content.
    Course {
        #[command(subcommand)]
        action: CourseAction,
    },

    /// Manage learners.
    Learner {
        #[command(subcommand)]
        action: LearnerAction,
    },

    /// Manage raw scores.
    Score {
        #[command(subcommand)]
        action: ScoreAction,
    },

    /// Recalculate grades for one scored block, without the queue.
    Recalc {
        #[arg(long)]
        user: u64,
        #[arg(long)]
        course: String,
        /// Usage key, or `type/id` within `--course`.
        #[arg(long)]
        usage: String,
    },

    /// Queue every task in a JSON Lines file and wait for them.
    ///
    /// Each line is an object with `user`, `course_id`, and `usage_id`.
    Replay {
        path: PathBuf,
    },

    /// Inspect persisted grades.
    Grades {
        #[command(subcommand)]
        action: GradesAction,
    },
}

#[derive(Subcommand)]
enum CourseAction {
    /// Import (or re-import) a course outline, bumping its version.
    Import { path: PathBuf },
}

#[derive(Subcommand)]
enum LearnerAction {
    /// Create or update a learner.
    Add {
        id: u64,
        username: String,
        #[arg(long)]
        staff: bool,
        /// Group id the learner belongs to. Repeatable.
        #[arg(long = "group")]
        groups: Vec<u32>,
    },
}

#[derive(Subcommand)]
enum ScoreAction {
    /// Record a score and queue a recalculation.
    Set {
        #[arg(long)]
        user: u64,
        #[arg(long)]
        course: String,
        /// Usage key, or `type/id` within `--course`.
        #[arg(long)]
        usage: String,
        #[arg(long)]
        earned: f64,
        #[arg(long)]
        possible: f64,
    },
}

#[derive(Subcommand)]
enum GradesAction {
    /// Print a learner's subsection grades in a course.
    Show {
        #[arg(long)]
        user: u64,
        #[arg(long)]
        course: String,
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Course { action } => match action {
            CourseAction::Import { path } => {
                course_import::run_import(&cfg, &path).await?;
            }
        },
        Commands::Learner { action } => match action {
            LearnerAction::Add {
                id,
                username,
                staff,
                groups,
            } => {
                learners_cmd::run_add_learner(&cfg, id, &username, staff, &groups).await?;
            }
        },
        Commands::Score { action } => match action {
            ScoreAction::Set {
                user,
                course,
                usage,
                earned,
                possible,
            } => {
                score_cmd::run_set_score(&cfg, user, &course, &usage, earned, possible).await?;
            }
        },
        Commands::Recalc {
            user,
            course,
            usage,
        } => {
            recalc_cmd::run_recalc(&cfg, user, &course, &usage).await?;
        }
        Commands::Replay { path } => {
            recalc_cmd::run_replay(&cfg, &path).await?;
        }
        Commands::Grades { action } => match action {
            GradesAction::Show { user, course, json } => {
                grades_cmd::run_show(&cfg, user, &course, json).await?;
            }
        },
    }

    Ok(())
}
