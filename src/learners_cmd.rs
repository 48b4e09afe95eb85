//! `gradectl learner add`.

use anyhow::Result;
use std::collections::BTreeSet;

use grade_recompute_core::view::Learner;
use grade_recompute_core::LearnerId;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

pub async fn run_add_learner(
    config: &Config,
    id: u64,
    username: &str,
    staff: bool,
    groups: &[u32],
) -> Result<()> {
    if username.trim().is_empty() {
        anyhow::bail!("username must not be empty");
    }

    let learner = Learner {
        id: LearnerId(id),
        username: username.to_string(),
        is_staff: staff,
        groups: groups.iter().copied().collect::<BTreeSet<_>>(),
    };

    let store = SqliteStore::new(db::connect(config).await?);
    store.upsert_learner(&learner).await?;
    store.pool().close().await;

    println!(
        "Learner {} ({}) saved{}",
        learner.id,
        learner.username,
        if learner.is_staff { " as staff" } else { "" }
    );
    Ok(())
}
