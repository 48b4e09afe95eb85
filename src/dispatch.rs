//! Asynchronous task dispatch.
//!
//! The score-change signal does not run the pipeline inline: it serializes
//! the event into task arguments and enqueues them. A fixed pool of workers
//! drains the bounded queue, each running one [`Recalculator::recalculate_task`]
//! at a time. Tasks that fail with a retryable error are retried after a
//! delay, up to `worker.max_retries` extra attempts.
//!
//! ```text
//! score_changed ──▶ mpsc (bounded) ──▶ worker 0..N ──▶ Recalculator
//! ```

use anyhow::{anyhow, Result};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use grade_recompute_core::{RecalcOutcome, Recalculator, ScoreEvent};

use crate::config::WorkerConfig;

/// One queued pipeline run.
#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub id: Uuid,
    pub args: Map<String, Value>,
}

/// Totals reported when the dispatcher shuts down.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub submitted: usize,
    /// Runs that wrote at least one grade.
    pub updated: usize,
    /// Runs that were gated off or had nothing to update.
    pub skipped: usize,
    pub failed: usize,
    pub retries: usize,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicUsize,
    updated: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
    retries: AtomicUsize,
}

impl Counters {
    fn snapshot(&self) -> DispatchSummary {
        DispatchSummary {
            submitted: self.submitted.load(Ordering::SeqCst),
            updated: self.updated.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            retries: self.retries.load(Ordering::SeqCst),
        }
    }
}

pub struct TaskDispatcher {
    task_tx: mpsc::Sender<QueuedTask>,
    workers: Vec<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl TaskDispatcher {
    /// Start `config.concurrency` workers over a queue of
    /// `config.queue_capacity` tasks.
    pub fn start(recalc: Arc<Recalculator>, config: &WorkerConfig) -> Self {
        let (task_tx, task_rx) = mpsc::channel::<QueuedTask>(config.queue_capacity);
        let task_rx = Arc::new(Mutex::new(task_rx));
        let counters = Arc::new(Counters::default());
        let retry = RetryPolicy {
            max_retries: config.max_retries,
            delay: Duration::from_millis(config.retry_delay_ms),
        };

        let workers = (0..config.concurrency)
            .map(|worker_id| {
                let recalc = Arc::clone(&recalc);
                let task_rx = Arc::clone(&task_rx);
                let counters = Arc::clone(&counters);
                tokio::spawn(async move {
                    worker_task(worker_id, recalc, task_rx, counters, retry).await;
                })
            })
            .collect();

        tracing::debug!(
            workers = config.concurrency,
            capacity = config.queue_capacity,
            "task dispatcher started"
        );

        Self {
            task_tx,
            workers,
            counters,
        }
    }

    /// Queue raw task arguments. Waits while the queue is full.
    pub async fn enqueue(&self, args: Map<String, Value>) -> Result<Uuid> {
        let task = QueuedTask {
            id: Uuid::new_v4(),
            args,
        };
        let id = task.id;
        self.task_tx
            .send(task)
            .await
            .map_err(|_| anyhow!("task dispatcher is shut down"))?;
        self.counters.submitted.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    /// Signal handler for a changed score: enqueue a recalculation for it.
    pub async fn score_changed(&self, event: &ScoreEvent) -> Result<Uuid> {
        let id = self.enqueue(event.to_task_args()).await?;
        tracing::debug!(task = %id, learner = %event.learner, usage = %event.usage, "recalculation queued");
        Ok(id)
    }

    /// Close the queue, wait for every queued task, and report totals.
    pub async fn shutdown(self) -> Result<DispatchSummary> {
        drop(self.task_tx);
        for worker in self.workers {
            worker.await?;
        }
        let summary = self.counters.snapshot();
        tracing::info!(
            submitted = summary.submitted,
            updated = summary.updated,
            skipped = summary.skipped,
            failed = summary.failed,
            "task dispatcher drained"
        );
        Ok(summary)
    }
}

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    max_retries: u32,
    delay: Duration,
}

async fn worker_task(
    worker_id: usize,
    recalc: Arc<Recalculator>,
    task_rx: Arc<Mutex<mpsc::Receiver<QueuedTask>>>,
    counters: Arc<Counters>,
    retry: RetryPolicy,
) {
    loop {
        // Hold the lock only while waiting for the next task.
        let task = { task_rx.lock().await.recv().await };
        let Some(task) = task else {
            tracing::trace!(worker_id, "queue closed, worker exiting");
            return;
        };

        let mut attempt = 0;
        loop {
            match recalc.recalculate_task(&task.args).await {
                Ok(RecalcOutcome::Updated(grades)) => {
                    tracing::debug!(worker_id, task = %task.id, grades = grades.len(), "task done");
                    counters.updated.fetch_add(1, Ordering::SeqCst);
                }
                Ok(outcome) => {
                    tracing::debug!(worker_id, task = %task.id, ?outcome, "task skipped");
                    counters.skipped.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) if e.is_retryable() && attempt < retry.max_retries => {
                    attempt += 1;
                    counters.retries.fetch_add(1, Ordering::SeqCst);
                    tracing::warn!(worker_id, task = %task.id, attempt, error = %e, "task failed, retrying");
                    tokio::time::sleep(retry.delay).await;
                    continue;
                }
                Err(e) => {
                    tracing::error!(worker_id, task = %task.id, error = %e, "task failed");
                    counters.failed.fetch_add(1, Ordering::SeqCst);
                }
            }
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grade_recompute_core::cache::{CacheSettings, StructureCache};
    use grade_recompute_core::gate::PersistentGradesFlag;
    use grade_recompute_core::grade::Score;
    use grade_recompute_core::store::memory::InMemoryStore;
    use grade_recompute_core::store::ScoreStore;
    use grade_recompute_core::structure::{BlockData, CourseStructureBuilder};
    use grade_recompute_core::view::Learner;
    use grade_recompute_core::{CourseKey, LearnerId};
    use serde_json::json;

    fn course() -> CourseKey {
        "course-v1:edX+DemoX+2024".parse().unwrap()
    }

    fn recalculator(flag: PersistentGradesFlag) -> (Arc<InMemoryStore>, Arc<Recalculator>) {
        let c = course();
        let root = c.make_usage_key("course", "course");
        let seq = c.make_usage_key("sequential", "hw1");
        let mut problem = BlockData::new(c.make_usage_key("problem", "p1"));
        problem.has_score = true;
        problem.max_score = Some(2.0);

        let store = Arc::new(InMemoryStore::new());
        store.put_course(
            CourseStructureBuilder::new(c.clone(), 1, root.clone())
                .block(BlockData::new(root.clone()))
                .child(&root, BlockData::new(seq.clone()))
                .child(&seq, problem)
                .build()
                .unwrap(),
        );
        store.put_learner(Learner::new(LearnerId(1), "ada"));
        store.put_learner(Learner::new(LearnerId(2), "grace"));

        let cache = Arc::new(StructureCache::new(store.clone(), &CacheSettings::default()));
        let recalc = Recalculator::with_store(Arc::new(flag), cache, store.clone());
        (store, Arc::new(recalc))
    }

    fn config(concurrency: usize) -> WorkerConfig {
        WorkerConfig {
            concurrency,
            queue_capacity: 4,
            max_retries: 1,
            retry_delay_ms: 1,
        }
    }

    #[tokio::test]
    async fn test_score_changed_runs_pipeline() {
        let (store, recalc) = recalculator(PersistentGradesFlag::enabled_for_all());
        let p1 = course().make_usage_key("problem", "p1");
        store.record_score(LearnerId(1), &p1, Score::new(1.0, 2.0)).await.unwrap();
        store.record_score(LearnerId(2), &p1, Score::new(2.0, 2.0)).await.unwrap();

        let dispatcher = TaskDispatcher::start(recalc, &config(2));
        for learner in [1, 2] {
            let event = ScoreEvent::new(LearnerId(learner), course(), &p1);
            dispatcher.score_changed(&event).await.unwrap();
        }
        let summary = dispatcher.shutdown().await.unwrap();

        assert_eq!(summary.submitted, 2);
        assert_eq!(summary.updated, 2);
        assert_eq!(store.grade_count(), 2);
    }

    #[tokio::test]
    async fn test_disabled_tasks_are_skipped() {
        let (store, recalc) = recalculator(PersistentGradesFlag::disabled());
        let dispatcher = TaskDispatcher::start(recalc, &config(1));
        let p1 = course().make_usage_key("problem", "p1");
        dispatcher
            .score_changed(&ScoreEvent::new(LearnerId(1), course(), &p1))
            .await
            .unwrap();

        let summary = dispatcher.shutdown().await.unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(store.grade_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_task_fails_without_retry() {
        let (_store, recalc) = recalculator(PersistentGradesFlag::enabled_for_all());
        let dispatcher = TaskDispatcher::start(recalc, &config(1));
        let args = json!({ "course_id": course().to_string() });
        dispatcher.enqueue(args.as_object().unwrap().clone()).await.unwrap();

        let summary = dispatcher.shutdown().await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.retries, 0);
    }

    #[tokio::test]
    async fn test_missing_course_is_retried_then_failed() {
        let (store, recalc) = recalculator(PersistentGradesFlag::enabled_for_all());
        store.remove_course(&course());
        let dispatcher = TaskDispatcher::start(recalc, &config(1));
        let p1 = course().make_usage_key("problem", "p1");
        dispatcher
            .score_changed(&ScoreEvent::new(LearnerId(1), course(), &p1))
            .await
            .unwrap();

        let summary = dispatcher.shutdown().await.unwrap();
        assert_eq!(summary.retries, 1);
        assert_eq!(summary.failed, 1);
    }
}
