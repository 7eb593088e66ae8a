//! Cron wiring for the collection run and the two lifecycle sweeps.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::lifecycle::LifecycleSweeper;
use crate::pipeline::{today, CollectPipeline};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub collect_cron: String,
    pub expire_cron: String,
    pub purge_cron: String,
    pub batch_size: usize,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            collect_cron: "0 0 10,16 * * *".to_string(),
            expire_cron: "0 5 0 * * *".to_string(),
            purge_cron: "0 0 3 * * Sun".to_string(),
            batch_size: 100,
        }
    }
}

/// Runs `work` unless the previous invocation of the same job still holds `running`.
/// Returns whether `work` ran.
pub async fn run_exclusive<F>(job: &'static str, running: &Mutex<()>, work: F) -> bool
where
    F: Future<Output = ()>,
{
    let Ok(_guard) = running.try_lock() else {
        warn!(job, "previous invocation still running; skipping this trigger");
        return false;
    };
    work.await;
    true
}

pub async fn build_scheduler(
    schedule: &ScheduleConfig,
    pipeline: Arc<CollectPipeline>,
    sweeper: Arc<LifecycleSweeper>,
) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;

    let running = Arc::new(Mutex::new(()));
    let batch_size = schedule.batch_size;
    let collect = Job::new_async(schedule.collect_cron.as_str(), move |_uuid, _l| {
        let pipeline = pipeline.clone();
        let running = running.clone();
        Box::pin(async move {
            run_exclusive("collect", &running, async {
                let summary = pipeline.run_once(batch_size).await;
                if summary.outcome.is_failure() {
                    warn!(
                        run_id = %summary.run_id,
                        outcome = %summary.outcome,
                        "scheduled collection failed"
                    );
                }
            })
            .await;
        })
    })
    .with_context(|| format!("creating collect job for cron {}", schedule.collect_cron))?;
    sched.add(collect).await.context("adding collect job")?;

    let running = Arc::new(Mutex::new(()));
    let expire_sweeper = sweeper.clone();
    let expire = Job::new_async(schedule.expire_cron.as_str(), move |_uuid, _l| {
        let sweeper = expire_sweeper.clone();
        let running = running.clone();
        Box::pin(async move {
            run_exclusive("expire", &running, async {
                if let Err(err) = sweeper.expire(today()).await {
                    error!(error = %err, "expiration sweep failed");
                }
            })
            .await;
        })
    })
    .with_context(|| format!("creating expire job for cron {}", schedule.expire_cron))?;
    sched.add(expire).await.context("adding expire job")?;

    let running = Arc::new(Mutex::new(()));
    let purge = Job::new_async(schedule.purge_cron.as_str(), move |_uuid, _l| {
        let sweeper = sweeper.clone();
        let running = running.clone();
        Box::pin(async move {
            run_exclusive("purge", &running, async {
                if let Err(err) = sweeper.purge(today()).await {
                    error!(error = %err, "purge sweep failed");
                }
            })
            .await;
        })
    })
    .with_context(|| format!("creating purge job for cron {}", schedule.purge_cron))?;
    sched.add(purge).await.context("adding purge job")?;

    info!(
        collect = %schedule.collect_cron,
        expire = %schedule.expire_cron,
        purge = %schedule.purge_cron,
        "scheduler configured"
    );
    Ok(sched)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use djc_adapters::{FixtureGateway, PublicDataListResponse};
    use djc_core::SourcePlatform;
    use djc_storage::MemoryPostingStore;

    use super::*;
    use crate::lifecycle::RetentionPolicy;
    use crate::pipeline::CollectOptions;

    fn parts() -> (Arc<CollectPipeline>, Arc<LifecycleSweeper>) {
        let store = Arc::new(MemoryPostingStore::new());
        let gateway = Arc::new(FixtureGateway::new(
            SourcePlatform::PublicAlio,
            PublicDataListResponse::default(),
        ));
        let pipeline = CollectPipeline::new(
            store.clone(),
            gateway,
            CollectOptions {
                detail_delay: Duration::ZERO,
                reports_dir: None,
            },
        );
        let sweeper = LifecycleSweeper::new(store, RetentionPolicy::default());
        (Arc::new(pipeline), Arc::new(sweeper))
    }

    #[tokio::test]
    async fn default_crons_build() {
        let (pipeline, sweeper) = parts();
        assert!(build_scheduler(&ScheduleConfig::default(), pipeline, sweeper)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn invalid_cron_is_reported() {
        let (pipeline, sweeper) = parts();
        let schedule = ScheduleConfig {
            expire_cron: "every day at noon".to_string(),
            ..ScheduleConfig::default()
        };
        let err = build_scheduler(&schedule, pipeline, sweeper)
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("expire job"));
    }

    #[tokio::test]
    async fn overlapping_trigger_is_skipped() {
        let running = Mutex::new(());
        let held = running.lock().await;

        let mut ran = false;
        assert!(!run_exclusive("collect", &running, async { ran = true }).await);
        assert!(!ran);

        drop(held);
        assert!(run_exclusive("collect", &running, async { ran = true }).await);
        assert!(ran);
    }
}
