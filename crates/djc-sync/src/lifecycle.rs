//! Time-driven posting transitions: ACTIVE -> EXPIRED -> PURGED.

use std::sync::Arc;

use chrono::{Months, NaiveDate};
use djc_core::PostingId;
use djc_storage::{PostingStore, StoreError};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub retention_months: u32,
    /// Upper bound on purged ids written to the log.
    pub sample_size: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            retention_months: 12,
            sample_size: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpireReport {
    pub today: NaiveDate,
    pub deactivated: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub threshold: NaiveDate,
    pub candidates: usize,
    pub sample: Vec<PostingId>,
    pub deleted: u64,
}

pub struct LifecycleSweeper {
    store: Arc<dyn PostingStore>,
    policy: RetentionPolicy,
}

impl LifecycleSweeper {
    pub fn new(store: Arc<dyn PostingStore>, policy: RetentionPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    pub fn retention_threshold(&self, today: NaiveDate) -> NaiveDate {
        today
            .checked_sub_months(Months::new(self.policy.retention_months))
            .unwrap_or(NaiveDate::MIN)
    }

    /// Deactivates every active posting whose end date is before `today`.
    pub async fn expire(&self, today: NaiveDate) -> Result<ExpireReport, StoreError> {
        let deactivated = self.store.deactivate_expired(today).await?;
        info!(%today, deactivated, "expiration sweep finished");
        Ok(ExpireReport { today, deactivated })
    }

    /// Deletes inactive postings that ended before the retention threshold. Files and tag
    /// links go with them; tags stay.
    pub async fn purge(&self, today: NaiveDate) -> Result<PurgeReport, StoreError> {
        let threshold = self.retention_threshold(today);
        let ids = self.store.find_inactive_ids_older_than(threshold).await?;
        let sample: Vec<PostingId> = ids.iter().copied().take(self.policy.sample_size).collect();

        if ids.is_empty() {
            info!(%threshold, "purge sweep found nothing to delete");
            return Ok(PurgeReport {
                threshold,
                candidates: 0,
                sample,
                deleted: 0,
            });
        }

        info!(%threshold, candidates = ids.len(), sample = ?sample, "purging inactive postings");
        let deleted = self.store.delete_inactive_older_than(threshold).await?;
        if deleted != ids.len() as u64 {
            warn!(
                candidates = ids.len(),
                deleted,
                "purge count differs from candidate count; rows changed between statements"
            );
        }
        info!(%threshold, deleted, "purge sweep finished");

        Ok(PurgeReport {
            threshold,
            candidates: ids.len(),
            sample,
            deleted,
        })
    }
}
