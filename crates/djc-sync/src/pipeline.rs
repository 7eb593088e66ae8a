//! One collection run: listing -> validate -> dedup -> detail -> tags -> persist.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local, NaiveDate, Utc};
use djc_adapters::{AdapterContext, AdapterError, SourceGateway};
use djc_core::{
    validate_summary, NewJobPosting, PostingId, RawJobRecord, SourcePlatform, ValidationError,
};
use djc_storage::{InsertOutcome, PostingStore, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::tags::TagNormalizer;

pub const DEFAULT_DETAIL_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct CollectOptions {
    /// Pause after every detail fetch.
    pub detail_delay: Duration,
    /// When set, each run writes `<dir>/<run_id>/collect_summary.json`.
    pub reports_dir: Option<PathBuf>,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            detail_delay: DEFAULT_DETAIL_DELAY,
            reports_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    NoListings,
    SourceUnavailable { reason: String },
    Aborted { reason: String },
    Interrupted,
}

impl RunOutcome {
    /// Whether the run ended before processing its listing page.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::SourceUnavailable { .. } | Self::Aborted { .. })
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => f.write_str("completed"),
            Self::NoListings => f.write_str("no listings"),
            Self::SourceUnavailable { reason } => write!(f, "source unavailable: {reason}"),
            Self::Aborted { reason } => write!(f, "aborted: {reason}"),
            Self::Interrupted => f.write_str("interrupted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectRunSummary {
    pub run_id: Uuid,
    pub source: SourcePlatform,
    pub requested: usize,
    pub new_count: usize,
    pub skipped: usize,
    pub errors: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub outcome: RunOutcome,
    /// `new_count / requested`; absent when nothing was requested.
    pub success_rate: Option<f64>,
}

impl CollectRunSummary {
    pub fn success_rate_label(&self) -> String {
        match self.success_rate {
            Some(rate) => format!("{:.1}%", rate * 100.0),
            None => "N/A".to_string(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    new_count: usize,
    skipped: usize,
    errors: usize,
}

#[derive(Debug, Error)]
enum ItemError {
    #[error("detail fetch failed: {0}")]
    Detail(#[from] AdapterError),
    #[error("detail response unsuccessful or empty")]
    DetailUnavailable,
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

enum ItemResult {
    Inserted(PostingId),
    AlreadyStored,
}

pub struct CollectPipeline {
    store: Arc<dyn PostingStore>,
    gateway: Arc<dyn SourceGateway>,
    tags: TagNormalizer,
    options: CollectOptions,
    cancel: CancellationToken,
}

impl CollectPipeline {
    pub fn new(
        store: Arc<dyn PostingStore>,
        gateway: Arc<dyn SourceGateway>,
        options: CollectOptions,
    ) -> Self {
        Self {
            tags: TagNormalizer::new(store.clone()),
            store,
            gateway,
            options,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Cancelling this token stops in-flight runs at their next detail pause.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn source(&self) -> SourcePlatform {
        self.gateway.source_platform()
    }

    pub fn store(&self) -> Arc<dyn PostingStore> {
        self.store.clone()
    }

    /// Runs one collection batch of `requested` listings. Never fails: source and
    /// store failures end the run early and are reported through the summary outcome.
    pub async fn run_once(&self, requested: usize) -> CollectRunSummary {
        let run_id = Uuid::new_v4();
        let source = self.source();
        let span = info_span!("collect_run", %run_id, source = source.as_str(), requested);

        async move {
            let started_at = Utc::now();
            let clock = Instant::now();
            let ctx = AdapterContext::new(run_id);
            let mut tally = Tally::default();

            info!("collection run started");
            let outcome = self.collect(&ctx, requested, &mut tally).await;

            let summary = CollectRunSummary {
                run_id,
                source,
                requested,
                new_count: tally.new_count,
                skipped: tally.skipped,
                errors: tally.errors,
                started_at,
                finished_at: Utc::now(),
                elapsed_ms: u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX),
                success_rate: (requested > 0).then(|| tally.new_count as f64 / requested as f64),
                outcome,
            };

            info!(
                new = summary.new_count,
                skipped = summary.skipped,
                errors = summary.errors,
                elapsed_ms = summary.elapsed_ms,
                success_rate = %summary.success_rate_label(),
                outcome = %summary.outcome,
                "collection run finished"
            );

            if let Some(dir) = &self.options.reports_dir {
                match crate::write_run_report(dir, &summary).await {
                    Ok(path) => debug!(path = %path.display(), "wrote run report"),
                    Err(err) => warn!(error = %err, "failed to write run report"),
                }
            }

            summary
        }
        .instrument(span)
        .await
    }

    async fn collect(
        &self,
        ctx: &AdapterContext,
        requested: usize,
        tally: &mut Tally,
    ) -> RunOutcome {
        if requested == 0 {
            return RunOutcome::NoListings;
        }
        let source = self.source();
        let page_size = u32::try_from(requested).unwrap_or(u32::MAX);

        let page = match self.gateway.fetch_listing(ctx, 0, page_size).await {
            Ok(page) => page,
            Err(err) => {
                error!(error = %err, "listing fetch failed");
                return RunOutcome::SourceUnavailable {
                    reason: err.to_string(),
                };
            }
        };
        if !page.success {
            warn!("listing response unsuccessful");
            return RunOutcome::SourceUnavailable {
                reason: "listing response unsuccessful".to_string(),
            };
        }
        if page.summaries.is_empty() {
            info!(total_count = page.total_count, "listing page is empty");
            return RunOutcome::NoListings;
        }
        debug!(
            fetched = page.summaries.len(),
            total_count = page.total_count,
            "listing page fetched"
        );

        let ids: Vec<String> = page
            .summaries
            .iter()
            .filter_map(|s| s.natural_id().map(str::to_string))
            .collect();
        let mut known = match self.store.existing_identifiers(source, &ids).await {
            Ok(known) => known,
            Err(err) => {
                error!(error = %err, "batched existence check failed");
                return RunOutcome::Aborted {
                    reason: err.to_string(),
                };
            }
        };

        let last_index = page.summaries.len() - 1;
        for (index, summary) in page.summaries.iter().enumerate() {
            if let Err(err) = validate_summary(summary) {
                tally.errors += 1;
                warn!(serial = ?summary.serial_number, error = %err, "invalid listing summary");
                continue;
            }
            let Some(id) = summary.natural_id() else {
                continue;
            };
            if known.contains(id) {
                tally.skipped += 1;
                debug!(serial = id, "already collected");
                continue;
            }

            match self.ingest(ctx, id).await {
                Ok(ItemResult::Inserted(posting_id)) => {
                    tally.new_count += 1;
                    known.insert(id.to_string());
                    debug!(serial = id, posting_id, "stored posting");
                }
                Ok(ItemResult::AlreadyStored) => {
                    tally.skipped += 1;
                    known.insert(id.to_string());
                    debug!(serial = id, "stored by a concurrent run");
                }
                Err(err) => {
                    tally.errors += 1;
                    warn!(serial = id, error = %err, "failed to collect posting");
                }
            }

            if index < last_index && self.pause().await.is_err() {
                info!("collection interrupted during detail pause");
                return RunOutcome::Interrupted;
            }
        }

        RunOutcome::Completed
    }

    async fn ingest(&self, ctx: &AdapterContext, id: &str) -> Result<ItemResult, ItemError> {
        let source = self.source();
        let response = self.gateway.fetch_detail(ctx, id).await?;
        let mut record = match response.detail {
            Some(record) if response.success => record,
            _ => return Err(ItemError::DetailUnavailable),
        };
        fill_serial(&mut record, id);

        if self.store.exists_by_key(source, id).await? {
            return Ok(ItemResult::AlreadyStored);
        }

        let mut posting = NewJobPosting::from_record(source, &record, today())?;
        if let Some(category) = posting.job_category.clone() {
            for tag in self.tags.resolve(&category).await? {
                posting.add_tag(&tag);
            }
        }

        match self.store.insert_posting(&posting).await? {
            InsertOutcome::Inserted(posting_id) => Ok(ItemResult::Inserted(posting_id)),
            InsertOutcome::Duplicate => Ok(ItemResult::AlreadyStored),
        }
    }

    async fn pause(&self) -> Result<(), Interrupted> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Interrupted),
            _ = tokio::time::sleep(self.options.detail_delay) => Ok(()),
        }
    }
}

struct Interrupted;

// Detail responses occasionally omit the serial the listing used to request them.
fn fill_serial(record: &mut RawJobRecord, id: &str) {
    if record.natural_id().is_none() {
        record.serial_number = Some(id.to_string());
    }
}

/// Posting dates are calendar dates in the source's local time.
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use djc_adapters::{
        FixtureGateway, PublicDataDetailResponse, PublicDataListResponse, PublicJobItem,
    };
    use std::collections::HashSet;

    use djc_core::{AttachmentFile, DetailResponse, JobPosting, ListingPage, TechTag};
    use djc_storage::MemoryPostingStore;

    use super::*;

    fn item(sn: &str, category: &str) -> PublicJobItem {
        PublicJobItem {
            recrut_pblnt_sn: Some(sn.to_string()),
            inst_nm: Some("한국수자원공사".to_string()),
            recrut_pbanc_ttl: Some(format!("{sn} 전산직 채용")),
            ncs_cd_nm_lst: Some(category.to_string()),
            pbanc_bgng_ymd: Some("20990101".to_string()),
            pbanc_end_ymd: Some("20990131".to_string()),
            src_url: Some(format!("https://job.alio.go.kr/recruitview.do?idx={sn}")),
            ..Default::default()
        }
    }

    fn listing(items: Vec<PublicJobItem>) -> PublicDataListResponse {
        PublicDataListResponse {
            result_code: Some(200),
            result_msg: None,
            total_count: Some(items.len() as u64),
            result: Some(items),
        }
    }

    fn detail(item: PublicJobItem) -> PublicDataDetailResponse {
        PublicDataDetailResponse {
            result_code: Some(200),
            result_msg: None,
            result: Some(item),
        }
    }

    fn gateway_with_details(items: Vec<PublicJobItem>) -> FixtureGateway {
        let mut gateway = FixtureGateway::new(SourcePlatform::PublicAlio, listing(items.clone()));
        for it in items {
            let sn = it.recrut_pblnt_sn.clone().unwrap();
            gateway = gateway.with_detail(&sn, detail(it));
        }
        gateway
    }

    fn no_delay() -> CollectOptions {
        CollectOptions {
            detail_delay: Duration::ZERO,
            reports_dir: None,
        }
    }

    fn pipeline(store: &Arc<MemoryPostingStore>, gateway: &Arc<FixtureGateway>) -> CollectPipeline {
        CollectPipeline::new(store.clone(), gateway.clone(), no_delay())
    }

    #[tokio::test]
    async fn second_run_over_same_listing_inserts_nothing() {
        let store = Arc::new(MemoryPostingStore::new());
        let gateway = Arc::new(gateway_with_details(vec![
            item("A", "Java"),
            item("B", "Kotlin"),
            item("C", "Go"),
        ]));
        let pipeline = pipeline(&store, &gateway);

        let first = pipeline.run_once(10).await;
        assert_eq!(first.outcome, RunOutcome::Completed);
        assert_eq!((first.new_count, first.skipped, first.errors), (3, 0, 0));

        let second = pipeline.run_once(10).await;
        assert_eq!((second.new_count, second.skipped, second.errors), (0, 3, 0));
        assert_eq!(store.postings().await.len(), 3);
        assert_eq!(gateway.detail_requests().await.len(), 3);
    }

    #[tokio::test]
    async fn known_ids_are_skipped_without_detail_fetch() {
        let store = Arc::new(MemoryPostingStore::new());
        let gateway = Arc::new(gateway_with_details(vec![
            item("A", "Java"),
            item("B", "React"),
            item("C", "Go"),
        ]));
        let today = today();
        for sn in ["A", "C"] {
            let record = RawJobRecord::from(item(sn, "Java"));
            let posting =
                NewJobPosting::from_record(SourcePlatform::PublicAlio, &record, today).unwrap();
            store.insert_posting(&posting).await.unwrap();
        }

        let summary = pipeline(&store, &gateway).run_once(3).await;

        assert_eq!((summary.new_count, summary.skipped, summary.errors), (1, 2, 0));
        assert_eq!(gateway.detail_requests().await, vec!["B"]);
        assert_eq!(store.existence_query_count(), 1);
        assert_eq!(summary.success_rate, Some(1.0 / 3.0));
    }

    #[tokio::test]
    async fn detail_failure_is_isolated_to_its_item() {
        let store = Arc::new(MemoryPostingStore::new());
        let items: Vec<_> = ["1", "2", "3", "4", "5"].iter().map(|sn| item(sn, "Java")).collect();
        let mut gateway = FixtureGateway::new(SourcePlatform::PublicAlio, listing(items.clone()));
        for it in items.into_iter().filter(|i| i.recrut_pblnt_sn.as_deref() != Some("2")) {
            let sn = it.recrut_pblnt_sn.clone().unwrap();
            gateway = gateway.with_detail(&sn, detail(it));
        }
        let gateway = Arc::new(gateway);

        let summary = pipeline(&store, &gateway).run_once(5).await;

        assert_eq!(summary.outcome, RunOutcome::Completed);
        assert_eq!((summary.new_count, summary.skipped, summary.errors), (4, 0, 1));
        assert_eq!(gateway.detail_requests().await, vec!["1", "2", "3", "4", "5"]);
        assert!(!store
            .exists_by_key(SourcePlatform::PublicAlio, "2")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn invalid_summaries_and_bad_dates_count_as_errors() {
        let store = Arc::new(MemoryPostingStore::new());
        let mut untitled = item("NO-TITLE", "Java");
        untitled.recrut_pbanc_ttl = None;
        let mut inverted = item("INVERTED", "Java");
        inverted.pbanc_bgng_ymd = Some("20990201".to_string());
        let mut undated = item("UNDATED", "Java");
        undated.pbanc_end_ymd = Some("2099-01-31".to_string());
        let gateway = Arc::new(gateway_with_details(vec![
            untitled,
            inverted,
            undated,
            item("OK", "Java"),
        ]));

        let summary = pipeline(&store, &gateway).run_once(4).await;

        assert_eq!((summary.new_count, summary.skipped, summary.errors), (1, 0, 3));
        assert_eq!(gateway.detail_requests().await, vec!["INVERTED", "UNDATED", "OK"]);
        for posting in store.postings().await {
            assert!(posting.end_date >= posting.start_date);
        }
    }

    #[tokio::test]
    async fn duplicate_within_one_page_is_stored_once() {
        let store = Arc::new(MemoryPostingStore::new());
        let gateway = Arc::new(gateway_with_details(vec![item("A", "Java"), item("A", "Java")]));

        let summary = pipeline(&store, &gateway).run_once(2).await;

        assert_eq!((summary.new_count, summary.skipped, summary.errors), (1, 1, 0));
        assert_eq!(gateway.detail_requests().await, vec!["A"]);
    }

    #[tokio::test]
    async fn categories_become_linked_tags_and_files_are_kept() {
        let store = Arc::new(MemoryPostingStore::new());
        let mut with_files = item("T", "Java, React/Node .NET 12 --");
        with_files.files = Some(vec![djc_adapters::PublicFileItem {
            atch_file_nm: Some("공고문.pdf".to_string()),
            url: Some("https://job.alio.go.kr/file/1".to_string()),
        }]);
        let gateway = Arc::new(gateway_with_details(vec![with_files, item("U", "Java")]));

        pipeline(&store, &gateway).run_once(2).await;

        let posting = store
            .find_posting_by_key(SourcePlatform::PublicAlio, "T")
            .await
            .unwrap()
            .unwrap();
        let names: Vec<_> = store
            .tags_for_posting(posting.id)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["Java", "React", "Node", ".NET"]);
        assert_eq!(store.files_for_posting(posting.id).await.unwrap().len(), 1);
        assert_eq!(store.tags().await.len(), 4);
        assert_eq!(posting.experience, djc_core::UNSPECIFIED_EXPERIENCE);
    }

    #[tokio::test]
    async fn overlapping_runs_never_duplicate_postings() {
        let store = Arc::new(MemoryPostingStore::new());
        let items = vec![item("A", "Java"), item("B", "Java"), item("C", "Java")];
        let a = CollectPipeline::new(
            store.clone(),
            Arc::new(gateway_with_details(items.clone())),
            no_delay(),
        );
        let b = CollectPipeline::new(
            store.clone(),
            Arc::new(gateway_with_details(items)),
            no_delay(),
        );

        let (left, right) = tokio::join!(a.run_once(3), b.run_once(3));

        assert_eq!(left.new_count + right.new_count, 3);
        assert_eq!(left.errors + right.errors, 0);
        assert_eq!(store.postings().await.len(), 3);
        assert_eq!(store.tags().await.len(), 1);
    }

    /// What the wrapped store answers for existence checks.
    #[derive(Clone, Copy)]
    enum Existence {
        /// Always "absent", so only the insert itself sees earlier rows.
        Stale,
        /// The batched query fails as if the database were unreachable.
        Down,
    }

    struct ScriptedStore {
        inner: MemoryPostingStore,
        existence: Existence,
    }

    impl ScriptedStore {
        fn new(existence: Existence) -> Self {
            Self {
                inner: MemoryPostingStore::new(),
                existence,
            }
        }
    }

    #[async_trait]
    impl PostingStore for ScriptedStore {
        async fn existing_identifiers(
            &self,
            _source: SourcePlatform,
            _ids: &[String],
        ) -> Result<HashSet<String>, StoreError> {
            match self.existence {
                Existence::Stale => Ok(HashSet::new()),
                Existence::Down => Err(StoreError::Database(sqlx::Error::PoolTimedOut)),
            }
        }

        async fn exists_by_key(
            &self,
            _source: SourcePlatform,
            _original_sn: &str,
        ) -> Result<bool, StoreError> {
            match self.existence {
                Existence::Stale => Ok(false),
                Existence::Down => Err(StoreError::Database(sqlx::Error::PoolTimedOut)),
            }
        }

        async fn insert_posting(
            &self,
            posting: &NewJobPosting,
        ) -> Result<InsertOutcome, StoreError> {
            self.inner.insert_posting(posting).await
        }

        async fn find_posting_by_key(
            &self,
            source: SourcePlatform,
            original_sn: &str,
        ) -> Result<Option<JobPosting>, StoreError> {
            self.inner.find_posting_by_key(source, original_sn).await
        }

        async fn tags_for_posting(
            &self,
            posting_id: PostingId,
        ) -> Result<Vec<TechTag>, StoreError> {
            self.inner.tags_for_posting(posting_id).await
        }

        async fn files_for_posting(
            &self,
            posting_id: PostingId,
        ) -> Result<Vec<AttachmentFile>, StoreError> {
            self.inner.files_for_posting(posting_id).await
        }

        async fn find_tag_by_name(&self, name: &str) -> Result<Option<TechTag>, StoreError> {
            self.inner.find_tag_by_name(name).await
        }

        async fn create_tag(&self, name: &str) -> Result<TechTag, StoreError> {
            self.inner.create_tag(name).await
        }

        async fn deactivate_expired(&self, today: NaiveDate) -> Result<u64, StoreError> {
            self.inner.deactivate_expired(today).await
        }

        async fn find_inactive_ids_older_than(
            &self,
            threshold: NaiveDate,
        ) -> Result<Vec<PostingId>, StoreError> {
            self.inner.find_inactive_ids_older_than(threshold).await
        }

        async fn delete_inactive_older_than(
            &self,
            threshold: NaiveDate,
        ) -> Result<u64, StoreError> {
            self.inner.delete_inactive_older_than(threshold).await
        }
    }

    #[tokio::test]
    async fn insert_conflict_counts_as_skip_when_existence_checks_miss_it() {
        let store = Arc::new(ScriptedStore::new(Existence::Stale));
        let gateway = Arc::new(gateway_with_details(vec![item("A", "Java")]));
        let pipeline = CollectPipeline::new(store.clone(), gateway.clone(), no_delay());

        let first = pipeline.run_once(1).await;
        assert_eq!((first.new_count, first.skipped, first.errors), (1, 0, 0));

        let second = pipeline.run_once(1).await;
        assert_eq!(second.outcome, RunOutcome::Completed);
        assert_eq!((second.new_count, second.skipped, second.errors), (0, 1, 0));
        assert_eq!(gateway.detail_requests().await, vec!["A", "A"]);
        assert_eq!(store.inner.postings().await.len(), 1);
    }

    #[tokio::test]
    async fn failed_existence_query_aborts_before_any_detail_fetch() {
        let store = Arc::new(ScriptedStore::new(Existence::Down));
        let gateway = Arc::new(gateway_with_details(vec![item("A", "Java"), item("B", "Go")]));
        let pipeline = CollectPipeline::new(store.clone(), gateway.clone(), no_delay());

        let summary = pipeline.run_once(2).await;

        assert!(matches!(summary.outcome, RunOutcome::Aborted { .. }));
        assert!(summary.outcome.is_failure());
        assert_eq!((summary.new_count, summary.skipped, summary.errors), (0, 0, 0));
        assert!(gateway.detail_requests().await.is_empty());
        assert!(store.inner.postings().await.is_empty());
    }

    #[tokio::test]
    async fn cancellation_after_the_last_item_still_completes() {
        let store = Arc::new(MemoryPostingStore::new());
        let gateway = Arc::new(gateway_with_details(vec![item("A", "Java")]));
        let pipeline = CollectPipeline::new(
            store.clone(),
            gateway.clone(),
            CollectOptions {
                detail_delay: Duration::from_secs(60),
                reports_dir: None,
            },
        );
        pipeline.cancellation_token().cancel();

        let summary = pipeline.run_once(1).await;

        assert_eq!(summary.outcome, RunOutcome::Completed);
        assert_eq!(summary.new_count, 1);
        assert!(summary.elapsed_ms < 60_000);
    }

    #[tokio::test]
    async fn cancellation_stops_after_current_item() {
        let store = Arc::new(MemoryPostingStore::new());
        let gateway = Arc::new(gateway_with_details(vec![
            item("A", "Java"),
            item("B", "Java"),
            item("C", "Java"),
        ]));
        let pipeline = pipeline(&store, &gateway);
        pipeline.cancellation_token().cancel();

        let summary = pipeline.run_once(3).await;

        assert_eq!(summary.outcome, RunOutcome::Interrupted);
        assert_eq!(summary.new_count, 1);
        assert_eq!(gateway.detail_requests().await, vec!["A"]);
    }

    #[tokio::test]
    async fn zero_requested_short_circuits() {
        let store = Arc::new(MemoryPostingStore::new());
        let gateway = Arc::new(gateway_with_details(vec![item("A", "Java")]));

        let summary = pipeline(&store, &gateway).run_once(0).await;

        assert_eq!(summary.outcome, RunOutcome::NoListings);
        assert_eq!(summary.success_rate, None);
        assert_eq!(summary.success_rate_label(), "N/A");
        assert_eq!(store.existence_query_count(), 0);
    }

    #[tokio::test]
    async fn empty_and_unsuccessful_listings_end_the_run() {
        let store = Arc::new(MemoryPostingStore::new());
        let empty = Arc::new(FixtureGateway::new(SourcePlatform::PublicAlio, listing(Vec::new())));
        let summary = pipeline(&store, &empty).run_once(10).await;
        assert_eq!(summary.outcome, RunOutcome::NoListings);

        let rejected = Arc::new(FixtureGateway::new(
            SourcePlatform::PublicAlio,
            PublicDataListResponse {
                result_code: Some(30),
                result_msg: Some("SERVICE KEY IS NOT REGISTERED ERROR".to_string()),
                ..Default::default()
            },
        ));
        let summary = pipeline(&store, &rejected).run_once(10).await;
        assert!(matches!(summary.outcome, RunOutcome::SourceUnavailable { .. }));
        assert_eq!((summary.new_count, summary.skipped, summary.errors), (0, 0, 0));
        assert_eq!(store.existence_query_count(), 0);
    }

    struct DownGateway;

    #[async_trait]
    impl SourceGateway for DownGateway {
        fn source_platform(&self) -> SourcePlatform {
            SourcePlatform::PublicAlio
        }

        async fn fetch_listing(
            &self,
            _ctx: &AdapterContext,
            _page_index: u32,
            _page_size: u32,
        ) -> Result<ListingPage, AdapterError> {
            Err(AdapterError::Anyhow(anyhow::anyhow!("connection refused")))
        }

        async fn fetch_detail(
            &self,
            _ctx: &AdapterContext,
            _natural_id: &str,
        ) -> Result<DetailResponse, AdapterError> {
            Err(AdapterError::Anyhow(anyhow::anyhow!("connection refused")))
        }
    }

    #[tokio::test]
    async fn gateway_error_is_source_unavailable() {
        let store = Arc::new(MemoryPostingStore::new());
        let pipeline = CollectPipeline::new(store, Arc::new(DownGateway), no_delay());

        let summary = pipeline.run_once(5).await;

        assert_eq!(
            summary.outcome,
            RunOutcome::SourceUnavailable {
                reason: "connection refused".to_string()
            }
        );
        assert!(summary.outcome.is_failure());
        assert_eq!(summary.success_rate, Some(0.0));
    }

    #[tokio::test]
    async fn summary_is_written_to_reports_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryPostingStore::new());
        let gateway = Arc::new(gateway_with_details(vec![item("A", "Java")]));
        let pipeline = CollectPipeline::new(
            store,
            gateway,
            CollectOptions {
                detail_delay: Duration::ZERO,
                reports_dir: Some(dir.path().to_path_buf()),
            },
        );

        let summary = pipeline.run_once(1).await;

        let path = dir
            .path()
            .join(summary.run_id.to_string())
            .join(crate::SUMMARY_FILE_NAME);
        let written: CollectRunSummary =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(written, summary);
    }
}
