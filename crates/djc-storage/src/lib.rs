//! Persistence contracts, the Postgres and in-memory stores, and HTTP fetch utilities for DJC.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::NaiveDate;
use djc_core::{
    AttachmentFile, JobPosting, NewJobPosting, PostingId, SourcePlatform, TechTag,
};
use thiserror::Error;

pub mod http;
pub mod memory;
pub mod postgres;

pub use http::{redact_query, FetchError, HttpClientConfig, HttpFetcher, RetryPolicy};
pub use memory::MemoryPostingStore;
pub use postgres::PgPostingStore;

pub const CRATE_NAME: &str = "djc-storage";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(PostingId),
    /// The natural key was already taken when the row was written.
    Duplicate,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated: {0}")]
    Conflict(String),
    #[error("invalid posting: {0}")]
    Invalid(String),
    #[error("stored row could not be decoded: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Durable storage for postings and tags.
///
/// Implementations enforce uniqueness of `(source_platform, original_sn)` and of tag names.
/// `insert_posting` writes the posting, its files and its tag links atomically.
#[async_trait]
pub trait PostingStore: Send + Sync {
    /// Returns the subset of `ids` already stored for `source`, in one round trip.
    async fn existing_identifiers(
        &self,
        source: SourcePlatform,
        ids: &[String],
    ) -> Result<HashSet<String>, StoreError>;

    async fn exists_by_key(
        &self,
        source: SourcePlatform,
        original_sn: &str,
    ) -> Result<bool, StoreError>;

    async fn insert_posting(&self, posting: &NewJobPosting) -> Result<InsertOutcome, StoreError>;

    async fn find_posting_by_key(
        &self,
        source: SourcePlatform,
        original_sn: &str,
    ) -> Result<Option<JobPosting>, StoreError>;

    async fn tags_for_posting(&self, posting_id: PostingId) -> Result<Vec<TechTag>, StoreError>;

    async fn files_for_posting(
        &self,
        posting_id: PostingId,
    ) -> Result<Vec<AttachmentFile>, StoreError>;

    async fn find_tag_by_name(&self, name: &str) -> Result<Option<TechTag>, StoreError>;

    /// Creates a tag. Returns `StoreError::Conflict` when another writer already holds the name.
    async fn create_tag(&self, name: &str) -> Result<TechTag, StoreError>;

    /// Flips `active` off for every active posting whose end date is before `today`.
    async fn deactivate_expired(&self, today: NaiveDate) -> Result<u64, StoreError>;

    async fn find_inactive_ids_older_than(
        &self,
        threshold: NaiveDate,
    ) -> Result<Vec<PostingId>, StoreError>;

    async fn delete_inactive_older_than(&self, threshold: NaiveDate) -> Result<u64, StoreError>;
}

pub(crate) fn check_date_range(posting: &NewJobPosting) -> Result<(), StoreError> {
    if posting.end_date < posting.start_date {
        return Err(StoreError::Invalid(format!(
            "{}: end date {} before start date {}",
            posting.original_sn, posting.end_date, posting.start_date
        )));
    }
    Ok(())
}
