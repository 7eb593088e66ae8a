//! In-process store with the same uniqueness and cascade rules as the Postgres schema.
//! Backs offline fixture runs and the test suites of the higher crates.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use djc_core::{
    AttachmentFile, JobPosting, NewJobPosting, PostingId, PostingTagLink, SourcePlatform, TagId,
    TechTag,
};
use tokio::sync::Mutex;

use crate::{check_date_range, InsertOutcome, PostingStore, StoreError};

#[derive(Debug, Default)]
struct MemoryState {
    last_posting_id: PostingId,
    last_tag_id: TagId,
    postings: BTreeMap<PostingId, JobPosting>,
    keys: HashMap<(SourcePlatform, String), PostingId>,
    files: BTreeMap<PostingId, Vec<AttachmentFile>>,
    tags: BTreeMap<TagId, TechTag>,
    tag_names: HashMap<String, TagId>,
    links: Vec<PostingTagLink>,
}

impl MemoryState {
    fn insert(&mut self, posting: &NewJobPosting, active: bool) -> InsertOutcome {
        let key = (posting.source_platform, posting.original_sn.clone());
        if self.keys.contains_key(&key) {
            return InsertOutcome::Duplicate;
        }

        self.last_posting_id += 1;
        let id = self.last_posting_id;
        self.keys.insert(key, id);
        self.postings.insert(
            id,
            JobPosting {
                id,
                source_platform: posting.source_platform,
                original_sn: posting.original_sn.clone(),
                company_name: posting.company_name.clone(),
                title: posting.title.clone(),
                job_category: posting.job_category.clone(),
                experience: posting.experience.clone(),
                location: posting.location.clone(),
                hire_type: posting.hire_type.clone(),
                start_date: posting.start_date,
                end_date: posting.end_date,
                original_url: posting.original_url.clone(),
                apply_qual: posting.apply_qual.clone(),
                process_info: posting.process_info.clone(),
                active,
                created_at: Utc::now(),
            },
        );
        self.files.insert(id, posting.files.clone());
        for tag_id in &posting.tag_ids {
            let link = PostingTagLink {
                posting_id: id,
                tag_id: *tag_id,
            };
            if !self.links.contains(&link) {
                self.links.push(link);
            }
        }
        InsertOutcome::Inserted(id)
    }

    fn purgeable(&self, threshold: NaiveDate) -> Vec<PostingId> {
        self.postings
            .values()
            .filter(|p| !p.active && p.end_date < threshold)
            .map(|p| p.id)
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct MemoryPostingStore {
    state: Mutex<MemoryState>,
    existence_queries: AtomicUsize,
}

impl MemoryPostingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a posting directly, bypassing ingestion, with an explicit `active` flag.
    pub async fn seed(
        &self,
        posting: &NewJobPosting,
        active: bool,
    ) -> Result<PostingId, StoreError> {
        check_date_range(posting)?;
        match self.state.lock().await.insert(posting, active) {
            InsertOutcome::Inserted(id) => Ok(id),
            InsertOutcome::Duplicate => Err(StoreError::Conflict(posting.original_sn.clone())),
        }
    }

    pub async fn postings(&self) -> Vec<JobPosting> {
        self.state.lock().await.postings.values().cloned().collect()
    }

    pub async fn posting(&self, id: PostingId) -> Option<JobPosting> {
        self.state.lock().await.postings.get(&id).cloned()
    }

    pub async fn tags(&self) -> Vec<TechTag> {
        self.state.lock().await.tags.values().cloned().collect()
    }

    pub async fn links(&self) -> Vec<PostingTagLink> {
        self.state.lock().await.links.clone()
    }

    /// Number of batched `existing_identifiers` calls served so far.
    pub fn existence_query_count(&self) -> usize {
        self.existence_queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PostingStore for MemoryPostingStore {
    async fn existing_identifiers(
        &self,
        source: SourcePlatform,
        ids: &[String],
    ) -> Result<HashSet<String>, StoreError> {
        self.existence_queries.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().await;
        Ok(ids
            .iter()
            .filter(|id| state.keys.contains_key(&(source, (*id).clone())))
            .cloned()
            .collect())
    }

    async fn exists_by_key(
        &self,
        source: SourcePlatform,
        original_sn: &str,
    ) -> Result<bool, StoreError> {
        let state = self.state.lock().await;
        Ok(state.keys.contains_key(&(source, original_sn.to_string())))
    }

    async fn insert_posting(&self, posting: &NewJobPosting) -> Result<InsertOutcome, StoreError> {
        check_date_range(posting)?;
        let mut state = self.state.lock().await;
        if let Some(missing) = posting.tag_ids.iter().find(|id| !state.tags.contains_key(*id)) {
            return Err(StoreError::Invalid(format!("unknown tag id {missing}")));
        }
        Ok(state.insert(posting, true))
    }

    async fn find_posting_by_key(
        &self,
        source: SourcePlatform,
        original_sn: &str,
    ) -> Result<Option<JobPosting>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .keys
            .get(&(source, original_sn.to_string()))
            .and_then(|id| state.postings.get(id))
            .cloned())
    }

    async fn tags_for_posting(&self, posting_id: PostingId) -> Result<Vec<TechTag>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .links
            .iter()
            .filter(|l| l.posting_id == posting_id)
            .filter_map(|l| state.tags.get(&l.tag_id).cloned())
            .collect())
    }

    async fn files_for_posting(
        &self,
        posting_id: PostingId,
    ) -> Result<Vec<AttachmentFile>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.files.get(&posting_id).cloned().unwrap_or_default())
    }

    async fn find_tag_by_name(&self, name: &str) -> Result<Option<TechTag>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .tag_names
            .get(name)
            .and_then(|id| state.tags.get(id))
            .cloned())
    }

    async fn create_tag(&self, name: &str) -> Result<TechTag, StoreError> {
        let mut state = self.state.lock().await;
        if state.tag_names.contains_key(name) {
            return Err(StoreError::Conflict(name.to_string()));
        }
        state.last_tag_id += 1;
        let tag = TechTag {
            id: state.last_tag_id,
            name: name.to_string(),
        };
        state.tag_names.insert(tag.name.clone(), tag.id);
        state.tags.insert(tag.id, tag.clone());
        Ok(tag)
    }

    async fn deactivate_expired(&self, today: NaiveDate) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let mut changed = 0;
        for posting in state.postings.values_mut() {
            if posting.active && posting.end_date < today {
                posting.active = false;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn find_inactive_ids_older_than(
        &self,
        threshold: NaiveDate,
    ) -> Result<Vec<PostingId>, StoreError> {
        Ok(self.state.lock().await.purgeable(threshold))
    }

    async fn delete_inactive_older_than(&self, threshold: NaiveDate) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let doomed: HashSet<PostingId> = state.purgeable(threshold).into_iter().collect();
        for id in &doomed {
            if let Some(posting) = state.postings.remove(id) {
                state.keys.remove(&(posting.source_platform, posting.original_sn));
            }
            state.files.remove(id);
        }
        state.links.retain(|l| !doomed.contains(&l.posting_id));
        Ok(doomed.len() as u64)
    }
}
