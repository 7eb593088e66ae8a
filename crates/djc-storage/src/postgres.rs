use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use djc_core::{
    AttachmentFile, JobPosting, NewJobPosting, PostingId, SourcePlatform, TechTag,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::debug;

use crate::{check_date_range, InsertOutcome, PostingStore, StoreError};

#[derive(Debug, Clone)]
pub struct PgPostingStore {
    pool: PgPool,
}

impl PgPostingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct JobPostRow {
    id: i64,
    source_platform: String,
    original_sn: String,
    company_name: String,
    title: String,
    job_category: Option<String>,
    experience: String,
    location: Option<String>,
    hire_type: Option<String>,
    start_date: NaiveDate,
    end_date: NaiveDate,
    original_url: String,
    apply_qual: Option<String>,
    process_info: Option<String>,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<JobPostRow> for JobPosting {
    type Error = StoreError;

    fn try_from(row: JobPostRow) -> Result<Self, Self::Error> {
        let source_platform = row
            .source_platform
            .parse::<SourcePlatform>()
            .map_err(|e| StoreError::Corrupt(format!("job_posts.id={}: {e}", row.id)))?;
        Ok(JobPosting {
            id: row.id,
            source_platform,
            original_sn: row.original_sn,
            company_name: row.company_name,
            title: row.title,
            job_category: row.job_category,
            experience: row.experience,
            location: row.location,
            hire_type: row.hire_type,
            start_date: row.start_date,
            end_date: row.end_date,
            original_url: row.original_url,
            apply_qual: row.apply_qual,
            process_info: row.process_info,
            active: row.is_active,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TagRow {
    id: i32,
    stack_name: String,
}

impl From<TagRow> for TechTag {
    fn from(row: TagRow) -> Self {
        TechTag {
            id: row.id,
            name: row.stack_name,
        }
    }
}

fn map_unique_violation(err: sqlx::Error, what: &str) -> StoreError {
    match err.as_database_error() {
        Some(db) if db.is_unique_violation() => StoreError::Conflict(what.to_string()),
        _ => StoreError::Database(err),
    }
}

#[async_trait]
impl PostingStore for PgPostingStore {
    async fn existing_identifiers(
        &self,
        source: SourcePlatform,
        ids: &[String],
    ) -> Result<HashSet<String>, StoreError> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let rows: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT original_sn
              FROM job_posts
             WHERE source_platform = $1
               AND original_sn = ANY($2)
            "#,
        )
        .bind(source.as_str())
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    async fn exists_by_key(
        &self,
        source: SourcePlatform,
        original_sn: &str,
    ) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM job_posts WHERE source_platform = $1 AND original_sn = $2
            )
            "#,
        )
        .bind(source.as_str())
        .bind(original_sn)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn insert_posting(&self, posting: &NewJobPosting) -> Result<InsertOutcome, StoreError> {
        check_date_range(posting)?;

        let mut tx = self.pool.begin().await?;

        let inserted: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO job_posts (
                source_platform, original_sn, company_name, title, job_category, experience,
                location, hire_type, start_date, end_date, original_url, apply_qual,
                process_info, is_active
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, TRUE)
            ON CONFLICT (source_platform, original_sn) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(posting.source_platform.as_str())
        .bind(&posting.original_sn)
        .bind(&posting.company_name)
        .bind(&posting.title)
        .bind(&posting.job_category)
        .bind(&posting.experience)
        .bind(&posting.location)
        .bind(&posting.hire_type)
        .bind(posting.start_date)
        .bind(posting.end_date)
        .bind(&posting.original_url)
        .bind(&posting.apply_qual)
        .bind(&posting.process_info)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(posting_id) = inserted else {
            tx.rollback().await?;
            debug!(original_sn = %posting.original_sn, "natural key taken by a concurrent writer");
            return Ok(InsertOutcome::Duplicate);
        };

        for file in &posting.files {
            sqlx::query(
                r#"
                INSERT INTO job_files (job_post_id, file_name, file_url)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(posting_id)
            .bind(&file.file_name)
            .bind(&file.file_url)
            .execute(&mut *tx)
            .await?;
        }

        for tag_id in &posting.tag_ids {
            sqlx::query(
                r#"
                INSERT INTO post_tags (job_post_id, tech_stack_id)
                VALUES ($1, $2)
                ON CONFLICT (job_post_id, tech_stack_id) DO NOTHING
                "#,
            )
            .bind(posting_id)
            .bind(tag_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(InsertOutcome::Inserted(posting_id))
    }

    async fn find_posting_by_key(
        &self,
        source: SourcePlatform,
        original_sn: &str,
    ) -> Result<Option<JobPosting>, StoreError> {
        let row = sqlx::query_as::<_, JobPostRow>(
            "SELECT * FROM job_posts WHERE source_platform = $1 AND original_sn = $2",
        )
        .bind(source.as_str())
        .bind(original_sn)
        .fetch_optional(&self.pool)
        .await?;
        row.map(JobPosting::try_from).transpose()
    }

    async fn tags_for_posting(&self, posting_id: PostingId) -> Result<Vec<TechTag>, StoreError> {
        let rows = sqlx::query_as::<_, TagRow>(
            r#"
            SELECT ts.id, ts.stack_name
              FROM tech_stacks ts
              JOIN post_tags pt ON pt.tech_stack_id = ts.id
             WHERE pt.job_post_id = $1
             ORDER BY pt.id
            "#,
        )
        .bind(posting_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(TechTag::from).collect())
    }

    async fn files_for_posting(
        &self,
        posting_id: PostingId,
    ) -> Result<Vec<AttachmentFile>, StoreError> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT file_name, file_url FROM job_files WHERE job_post_id = $1 ORDER BY id",
        )
        .bind(posting_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(file_name, file_url)| AttachmentFile { file_name, file_url })
            .collect())
    }

    async fn find_tag_by_name(&self, name: &str) -> Result<Option<TechTag>, StoreError> {
        let row = sqlx::query_as::<_, TagRow>(
            "SELECT id, stack_name FROM tech_stacks WHERE stack_name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(TechTag::from))
    }

    async fn create_tag(&self, name: &str) -> Result<TechTag, StoreError> {
        let row = sqlx::query_as::<_, TagRow>(
            r#"
            INSERT INTO tech_stacks (stack_name)
            VALUES ($1)
            ON CONFLICT (stack_name) DO NOTHING
            RETURNING id, stack_name
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, name))?;

        row.map(TechTag::from)
            .ok_or_else(|| StoreError::Conflict(name.to_string()))
    }

    async fn deactivate_expired(&self, today: NaiveDate) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE job_posts
               SET is_active = FALSE
             WHERE end_date < $1
               AND is_active = TRUE
            "#,
        )
        .bind(today)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn find_inactive_ids_older_than(
        &self,
        threshold: NaiveDate,
    ) -> Result<Vec<PostingId>, StoreError> {
        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT id
              FROM job_posts
             WHERE is_active = FALSE
               AND end_date < $1
             ORDER BY id
            "#,
        )
        .bind(threshold)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn delete_inactive_older_than(&self, threshold: NaiveDate) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM job_posts
             WHERE is_active = FALSE
               AND end_date < $1
            "#,
        )
        .bind(threshold)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
