//! Core domain model and record validation for DJC.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "djc-core";

/// Experience value stored when the source leaves the field blank ("experience unspecified").
pub const UNSPECIFIED_EXPERIENCE: &str = "경력무관";

pub type PostingId = i64;
pub type TagId = i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourcePlatform {
    PublicAlio,
    Saramin,
    Jobkorea,
}

impl SourcePlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourcePlatform::PublicAlio => "PUBLIC_ALIO",
            SourcePlatform::Saramin => "SARAMIN",
            SourcePlatform::Jobkorea => "JOBKOREA",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            SourcePlatform::PublicAlio => "공공기관 알리오",
            SourcePlatform::Saramin => "사람인",
            SourcePlatform::Jobkorea => "잡코리아",
        }
    }
}

impl fmt::Display for SourcePlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourcePlatform {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PUBLIC_ALIO" => Ok(SourcePlatform::PublicAlio),
            "SARAMIN" => Ok(SourcePlatform::Saramin),
            "JOBKOREA" => Ok(SourcePlatform::Jobkorea),
            other => Err(ValidationError::UnknownPlatform(other.to_string())),
        }
    }
}

/// Attachment as delivered by a source, before filtering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAttachment {
    pub name: Option<String>,
    pub url: Option<String>,
}

/// Source-agnostic handoff contract from gateways into the pipeline. Listing summaries and
/// detail records share this shape; summaries simply leave the long-form fields empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawJobRecord {
    pub serial_number: Option<String>,
    pub organization: Option<String>,
    pub title: Option<String>,
    pub category: Option<String>,
    pub region: Option<String>,
    pub hire_type: Option<String>,
    pub experience: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub source_url: Option<String>,
    pub qualification: Option<String>,
    pub process: Option<String>,
    #[serde(default)]
    pub attachments: Vec<RawAttachment>,
}

impl RawJobRecord {
    pub fn natural_id(&self) -> Option<&str> {
        non_blank(self.serial_number.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingPage {
    pub success: bool,
    pub total_count: u64,
    pub summaries: Vec<RawJobRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailResponse {
    pub success: bool,
    pub detail: Option<RawJobRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentFile {
    pub file_name: String,
    pub file_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TechTag {
    pub id: TagId,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PostingTagLink {
    pub posting_id: PostingId,
    pub tag_id: TagId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostingState {
    Active,
    Expired,
}

/// Persisted posting. Associated files and tags are loaded through explicit store queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPosting {
    pub id: PostingId,
    pub source_platform: SourcePlatform,
    pub original_sn: String,
    pub company_name: String,
    pub title: String,
    pub job_category: Option<String>,
    pub experience: String,
    pub location: Option<String>,
    pub hire_type: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub original_url: String,
    pub apply_qual: Option<String>,
    pub process_info: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl JobPosting {
    pub fn state(&self) -> PostingState {
        if self.active {
            PostingState::Active
        } else {
            PostingState::Expired
        }
    }
}

/// Insert-side posting: everything the store needs to create the row, its files and its links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJobPosting {
    pub source_platform: SourcePlatform,
    pub original_sn: String,
    pub company_name: String,
    pub title: String,
    pub job_category: Option<String>,
    pub experience: String,
    pub location: Option<String>,
    pub hire_type: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub original_url: String,
    pub apply_qual: Option<String>,
    pub process_info: Option<String>,
    pub files: Vec<AttachmentFile>,
    pub tag_ids: Vec<TagId>,
}

impl NewJobPosting {
    /// Converts a detail record into an insertable posting. `today` guards against ingesting
    /// postings that the expiration sweep would immediately deactivate.
    pub fn from_record(
        source: SourcePlatform,
        record: &RawJobRecord,
        today: NaiveDate,
    ) -> Result<Self, ValidationError> {
        validate_summary(record)?;

        let start_date = parse_compact_date(record.start_date.as_deref().unwrap_or_default())
            .ok_or(ValidationError::MissingDate("start_date"))?;
        let end_date = parse_compact_date(record.end_date.as_deref().unwrap_or_default())
            .ok_or(ValidationError::MissingDate("end_date"))?;
        if end_date < start_date {
            return Err(ValidationError::InvertedDateRange {
                start: start_date,
                end: end_date,
            });
        }
        if end_date < today {
            return Err(ValidationError::AlreadyExpired { end: end_date, today });
        }

        let files = record
            .attachments
            .iter()
            .filter_map(|a| {
                let name = non_blank(a.name.as_deref())?;
                let url = non_blank(a.url.as_deref())?;
                Some(AttachmentFile {
                    file_name: name.to_string(),
                    file_url: url.to_string(),
                })
            })
            .collect();

        Ok(Self {
            source_platform: source,
            original_sn: required(&record.serial_number, "serial_number")?,
            company_name: required(&record.organization, "organization")?,
            title: required(&record.title, "title")?,
            job_category: optional(&record.category),
            experience: optional(&record.experience)
                .unwrap_or_else(|| UNSPECIFIED_EXPERIENCE.to_string()),
            location: optional(&record.region),
            hire_type: optional(&record.hire_type),
            start_date,
            end_date,
            original_url: required(&record.source_url, "source_url")?,
            apply_qual: optional(&record.qualification),
            process_info: optional(&record.process),
            files,
            tag_ids: Vec::new(),
        })
    }

    /// Links a tag; returns false when it is already linked.
    pub fn add_tag(&mut self, tag: &TechTag) -> bool {
        if self.tag_ids.contains(&tag.id) {
            return false;
        }
        self.tag_ids.push(tag.id);
        true
    }

    pub fn remove_tag(&mut self, tag_id: TagId) -> bool {
        let before = self.tag_ids.len();
        self.tag_ids.retain(|id| *id != tag_id);
        self.tag_ids.len() != before
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("required field `{0}` is missing or blank")]
    MissingField(&'static str),
    #[error("`{0}` is not a valid yyyyMMdd date")]
    MissingDate(&'static str),
    #[error("end date {end} is before start date {start}")]
    InvertedDateRange { start: NaiveDate, end: NaiveDate },
    #[error("posting already closed on {end} (today is {today})")]
    AlreadyExpired { end: NaiveDate, today: NaiveDate },
    #[error("unknown source platform `{0}`")]
    UnknownPlatform(String),
}

/// Checks the fields every record needs before the pipeline spends a detail fetch on it.
pub fn validate_summary(record: &RawJobRecord) -> Result<(), ValidationError> {
    let checks = [
        (&record.serial_number, "serial_number"),
        (&record.organization, "organization"),
        (&record.title, "title"),
        (&record.source_url, "source_url"),
    ];
    for (value, name) in checks {
        if non_blank(value.as_deref()).is_none() {
            return Err(ValidationError::MissingField(name));
        }
    }
    Ok(())
}

/// Parses the sources' compact `yyyyMMdd` date format. Anything else yields `None`.
pub fn parse_compact_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.len() != 8 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(value, "%Y%m%d").ok()
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn required(value: &Option<String>, field: &'static str) -> Result<String, ValidationError> {
    non_blank(value.as_deref())
        .map(ToString::to_string)
        .ok_or(ValidationError::MissingField(field))
}

fn optional(value: &Option<String>) -> Option<String> {
    non_blank(value.as_deref()).map(ToString::to_string)
}
