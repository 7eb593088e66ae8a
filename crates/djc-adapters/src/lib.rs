//! Source gateway contracts + the public data portal gateway and a fixture-first gateway.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use djc_core::{DetailResponse, ListingPage, RawAttachment, RawJobRecord, SourcePlatform};
use djc_storage::{FetchError, HttpFetcher};
use serde::{de, de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

pub const CRATE_NAME: &str = "djc-adapters";

/// Result code the public data portal uses for a successful call.
pub const PUBLIC_DATA_SUCCESS_CODE: i64 = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterContext {
    pub run_id: Uuid,
    pub fetched_at: DateTime<Utc>,
}

impl AdapterContext {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            fetched_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("invalid endpoint url: {0}")]
    Endpoint(String),
    #[error("no fixture for detail `{0}`")]
    MissingFixture(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Remote source of job listings. Page indexes are 0-based.
#[async_trait]
pub trait SourceGateway: Send + Sync {
    fn source_platform(&self) -> SourcePlatform;

    async fn fetch_listing(
        &self,
        ctx: &AdapterContext,
        page_index: u32,
        page_size: u32,
    ) -> Result<ListingPage, AdapterError>;

    async fn fetch_detail(
        &self,
        ctx: &AdapterContext,
        natural_id: &str,
    ) -> Result<DetailResponse, AdapterError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicDataListResponse {
    #[serde(default)]
    pub result_code: Option<i64>,
    #[serde(default)]
    pub result_msg: Option<String>,
    #[serde(default)]
    pub total_count: Option<u64>,
    #[serde(default)]
    pub result: Option<Vec<PublicJobItem>>,
}

impl PublicDataListResponse {
    pub fn is_success(&self) -> bool {
        self.result_code == Some(PUBLIC_DATA_SUCCESS_CODE)
    }

    pub fn into_listing_page(self) -> ListingPage {
        let success = self.is_success();
        ListingPage {
            success,
            total_count: self.total_count.unwrap_or_default(),
            summaries: self
                .result
                .unwrap_or_default()
                .into_iter()
                .map(RawJobRecord::from)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicDataDetailResponse {
    #[serde(default)]
    pub result_code: Option<i64>,
    #[serde(default)]
    pub result_msg: Option<String>,
    #[serde(default)]
    pub result: Option<PublicJobItem>,
}

impl PublicDataDetailResponse {
    pub fn is_success(&self) -> bool {
        self.result_code == Some(PUBLIC_DATA_SUCCESS_CODE)
    }

    pub fn into_detail_response(self) -> DetailResponse {
        DetailResponse {
            success: self.is_success(),
            detail: self.result.map(RawJobRecord::from),
        }
    }
}

/// One posting as the public data portal serializes it. Listing and detail calls share it;
/// the long-form fields are only populated by detail calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicJobItem {
    #[serde(default, deserialize_with = "string_or_number")]
    pub recrut_pblnt_sn: Option<String>,
    #[serde(default)]
    pub inst_nm: Option<String>,
    #[serde(default)]
    pub recrut_pbanc_ttl: Option<String>,
    #[serde(default)]
    pub ncs_cd_nm_lst: Option<String>,
    #[serde(default)]
    pub work_rgn_nm_lst: Option<String>,
    #[serde(default)]
    pub hire_type_nm_lst: Option<String>,
    #[serde(default)]
    pub recrut_se_nm: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub pbanc_bgng_ymd: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub pbanc_end_ymd: Option<String>,
    #[serde(default)]
    pub src_url: Option<String>,
    #[serde(default)]
    pub aply_qlfc_cn: Option<String>,
    #[serde(default)]
    pub scrnprcdr_mthd_expln: Option<String>,
    #[serde(default)]
    pub files: Option<Vec<PublicFileItem>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicFileItem {
    #[serde(default)]
    pub atch_file_nm: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl From<PublicJobItem> for RawJobRecord {
    fn from(item: PublicJobItem) -> Self {
        RawJobRecord {
            serial_number: item.recrut_pblnt_sn,
            organization: item.inst_nm,
            title: item.recrut_pbanc_ttl,
            category: item.ncs_cd_nm_lst,
            region: item.work_rgn_nm_lst,
            hire_type: item.hire_type_nm_lst,
            experience: item.recrut_se_nm,
            start_date: item.pbanc_bgng_ymd,
            end_date: item.pbanc_end_ymd,
            source_url: item.src_url,
            qualification: item.aply_qlfc_cn,
            process: item.scrnprcdr_mthd_expln,
            attachments: item
                .files
                .unwrap_or_default()
                .into_iter()
                .map(|f| RawAttachment {
                    name: f.atch_file_nm,
                    url: f.url,
                })
                .collect(),
        }
    }
}

// The portal emits serial numbers and dates as JSON numbers on some endpoints.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<JsonValue>::deserialize(deserializer)? {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::String(s)) => Ok(Some(s)),
        Some(JsonValue::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

/// Builds a portal endpoint url. The service key is issued pre-encoded and is appended
/// verbatim; every other parameter is form-encoded.
pub fn build_endpoint(
    base_url: &str,
    service_key: &str,
    path: &str,
    params: &[(&str, String)],
) -> Result<String, AdapterError> {
    let raw = format!(
        "{}/{}?serviceKey={}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/'),
        service_key
    );
    let mut url = reqwest::Url::parse(&raw).map_err(|e| AdapterError::Endpoint(e.to_string()))?;
    url.query_pairs_mut()
        .extend_pairs(params)
        .append_pair("resultType", "json");
    Ok(url.into())
}

#[derive(Debug, Clone)]
pub struct PublicDataConfig {
    pub base_url: String,
    pub service_key: String,
}

/// Gateway for the public-institution recruitment API (`/list` and `/detail`).
#[derive(Debug, Clone)]
pub struct PublicDataGateway {
    http: Arc<HttpFetcher>,
    config: PublicDataConfig,
}

impl PublicDataGateway {
    pub fn new(http: Arc<HttpFetcher>, config: PublicDataConfig) -> Self {
        Self { http, config }
    }
}

#[async_trait]
impl SourceGateway for PublicDataGateway {
    fn source_platform(&self) -> SourcePlatform {
        SourcePlatform::PublicAlio
    }

    async fn fetch_listing(
        &self,
        ctx: &AdapterContext,
        page_index: u32,
        page_size: u32,
    ) -> Result<ListingPage, AdapterError> {
        let url = build_endpoint(
            &self.config.base_url,
            &self.config.service_key,
            "list",
            &[
                ("numOfRows", page_size.to_string()),
                ("pageNo", (page_index + 1).to_string()),
            ],
        )?;
        let response: PublicDataListResponse = self
            .http
            .fetch_json(ctx.run_id, self.source_platform(), &url)
            .await?;
        debug!(
            result_code = ?response.result_code,
            result_msg = response.result_msg.as_deref().unwrap_or_default(),
            total_count = ?response.total_count,
            "listing response"
        );
        Ok(response.into_listing_page())
    }

    async fn fetch_detail(
        &self,
        ctx: &AdapterContext,
        natural_id: &str,
    ) -> Result<DetailResponse, AdapterError> {
        let url = build_endpoint(
            &self.config.base_url,
            &self.config.service_key,
            "detail",
            &[("sn", natural_id.to_string())],
        )?;
        let response: PublicDataDetailResponse = self
            .http
            .fetch_json(ctx.run_id, self.source_platform(), &url)
            .await?;
        if !response.is_success() {
            debug!(
                natural_id,
                result_code = ?response.result_code,
                result_msg = response.result_msg.as_deref().unwrap_or_default(),
                "detail call unsuccessful"
            );
        }
        Ok(response.into_detail_response())
    }
}

/// Serves recorded portal responses. Detail requests are recorded so callers can assert
/// which records were resolved.
#[derive(Debug)]
pub struct FixtureGateway {
    source: SourcePlatform,
    listing: PublicDataListResponse,
    details: HashMap<String, PublicDataDetailResponse>,
    detail_requests: Mutex<Vec<String>>,
}

impl FixtureGateway {
    pub fn new(source: SourcePlatform, listing: PublicDataListResponse) -> Self {
        Self {
            source,
            listing,
            details: HashMap::new(),
            detail_requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_detail(mut self, natural_id: &str, detail: PublicDataDetailResponse) -> Self {
        self.details.insert(natural_id.to_string(), detail);
        self
    }

    /// Loads `list.json` and every `detail/<serial>.json` under `dir`.
    pub fn from_dir(source: SourcePlatform, dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let listing: PublicDataListResponse = read_json_file(dir.join("list.json"))?;
        let mut gateway = Self::new(source, listing);

        let detail_dir = dir.join("detail");
        if detail_dir.is_dir() {
            for entry in fs::read_dir(&detail_dir)
                .with_context(|| format!("reading {}", detail_dir.display()))?
            {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let stem = stem.to_string();
                gateway = gateway.with_detail(&stem, read_json_file(&path)?);
            }
        }
        Ok(gateway)
    }

    pub async fn detail_requests(&self) -> Vec<String> {
        self.detail_requests.lock().await.clone()
    }
}

#[async_trait]
impl SourceGateway for FixtureGateway {
    fn source_platform(&self) -> SourcePlatform {
        self.source
    }

    async fn fetch_listing(
        &self,
        _ctx: &AdapterContext,
        page_index: u32,
        page_size: u32,
    ) -> Result<ListingPage, AdapterError> {
        let mut listing = self.listing.clone();
        if let Some(items) = listing.result.take() {
            let skip = page_index as usize * page_size as usize;
            listing.result = Some(
                items
                    .into_iter()
                    .skip(skip)
                    .take(page_size as usize)
                    .collect(),
            );
        }
        Ok(listing.into_listing_page())
    }

    async fn fetch_detail(
        &self,
        _ctx: &AdapterContext,
        natural_id: &str,
    ) -> Result<DetailResponse, AdapterError> {
        self.detail_requests.lock().await.push(natural_id.to_string());
        self.details
            .get(natural_id)
            .cloned()
            .map(PublicDataDetailResponse::into_detail_response)
            .ok_or_else(|| AdapterError::MissingFixture(natural_id.to_string()))
    }
}

fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}
