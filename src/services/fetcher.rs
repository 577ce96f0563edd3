//! Record fetching from the lending-platform API.
//!
//! - Updates: one request per configured lender, nested year → items JSON
//! - Campaigns: a single listing request
//! - Documents: a JSON feed produced by the external page scraper
//! - News: RSS feeds, one request per configured feed

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::{
    CampaignRecord, DocumentRecord, Domain, FeedSource, LenderSource, Record, RetryConfig,
    SourcesConfig, UpdateRecord,
};
use crate::services::feed::FeedParser;
use crate::utils::http::{classify_status, create_async_client};
use crate::utils::retry::{RetryPolicy, Verdict, retry};

/// Source of candidate records for a domain.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch the full current record set, after any retries.
    async fn fetch(&self, domain: Domain) -> Result<Vec<Record>>;
}

/// A failed HTTP request, pre-classified for the retry loop.
#[derive(Debug)]
struct RequestFailure {
    verdict: Verdict,
    message: String,
}

impl RequestFailure {
    fn network(error: reqwest::Error) -> Self {
        Self {
            verdict: Verdict::Transient,
            message: error.to_string(),
        }
    }
}

impl fmt::Display for RequestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Recovery-update payload for one lender.
#[derive(Debug, Deserialize)]
struct WireUpdates {
    #[serde(default)]
    items: Vec<WireYear>,
}

#[derive(Debug, Deserialize)]
struct WireYear {
    year: i32,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    substatus: Option<String>,
    #[serde(default)]
    items: Vec<WireUpdateItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireUpdateItem {
    #[serde(default)]
    date: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    recovered_amount: Option<Value>,
    #[serde(default)]
    remaining_amount: Option<Value>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireCampaignList {
    Bare(Vec<WireCampaign>),
    Wrapped {
        #[serde(alias = "items", alias = "campaigns")]
        data: Vec<WireCampaign>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCampaign {
    id: u64,
    #[serde(default, rename = "type")]
    campaign_type: Option<i64>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    short_description: Option<String>,
    #[serde(default)]
    valid_from: Option<String>,
    #[serde(default)]
    valid_to: Option<String>,
    #[serde(default)]
    bonus_amount: Option<Value>,
    #[serde(default)]
    required_principal_exposure: Option<Value>,
    #[serde(default)]
    terms_conditions_link: Option<String>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

/// Amounts arrive as numbers or numeric strings.
fn amount(value: Option<Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn plain_text(value: Option<Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

fn flatten_updates(lender: &LenderSource, payload: WireUpdates) -> Vec<Record> {
    let scraped_at = Some(Utc::now());
    payload
        .items
        .into_iter()
        .flat_map(|year| {
            let WireYear {
                year,
                status,
                substatus,
                items,
            } = year;
            items.into_iter().map(move |item| {
                Record::Update(UpdateRecord {
                    lender_id: lender.id,
                    company_name: lender.name.clone(),
                    year,
                    status: status.clone(),
                    substatus: substatus.clone(),
                    date: item.date,
                    description: item.description,
                    recovered_amount: amount(item.recovered_amount),
                    remaining_amount: amount(item.remaining_amount),
                    scraped_at,
                    extra: item.extra,
                })
            })
        })
        .collect()
}

fn convert_campaigns(list: WireCampaignList) -> Vec<Record> {
    let campaigns = match list {
        WireCampaignList::Bare(c) | WireCampaignList::Wrapped { data: c } => c,
    };
    let scraped_at = Some(Utc::now());
    campaigns
        .into_iter()
        .map(|c| {
            Record::Campaign(CampaignRecord {
                id: c.id,
                campaign_type: c.campaign_type,
                name: c.name.unwrap_or_default(),
                short_description: c.short_description,
                valid_from: c.valid_from,
                valid_to: c.valid_to,
                bonus_amount: plain_text(c.bonus_amount),
                required_principal_exposure: amount(c.required_principal_exposure),
                terms_conditions_link: c.terms_conditions_link,
                scraped_at,
                extra: c.extra,
            })
        })
        .collect()
}

/// HTTP implementation of [`Fetcher`].
pub struct HttpFetcher {
    client: Client,
    sources: SourcesConfig,
    policy: RetryPolicy,
    parser: FeedParser,
}

impl HttpFetcher {
    pub fn new(sources: SourcesConfig, retry: &RetryConfig) -> Result<Self> {
        let client = create_async_client(&sources)?;
        Ok(Self {
            client,
            sources,
            policy: retry.policy(),
            parser: FeedParser::new()?,
        })
    }

    /// Abort retry waits once `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.policy = self.policy.with_cancel(cancel);
        self
    }

    fn endpoint(&self, path: &str) -> Result<url::Url> {
        let base = self.sources.api_base.trim_end_matches('/');
        Ok(url::Url::parse(&format!("{base}/{}", path.trim_start_matches('/')))?)
    }

    async fn get(&self, url: &url::Url) -> std::result::Result<reqwest::Response, RequestFailure> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(RequestFailure::network)?;
        let status = response.status();
        if !status.is_success() {
            return Err(RequestFailure {
                verdict: classify_status(status, response.headers()),
                message: format!("HTTP {status} from {url}"),
            });
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &url::Url,
    ) -> std::result::Result<T, RequestFailure> {
        self.get(url)
            .await?
            .json::<T>()
            .await
            .map_err(RequestFailure::network)
    }

    async fn get_text(&self, url: &url::Url) -> std::result::Result<String, RequestFailure> {
        self.get(url)
            .await?
            .text()
            .await
            .map_err(RequestFailure::network)
    }

    async fn fetch_json<T: DeserializeOwned>(&self, domain: Domain, url: url::Url) -> Result<T> {
        let label = format!("{domain} {url}");
        let url = &url;
        retry(
            &self.policy,
            &label,
            move || self.get_json::<T>(url),
            |e: &RequestFailure| e.verdict,
        )
        .await
        .map_err(|e| AppError::fetch(domain, e))
    }

    async fn fetch_text(&self, domain: Domain, url: url::Url) -> Result<String> {
        let label = format!("{domain} {url}");
        let url = &url;
        retry(
            &self.policy,
            &label,
            move || self.get_text(url),
            |e: &RequestFailure| e.verdict,
        )
        .await
        .map_err(|e| AppError::fetch(domain, e))
    }

    async fn fetch_lender(&self, lender: &LenderSource) -> Result<Vec<Record>> {
        let url = self.endpoint(&format!("lender-companies/{}/recovery-updates", lender.id))?;
        let payload: WireUpdates = self.fetch_json(Domain::Updates, url).await?;
        Ok(flatten_updates(lender, payload))
    }

    async fn fetch_updates(&self) -> Result<Vec<Record>> {
        let lenders = &self.sources.lenders;
        if lenders.is_empty() {
            log::warn!("No lenders configured; updates domain is empty");
            return Ok(Vec::new());
        }
        let delay = Duration::from_millis(self.sources.request_delay_ms);
        let concurrency = self.sources.max_concurrent.max(1);

        let mut results = stream::iter(lenders)
            .map(|lender| async move { (lender, self.fetch_lender(lender).await) })
            .buffered(concurrency)
            .boxed();

        let mut records = Vec::new();
        let mut failures = 0;
        while let Some((lender, result)) = results.next().await {
            match result {
                Ok(mut lender_records) => records.append(&mut lender_records),
                Err(error) => {
                    failures += 1;
                    log::warn!("Skipping lender {} ({}): {}", lender.id, lender.name, error);
                }
            }
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        if failures == lenders.len() {
            return Err(AppError::fetch(
                Domain::Updates,
                format!("all {failures} lenders failed"),
            ));
        }
        log::info!(
            "Fetched {} updates from {} lenders ({} failed)",
            records.len(),
            lenders.len() - failures,
            failures
        );
        Ok(records)
    }

    async fn fetch_campaigns(&self) -> Result<Vec<Record>> {
        let url = self.endpoint(&self.sources.campaigns_path)?;
        let list: WireCampaignList = self.fetch_json(Domain::Campaigns, url).await?;
        Ok(convert_campaigns(list))
    }

    async fn fetch_documents(&self) -> Result<Vec<Record>> {
        let Some(feed) = self.sources.documents_url.as_deref() else {
            return Err(AppError::fetch(
                Domain::Documents,
                "sources.documents_url is not configured",
            ));
        };
        let url = url::Url::parse(feed)?;
        let documents: Vec<DocumentRecord> = self.fetch_json(Domain::Documents, url).await?;
        Ok(documents.into_iter().map(Record::Document).collect())
    }

    /// Items of one feed that pass its keyword filter.
    async fn fetch_feed(&self, feed: &FeedSource) -> Result<Vec<Record>> {
        let url = url::Url::parse(&feed.url)?;
        let xml = self.fetch_text(Domain::News, url).await?;
        let items = self.parser.parse(feed, &xml);
        let total = items.len();
        let kept: Vec<Record> = items
            .into_iter()
            .filter(|item| feed.matches(&item.title, item.issuer.as_deref()))
            .map(Record::News)
            .collect();
        log::debug!("{}: {} of {} items match keywords", feed.id, kept.len(), total);
        Ok(kept)
    }

    async fn fetch_news(&self) -> Result<Vec<Record>> {
        let feeds = &self.sources.feeds;
        if feeds.is_empty() {
            log::warn!("No feeds configured; news domain is empty");
            return Ok(Vec::new());
        }
        let concurrency = self.sources.max_concurrent.max(1);
        let mut results = stream::iter(feeds)
            .map(|feed| async move { (feed, self.fetch_feed(feed).await) })
            .buffered(concurrency)
            .boxed();

        let mut records = Vec::new();
        let mut failures = 0;
        while let Some((feed, result)) = results.next().await {
            match result {
                Ok(mut feed_records) => records.append(&mut feed_records),
                Err(error) => {
                    failures += 1;
                    log::warn!("Skipping feed {}: {}", feed.id, error);
                }
            }
        }

        if failures == feeds.len() {
            return Err(AppError::fetch(
                Domain::News,
                format!("all {failures} feeds failed"),
            ));
        }
        log::info!(
            "Fetched {} news items from {} feeds ({} failed)",
            records.len(),
            feeds.len() - failures,
            failures
        );
        Ok(records)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, domain: Domain) -> Result<Vec<Record>> {
        match domain {
            Domain::Updates => self.fetch_updates().await,
            Domain::Documents => self.fetch_documents().await,
            Domain::Campaigns => self.fetch_campaigns().await,
            Domain::News => self.fetch_news().await,
        }
    }
}
