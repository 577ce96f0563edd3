//! Tracked record types and their content-addressed identifiers.
//!
//! Every record exposes a stable composite key (used to match it across
//! polls) and a list of significant fields (whose change is notifiable).
//! Anything else on a record, such as scrape timestamps or the opaque
//! `extra` payload, is carried along but never compared.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::TemplateConfig;

/// Separates fields inside the hashed identity string.
const FIELD_SEPARATOR: char = '\u{1f}';
/// Separates the key group from the significant-field group.
const GROUP_SEPARATOR: char = '\u{1e}';

/// A category of tracked data, each with its own snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Updates,
    Documents,
    Campaigns,
    News,
}

impl Domain {
    /// All domains in processing order.
    pub const ALL: [Domain; 4] = [
        Domain::Updates,
        Domain::Documents,
        Domain::Campaigns,
        Domain::News,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Updates => "updates",
            Domain::Documents => "documents",
            Domain::Campaigns => "campaigns",
            Domain::News => "news",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "updates" | "update" | "recovery_updates" => Ok(Domain::Updates),
            "documents" | "document" | "docs" => Ok(Domain::Documents),
            "campaigns" | "campaign" => Ok(Domain::Campaigns),
            "news" | "rss" | "feeds" => Ok(Domain::News),
            other => Err(format!("unknown domain '{other}'")),
        }
    }
}

/// Content-addressed identifier of a logical change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Hash `(domain, key, significant fields)` into a stable hex id.
    pub fn derive(domain: Domain, key: &[String], significant: &[String]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain.as_str().as_bytes());
        hasher.update([GROUP_SEPARATOR as u8]);
        for part in key {
            hasher.update(part.as_bytes());
            hasher.update([FIELD_SEPARATOR as u8]);
        }
        hasher.update([GROUP_SEPARATOR as u8]);
        for part in significant {
            hasher.update(part.as_bytes());
            hasher.update([FIELD_SEPARATOR as u8]);
        }
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Shared identity contract used by the diff engine and the sent-registry.
pub trait Tracked {
    fn domain(&self) -> Domain;

    /// Stable natural-identity tuple.
    fn composite_key(&self) -> Vec<String>;

    /// Fields whose change is a notifiable event.
    fn significant_fields(&self) -> Vec<String>;

    fn record_id(&self) -> RecordId {
        RecordId::derive(
            self.domain(),
            &self.composite_key(),
            &self.significant_fields(),
        )
    }
}

fn text<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(ToString::to_string).unwrap_or_default()
}

/// A recovery update published for a lending company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRecord {
    pub lender_id: u64,
    #[serde(default)]
    pub company_name: String,
    pub year: i32,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub substatus: Option<String>,
    pub date: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub recovered_amount: Option<f64>,
    #[serde(default)]
    pub remaining_amount: Option<f64>,
    #[serde(default)]
    pub scraped_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Tracked for UpdateRecord {
    fn domain(&self) -> Domain {
        Domain::Updates
    }

    fn composite_key(&self) -> Vec<String> {
        vec![
            self.lender_id.to_string(),
            self.year.to_string(),
            self.date.clone(),
        ]
    }

    fn significant_fields(&self) -> Vec<String> {
        vec![
            self.description.clone(),
            self.date.clone(),
            text(&self.recovered_amount),
            text(&self.remaining_amount),
            text(&self.status),
            text(&self.substatus),
        ]
    }
}

/// A document published on a company page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub company_id: String,
    #[serde(default)]
    pub company_name: String,
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub doc_type: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub scraped_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Tracked for DocumentRecord {
    fn domain(&self) -> Domain {
        Domain::Documents
    }

    fn composite_key(&self) -> Vec<String> {
        vec![self.company_id.clone(), self.url.clone()]
    }

    fn significant_fields(&self) -> Vec<String> {
        vec![self.title.clone(), text(&self.date), text(&self.doc_type)]
    }
}

/// A platform promotion campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignRecord {
    pub id: u64,
    #[serde(default)]
    pub campaign_type: Option<i64>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub short_description: Option<String>,
    #[serde(default)]
    pub valid_from: Option<String>,
    #[serde(default)]
    pub valid_to: Option<String>,
    #[serde(default)]
    pub bonus_amount: Option<String>,
    #[serde(default)]
    pub required_principal_exposure: Option<f64>,
    #[serde(default)]
    pub terms_conditions_link: Option<String>,
    #[serde(default)]
    pub scraped_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Tracked for CampaignRecord {
    fn domain(&self) -> Domain {
        Domain::Campaigns
    }

    fn composite_key(&self) -> Vec<String> {
        vec![self.id.to_string()]
    }

    fn significant_fields(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            text(&self.short_description),
            text(&self.valid_from),
            text(&self.valid_to),
            text(&self.bonus_amount),
            text(&self.required_principal_exposure),
            text(&self.terms_conditions_link),
        ]
    }
}

/// An item of a subscribed news feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsRecord {
    /// Id of the configured feed
    pub feed: String,
    #[serde(default)]
    pub feed_name: String,
    pub guid: String,
    pub title: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub issuer: Option<String>,
    /// Publication date as given by the feed
    #[serde(default)]
    pub published: Option<String>,
    #[serde(default)]
    pub scraped_at: Option<DateTime<Utc>>,
}

impl Tracked for NewsRecord {
    fn domain(&self) -> Domain {
        Domain::News
    }

    fn composite_key(&self) -> Vec<String> {
        vec![self.feed.clone(), self.guid.clone()]
    }

    fn significant_fields(&self) -> Vec<String> {
        vec![self.title.clone(), self.link.clone()]
    }
}

/// A domain-tagged record as stored in snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    Update(UpdateRecord),
    Document(DocumentRecord),
    Campaign(CampaignRecord),
    News(NewsRecord),
}

impl Record {
    fn inner(&self) -> &dyn Tracked {
        match self {
            Record::Update(r) => r,
            Record::Document(r) => r,
            Record::Campaign(r) => r,
            Record::News(r) => r,
        }
    }

    /// Source feed id, if this is a news item.
    pub fn feed(&self) -> Option<&str> {
        match self {
            Record::News(n) => Some(&n.feed),
            _ => None,
        }
    }

    /// Campaign type, if this is a campaign.
    pub fn campaign_type(&self) -> Option<i64> {
        match self {
            Record::Campaign(c) => c.campaign_type,
            _ => None,
        }
    }

    /// Render a notification using the template configured for this domain.
    ///
    /// Supported placeholders:
    /// - updates: `{company}`, `{lender_id}`, `{year}`, `{date}`, `{status}`,
    ///   `{substatus}`, `{description}`, `{recovered}`, `{remaining}`
    /// - documents: `{company}`, `{title}`, `{doc_type}`, `{date}`, `{url}`, `{country}`
    /// - campaigns: `{name}`, `{description}`, `{valid_from}`, `{valid_to}`,
    ///   `{bonus}`, `{exposure}`, `{terms}`
    /// - news: `{feed}`, `{issuer}`, `{title}`, `{published}`, `{link}`
    ///
    /// A template line whose placeholders all came out empty is left out.
    pub fn render(&self, templates: &TemplateConfig) -> String {
        match self {
            Record::Update(u) => fill(
                &templates.update,
                &[
                    ("company", company_label(&u.company_name, &u.lender_id.to_string())),
                    ("lender_id", u.lender_id.to_string()),
                    ("year", u.year.to_string()),
                    ("date", u.date.clone()),
                    ("status", text(&u.status)),
                    ("substatus", text(&u.substatus)),
                    ("description", u.description.clone()),
                    ("recovered", text(&u.recovered_amount)),
                    ("remaining", text(&u.remaining_amount)),
                ],
            ),
            Record::Document(d) => fill(
                &templates.document,
                &[
                    ("company", company_label(&d.company_name, &d.company_id)),
                    ("title", d.title.clone()),
                    ("doc_type", d.doc_type.clone().unwrap_or_else(|| "Document".into())),
                    ("date", d.date.clone().unwrap_or_else(|| "unknown date".into())),
                    ("url", d.url.clone()),
                    ("country", text(&d.country)),
                ],
            ),
            Record::Campaign(c) => fill(
                &templates.campaign,
                &[
                    ("name", c.name.clone()),
                    ("description", text(&c.short_description)),
                    ("valid_from", text(&c.valid_from)),
                    ("valid_to", text(&c.valid_to)),
                    ("bonus", text(&c.bonus_amount)),
                    ("exposure", text(&c.required_principal_exposure)),
                    ("terms", text(&c.terms_conditions_link)),
                ],
            ),
            Record::News(n) => fill(
                &templates.news,
                &[
                    ("feed", company_label(&n.feed_name, &n.feed)),
                    ("issuer", text(&n.issuer)),
                    ("title", n.title.clone()),
                    ("published", n.published.as_deref().map(display_date).unwrap_or_default()),
                    ("link", n.link.clone()),
                ],
            ),
        }
    }
}

impl Tracked for Record {
    fn domain(&self) -> Domain {
        self.inner().domain()
    }

    fn composite_key(&self) -> Vec<String> {
        self.inner().composite_key()
    }

    fn significant_fields(&self) -> Vec<String> {
        self.inner().significant_fields()
    }
}

fn company_label(name: &str, id: &str) -> String {
    if name.trim().is_empty() {
        format!("Company {id}")
    } else {
        name.to_string()
    }
}

/// RFC 2822 feed dates shown as `YYYY-MM-DD HH:MM`; anything else as given.
fn display_date(raw: &str) -> String {
    DateTime::parse_from_rfc2822(raw.trim())
        .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|_| raw.trim().to_string())
}

fn fill(template: &str, values: &[(&str, String)]) -> String {
    let lines: Vec<String> = template
        .split('\n')
        .filter_map(|line| {
            let mut out = line.to_string();
            let (mut placeholders, mut filled) = (0, 0);
            for (name, value) in values {
                let token = format!("{{{name}}}");
                if out.contains(&token) {
                    placeholders += 1;
                    if !value.trim().is_empty() {
                        filled += 1;
                    }
                    out = out.replace(&token, value);
                }
            }
            (placeholders == 0 || filled > 0).then_some(out)
        })
        .collect();
    lines.join("\n").trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(lender_id: u64, date: &str, description: &str) -> UpdateRecord {
        UpdateRecord {
            lender_id,
            company_name: "Acme Lending".into(),
            year: 2024,
            status: Some("active".into()),
            substatus: None,
            date: date.into(),
            description: description.into(),
            recovered_amount: Some(100.0),
            remaining_amount: Some(50.5),
            scraped_at: None,
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn record_id_is_stable() {
        let a = update(1, "2024-01-01", "Payment received");
        let b = a.clone();
        assert_eq!(a.record_id(), b.record_id());
        assert_eq!(a.record_id().as_str().len(), 64);
    }

    #[test]
    fn record_id_ignores_incidental_fields() {
        let a = update(1, "2024-01-01", "Payment received");
        let mut b = a.clone();
        b.scraped_at = Some(Utc::now());
        b.company_name = "Renamed".into();
        b.extra.insert("page".into(), serde_json::json!(3));
        assert_eq!(a.record_id(), b.record_id());
    }

    #[test]
    fn record_id_changes_with_significant_field() {
        let a = update(1, "2024-01-01", "Payment received");
        let mut b = a.clone();
        b.remaining_amount = Some(10.0);
        assert_ne!(a.record_id(), b.record_id());
    }

    #[test]
    fn record_id_separates_domains() {
        let key = vec!["1".to_string()];
        assert_ne!(
            RecordId::derive(Domain::Updates, &key, &[]),
            RecordId::derive(Domain::Campaigns, &key, &[])
        );
    }

    #[test]
    fn record_id_does_not_collide_on_shifted_fields() {
        let a = RecordId::derive(Domain::Documents, &["ab".into()], &["c".into()]);
        let b = RecordId::derive(Domain::Documents, &["a".into()], &["bc".into()]);
        assert_ne!(a, b);
    }

    #[test]
    fn record_serializes_with_kind_tag() {
        let record = Record::Update(update(7, "2024-03-01", "Court hearing"));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "update");
        let back: Record = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn render_fills_placeholders() {
        let templates = TemplateConfig {
            update: "[{company}] {date}: {description}".into(),
            ..TemplateConfig::default()
        };
        let record = Record::Update(update(1, "2024-01-01", "Payment received"));
        assert_eq!(
            record.render(&templates),
            "[Acme Lending] 2024-01-01: Payment received"
        );
    }

    fn bare_campaign(id: u64, name: &str) -> CampaignRecord {
        CampaignRecord {
            id,
            campaign_type: Some(1),
            name: name.into(),
            short_description: None,
            valid_from: None,
            valid_to: None,
            bonus_amount: None,
            required_principal_exposure: None,
            terms_conditions_link: None,
            scraped_at: None,
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn render_leaves_out_lines_of_missing_fields() {
        let templates = TemplateConfig::default();
        let record = Record::Campaign(bare_campaign(3, "Autumn"));
        assert_eq!(record.render(&templates), "🎯 Autumn");

        let mut dated = bare_campaign(3, "Autumn");
        dated.valid_to = Some("2024-10-31".into());
        dated.bonus_amount = Some("1%".into());
        let text = Record::Campaign(dated).render(&templates);
        assert!(text.contains("📅  → 2024-10-31"));
        assert!(text.contains("💰 Bonus: 1%"));
        assert!(!text.contains("🔗"));
        assert!(!text.contains('{'));
    }

    #[test]
    fn news_identity_follows_feed_and_guid() {
        let item = NewsRecord {
            feed: "nasdaq".into(),
            feed_name: "NASDAQ Baltic".into(),
            guid: "g-1".into(),
            title: "Bigbank interim report".into(),
            link: "https://example.com/1".into(),
            issuer: Some("Bigbank".into()),
            published: Some("Thu, 29 May 2025 18:18:15 +0300".into()),
            scraped_at: None,
        };
        let mut other_feed = item.clone();
        other_feed.feed = "mintos".into();
        assert_ne!(item.record_id(), other_feed.record_id());

        let mut reworded = item.clone();
        reworded.published = None;
        assert_eq!(item.record_id(), reworded.record_id());

        let text = Record::News(item).render(&TemplateConfig::default());
        assert!(text.starts_with("📰 NASDAQ Baltic"));
        assert!(text.contains("📅 2025-05-29 18:18"));
    }

    #[test]
    fn domain_parses_aliases() {
        assert_eq!("Campaign".parse::<Domain>(), Ok(Domain::Campaigns));
        assert_eq!("docs".parse::<Domain>(), Ok(Domain::Documents));
        assert_eq!("rss".parse::<Domain>(), Ok(Domain::News));
        assert!("loans".parse::<Domain>().is_err());
    }
}
