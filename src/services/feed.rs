//! RSS item extraction for the news domain.
//!
//! Feeds are plain RSS 2.0; only the `<item>` elements and a handful of
//! their children are read. Titles often arrive wrapped in CDATA and with
//! HTML entities, both of which are stripped.

use chrono::Utc;
use regex::Regex;

use crate::error::Result;
use crate::models::{FeedSource, NewsRecord};

/// Longest description prefix accepted as an issuer name.
const MAX_ISSUER_LEN: usize = 60;

fn element(tag: &str) -> Result<Regex> {
    Ok(Regex::new(&format!(r"(?s)<{tag}\b[^>]*>(.*?)</{tag}\s*>"))?)
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn clean(raw: &str) -> String {
    let text = raw.trim();
    let text = text
        .strip_prefix("<![CDATA[")
        .and_then(|t| t.strip_suffix("]]>"))
        .unwrap_or(text);
    unescape(text.trim())
}

/// Compiled patterns for pulling items out of an RSS document.
#[derive(Debug, Clone)]
pub struct FeedParser {
    item: Regex,
    title: Regex,
    link: Regex,
    guid: Regex,
    pub_date: Regex,
    issuer: Regex,
    author: Regex,
    creator: Regex,
    description: Regex,
    markup: Regex,
    issuer_prefix: Regex,
}

impl FeedParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            item: element("item")?,
            title: element("title")?,
            link: element("link")?,
            guid: element("guid")?,
            pub_date: element("pubDate")?,
            issuer: element("issuer")?,
            author: element("author")?,
            creator: element("dc:creator")?,
            description: element("description")?,
            markup: Regex::new(r"<[^>]+>")?,
            issuer_prefix: Regex::new(r"^([^-:]+)[-:]")?,
        })
    }

    fn field(&self, pattern: &Regex, body: &str) -> Option<String> {
        pattern
            .captures(body)
            .and_then(|c| c.get(1))
            .map(|m| clean(m.as_str()))
            .filter(|v| !v.is_empty())
    }

    /// Best guess at the publishing company.
    fn issuer(&self, feed: &FeedSource, body: &str, title: &str) -> Option<String> {
        if let Some(name) = self
            .field(&self.issuer, body)
            .or_else(|| self.field(&self.author, body))
            .or_else(|| self.field(&self.creator, body))
        {
            return Some(name);
        }

        let from_description = self.field(&self.description, body).and_then(|d| {
            let plain = self.markup.replace_all(&d, "");
            self.issuer_prefix
                .captures(plain.trim())
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().to_string())
                .filter(|name| !name.is_empty() && name.chars().count() <= MAX_ISSUER_LEN)
        });
        if from_description.is_some() {
            return from_description;
        }

        let lowered = title.to_lowercase();
        feed.keywords
            .iter()
            .find(|k| !k.trim().is_empty() && lowered.contains(&k.trim().to_lowercase()))
            .map(|k| k.trim().to_string())
    }

    /// Every usable item of `xml`, in document order.
    ///
    /// Items without a title, or without both guid and link, are skipped.
    pub fn parse(&self, feed: &FeedSource, xml: &str) -> Vec<NewsRecord> {
        let scraped_at = Some(Utc::now());
        let mut records = Vec::new();
        for item in self.item.captures_iter(xml) {
            let Some(body) = item.get(1).map(|m| m.as_str()) else {
                continue;
            };
            let Some(title) = self.field(&self.title, body) else {
                log::debug!("{}: skipping item without title", feed.id);
                continue;
            };
            let link = self.field(&self.link, body).unwrap_or_default();
            let Some(guid) = self
                .field(&self.guid, body)
                .or_else(|| (!link.is_empty()).then(|| link.clone()))
            else {
                log::debug!("{}: skipping '{title}' without guid or link", feed.id);
                continue;
            };
            let issuer = self.issuer(feed, body, &title);
            records.push(NewsRecord {
                feed: feed.id.clone(),
                feed_name: feed.name.clone(),
                guid,
                title,
                link,
                issuer,
                published: self.field(&self.pub_date, body),
                scraped_at,
            });
        }
        records
    }
}
