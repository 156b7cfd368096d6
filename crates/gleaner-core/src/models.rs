use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::error::AppError;

/// HTTP method of a [`RequestDescriptor`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Head,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to request: URL, extra query parameters and method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    url: String,
    query: Vec<(String, String)>,
    method: Method,
}

impl RequestDescriptor {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
            method: Method::Get,
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// Parse the base URL and append the query parameters (percent-encoded).
    pub fn full_url(&self) -> Result<Url, AppError> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| AppError::Config(format!("Invalid URL '{}': {e}", self.url)))?;
        if !self.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in &self.query {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }
}

/// User agent plus optional proxy, handed out for a single attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub user_agent: String,
    pub proxy: Option<String>,
}

/// Raw outcome of one transport attempt.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    /// Final URL after redirects.
    pub url: String,
    pub body: String,
}

impl Response {
    pub fn new(status: u16, url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            status,
            url: url.into(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One scraped item: field name to JSON value.
///
/// Backed by `serde_json::Map`, so field order is the map's key order
/// (sorted unless serde_json's `preserve_order` is enabled).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(serde_json::Map<String, serde_json::Value>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> serde_json::Map<String, serde_json::Value> {
        self.0
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for Record {
    fn from(map: serde_json::Map<String, serde_json::Value>) -> Self {
        Self(map)
    }
}

/// Sorted union of all keys across `records`.
pub fn union_keys(records: &[Record]) -> Vec<String> {
    let keys: BTreeSet<&String> = records.iter().flat_map(|r| r.keys()).collect();
    keys.into_iter().cloned().collect()
}

/// Records extracted from one page, plus an optional pagination hint.
#[derive(Debug, Clone, Default)]
pub struct ExtractedPage {
    pub records: Vec<Record>,
    pub total_pages: Option<u32>,
}

impl ExtractedPage {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records,
            total_pages: None,
        }
    }

    pub fn with_total_pages(mut self, total: u32) -> Self {
        self.total_pages = Some(total);
        self
    }
}

/// Metadata written in the JSON envelope output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub requested: usize,
    pub scraped: usize,
}

impl RunMetadata {
    pub fn start(source: impl Into<String>, requested: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            source: source.into(),
            started_at: Utc::now(),
            finished_at: None,
            requested,
            scraped: 0,
        }
    }

    pub fn finish(mut self, scraped: usize) -> Self {
        self.finished_at = Some(Utc::now());
        self.scraped = scraped;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_url_appends_encoded_query() {
        let req = RequestDescriptor::get("https://example.com/search")
            .with_query("q", "red shoes")
            .with_query("page", 2);
        let url = req.full_url().unwrap();
        assert_eq!(url.as_str(), "https://example.com/search?q=red+shoes&page=2");
        assert_eq!(req.method(), Method::Get);
    }

    #[test]
    fn test_full_url_keeps_existing_query() {
        let req = RequestDescriptor::get("https://example.com/s?type=concert").with_query("page", 1);
        assert_eq!(
            req.full_url().unwrap().as_str(),
            "https://example.com/s?type=concert&page=1"
        );
    }

    #[test]
    fn test_full_url_rejects_garbage() {
        let err = RequestDescriptor::get("not a url").full_url().unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_union_keys_sorted() {
        let records = vec![
            Record::new().with("b", 1).with("a", 1),
            Record::new().with("c", 2),
        ];
        assert_eq!(union_keys(&records), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_record_serializes_as_plain_object() {
        let r = Record::new().with("title", "Hello").with("price", 9.5);
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v, serde_json::json!({"title": "Hello", "price": 9.5}));
    }
}
