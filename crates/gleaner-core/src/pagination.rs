//! Sequential page walking for a single target.
//!
//! Page N+1 is only requested after page N has been extracted and the loop
//! decided to continue. Targets are independent of each other; run several
//! paginations through [`crate::runner::BoundedRunner`].

use std::fmt;

use tokio_util::sync::CancellationToken;
use url::form_urlencoded;

use crate::error::AppError;
use crate::models::{Record, RequestDescriptor};
use crate::traits::{Extractor, Fetcher, PageSource};

/// Why a pagination loop ended.
#[derive(Debug)]
pub enum StopReason {
    /// A page had no items.
    Empty,
    /// The configured page cap was reached.
    MaxPages,
    /// The site reported this was the last page.
    TotalPages,
    /// The configured record limit was reached.
    Limit,
    /// Fetching or extracting a page failed; earlier records are kept.
    Failed(AppError),
    Cancelled,
}

impl StopReason {
    pub fn is_failure(&self) -> bool {
        matches!(self, StopReason::Failed(_))
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Empty => write!(f, "no more items"),
            StopReason::MaxPages => write!(f, "page limit reached"),
            StopReason::TotalPages => write!(f, "last page reached"),
            StopReason::Limit => write!(f, "record limit reached"),
            StopReason::Failed(e) => write!(f, "failed: {e}"),
            StopReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result of paginating one target.
#[derive(Debug)]
pub struct PageReport {
    pub records: Vec<Record>,
    pub pages_fetched: u32,
    pub stop: StopReason,
}

impl PageReport {
    /// `Err` only when the target failed before yielding any record.
    pub fn into_result(self) -> Result<Self, AppError> {
        match self.stop {
            StopReason::Failed(e) if self.records.is_empty() => Err(e),
            stop => Ok(Self { stop, ..self }),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PaginateOptions {
    /// `None` walks until the site runs out of items.
    pub max_pages: Option<u32>,
    /// Stop (and truncate) once this many records are collected.
    pub limit: Option<usize>,
    pub cancel: CancellationToken,
}

impl PaginateOptions {
    pub fn with_max_pages(mut self, pages: u32) -> Self {
        self.max_pages = Some(pages);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }
}

/// Walk pages 1, 2, ... of `pages` until a stop condition is met.
pub async fn paginate<F, E, P>(
    fetcher: &F,
    extractor: &E,
    pages: &P,
    options: &PaginateOptions,
) -> PageReport
where
    F: Fetcher,
    E: Extractor,
    P: PageSource + ?Sized,
{
    let mut records = Vec::new();
    let mut pages_fetched = 0u32;
    let mut page = 1u32;

    let stop = loop {
        if options.max_pages == Some(0) {
            break StopReason::MaxPages;
        }
        if options.cancel.is_cancelled() {
            break StopReason::Cancelled;
        }

        let request = match pages.page(page) {
            Ok(r) => r,
            Err(e) => break StopReason::Failed(e),
        };

        tracing::info!(page, url = %request.url(), "Fetching page");
        let response = match fetcher.fetch(&request).await {
            Ok(r) => r,
            Err(AppError::Cancelled) => break StopReason::Cancelled,
            Err(e) => {
                tracing::warn!(page, error = %e, "Page fetch failed");
                break StopReason::Failed(e);
            }
        };
        pages_fetched += 1;

        let extracted = match extractor.extract(&response) {
            Ok(p) => p,
            Err(AppError::ExtractionEmpty) => {
                tracing::info!(page, "No items on page");
                break StopReason::Empty;
            }
            Err(e) => {
                tracing::warn!(page, error = %e, "Page extraction failed");
                break StopReason::Failed(e);
            }
        };

        let count = extracted.records.len();
        records.extend(extracted.records);
        tracing::info!(page, count, total = records.len(), "Page scraped");

        if let Some(limit) = options.limit
            && records.len() >= limit
        {
            records.truncate(limit);
            break StopReason::Limit;
        }
        if let Some(total) = extracted.total_pages
            && page >= total
        {
            break StopReason::TotalPages;
        }
        if options.max_pages.is_some_and(|max| page >= max) {
            break StopReason::MaxPages;
        }
        page += 1;
    };

    PageReport {
        records,
        pages_fetched,
        stop,
    }
}

/// URL template with `{page}`, `{query}` and `{target}` placeholders.
///
/// Without a `{page}` placeholder the page number is sent as a `page`
/// query parameter instead. `{query}` is form-encoded; `{target}` is
/// inserted as-is (it is usually a domain or path segment).
#[derive(Debug, Clone)]
pub struct UrlTemplate {
    template: String,
    query: Option<String>,
    target: Option<String>,
}

impl UrlTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            query: None,
            target: None,
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn template(&self) -> &str {
        &self.template
    }
}

impl PageSource for UrlTemplate {
    fn page(&self, page: u32) -> Result<RequestDescriptor, AppError> {
        let mut url = self.template.clone();

        if url.contains("{query}") {
            let query = self.query.as_deref().ok_or_else(|| {
                AppError::Config("URL template uses {query} but no query was given".into())
            })?;
            let encoded: String = form_urlencoded::byte_serialize(query.as_bytes()).collect();
            url = url.replace("{query}", &encoded);
        }
        if url.contains("{target}") {
            let target = self.target.as_deref().ok_or_else(|| {
                AppError::Config("URL template uses {target} but no target was given".into())
            })?;
            url = url.replace("{target}", target);
        }

        if url.contains("{page}") {
            Ok(RequestDescriptor::get(url.replace("{page}", &page.to_string())))
        } else {
            Ok(RequestDescriptor::get(url).with_query("page", page))
        }
    }
}
