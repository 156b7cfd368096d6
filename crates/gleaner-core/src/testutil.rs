//! Test utilities: mock implementations of the core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::AppError;
use crate::models::{Credential, ExtractedPage, Record, RequestDescriptor, Response};
use crate::traits::{Extractor, Fetcher, Transport};

// ---------------------------------------------------------------------------
// MockTransport
// ---------------------------------------------------------------------------

/// Mock transport replaying scripted outcomes.
#[derive(Clone)]
pub struct MockTransport {
    /// Each call pops the first element. Once empty, `fallback_status` is used.
    script: Arc<Mutex<Vec<Result<Response, AppError>>>>,
    fallback_status: u16,
    calls: Arc<Mutex<Vec<(String, Credential)>>>,
}

impl MockTransport {
    pub fn new(script: Vec<Result<Response, AppError>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script)),
            fallback_status: 200,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every call answers with `status` and an empty body.
    pub fn always_status(status: u16) -> Self {
        Self {
            fallback_status: status,
            ..Self::new(Vec::new())
        }
    }

    pub fn attempts(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn credentials(&self) -> Vec<Credential> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn urls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(u, _)| u.clone())
            .collect()
    }
}

impl Transport for MockTransport {
    async fn send(
        &self,
        request: &RequestDescriptor,
        credential: &Credential,
    ) -> Result<Response, AppError> {
        let url = request.full_url()?.to_string();
        self.calls
            .lock()
            .unwrap()
            .push((url.clone(), credential.clone()));

        let mut script = self.script.lock().unwrap();
        if script.is_empty() {
            Ok(Response::new(self.fallback_status, url, ""))
        } else {
            script.remove(0)
        }
    }
}

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Mock fetcher keyed by full URL; unknown URLs get an empty 200 page.
#[derive(Clone, Default)]
pub struct MockFetcher {
    pages: Arc<Mutex<HashMap<String, Result<String, AppError>>>>,
    requested: Arc<Mutex<Vec<String>>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: &str, body: &str) -> Self {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), Ok(body.to_string()));
        self
    }

    pub fn with_error(self, url: &str, error: AppError) -> Self {
        self.pages.lock().unwrap().insert(url.to_string(), Err(error));
        self
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &RequestDescriptor) -> Result<Response, AppError> {
        let url = request.full_url()?.to_string();
        self.requested.lock().unwrap().push(url.clone());

        // Errors are handed out once; a second request sees an empty page.
        let entry = self.pages.lock().unwrap().remove(&url);
        match entry {
            Some(Ok(body)) => {
                self.pages
                    .lock()
                    .unwrap()
                    .insert(url.clone(), Ok(body.clone()));
                Ok(Response::new(200, url, body))
            }
            Some(Err(e)) => Err(e),
            None => Ok(Response::new(200, url, "")),
        }
    }
}

// ---------------------------------------------------------------------------
// MockExtractor
// ---------------------------------------------------------------------------

/// Mock extractor: the body is a number N and yields N records
/// `{"n": i, "url": <response url>}`. An empty or zero body is
/// `ExtractionEmpty`; a non-numeric body is a parse error.
#[derive(Clone, Default)]
pub struct MockExtractor {
    total_pages: Option<u32>,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_total_pages(total: u32) -> Self {
        Self {
            total_pages: Some(total),
        }
    }
}

impl Extractor for MockExtractor {
    fn extract(&self, response: &Response) -> Result<ExtractedPage, AppError> {
        let body = response.body.trim();
        if body.is_empty() {
            return Err(AppError::ExtractionEmpty);
        }
        let count: usize = body
            .parse()
            .map_err(|_| AppError::Parse(format!("not a count: {body}")))?;
        if count == 0 {
            return Err(AppError::ExtractionEmpty);
        }
        let records = (0..count)
            .map(|i| {
                Record::new()
                    .with("n", i as u64)
                    .with("url", response.url.clone())
            })
            .collect();
        let page = ExtractedPage::new(records);
        Ok(match self.total_pages {
            Some(t) => page.with_total_pages(t),
            None => page,
        })
    }
}
