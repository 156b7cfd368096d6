use std::future::Future;

use crate::error::AppError;
use crate::models::{Credential, ExtractedPage, RequestDescriptor, Response};

/// Executes a single attempt of a request with the given credential.
///
/// Implementations return `Ok` for every response that reached the server,
/// whatever its status; classification happens in the retry layer.
/// Connection failures and timeouts are `Err`.
pub trait Transport: Send + Sync + Clone {
    fn send(
        &self,
        request: &RequestDescriptor,
        credential: &Credential,
    ) -> impl Future<Output = Result<Response, AppError>> + Send;
}

/// Fetches a document for a logical request, retrying as it sees fit.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(
        &self,
        request: &RequestDescriptor,
    ) -> impl Future<Output = Result<Response, AppError>> + Send;
}

/// Turns a fetched document into records.
///
/// Returns [`AppError::ExtractionEmpty`] when the page holds no items.
pub trait Extractor: Send + Sync + Clone {
    fn extract(&self, response: &Response) -> Result<ExtractedPage, AppError>;
}

/// Builds the request for a given 1-indexed page number.
pub trait PageSource: Send + Sync {
    fn page(&self, page: u32) -> Result<RequestDescriptor, AppError>;
}
