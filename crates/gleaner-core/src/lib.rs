pub mod config;
pub mod delay;
pub mod error;
pub mod models;
pub mod monitor;
pub mod pagination;
pub mod proxy;
pub mod retry;
pub mod rotator;
pub mod runner;
pub mod sink;
pub mod traits;

#[cfg(test)]
pub mod testutil;

pub use config::ScraperConfig;
pub use delay::DelayPolicy;
pub use error::AppError;
pub use models::{Credential, ExtractedPage, Method, Record, RequestDescriptor, Response, RunMetadata};
pub use monitor::ScrapeMonitor;
pub use pagination::{PageReport, PaginateOptions, StopReason, UrlTemplate, paginate};
pub use retry::RetryingFetcher;
pub use rotator::{CredentialRotator, RotationPolicy};
pub use runner::{BatchResults, BoundedRunner};
pub use sink::OutputFormat;
pub use traits::{Extractor, Fetcher, PageSource, Transport};
