use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::delay::DelayPolicy;
use crate::error::AppError;
use crate::monitor::ScrapeMonitor;
use crate::pagination::PaginateOptions;
use crate::retry::{DEFAULT_MAX_RETRIES, RetryingFetcher};
use crate::rotator::{CredentialRotator, DEFAULT_USER_AGENTS, RotationPolicy};
use crate::traits::Transport;

/// Settings shared by every target of a run.
#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub user_agents: Vec<String>,
    pub proxies: Vec<String>,
    pub rotation: RotationPolicy,
    pub rotate_proxies: bool,
    pub delays: DelayPolicy,
    pub max_retries: u32,
    /// Per-attempt timeout, enforced by the transport.
    pub timeout: Duration,
    pub max_workers: usize,
    pub max_pages: Option<u32>,
    pub limit: Option<usize>,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            user_agents: DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect(),
            proxies: Vec::new(),
            rotation: RotationPolicy::default(),
            rotate_proxies: true,
            delays: DelayPolicy::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: Duration::from_secs(30),
            max_workers: 4,
            max_pages: Some(1),
            limit: None,
        }
    }
}

impl ScraperConfig {
    pub fn with_user_agents(mut self, user_agents: Vec<String>) -> Self {
        self.user_agents = user_agents;
        self
    }

    pub fn with_proxies(mut self, proxies: Vec<String>) -> Self {
        self.proxies = proxies;
        self
    }

    pub fn with_rotation(mut self, rotation: RotationPolicy) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_delays(mut self, delays: DelayPolicy) -> Self {
        self.delays = delays;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// `None` walks until a page comes back empty.
    pub fn with_max_pages(mut self, max_pages: Option<u32>) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// Reject settings no run could work with.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.user_agents.is_empty() {
            return Err(AppError::Config("at least one user agent is required".into()));
        }
        if self.timeout.is_zero() {
            return Err(AppError::Config("timeout must be greater than zero".into()));
        }
        if self.limit == Some(0) {
            return Err(AppError::Config("limit must be at least 1".into()));
        }
        Ok(())
    }

    pub fn rotator(&self) -> Result<CredentialRotator, AppError> {
        Ok(
            CredentialRotator::new(self.user_agents.clone(), self.proxies.clone())?
                .with_policy(self.rotation)
                .with_proxy_rotation(self.rotate_proxies),
        )
    }

    /// Wrap `transport` in the retry loop configured by these settings.
    pub fn fetcher<T: Transport>(
        &self,
        transport: T,
        monitor: ScrapeMonitor,
        cancel: CancellationToken,
    ) -> Result<RetryingFetcher<T>, AppError> {
        Ok(
            RetryingFetcher::new(transport, self.rotator()?, self.delays.clone())
                .with_max_retries(self.max_retries)
                .with_monitor(monitor)
                .with_cancellation(cancel),
        )
    }

    pub fn paginate_options(&self, cancel: CancellationToken) -> PaginateOptions {
        PaginateOptions {
            max_pages: self.max_pages,
            limit: self.limit,
            cancel,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockTransport;

    #[test]
    fn defaults_are_valid() {
        let config = ScraperConfig::default();
        config.validate().unwrap();
        assert_eq!(config.user_agents.len(), 5);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.max_pages, Some(1));
    }

    #[test]
    fn empty_user_agents_rejected() {
        let config = ScraperConfig::default().with_user_agents(Vec::new());
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
        assert!(config.rotator().is_err());
    }

    #[test]
    fn zero_limit_rejected() {
        let config = ScraperConfig::default().with_limit(Some(0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn builds_fetcher_with_settings() {
        let config = ScraperConfig::default()
            .with_proxies(vec!["http://p1:8080".into()])
            .with_max_retries(7);
        let fetcher = config
            .fetcher(
                MockTransport::new(Vec::new()),
                ScrapeMonitor::default(),
                CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(fetcher.max_retries(), 7);
        assert_eq!(fetcher.rotator().proxy_count(), 1);
    }

    #[test]
    fn paginate_options_carry_limits() {
        let config = ScraperConfig::default()
            .with_max_pages(None)
            .with_limit(Some(50));
        let options = config.paginate_options(CancellationToken::new());
        assert_eq!(options.max_pages, None);
        assert_eq!(options.limit, Some(50));
    }
}
