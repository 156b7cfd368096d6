//! Round-robin (or random) rotation of user agents and proxies.
//!
//! Both cursors are plain atomics: concurrent callers may occasionally
//! receive the same credential, but an index is always reduced modulo the
//! list length before use, so it can never go out of bounds.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;

use crate::error::AppError;
use crate::models::Credential;

/// Desktop browser user agents used when none are configured.
pub const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
];

/// How the next credential is chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RotationPolicy {
    #[default]
    RoundRobin,
    Random,
}

#[derive(Debug)]
struct Pool {
    items: Vec<String>,
    cursor: AtomicUsize,
}

impl Pool {
    fn new(items: Vec<String>) -> Self {
        Self {
            items,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Next item; `None` only for an empty pool.
    fn next(&self, policy: RotationPolicy) -> Option<&str> {
        if self.items.is_empty() {
            return None;
        }
        let idx = match policy {
            RotationPolicy::RoundRobin => self.cursor.fetch_add(1, Ordering::Relaxed),
            RotationPolicy::Random => rand::rng().random_range(0..self.items.len()),
        };
        Some(&self.items[idx % self.items.len()])
    }

    fn current(&self) -> Option<&str> {
        if self.items.is_empty() {
            return None;
        }
        let idx = self.cursor.load(Ordering::Relaxed);
        Some(&self.items[idx % self.items.len()])
    }
}

/// Thread-safe credential pool shared by all clones.
#[derive(Debug, Clone)]
pub struct CredentialRotator {
    user_agents: Arc<Pool>,
    proxies: Arc<Pool>,
    policy: RotationPolicy,
    rotate_proxies: bool,
}

impl CredentialRotator {
    /// Create a rotator; fails if `user_agents` is empty.
    pub fn new(user_agents: Vec<String>, proxies: Vec<String>) -> Result<Self, AppError> {
        if user_agents.is_empty() {
            return Err(AppError::Config(
                "At least one user agent is required".to_string(),
            ));
        }
        Ok(Self {
            user_agents: Arc::new(Pool::new(user_agents)),
            proxies: Arc::new(Pool::new(proxies)),
            policy: RotationPolicy::default(),
            rotate_proxies: true,
        })
    }

    /// Rotator over [`DEFAULT_USER_AGENTS`] and no proxies.
    pub fn with_defaults() -> Self {
        let agents = DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect();
        Self {
            user_agents: Arc::new(Pool::new(agents)),
            proxies: Arc::new(Pool::new(Vec::new())),
            policy: RotationPolicy::default(),
            rotate_proxies: true,
        }
    }

    pub fn with_policy(mut self, policy: RotationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// When disabled, credentials never carry a proxy.
    pub fn with_proxy_rotation(mut self, enabled: bool) -> Self {
        self.rotate_proxies = enabled;
        self
    }

    pub fn policy(&self) -> RotationPolicy {
        self.policy
    }

    pub fn proxy_count(&self) -> usize {
        if self.rotate_proxies {
            self.proxies.items.len()
        } else {
            0
        }
    }

    /// Hand out the next credential. Both pools advance on every call.
    pub fn next_credential(&self) -> Credential {
        // Constructors guarantee a non-empty agent pool.
        let user_agent = self
            .user_agents
            .next(self.policy)
            .unwrap_or(DEFAULT_USER_AGENTS[0])
            .to_string();
        let proxy = if self.rotate_proxies {
            self.proxies.next(self.policy).map(str::to_string)
        } else {
            None
        };
        Credential { user_agent, proxy }
    }

    /// Skip past the current proxy, e.g. after a block. Returns the proxy
    /// that will be used next under round robin. Random rotation has no
    /// cursor to advance, so it returns `None` there.
    pub fn rotate_proxy(&self) -> Option<String> {
        if !self.rotate_proxies
            || self.proxies.items.is_empty()
            || self.policy == RotationPolicy::Random
        {
            return None;
        }
        self.proxies.cursor.fetch_add(1, Ordering::Relaxed);
        self.proxies.current().map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agents(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("ua-{i}")).collect()
    }

    #[test]
    fn empty_user_agents_is_config_error() {
        let err = CredentialRotator::new(vec![], vec![]).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn round_robin_cycles_in_order() {
        let rotator = CredentialRotator::new(agents(3), vec![]).unwrap();
        let seen: Vec<_> = (0..7).map(|_| rotator.next_credential().user_agent).collect();
        assert_eq!(
            seen,
            vec!["ua-0", "ua-1", "ua-2", "ua-0", "ua-1", "ua-2", "ua-0"]
        );
    }

    #[test]
    fn no_proxies_means_no_proxy() {
        let rotator = CredentialRotator::new(agents(2), vec![]).unwrap();
        assert_eq!(rotator.next_credential().proxy, None);
        assert_eq!(rotator.rotate_proxy(), None);
    }

    #[test]
    fn proxies_cycle_with_requests() {
        let rotator = CredentialRotator::new(
            agents(1),
            vec!["http://p1:8080".into(), "http://p2:8080".into()],
        )
        .unwrap();
        let proxies: Vec<_> = (0..4)
            .map(|_| rotator.next_credential().proxy.unwrap())
            .collect();
        assert_eq!(
            proxies,
            vec!["http://p1:8080", "http://p2:8080", "http://p1:8080", "http://p2:8080"]
        );
    }

    #[test]
    fn disabled_proxy_rotation_hides_proxies() {
        let rotator = CredentialRotator::new(agents(1), vec!["http://p1:8080".into()])
            .unwrap()
            .with_proxy_rotation(false);
        assert_eq!(rotator.next_credential().proxy, None);
        assert_eq!(rotator.proxy_count(), 0);
    }

    #[test]
    fn rotate_proxy_skips_ahead() {
        let rotator = CredentialRotator::new(
            agents(1),
            vec!["http://a:1".into(), "http://b:1".into(), "http://c:1".into()],
        )
        .unwrap();
        assert_eq!(rotator.next_credential().proxy.as_deref(), Some("http://a:1"));
        assert_eq!(rotator.rotate_proxy().as_deref(), Some("http://c:1"));
        assert_eq!(rotator.next_credential().proxy.as_deref(), Some("http://c:1"));
    }

    #[test]
    fn rotate_proxy_under_random_policy_names_nothing() {
        let rotator = CredentialRotator::new(
            agents(1),
            vec!["http://a:1".into(), "http://b:1".into()],
        )
        .unwrap()
        .with_policy(RotationPolicy::Random);
        assert_eq!(rotator.rotate_proxy(), None);
        let proxy = rotator.next_credential().proxy.unwrap();
        assert!(proxy == "http://a:1" || proxy == "http://b:1");
    }

    #[test]
    fn random_policy_stays_in_pool() {
        let pool = agents(4);
        let rotator = CredentialRotator::new(pool.clone(), vec![])
            .unwrap()
            .with_policy(RotationPolicy::Random);
        for _ in 0..200 {
            assert!(pool.contains(&rotator.next_credential().user_agent));
        }
    }

    #[test]
    fn concurrent_callers_never_go_out_of_bounds() {
        let rotator = CredentialRotator::new(agents(3), vec!["http://p:1".into()]).unwrap();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let r = rotator.clone();
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        let c = r.next_credential();
                        assert!(c.user_agent.starts_with("ua-"));
                        assert_eq!(c.proxy.as_deref(), Some("http://p:1"));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn defaults_are_browser_agents() {
        let rotator = CredentialRotator::with_defaults();
        assert!(rotator.next_credential().user_agent.starts_with("Mozilla/5.0"));
    }
}
