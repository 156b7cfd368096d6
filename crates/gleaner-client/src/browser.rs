use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::emulation::SetUserAgentOverrideParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use gleaner_core::error::AppError;
use gleaner_core::models::{Credential, RequestDescriptor, Response};
use gleaner_core::traits::Transport;

/// Launch and render settings for [`BrowserTransport`].
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    /// Upper bound for navigation plus waiting, per attempt.
    pub timeout: Duration,
    /// Fixed wait after navigation when no `wait_for` selector is set.
    pub settle: Duration,
    /// Wait until this CSS selector matches instead of a fixed settle time.
    pub wait_for: Option<String>,
    /// Proxy for the whole browser process. Chromium cannot switch proxies
    /// per tab, so per-credential proxies are not applied.
    pub proxy: Option<String>,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            settle: Duration::from_secs(2),
            wait_for: None,
            proxy: None,
        }
    }
}

/// Headless-browser transport using Chromium via the Chrome DevTools Protocol.
///
/// Renders JavaScript before returning the HTML, for pages that build their
/// listings client side. One Chromium process is shared by all clones; each
/// attempt opens a tab, applies the credential's user agent, navigates,
/// waits, grabs the DOM and closes the tab.
///
/// # Example
///
/// ```rust,no_run
/// use gleaner_client::{BrowserOptions, BrowserTransport};
/// use gleaner_core::models::{Credential, RequestDescriptor};
/// use gleaner_core::traits::Transport;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = BrowserTransport::launch(BrowserOptions::default()).await?;
/// let credential = Credential { user_agent: "Mozilla/5.0".into(), proxy: None };
/// let response = transport
///     .send(&RequestDescriptor::get("https://example.com"), &credential)
///     .await?;
/// println!("{}", &response.body[..200]);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct BrowserTransport {
    browser: Arc<Browser>,
    options: BrowserOptions,
}

impl BrowserTransport {
    /// Launches headless Chromium.
    ///
    /// Requires a Chromium / Chrome binary reachable via `$PATH`, `CHROME_BIN`
    /// or the default locations checked by `chromiumoxide`.
    pub async fn launch(options: BrowserOptions) -> Result<Self, AppError> {
        let mut builder = BrowserConfig::builder().no_sandbox().disable_default_args();

        if let Some(bin) = find_chrome_binary() {
            tracing::info!(path = %bin.display(), "Using Chrome binary");
            builder = builder.chrome_executable(bin);
        }
        if let Some(proxy) = &options.proxy {
            builder = builder.arg(format!("--proxy-server={proxy}"));
        }

        let config = builder
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-popup-blocking")
            .arg("--no-first-run")
            .build()
            .map_err(|e| AppError::Config(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::Config(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled continuously for the connection to work.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::warn!(error = %e, "Browser CDP handler error");
                    break;
                }
            }
        });

        Ok(Self {
            browser: Arc::new(browser),
            options,
        })
    }

    async fn wait_until_ready(&self, page: &Page) {
        match &self.options.wait_for {
            Some(selector) => {
                // find_element fails fast when nothing matches yet, so poll.
                while page.find_element(selector.as_str()).await.is_err() {
                    tokio::time::sleep(Duration::from_millis(250)).await;
                }
            }
            None => tokio::time::sleep(self.options.settle).await,
        }
    }

    /// Opens a tab, renders `url` within the timeout and always closes the
    /// tab again, whether the attempt succeeded, failed or timed out.
    async fn render(&self, url: &str, credential: &Credential) -> Result<Response, AppError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| AppError::Network(format!("Failed to open tab: {e}")))?;

        let close = async {
            if let Err(e) = page.clone().close().await {
                tracing::debug!(error = %e, "Failed to close tab");
            }
        };
        closing(
            self.options.timeout,
            self.render_in(&page, url, credential),
            close,
        )
        .await
    }

    async fn render_in(
        &self,
        page: &Page,
        url: &str,
        credential: &Credential,
    ) -> Result<Response, AppError> {
        page.set_user_agent(SetUserAgentOverrideParams::new(
            credential.user_agent.clone(),
        ))
        .await
        .map_err(|e| AppError::Network(format!("Failed to set user agent: {e}")))?;

        page.goto(url)
            .await
            .map_err(|e| AppError::Network(format!("Failed to navigate to {url}: {e}")))?;

        let status = page
            .wait_for_navigation_response()
            .await
            .ok()
            .flatten()
            .and_then(|req| req.response.as_ref().map(|r| r.status as u16))
            .unwrap_or(200);

        self.wait_until_ready(page).await;

        let body = page
            .content()
            .await
            .map_err(|e| AppError::Network(format!("Failed to read page content: {e}")))?;
        let final_url = page.url().await.ok().flatten().unwrap_or_else(|| url.to_string());

        Ok(Response::new(status, final_url, body))
    }
}

/// Runs `work` under `timeout`, then awaits `close` on every outcome.
async fn closing<T, W, C>(timeout: Duration, work: W, close: C) -> Result<T, AppError>
where
    W: Future<Output = Result<T, AppError>>,
    C: Future<Output = ()>,
{
    let result = tokio::time::timeout(timeout, work).await;
    close.await;
    result.unwrap_or(Err(AppError::Timeout(timeout)))
}

/// Tries to locate the real Chrome/Chromium binary.
///
/// The snap wrapper at `/snap/bin/chromium` strips unknown CLI flags, which
/// breaks headless mode, so the binary inside the snap is preferred.
fn find_chrome_binary() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("CHROME_BIN") {
        let path = PathBuf::from(p);
        if path.exists() {
            return Some(path);
        }
    }

    [
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ]
    .iter()
    .map(PathBuf::from)
    .find(|p| p.exists())
}

impl Transport for BrowserTransport {
    async fn send(
        &self,
        request: &RequestDescriptor,
        credential: &Credential,
    ) -> Result<Response, AppError> {
        let url = request.full_url()?.to_string();
        if credential.proxy.is_some() && credential.proxy != self.options.proxy {
            tracing::debug!(proxy = ?credential.proxy, "Browser ignores per-request proxy");
        }

        self.render(&url, credential).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    fn close_flag() -> (Arc<AtomicBool>, impl Future<Output = ()>) {
        let closed = Arc::new(AtomicBool::new(false));
        let flag = closed.clone();
        (closed, async move { flag.store(true, Ordering::SeqCst) })
    }

    #[tokio::test(start_paused = true)]
    async fn tab_is_closed_after_timeout() {
        let (closed, close) = close_flag();
        let work = async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, AppError>(())
        };

        let err = closing(Duration::from_secs(5), work, close).await.unwrap_err();
        assert!(matches!(err, AppError::Timeout(d) if d == Duration::from_secs(5)));
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn tab_is_closed_after_failure() {
        let (closed, close) = close_flag();
        let work = async { Err::<(), _>(AppError::Network("navigation failed".into())) };

        let err = closing(Duration::from_secs(5), work, close).await.unwrap_err();
        assert!(matches!(err, AppError::Network(_)));
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn tab_is_closed_after_success() {
        let (closed, close) = close_flag();
        let value = closing(Duration::from_secs(5), async { Ok(7) }, close)
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert!(closed.load(Ordering::SeqCst));
    }
}
