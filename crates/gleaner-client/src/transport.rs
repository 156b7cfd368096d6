use std::time::Duration;

use gleaner_core::error::AppError;
use gleaner_core::models::{Credential, Method, RequestDescriptor, Response};
use gleaner_core::proxy::normalize_proxy;
use gleaner_core::traits::Transport;
use moka::future::Cache;
use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, USER_AGENT};

/// Key for the client without a proxy.
const DIRECT: &str = "";

/// HTTP transport using reqwest.
///
/// One `Client` is built per proxy (reqwest binds proxies at build time)
/// and kept in a small cache shared by all clones, so connection pools are
/// reused across attempts through the same proxy.
#[derive(Clone)]
pub struct ReqwestTransport {
    clients: Cache<String, Client>,
    timeout: Duration,
}

impl ReqwestTransport {
    /// Transport with a **30 s** per-attempt timeout.
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            clients: Cache::new(256),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn build_client(&self, proxy: Option<&str>) -> Result<Client, AppError> {
        let mut builder = Client::builder()
            .default_headers(browser_headers())
            .timeout(self.timeout)
            .connect_timeout(self.timeout.min(Duration::from_secs(10)));

        if let Some(proxy) = proxy {
            let proxy = normalize_proxy(proxy).map_err(AppError::Config)?;
            let proxy = reqwest::Proxy::all(&proxy)
                .map_err(|e| AppError::Config(format!("Invalid proxy '{proxy}': {e}")))?;
            builder = builder.proxy(proxy);
        }

        builder
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {e}")))
    }

    async fn client_for(&self, proxy: Option<&str>) -> Result<Client, AppError> {
        let key = proxy.unwrap_or(DIRECT).to_string();
        self.clients
            .try_get_with(key, async { self.build_client(proxy) })
            .await
            .map_err(|e| match e.as_ref() {
                AppError::Config(msg) => AppError::Config(msg.clone()),
                other => AppError::Config(other.to_string()),
            })
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
    headers
}

impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: &RequestDescriptor,
        credential: &Credential,
    ) -> Result<Response, AppError> {
        let url = request.full_url()?;
        let client = self.client_for(credential.proxy.as_deref()).await?;

        let method = match request.method() {
            Method::Get => reqwest::Method::GET,
            Method::Head => reqwest::Method::HEAD,
            Method::Post => reqwest::Method::POST,
        };

        tracing::debug!(%url, proxy = ?credential.proxy, "Sending request");
        let response = client
            .request(method, url.clone())
            .header(USER_AGENT, &credential.user_agent)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(self.timeout)
                } else if e.is_connect() {
                    AppError::Network(format!("Connection failed: {e}"))
                } else if e.is_builder() {
                    AppError::Config(format!("Invalid request for {url}: {e}"))
                } else {
                    AppError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::Network(format!("Failed to read response body: {e}")))?;

        Ok(Response::new(status, final_url, body))
    }
}
