//! Turns parsed arguments into the pieces a run needs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Args;

use gleaner_client::{NextDataExtractor, Recipe, ReqwestTransport, SelectorExtractor};
use gleaner_core::delay::DelayPolicy;
use gleaner_core::error::AppError;
use gleaner_core::models::{Credential, ExtractedPage, RequestDescriptor, Response};
use gleaner_core::proxy::{load_proxy_file, normalize_proxy};
use gleaner_core::rotator::RotationPolicy;
use gleaner_core::sink::OutputFormat;
use gleaner_core::traits::{Extractor, Transport};
use gleaner_core::{ScraperConfig, UrlTemplate};

/// Options shared by `scrape` and `batch`.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// URL template; `{page}`, `{query}` and `{target}` are substituted
    #[arg(short, long, env = "GLEANER_URL")]
    pub url: String,

    /// Search keyword substituted for `{query}`
    #[arg(short, long, visible_alias = "keyword")]
    pub query: Option<String>,

    /// Maximum pages per target (0 = until a page comes back empty)
    #[arg(long = "pages", visible_alias = "max-pages", default_value_t = 1)]
    pub pages: u32,

    /// Stop once this many records are collected per target
    #[arg(long)]
    pub limit: Option<usize>,

    /// JSON recipe of CSS selectors
    #[arg(long, conflicts_with = "next_data", required_unless_present = "next_data")]
    pub recipe: Option<PathBuf>,

    /// JSON pointer to the item array in `__NEXT_DATA__` (or a JSON body)
    #[arg(long)]
    pub next_data: Option<String>,

    /// JSON pointer to the total page count, with --next-data
    #[arg(long, requires = "next_data")]
    pub total_pages_pointer: Option<String>,

    /// Output file; JSON goes to stdout when omitted
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Output format (json, jsonl, csv); inferred from --output otherwise
    #[arg(short, long)]
    pub format: Option<OutputFormat>,

    /// Wrap JSON output in a {metadata, records} envelope
    #[arg(long, default_value_t = false)]
    pub envelope: bool,

    /// Proxy URI, repeatable
    #[arg(long = "proxy", env = "GLEANER_PROXIES", value_delimiter = ',')]
    pub proxies: Vec<String>,

    /// File with one proxy per line
    #[arg(long, env = "GLEANER_PROXY_FILE")]
    pub proxy_file: Option<PathBuf>,

    /// Minimum delay before each request, in seconds
    #[arg(long, env = "GLEANER_DELAY_MIN", default_value_t = 1.0)]
    pub delay_min: f64,

    /// Maximum delay before each request, in seconds
    #[arg(long, env = "GLEANER_DELAY_MAX", default_value_t = 3.0)]
    pub delay_max: f64,

    /// Retries per request after the first attempt
    #[arg(long, env = "GLEANER_RETRIES", default_value_t = 3)]
    pub retries: u32,

    /// Per-attempt timeout in seconds
    #[arg(long, env = "GLEANER_TIMEOUT", default_value_t = 30)]
    pub timeout: u64,

    /// Pick user agents and proxies at random instead of round robin
    #[arg(long, default_value_t = false)]
    pub random_rotation: bool,

    /// Browser only: wait this long after navigation
    #[arg(long, default_value_t = 2000)]
    pub settle_ms: u64,

    /// Browser only: wait until this CSS selector matches
    #[arg(long)]
    pub wait_for: Option<String>,

    /// Render pages in headless Chromium
    #[arg(long, default_value_t = false)]
    pub browser: bool,
}

fn seconds(value: f64, flag: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .with_context(|| format!("{flag} must be a non-negative number of seconds"))
}

impl CommonArgs {
    pub fn config(&self) -> Result<ScraperConfig> {
        let mut proxies = self
            .proxies
            .iter()
            .map(|p| normalize_proxy(p).map_err(AppError::Config))
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(path) = &self.proxy_file {
            proxies.extend(load_proxy_file(path)?);
        }

        let delays = DelayPolicy::new(
            seconds(self.delay_min, "--delay-min")?,
            seconds(self.delay_max, "--delay-max")?,
        );
        let rotation = if self.random_rotation {
            RotationPolicy::Random
        } else {
            RotationPolicy::RoundRobin
        };

        let config = ScraperConfig::default()
            .with_proxies(proxies)
            .with_rotation(rotation)
            .with_delays(delays)
            .with_max_retries(self.retries)
            .with_timeout(Duration::from_secs(self.timeout))
            .with_max_pages((self.pages > 0).then_some(self.pages))
            .with_limit(self.limit);
        config.validate()?;
        Ok(config)
    }

    pub fn template(&self) -> UrlTemplate {
        let template = UrlTemplate::new(&self.url);
        match &self.query {
            Some(query) => template.with_query(query),
            None => template,
        }
    }

    pub fn extractor(&self) -> Result<AnyExtractor> {
        if let Some(pointer) = &self.next_data {
            let mut extractor = NextDataExtractor::new(pointer)?;
            if let Some(total) = &self.total_pages_pointer {
                extractor = extractor.with_total_pages_pointer(total)?;
            }
            return Ok(AnyExtractor::NextData(extractor));
        }
        let Some(path) = &self.recipe else {
            bail!("either --recipe or --next-data is required");
        };
        let recipe = Recipe::from_file(path)?;
        Ok(AnyExtractor::Selector(SelectorExtractor::new(recipe)?))
    }

    pub async fn transport(&self, config: &ScraperConfig) -> Result<AnyTransport> {
        if self.browser {
            #[cfg(feature = "browser")]
            {
                let options = gleaner_client::BrowserOptions {
                    timeout: config.timeout,
                    settle: Duration::from_millis(self.settle_ms),
                    wait_for: self.wait_for.clone(),
                    proxy: config.proxies.first().cloned(),
                };
                if config.proxies.len() > 1 {
                    tracing::warn!("Browser mode uses only the first proxy");
                }
                let browser = gleaner_client::BrowserTransport::launch(options)
                    .await
                    .context("Failed to launch headless browser")?;
                return Ok(AnyTransport::Browser(browser));
            }
            #[cfg(not(feature = "browser"))]
            bail!("--browser needs a build with `--features browser`");
        }
        if self.wait_for.is_some() {
            tracing::warn!("--wait-for only applies with --browser");
        }
        Ok(AnyTransport::Http(ReqwestTransport::with_timeout(config.timeout)))
    }

    /// Explicit --format, else the output extension, else JSON.
    pub fn output_format(&self) -> OutputFormat {
        self.format
            .or_else(|| self.output.as_deref().and_then(OutputFormat::from_path))
            .unwrap_or_default()
    }
}

/// The transports a run can use, chosen at startup.
#[derive(Clone)]
pub enum AnyTransport {
    Http(ReqwestTransport),
    #[cfg(feature = "browser")]
    Browser(gleaner_client::BrowserTransport),
}

impl Transport for AnyTransport {
    async fn send(
        &self,
        request: &RequestDescriptor,
        credential: &Credential,
    ) -> Result<Response, AppError> {
        match self {
            AnyTransport::Http(t) => t.send(request, credential).await,
            #[cfg(feature = "browser")]
            AnyTransport::Browser(t) => t.send(request, credential).await,
        }
    }
}

#[derive(Debug, Clone)]
pub enum AnyExtractor {
    Selector(SelectorExtractor),
    NextData(NextDataExtractor),
}

impl Extractor for AnyExtractor {
    fn extract(&self, response: &Response) -> Result<ExtractedPage, AppError> {
        match self {
            AnyExtractor::Selector(e) => e.extract(response),
            AnyExtractor::NextData(e) => e.extract(response),
        }
    }
}

/// Targets from `--target` flags followed by a targets file, in order.
/// Blank lines and `#` comments in the file are skipped.
pub fn load_targets(flags: &[String], file: Option<&Path>) -> Result<Vec<String>> {
    let mut targets: Vec<String> = flags.iter().map(|t| t.trim().to_string()).collect();
    if let Some(path) = file {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read targets file: {}", path.display()))?;
        targets.extend(
            text.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(str::to_string),
        );
    }
    targets.retain(|t| !t.is_empty());
    if targets.is_empty() {
        bail!("no targets given; use --target or --targets-file");
    }
    Ok(targets)
}
