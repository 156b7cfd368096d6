mod setup;

use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use gleaner_core::models::{Record, RunMetadata};
use gleaner_core::monitor::ScrapeMonitor;
use gleaner_core::pagination::{StopReason, paginate};
use gleaner_core::runner::{BoundedRunner, summarize};
use gleaner_core::sink::{self, OutputFormat};
use gleaner_core::{AppError, BatchResults, PageReport};

use setup::{CommonArgs, load_targets};

#[derive(Parser)]
#[command(name = "gleaner", version, about = "Polite, resilient listing scraper")]
struct Cli {
    /// Debug logging
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Paginate through one listing or search
    Scrape {
        #[command(flatten)]
        common: CommonArgs,
    },

    /// Scrape many targets concurrently; the URL template should use {target}
    Batch {
        #[command(flatten)]
        common: CommonArgs,

        /// Target substituted for `{target}`, repeatable
        #[arg(long = "target")]
        targets: Vec<String>,

        /// File with one target per line
        #[arg(long)]
        targets_file: Option<PathBuf>,

        /// Targets scraped at the same time
        #[arg(short, long, env = "GLEANER_WORKERS", default_value_t = 4)]
        workers: usize,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let level = if cli.verbose { "gleaner=debug" } else { "gleaner=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; finishing in-flight requests and writing partial output");
            token.cancel();
        }
    });

    match cli.command {
        Commands::Scrape { common } => cmd_scrape(&common, cancel).await,
        Commands::Batch {
            common,
            targets,
            targets_file,
            workers,
        } => {
            let targets = load_targets(&targets, targets_file.as_deref())?;
            cmd_batch(&common, targets, workers, cancel).await
        }
    }
}

async fn cmd_scrape(args: &CommonArgs, cancel: CancellationToken) -> Result<ExitCode> {
    let config = args.config()?;
    let extractor = args.extractor()?;
    let transport = args.transport(&config).await?;
    let monitor = ScrapeMonitor::default();
    let fetcher = config.fetcher(transport, monitor.clone(), cancel.clone())?;
    let source = args.template();

    let metadata = RunMetadata::start(&args.url, args.pages as usize);
    tracing::info!(url = %args.url, pages = args.pages, "Starting scrape");

    let report = paginate(&fetcher, &extractor, &source, &config.paginate_options(cancel)).await;
    monitor.record_records(report.records.len());

    let metadata = metadata.finish(report.records.len());
    write_output(args, &report.records, &metadata)?;
    log_stats(&monitor);

    tracing::info!(
        records = report.records.len(),
        pages = report.pages_fetched,
        stop = %report.stop,
        "Scrape finished"
    );

    if report.records.is_empty()
        && let StopReason::Failed(e) = report.stop
    {
        return Err(anyhow::Error::new(e).context("Scrape failed"));
    }
    Ok(exit_code(scrape_failed(&report.stop)))
}

/// Failure or cancellation exits 1, even after partial output.
fn scrape_failed(stop: &StopReason) -> bool {
    matches!(stop, StopReason::Failed(_) | StopReason::Cancelled)
}

fn exit_code(failed: bool) -> ExitCode {
    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

async fn cmd_batch(
    args: &CommonArgs,
    targets: Vec<String>,
    workers: usize,
    cancel: CancellationToken,
) -> Result<ExitCode> {
    if !args.url.contains("{target}") {
        anyhow::bail!("batch --url must contain a {{target}} placeholder");
    }

    let config = args.config()?.with_max_workers(workers);
    let extractor = args.extractor()?;
    let transport = args.transport(&config).await?;
    let monitor = ScrapeMonitor::default();
    let fetcher = config.fetcher(transport, monitor.clone(), cancel.clone())?;
    let template = args.template();
    let options = config.paginate_options(cancel.clone());

    // JSON Lines output is appended target by target as each one finishes.
    let format = args.output_format();
    let stream = match (&args.output, format) {
        (Some(path), OutputFormat::Jsonl) => {
            truncate(path)?;
            Some(Arc::new(JsonlStream::new(path.clone())))
        }
        _ => None,
    };

    let metadata = RunMetadata::start(&args.url, targets.len());
    let runner = BoundedRunner::new(config.max_workers).with_cancellation(cancel);

    let op_stream = stream.clone();
    let results = runner
        .run(targets.clone(), move |target| {
            let fetcher = fetcher.clone();
            let extractor = extractor.clone();
            let source = template.clone().with_target(target.clone());
            let options = options.clone();
            let stream = op_stream.clone();
            async move {
                let mut report = paginate(&fetcher, &extractor, &source, &options)
                    .await
                    .into_result()?;
                tag_records(&mut report.records, &target);
                if let Some(stream) = stream {
                    stream.append(&report.records).await?;
                }
                Ok(report)
            }
        })
        .await;

    let outcome = BatchOutcome::collect(&targets, &results);
    monitor.record_records(outcome.records.len());

    let metadata = metadata.finish(outcome.records.len());
    if stream.is_none() {
        write_output(args, &outcome.records, &metadata)?;
    }
    log_stats(&monitor);

    let (succeeded, failed) = summarize(&results);
    tracing::info!(
        targets = targets.len(),
        succeeded,
        failed,
        records = outcome.records.len(),
        "Batch finished"
    );
    if !outcome.failed.is_empty() {
        tracing::warn!(targets = %outcome.failed.join(", "), "Failed targets");
    }
    if !outcome.partial.is_empty() {
        tracing::warn!(
            targets = %outcome.partial.join(", "),
            "Targets failed after partial results"
        );
    }

    Ok(exit_code(outcome.is_failure()))
}

/// Adds the `_target` field batch output uses to tell targets apart.
fn tag_records(records: &mut [Record], target: &str) {
    for record in records {
        record.insert("_target", target);
    }
}

/// Per-batch tally, in target order.
#[derive(Debug, Default)]
struct BatchOutcome {
    records: Vec<Record>,
    succeeded: usize,
    /// Targets that produced nothing.
    failed: Vec<String>,
    /// Targets whose pagination failed after some records were collected.
    partial: Vec<String>,
    cancelled: bool,
}

impl BatchOutcome {
    fn collect(targets: &[String], results: &BatchResults<PageReport>) -> Self {
        let mut outcome = Self::default();
        for target in targets {
            match results.get(target) {
                Some(Ok(report)) => {
                    outcome.succeeded += 1;
                    match report.stop {
                        StopReason::Cancelled => outcome.cancelled = true,
                        StopReason::Failed(_) => outcome.partial.push(target.clone()),
                        _ => {}
                    }
                    outcome.records.extend(report.records.iter().cloned());
                }
                Some(Err(AppError::Cancelled)) => outcome.cancelled = true,
                Some(Err(_)) => outcome.failed.push(target.clone()),
                None => {}
            }
        }
        outcome
    }

    /// Cancelled, or no target succeeded.
    fn is_failure(&self) -> bool {
        self.cancelled || self.succeeded == 0
    }
}

fn log_stats(monitor: &ScrapeMonitor) {
    let stats = monitor.stats();
    tracing::info!(
        requests = stats.total_requests,
        failed_requests = stats.failed_requests,
        success_rate = ?stats.success_rate.map(|r| format!("{:.1}%", r * 100.0)),
        avg_response_ms = ?stats.avg_response_time.map(|d| d.as_millis()),
        "Request stats"
    );
}

fn write_output(args: &CommonArgs, records: &[Record], metadata: &RunMetadata) -> Result<()> {
    let format = args.output_format();
    let metadata = args.envelope.then_some(metadata);
    if args.envelope && format != OutputFormat::Json {
        tracing::warn!(%format, "--envelope only applies to JSON output");
    }

    match &args.output {
        Some(path) => sink::write_records(path, format, records, metadata)
            .with_context(|| format!("Failed to write {}", path.display())),
        None => {
            let stdout = io::stdout().lock();
            match format {
                OutputFormat::Json => sink::write_json(stdout, records, metadata)?,
                OutputFormat::Jsonl => sink::write_jsonl(stdout, records)?,
                OutputFormat::Csv => sink::write_csv(stdout, records)?,
            }
            Ok(())
        }
    }
}

fn truncate(path: &Path) -> Result<()> {
    if path.exists() {
        std::fs::write(path, b"")
            .with_context(|| format!("Failed to truncate {}", path.display()))?;
    }
    Ok(())
}

/// Serialises appends from concurrent targets to one JSON Lines file.
struct JsonlStream {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl JsonlStream {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: tokio::sync::Mutex::new(()),
        }
    }

    async fn append(&self, records: &[Record]) -> Result<(), AppError> {
        let _guard = self.lock.lock().await;
        sink::append_jsonl(&self.path, records)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;

    fn report(records: usize, stop: StopReason) -> PageReport {
        let records = (0..records)
            .map(|i| {
                let mut record = Record::new();
                record.insert("id", i as u64);
                record
            })
            .collect();
        PageReport {
            records,
            pages_fetched: 1,
            stop,
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn results(entries: Vec<(&str, Result<PageReport, AppError>)>) -> BatchResults<PageReport> {
        entries
            .into_iter()
            .map(|(target, result)| (target.to_string(), result))
            .collect::<HashMap<_, _>>()
    }

    #[test]
    fn scrape_fails_on_partial_failure_or_cancel() {
        let failed = StopReason::Failed(AppError::Network("reset".into()));
        assert!(scrape_failed(&failed));
        assert!(scrape_failed(&StopReason::Cancelled));
        assert!(!scrape_failed(&StopReason::Empty));
        assert!(!scrape_failed(&StopReason::MaxPages));
    }

    #[test]
    fn batch_with_every_target_failed_exits_one() {
        let targets = names(&["a", "b"]);
        let results = results(vec![
            ("a", Err(AppError::Network("reset".into()))),
            ("b", Err(AppError::Blocked { status: 403 })),
        ]);
        let outcome = BatchOutcome::collect(&targets, &results);
        assert_eq!(outcome.failed, targets);
        assert!(outcome.is_failure());
    }

    #[test]
    fn cancelled_batch_exits_one() {
        let targets = names(&["a", "b"]);
        let results = results(vec![
            ("a", Ok(report(3, StopReason::Empty))),
            ("b", Err(AppError::Cancelled)),
        ]);
        let outcome = BatchOutcome::collect(&targets, &results);
        assert!(outcome.cancelled);
        assert_eq!(outcome.records.len(), 3);
        assert!(outcome.is_failure());
    }

    #[test]
    fn mixed_batch_exits_zero_and_names_failures() {
        let targets = names(&["a", "b", "c"]);
        let results = results(vec![
            ("a", Ok(report(2, StopReason::Empty))),
            ("b", Err(AppError::Network("reset".into()))),
            (
                "c",
                Ok(report(1, StopReason::Failed(AppError::Timeout(Duration::from_secs(30))))),
            ),
        ]);
        let outcome = BatchOutcome::collect(&targets, &results);
        assert_eq!(outcome.records.len(), 3);
        assert_eq!(outcome.failed, names(&["b"]));
        assert_eq!(outcome.partial, names(&["c"]));
        assert!(!outcome.is_failure());
    }

    #[test]
    fn tags_every_record_with_its_target() {
        let mut records = report(2, StopReason::Empty).records;
        tag_records(&mut records, "amazon.com");
        assert!(
            records
                .iter()
                .all(|r| r.get("_target").and_then(|v| v.as_str()) == Some("amazon.com"))
        );
    }

    #[tokio::test]
    async fn jsonl_stream_keeps_every_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let stream = Arc::new(JsonlStream::new(path.clone()));

        let mut a = report(2, StopReason::Empty).records;
        tag_records(&mut a, "a");
        let mut b = report(3, StopReason::Empty).records;
        tag_records(&mut b, "b");

        let (first, second) = tokio::join!(stream.append(&a), stream.append(&b));
        first.unwrap();
        second.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines.iter().filter(|l| l.contains(r#""_target":"a""#)).count(), 2);
        assert_eq!(lines.iter().filter(|l| l.contains(r#""_target":"b""#)).count(), 3);
    }
}
