//! Record sinks: JSON, JSON Lines and CSV.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;
use crate::models::{Record, RunMetadata, union_keys};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    Jsonl,
    Csv,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Jsonl => "jsonl",
            OutputFormat::Csv => "csv",
        }
    }

    /// Infer the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        ext.parse().ok()
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "jsonl" | "ndjson" => Ok(OutputFormat::Jsonl),
            "csv" => Ok(OutputFormat::Csv),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

#[derive(Serialize)]
struct EnvelopeOut<'a> {
    metadata: &'a RunMetadata,
    records: &'a [Record],
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonIn {
    Array(Vec<Record>),
    Envelope { records: Vec<Record> },
}

/// Pretty JSON: a bare array, or `{metadata, records}` when metadata is given.
pub fn write_json<W: Write>(
    mut writer: W,
    records: &[Record],
    metadata: Option<&RunMetadata>,
) -> Result<(), AppError> {
    match metadata {
        Some(metadata) => {
            serde_json::to_writer_pretty(&mut writer, &EnvelopeOut { metadata, records })?
        }
        None => serde_json::to_writer_pretty(&mut writer, records)?,
    }
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// One compact JSON object per line.
pub fn write_jsonl<W: Write>(mut writer: W, records: &[Record]) -> Result<(), AppError> {
    for record in records {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// CSV with the sorted union of all keys as header.
///
/// Missing fields and nulls are empty cells; arrays and objects are written
/// as embedded JSON.
pub fn write_csv<W: Write>(writer: W, records: &[Record]) -> Result<(), AppError> {
    let header = union_keys(records);
    let mut csv = csv::Writer::from_writer(writer);
    if header.is_empty() {
        return csv.flush().map_err(AppError::from);
    }

    csv.write_record(&header)
        .map_err(|e| AppError::Sink(format!("CSV header: {e}")))?;
    for record in records {
        let row = header
            .iter()
            .map(|key| record.get(key).map(csv_cell).unwrap_or_default());
        csv.write_record(row)
            .map_err(|e| AppError::Sink(format!("CSV row: {e}")))?;
    }
    csv.flush()?;
    Ok(())
}

fn csv_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Read records back from either JSON shape written by [`write_json`].
pub fn read_json<R: Read>(reader: R) -> Result<Vec<Record>, AppError> {
    let parsed: JsonIn = serde_json::from_reader(reader)?;
    match parsed {
        JsonIn::Array(records) | JsonIn::Envelope { records } => Ok(records),
    }
}

/// Write `records` to `path`, creating parent directories as needed.
pub fn write_records(
    path: &Path,
    format: OutputFormat,
    records: &[Record],
    metadata: Option<&RunMetadata>,
) -> Result<(), AppError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(path)
        .map_err(|e| AppError::Sink(format!("cannot create {}: {e}", path.display())))?;
    let writer = BufWriter::new(file);

    match format {
        OutputFormat::Json => write_json(writer, records, metadata)?,
        OutputFormat::Jsonl => write_jsonl(writer, records)?,
        OutputFormat::Csv => write_csv(writer, records)?,
    }
    tracing::info!(path = %path.display(), format = %format, count = records.len(), "Records written");
    Ok(())
}

/// Append `records` to a JSON Lines file, creating it if missing.
pub fn append_jsonl(path: &Path, records: &[Record]) -> Result<(), AppError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| AppError::Sink(format!("cannot open {}: {e}", path.display())))?;

    // One buffered write per call keeps a batch of lines together.
    let mut buf = Vec::new();
    write_jsonl(&mut buf, records)?;
    file.write_all(&buf)?;
    tracing::debug!(path = %path.display(), count = records.len(), "Records appended");
    Ok(())
}
