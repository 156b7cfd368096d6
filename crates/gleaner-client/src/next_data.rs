//! Extraction from Next.js `__NEXT_DATA__` payloads.
//!
//! Next.js pages embed their props in `<script id="__NEXT_DATA__">`. Reading
//! that JSON is far steadier than selecting rendered markup. JSON API bodies
//! (no HTML around them) are accepted as well.

use gleaner_core::error::AppError;
use gleaner_core::models::{ExtractedPage, Record, Response};
use gleaner_core::traits::Extractor;
use scraper::{Html, Selector};
use serde_json::Value;

/// Returns the `__NEXT_DATA__` JSON text, if the page carries one.
pub fn find_next_data(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(r#"script[id="__NEXT_DATA__"]"#).ok()?;
    let text: String = document.select(&selector).next()?.text().collect();
    (!text.trim().is_empty()).then_some(text)
}

/// [`Extractor`] selecting an item array from embedded JSON by pointer.
#[derive(Debug, Clone)]
pub struct NextDataExtractor {
    items_pointer: String,
    total_pages_pointer: Option<String>,
}

impl NextDataExtractor {
    /// `items_pointer` is an RFC 6901 pointer such as
    /// `/props/pageProps/events`.
    pub fn new(items_pointer: impl Into<String>) -> Result<Self, AppError> {
        let items_pointer = items_pointer.into();
        validate_pointer(&items_pointer)?;
        Ok(Self {
            items_pointer,
            total_pages_pointer: None,
        })
    }

    pub fn with_total_pages_pointer(mut self, pointer: impl Into<String>) -> Result<Self, AppError> {
        let pointer = pointer.into();
        validate_pointer(&pointer)?;
        self.total_pages_pointer = Some(pointer);
        Ok(self)
    }

    fn document(&self, body: &str) -> Result<Value, AppError> {
        let json = match find_next_data(body) {
            Some(json) => json,
            None if body.trim_start().starts_with(['{', '[']) => body.to_string(),
            None => {
                return Err(AppError::Parse(
                    "page has no __NEXT_DATA__ script and is not JSON".into(),
                ));
            }
        };
        serde_json::from_str(&json).map_err(|e| AppError::Parse(format!("invalid page JSON: {e}")))
    }
}

fn validate_pointer(pointer: &str) -> Result<(), AppError> {
    if pointer.is_empty() || pointer.starts_with('/') {
        Ok(())
    } else {
        Err(AppError::Config(format!(
            "JSON pointer '{pointer}' must be empty or start with '/'"
        )))
    }
}

impl Extractor for NextDataExtractor {
    fn extract(&self, response: &Response) -> Result<ExtractedPage, AppError> {
        let document = self.document(&response.body)?;

        let items = match document.pointer(&self.items_pointer) {
            None | Some(Value::Null) => return Err(AppError::ExtractionEmpty),
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(AppError::Parse(format!(
                    "{} is not an array (found {})",
                    self.items_pointer,
                    type_name(other)
                )));
            }
        };

        let mut records = Vec::with_capacity(items.len());
        for (idx, item) in items.iter().enumerate() {
            match item {
                Value::Object(map) => records.push(Record::from(map.clone())),
                other => tracing::warn!(
                    item = idx,
                    found = type_name(other),
                    "Skipping non-object item"
                ),
            }
        }
        if records.is_empty() {
            return Err(AppError::ExtractionEmpty);
        }

        let total_pages = self
            .total_pages_pointer
            .as_deref()
            .and_then(|p| document.pointer(p))
            .and_then(|v| v.as_u64().or_else(|| v.as_str()?.parse().ok()))
            .and_then(|n| u32::try_from(n).ok());

        let page = ExtractedPage::new(records);
        Ok(match total_pages {
            Some(total) => page.with_total_pages(total),
            None => page,
        })
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
