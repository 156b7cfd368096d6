//! CSS selector extraction driven by a JSON recipe.
//!
//! ```json
//! {
//!   "item": "div.s-result-item[data-asin]",
//!   "base_url": "https://www.amazon.com",
//!   "fields": {
//!     "asin":  { "attr": "data-asin", "required": true },
//!     "title": { "selector": "h2 span", "required": true },
//!     "price": { "selector": ".a-price .a-offscreen", "kind": "number" },
//!     "link":  { "selector": "h2 a", "attr": "href" }
//!   }
//! }
//! ```
//!
//! A field without `selector` reads from the item element itself.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use gleaner_core::error::AppError;
use gleaner_core::models::{ExtractedPage, Record, Response};
use gleaner_core::traits::Extractor;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    #[default]
    Text,
    Number,
    List,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldSpec {
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub attr: Option<String>,
    #[serde(default)]
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Recipe {
    /// Selector matching one element per record.
    pub item: String,
    pub fields: BTreeMap<String, FieldSpec>,
    /// Base for resolving relative `href`/`src` values.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Selector whose text holds the total page count. The last number in
    /// the text is used, so "Page 1 of 12" reads as 12.
    #[serde(default)]
    pub total_pages: Option<String>,
}

impl Recipe {
    pub fn from_json(json: &str) -> Result<Self, AppError> {
        serde_json::from_str(json).map_err(|e| AppError::Config(format!("Invalid recipe: {e}")))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("cannot read recipe {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }
}

#[derive(Debug)]
struct CompiledField {
    name: String,
    selector: Option<Selector>,
    attr: Option<String>,
    kind: FieldKind,
    required: bool,
}

#[derive(Debug)]
struct Compiled {
    item: Selector,
    fields: Vec<CompiledField>,
    base_url: Option<Url>,
    total_pages: Option<Selector>,
}

/// [`Extractor`] that applies a [`Recipe`] to HTML documents.
#[derive(Debug, Clone)]
pub struct SelectorExtractor {
    inner: Arc<Compiled>,
}

fn compile(selector: &str) -> Result<Selector, AppError> {
    Selector::parse(selector)
        .map_err(|e| AppError::Config(format!("Invalid selector '{selector}': {e}")))
}

impl SelectorExtractor {
    /// Compile every selector up front; a bad selector is a config error.
    pub fn new(recipe: Recipe) -> Result<Self, AppError> {
        let base_url = recipe
            .base_url
            .as_deref()
            .map(Url::parse)
            .transpose()
            .map_err(|e| AppError::Config(format!("Invalid base_url: {e}")))?;

        let fields = recipe
            .fields
            .into_iter()
            .map(|(name, spec)| {
                Ok(CompiledField {
                    selector: spec.selector.as_deref().map(compile).transpose()?,
                    name,
                    attr: spec.attr,
                    kind: spec.kind,
                    required: spec.required,
                })
            })
            .collect::<Result<Vec<_>, AppError>>()?;

        Ok(Self {
            inner: Arc::new(Compiled {
                item: compile(&recipe.item)?,
                fields,
                base_url,
                total_pages: recipe.total_pages.as_deref().map(compile).transpose()?,
            }),
        })
    }

    fn extract_item(&self, item: ElementRef<'_>) -> Result<Record, AppError> {
        let mut record = Record::new();
        for field in &self.inner.fields {
            let targets: Vec<ElementRef<'_>> = match &field.selector {
                Some(selector) => item.select(selector).collect(),
                None => vec![item],
            };

            let value = match field.kind {
                FieldKind::List => {
                    let values: Vec<Value> = targets
                        .iter()
                        .filter_map(|el| self.read(*el, field))
                        .map(Value::String)
                        .collect();
                    (!values.is_empty()).then_some(Value::Array(values))
                }
                FieldKind::Text => targets
                    .first()
                    .and_then(|el| self.read(*el, field))
                    .map(Value::String),
                FieldKind::Number => targets
                    .first()
                    .and_then(|el| self.read(*el, field))
                    .and_then(|raw| parse_number(&raw)),
            };

            match value {
                Some(v) => record.insert(field.name.clone(), v),
                None if field.required => {
                    return Err(AppError::Parse(format!(
                        "missing required field '{}'",
                        field.name
                    )));
                }
                None => record.insert(field.name.clone(), Value::Null),
            }
        }
        Ok(record)
    }

    /// Text or attribute value of one element, `None` when empty.
    fn read(&self, element: ElementRef<'_>, field: &CompiledField) -> Option<String> {
        let raw = match &field.attr {
            Some(attr) => {
                let value = element.value().attr(attr)?.trim().to_string();
                if matches!(attr.as_str(), "href" | "src")
                    && let Some(base) = &self.inner.base_url
                {
                    base.join(&value).map(String::from).unwrap_or(value)
                } else {
                    value
                }
            }
            None => element.text().collect::<Vec<_>>().join(" "),
        };
        let normalized = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        (!normalized.is_empty()).then_some(normalized)
    }

    fn total_pages(&self, document: &Html) -> Option<u32> {
        let selector = self.inner.total_pages.as_ref()?;
        let text: String = document.select(selector).next()?.text().collect();
        text.split_whitespace()
            .rev()
            .find_map(parse_number)?
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
    }
}

impl Extractor for SelectorExtractor {
    fn extract(&self, response: &Response) -> Result<ExtractedPage, AppError> {
        let document = Html::parse_document(&response.body);
        let mut records = Vec::new();
        let mut matched = 0usize;

        for (idx, element) in document.select(&self.inner.item).enumerate() {
            matched += 1;
            match self.extract_item(element) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(item = idx, error = %e, "Skipping malformed item"),
            }
        }

        if records.is_empty() {
            tracing::debug!(url = %response.url, matched, "No records extracted");
            return Err(AppError::ExtractionEmpty);
        }

        let page = ExtractedPage::new(records);
        Ok(match self.total_pages(&document) {
            Some(total) => page.with_total_pages(total),
            None => page,
        })
    }
}

/// First number in `raw`, ignoring currency symbols and thousands separators.
///
/// `"$1,299.99"` → `1299.99`, `"4.5 out of 5"` → `4.5`, `"(2,310)"` → `2310`.
pub fn parse_number(raw: &str) -> Option<Value> {
    let start = raw.find(|c: char| c.is_ascii_digit())?;
    let negative = raw[..start].ends_with('-');
    let digits: String = raw[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .filter(|c| *c != ',')
        .collect();
    let digits = digits.trim_end_matches('.');

    if !digits.contains('.')
        && let Ok(n) = digits.parse::<i64>()
    {
        return Some(Value::from(if negative { -n } else { n }));
    }
    let n: f64 = digits.parse().ok()?;
    serde_json::Number::from_f64(if negative { -n } else { n }).map(Value::Number)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const LISTING: &str = r#"
        <html><body>
          <div class="item" data-id="a1">
            <h2><a href="/p/1">  First
                 product </a></h2>
            <span class="price">$1,299.99</span>
            <ul><li class="tag">new</li><li class="tag">sale</li></ul>
          </div>
          <div class="item" data-id="a2">
            <h2><a href="https://other.example/p/2">Second</a></h2>
          </div>
          <div class="item" data-id="a3">
            <span class="price">$5</span>
          </div>
          <span class="pages">7 pages</span>
        </body></html>
    "#;

    fn recipe() -> Recipe {
        Recipe::from_json(
            r#"{
                "item": "div.item",
                "base_url": "https://shop.example",
                "total_pages": "span.pages",
                "fields": {
                    "id":    { "attr": "data-id", "required": true },
                    "title": { "selector": "h2 a", "required": true },
                    "link":  { "selector": "h2 a", "attr": "href" },
                    "price": { "selector": ".price", "kind": "number" },
                    "tags":  { "selector": "li.tag", "kind": "list" }
                }
            }"#,
        )
        .unwrap()
    }

    fn response(body: &str) -> Response {
        Response::new(200, "https://shop.example/list", body)
    }

    #[test]
    fn extracts_fields_and_skips_malformed_items() {
        let extractor = SelectorExtractor::new(recipe()).unwrap();
        let page = extractor.extract(&response(LISTING)).unwrap();

        // The third item has no title and is skipped.
        assert_eq!(page.records.len(), 2);

        let first = &page.records[0];
        assert_eq!(first.get("id"), Some(&json!("a1")));
        assert_eq!(first.get("title"), Some(&json!("First product")));
        assert_eq!(first.get("link"), Some(&json!("https://shop.example/p/1")));
        assert_eq!(first.get("price"), Some(&json!(1299.99)));
        assert_eq!(first.get("tags"), Some(&json!(["new", "sale"])));

        let second = &page.records[1];
        assert_eq!(second.get("link"), Some(&json!("https://other.example/p/2")));
        assert_eq!(second.get("price"), Some(&Value::Null));
        assert_eq!(second.get("tags"), Some(&Value::Null));
    }

    #[test]
    fn reads_total_pages() {
        let extractor = SelectorExtractor::new(recipe()).unwrap();
        let page = extractor.extract(&response(LISTING)).unwrap();
        assert_eq!(page.total_pages, Some(7));
    }

    #[test]
    fn total_pages_uses_last_number() {
        let extractor = SelectorExtractor::new(recipe()).unwrap();
        let body = LISTING.replace("7 pages", "Page 1 of 12");
        let page = extractor.extract(&response(&body)).unwrap();
        assert_eq!(page.total_pages, Some(12));
    }

    #[test]
    fn no_items_is_extraction_empty() {
        let extractor = SelectorExtractor::new(recipe()).unwrap();
        let err = extractor
            .extract(&response("<html><body><p>No results</p></body></html>"))
            .unwrap_err();
        assert!(matches!(err, AppError::ExtractionEmpty));
    }

    #[test]
    fn bad_selector_is_config_error() {
        let recipe = Recipe::from_json(r#"{"item": "div[", "fields": {}}"#).unwrap();
        assert!(matches!(
            SelectorExtractor::new(recipe),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let err = Recipe::from_json(
            r#"{"item": "div", "fields": {"x": {"selector": "p", "kind": "date"}}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn recipe_loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recipe.json");
        std::fs::write(&path, r#"{"item": "li", "fields": {"name": {}}}"#).unwrap();
        let recipe = Recipe::from_file(&path).unwrap();
        assert_eq!(recipe.item, "li");
        assert!(recipe.fields.contains_key("name"));
    }

    #[test]
    fn parses_numbers() {
        assert_eq!(parse_number("$1,299.99"), Some(json!(1299.99)));
        assert_eq!(parse_number("4.5 out of 5 stars"), Some(json!(4.5)));
        assert_eq!(parse_number("(2,310)"), Some(json!(2310)));
        assert_eq!(parse_number("-12"), Some(json!(-12)));
        assert_eq!(parse_number("12."), Some(json!(12)));
        assert_eq!(parse_number("free"), None);
    }
}
