//! Selector-driven [`Extractor`] built on the `scraper` crate.
//!
//! Everything site specific lives in an [`ExtractionSpec`], a plain serde
//! value usually loaded from a site profile. Selectors are compiled once in
//! [`SelectorExtractor::new`]; an invalid selector is a configuration error,
//! while a selector that matches nothing simply yields an empty result.

use std::sync::Arc;

use harvest_core::error::AppError;
use harvest_core::models::{CountHint, Entity, Extraction, FieldValue, Record, RenderedPage};
use harvest_core::traits::Extractor;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionSpec {
    pub entities: EntitySpec,
    pub records: RecordSpec,
    #[serde(default)]
    pub count: CountSpec,
    /// Anchor of the "next page" control. Disabled anchors are ignored.
    #[serde(default)]
    pub next_page: Option<String>,
}

/// How entity cards are found on a listing page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySpec {
    /// One match per entity card.
    pub item: String,
    /// Anchor inside the card whose `href` carries the slug.
    #[serde(default = "default_link")]
    pub link: String,
    /// Name element inside the card. Defaults to the link text.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Element whose digits give the advertised record count.
    #[serde(default)]
    pub record_count: Option<String>,
    /// Anchors scanned when no card matches, e.g. `a[href^="/apps/"]`.
    #[serde(default)]
    pub fallback_links: Option<String>,
    /// Leading path segments shared by every entity link, e.g. `/apps`.
    /// Links outside it are not entities.
    #[serde(default)]
    pub path_prefix: String,
}

fn default_link() -> String {
    "a[href]".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSpec {
    /// One match per record.
    pub item: String,
    pub fields: Vec<FieldSpec>,
}

/// One output column read from inside a record element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    /// Element inside the record. `None` reads the record element itself.
    #[serde(default)]
    pub selector: Option<String>,
    /// Read this attribute instead of the element text.
    #[serde(default)]
    pub attr: Option<String>,
    #[serde(default)]
    pub kind: FieldKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Whitespace-normalized text.
    #[default]
    Text,
    /// First number in the text, e.g. `"4.5 out of 5"` -> 4.5.
    Number,
    /// All digits in the text, e.g. `"1,204 reviews"` -> 1204.
    Digits,
    /// How many elements the selector matches, e.g. filled star icons.
    Count,
}

/// Where the total record count is advertised on a collection page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountSpec {
    /// Machine-readable element, e.g. `meta[itemprop="reviewCount"]`.
    #[serde(default)]
    pub structured: Option<String>,
    /// Attribute of the structured element holding the number. Falls back
    /// to the element text when the attribute is absent.
    #[serde(default)]
    pub structured_attr: Option<String>,
    /// Human-readable heading, e.g. `h2.reviews-heading` reading "Reviews (128)".
    #[serde(default)]
    pub heading: Option<String>,
}

struct CompiledField {
    name: String,
    selector: Option<Selector>,
    attr: Option<String>,
    kind: FieldKind,
}

struct Compiled {
    entity_item: Selector,
    entity_link: Selector,
    entity_name: Option<Selector>,
    entity_description: Option<Selector>,
    entity_record_count: Option<Selector>,
    fallback_links: Option<Selector>,
    path_prefix: String,
    record_item: Selector,
    fields: Vec<CompiledField>,
    count_structured: Option<Selector>,
    count_structured_attr: Option<String>,
    count_heading: Option<Selector>,
    next_page: Option<Selector>,
}

/// [`Extractor`] interpreting an [`ExtractionSpec`]. Cheap to clone.
#[derive(Clone)]
pub struct SelectorExtractor {
    compiled: Arc<Compiled>,
}

impl SelectorExtractor {
    pub fn new(spec: &ExtractionSpec) -> Result<Self, AppError> {
        if spec.records.fields.iter().any(|f| f.name == Record::ENTITY_KEY) {
            return Err(AppError::Config(format!(
                "Record field name {:?} is reserved for the entity slug",
                Record::ENTITY_KEY
            )));
        }
        let fields = spec
            .records
            .fields
            .iter()
            .map(|f| {
                Ok(CompiledField {
                    name: f.name.clone(),
                    selector: compile_opt(f.selector.as_deref())?,
                    attr: f.attr.clone(),
                    kind: f.kind,
                })
            })
            .collect::<Result<Vec<_>, AppError>>()?;

        let compiled = Compiled {
            entity_item: compile(&spec.entities.item)?,
            entity_link: compile(&spec.entities.link)?,
            entity_name: compile_opt(spec.entities.name.as_deref())?,
            entity_description: compile_opt(spec.entities.description.as_deref())?,
            entity_record_count: compile_opt(spec.entities.record_count.as_deref())?,
            fallback_links: compile_opt(spec.entities.fallback_links.as_deref())?,
            path_prefix: spec.entities.path_prefix.clone(),
            record_item: compile(&spec.records.item)?,
            fields,
            count_structured: compile_opt(spec.count.structured.as_deref())?,
            count_structured_attr: spec.count.structured_attr.clone(),
            count_heading: compile_opt(spec.count.heading.as_deref())?,
            next_page: compile_opt(spec.next_page.as_deref())?,
        };

        Ok(Self {
            compiled: Arc::new(compiled),
        })
    }

    fn entities_from_cards(&self, doc: &Html, base: &str) -> Vec<Entity> {
        let c = &self.compiled;
        doc.select(&c.entity_item)
            .filter_map(|card| {
                let link = if card.value().name() == "a" {
                    card
                } else {
                    card.select(&c.entity_link).next()?
                };
                let slug = slug_from_href(base, link.value().attr("href")?, &c.path_prefix)?;

                let name = c
                    .entity_name
                    .as_ref()
                    .and_then(|s| card.select(s).next())
                    .map(element_text)
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| element_text(link));
                let name = if name.is_empty() { slug.clone() } else { name };

                let mut entity = Entity::new(slug, name);
                entity.description = c
                    .entity_description
                    .as_ref()
                    .and_then(|s| card.select(s).next())
                    .map(element_text)
                    .filter(|d| !d.is_empty());
                entity.record_count = c
                    .entity_record_count
                    .as_ref()
                    .and_then(|s| card.select(s).next())
                    .and_then(|el| digits(&element_text(el)));
                Some(entity)
            })
            .collect()
    }

    fn entities_from_links(&self, doc: &Html, base: &str) -> Vec<Entity> {
        let c = &self.compiled;
        let Some(selector) = &c.fallback_links else {
            return Vec::new();
        };
        doc.select(selector)
            .filter_map(|a| {
                let slug = slug_from_href(base, a.value().attr("href")?, &c.path_prefix)?;
                let text = element_text(a);
                let name = if text.is_empty() { slug.clone() } else { text };
                Some(Entity::new(slug, name))
            })
            .collect()
    }

    fn field_value(&self, record: ElementRef<'_>, field: &CompiledField) -> FieldValue {
        if field.kind == FieldKind::Count {
            let n = match &field.selector {
                Some(s) => record.select(s).count(),
                None => 1,
            };
            return FieldValue::from(n as u64);
        }

        let element = match &field.selector {
            Some(s) => record.select(s).next(),
            None => Some(record),
        };
        let Some(element) = element else {
            return FieldValue::Empty;
        };
        let raw = match &field.attr {
            Some(attr) => element
                .value()
                .attr(attr)
                .map(normalize_whitespace)
                .unwrap_or_default(),
            None => element_text(element),
        };

        match field.kind {
            FieldKind::Text if raw.is_empty() => FieldValue::Empty,
            FieldKind::Text => FieldValue::Text(raw),
            FieldKind::Number => parse_number(&raw).unwrap_or(FieldValue::Empty),
            FieldKind::Digits => digits(&raw).map(FieldValue::from).unwrap_or(FieldValue::Empty),
            FieldKind::Count => FieldValue::Empty,
        }
    }
}

impl Extractor for SelectorExtractor {
    fn extract_entities(&self, page: &RenderedPage) -> Extraction<Vec<Entity>> {
        let doc = Html::parse_document(&page.html);

        let primary = self.entities_from_cards(&doc, &page.url);
        if !primary.is_empty() {
            return Extraction::primary(primary);
        }

        let fallback = self.entities_from_links(&doc, &page.url);
        if fallback.is_empty() {
            tracing::debug!(url = %page.url, "No entities matched on listing page");
            return Extraction::primary(fallback);
        }
        Extraction::fallback(fallback)
    }

    fn extract_records(&self, page: &RenderedPage, entity: &Entity) -> Vec<Record> {
        let doc = Html::parse_document(&page.html);
        let records: Vec<Record> = doc
            .select(&self.compiled.record_item)
            .map(|item| {
                let mut record = Record::new(&entity.slug);
                for field in &self.compiled.fields {
                    record
                        .fields
                        .insert(field.name.clone(), self.field_value(item, field));
                }
                record
            })
            .collect();

        if records.is_empty() {
            tracing::debug!(url = %page.url, slug = %entity.slug, "No records matched");
        }
        records
    }

    fn extract_total_count(&self, page: &RenderedPage) -> Option<CountHint> {
        let c = &self.compiled;
        let doc = Html::parse_document(&page.html);

        let structured = c.count_structured.as_ref().and_then(|s| {
            let el = doc.select(s).next()?;
            let raw = c
                .count_structured_attr
                .as_deref()
                .and_then(|attr| el.value().attr(attr))
                .map(String::from)
                .unwrap_or_else(|| element_text(el));
            digits(&raw)
        });
        if let Some(total) = structured {
            return Some(CountHint::structured(total));
        }

        c.count_heading
            .as_ref()
            .and_then(|s| doc.select(s).next())
            .and_then(|el| first_integer(&element_text(el)))
            .map(CountHint::heading)
    }

    fn find_next_page(&self, page: &RenderedPage) -> Option<String> {
        let selector = self.compiled.next_page.as_ref()?;
        let doc = Html::parse_document(&page.html);
        doc.select(selector)
            .find(|el| {
                let v = el.value();
                v.attr("disabled").is_none() && v.attr("aria-disabled") != Some("true")
            })
            .and_then(|el| el.value().attr("href"))
            .map(str::trim)
            .filter(|href| !href.is_empty() && *href != "#")
            .map(String::from)
    }
}

fn compile(selector: &str) -> Result<Selector, AppError> {
    Selector::parse(selector)
        .map_err(|e| AppError::Config(format!("Invalid selector {selector:?}: {e}")))
}

fn compile_opt(selector: Option<&str>) -> Result<Option<Selector>, AppError> {
    selector.map(compile).transpose()
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_text(el: ElementRef<'_>) -> String {
    normalize_whitespace(&el.text().collect::<String>())
}

/// Path of `href` resolved against `base`, relative to the host and with
/// `prefix` removed: `/categories/store-design` stays `categories/store-design`
/// so route filters still see where the link points. Links to other hosts
/// or outside `prefix` have no slug.
pub fn slug_from_href(base: &str, href: &str, prefix: &str) -> Option<String> {
    let base = Url::parse(base).ok()?;
    let target = base.join(href.trim()).ok()?;
    if target.host_str() != base.host_str() {
        return None;
    }
    let mut segments = target.path_segments()?.filter(|s| !s.is_empty());
    for expected in prefix.split('/').filter(|s| !s.is_empty()) {
        if segments.next()? != expected {
            return None;
        }
    }
    let slug = segments.collect::<Vec<_>>().join("/");
    (!slug.is_empty()).then_some(slug)
}

fn digits(s: &str) -> Option<u64> {
    let d: String = s.chars().filter(char::is_ascii_digit).collect();
    d.parse().ok()
}

/// First integer in `s`, thousands separators allowed: "Reviews (1,204)" -> 1204.
fn first_integer(s: &str) -> Option<u64> {
    let start = s.find(|c: char| c.is_ascii_digit())?;
    let run: String = s[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == ',')
        .filter(char::is_ascii_digit)
        .collect();
    run.parse().ok()
}

fn parse_number(s: &str) -> Option<FieldValue> {
    let start = s.find(|c: char| c.is_ascii_digit())?;
    let run: String = s[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .filter(|c| *c != ',')
        .collect();
    let run = run.trim_end_matches('.');
    if let Ok(n) = run.parse::<u64>() {
        return Some(FieldValue::from(n));
    }
    run.parse::<f64>().ok().map(FieldValue::from)
}
