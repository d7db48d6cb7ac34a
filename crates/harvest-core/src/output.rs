//! Flattening and final CSV / JSON output.

use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::{Entity, Record};

pub const RECORDS_CSV: &str = "records.csv";
pub const RECORDS_JSON: &str = "records.json";
pub const ENTITIES_CSV: &str = "entities.csv";
pub const ENTITIES_JSON: &str = "entities.json";

/// Group records by owning slug, keeping their relative order.
pub fn group_by_entity(records: Vec<Record>) -> BTreeMap<String, Vec<Record>> {
    let mut grouped: BTreeMap<String, Vec<Record>> = BTreeMap::new();
    for record in records {
        grouped.entry(record.entity.clone()).or_default().push(record);
    }
    grouped
}

/// Flatten per-entity records into one sequence.
///
/// Entities come in `entities` order; slugs present in `by_entity` but not
/// in `entities` follow in key order so nothing collected is ever dropped.
pub fn flatten(entities: &[Entity], by_entity: &BTreeMap<String, Vec<Record>>) -> Vec<Record> {
    let mut out = Vec::with_capacity(by_entity.values().map(Vec::len).sum());
    let mut emitted = HashSet::new();

    for entity in entities {
        if !emitted.insert(entity.slug.as_str()) {
            continue;
        }
        if let Some(records) = by_entity.get(&entity.slug) {
            out.extend(records.iter().cloned());
        }
    }
    for (slug, records) in by_entity {
        if !emitted.contains(slug.as_str()) {
            out.extend(records.iter().cloned());
        }
    }
    out
}

/// Where final outputs go and which record columns they carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConfig {
    pub dir: PathBuf,
    /// Record columns after `entity`, in order. Empty means every field seen.
    #[serde(default)]
    pub columns: Vec<String>,
}

impl OutputConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            columns: Vec::new(),
        }
    }

    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.columns.iter().any(|c| c == Record::ENTITY_KEY) {
            return Err(AppError::Config(format!(
                "Output column {:?} is reserved for the entity slug",
                Record::ENTITY_KEY
            )));
        }
        Ok(())
    }
}

/// Paths written by [`OutputWriter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenFiles {
    pub csv: PathBuf,
    pub json: PathBuf,
}

/// Serializes record and entity sequences. Same input, same bytes.
#[derive(Debug, Clone)]
pub struct OutputWriter {
    config: OutputConfig,
}

impl OutputWriter {
    pub fn new(config: OutputConfig) -> Self {
        Self { config }
    }

    pub fn dir(&self) -> &Path {
        &self.config.dir
    }

    /// Record columns for `records`: configured ones, or the union of field
    /// names in first-seen order.
    pub fn columns_for(&self, records: &[Record]) -> Vec<String> {
        if !self.config.columns.is_empty() {
            return self.config.columns.clone();
        }
        let mut seen = HashSet::new();
        let mut columns = Vec::new();
        for record in records {
            for name in record.fields.keys() {
                if seen.insert(name.as_str()) {
                    columns.push(name.clone());
                }
            }
        }
        columns
    }

    pub fn write_records(&self, records: &[Record]) -> Result<WrittenFiles, AppError> {
        self.ensure_dir()?;
        let columns = self.columns_for(records);

        let csv_path = self.config.dir.join(RECORDS_CSV);
        let mut writer = csv::Writer::from_path(&csv_path).map_err(csv_error(&csv_path))?;
        let header = std::iter::once(Record::ENTITY_KEY).chain(columns.iter().map(String::as_str));
        writer.write_record(header).map_err(csv_error(&csv_path))?;
        for record in records {
            let row = std::iter::once(record.entity.clone()).chain(
                columns
                    .iter()
                    .map(|c| record.get(c).map(|v| v.as_cell()).unwrap_or_default()),
            );
            writer.write_record(row).map_err(csv_error(&csv_path))?;
        }
        writer
            .flush()
            .map_err(|e| AppError::Output(format!("Failed to flush {}: {e}", csv_path.display())))?;

        let json_path = self.config.dir.join(RECORDS_JSON);
        write_json(&json_path, records)?;

        tracing::info!(
            records = records.len(),
            csv = %csv_path.display(),
            json = %json_path.display(),
            "Wrote record outputs"
        );
        Ok(WrittenFiles {
            csv: csv_path,
            json: json_path,
        })
    }

    pub fn write_entities(&self, entities: &[Entity]) -> Result<WrittenFiles, AppError> {
        self.ensure_dir()?;

        let csv_path = self.config.dir.join(ENTITIES_CSV);
        let mut writer = csv::Writer::from_path(&csv_path).map_err(csv_error(&csv_path))?;
        writer
            .write_record(["slug", "name", "description", "record_count"])
            .map_err(csv_error(&csv_path))?;
        for entity in entities {
            writer
                .write_record([
                    entity.slug.clone(),
                    entity.name.clone(),
                    entity.description.clone().unwrap_or_default(),
                    entity
                        .record_count
                        .map(|n| n.to_string())
                        .unwrap_or_default(),
                ])
                .map_err(csv_error(&csv_path))?;
        }
        writer
            .flush()
            .map_err(|e| AppError::Output(format!("Failed to flush {}: {e}", csv_path.display())))?;

        let json_path = self.config.dir.join(ENTITIES_JSON);
        write_json(&json_path, entities)?;

        tracing::info!(
            entities = entities.len(),
            csv = %csv_path.display(),
            "Wrote entity outputs"
        );
        Ok(WrittenFiles {
            csv: csv_path,
            json: json_path,
        })
    }

    fn ensure_dir(&self) -> Result<(), AppError> {
        std::fs::create_dir_all(&self.config.dir).map_err(|e| {
            AppError::Output(format!(
                "Failed to create output directory {}: {e}",
                self.config.dir.display()
            ))
        })
    }
}

fn csv_error(path: &Path) -> impl Fn(csv::Error) -> AppError + '_ {
    move |e| AppError::Output(format!("CSV error in {}: {e}", path.display()))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::Output(format!("Failed to create {}: {e}", path.display())))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer
        .write_all(b"\n")
        .and_then(|()| writer.flush())
        .map_err(|e| AppError::Output(format!("Failed to write {}: {e}", path.display())))
}
