//! Site profiles: everything that ties a run to one particular catalog.

use std::path::Path;

use anyhow::{Context, Result};
use harvest_client::ExtractionSpec;
use harvest_core::collect::CollectionConfig;
use harvest_core::discover::DiscoveryConfig;
use serde::{Deserialize, Serialize};

const BUILTIN_PROFILE: &str = include_str!("../profiles/default.json");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteProfile {
    pub name: String,
    pub discovery: DiscoveryConfig,
    pub collection: CollectionConfig,
    /// Record columns of the CSV output. Empty means every extracted field.
    #[serde(default)]
    pub columns: Vec<String>,
    pub extraction: ExtractionSpec,
}

impl SiteProfile {
    /// The profile compiled into the binary.
    pub fn builtin() -> Result<Self> {
        serde_json::from_str(BUILTIN_PROFILE).context("Built-in site profile is invalid")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read profile: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid JSON in profile: {}", path.display()))
    }

    /// `path` if given, the built-in profile otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => Self::builtin(),
        }
    }
}
