// src/models/source.rs

//! Source definitions and the registry they are loaded from.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::SelectorProfile;

/// A school website publishing announcements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    /// Unique identifier, taken from the registry key
    #[serde(skip)]
    pub id: String,

    /// Display name
    pub name: String,

    /// URL of the announcement listing page
    pub listing_url: String,

    /// Prefix that detail links must share; defaults to the listing origin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Regex a detail link must match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail_pattern: Option<String>,

    /// CSS selectors for scraping
    #[serde(flatten)]
    pub selectors: SelectorProfile,

    /// Category used when the page does not expose one
    #[serde(default)]
    pub default_category: String,

    /// Whether detail URLs identify announcements across cycles
    #[serde(default = "default_true")]
    pub stable_urls: bool,

    /// Inactive sources are skipped by the orchestrator
    #[serde(default = "default_true")]
    pub active: bool,

    /// Per-source delay bounds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pacing: Option<PacingOverride>,

    /// Per-source cap on detail pages fetched each cycle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail_cap: Option<usize>,
}

fn default_true() -> bool {
    true
}

/// Delay bounds that replace the global ones for a sensitive source.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PacingOverride {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Source {
    /// The prefix detail links are expected to start with.
    pub fn base(&self) -> Result<Url> {
        match &self.base_url {
            Some(base) => Ok(Url::parse(base)?),
            None => {
                let listing = Url::parse(&self.listing_url)?;
                Ok(Url::parse(&listing.origin().ascii_serialization())?)
            }
        }
    }

    /// Compiled detail pattern, if configured.
    pub fn detail_regex(&self) -> Result<Option<Regex>> {
        self.detail_pattern
            .as_deref()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    AppError::config(format!("source '{}': bad detail_pattern: {e}", self.id))
                })
            })
            .transpose()
    }

    /// Effective detail cap given the global default.
    pub fn cap(&self, global: usize) -> usize {
        self.detail_cap.unwrap_or(global)
    }

    /// Check URLs, selectors, pattern and pacing bounds.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(AppError::validation("source id is empty"));
        }
        if self.name.trim().is_empty() {
            return Err(AppError::validation(format!(
                "source '{}': name is empty",
                self.id
            )));
        }
        Url::parse(&self.listing_url).map_err(|e| {
            AppError::validation(format!("source '{}': listing_url: {e}", self.id))
        })?;
        self.base()?;
        self.detail_regex()?;
        self.selectors.compile()?;
        if let Some(p) = self.pacing {
            if p.min_delay_ms > p.max_delay_ms {
                return Err(AppError::validation(format!(
                    "source '{}': pacing min_delay_ms exceeds max_delay_ms",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Serialize, Default)]
struct RegistryFile {
    #[serde(default)]
    sources: BTreeMap<String, Source>,
}

/// The fixed, hand-configured set of sources, in stable id order.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: Vec<Source>,
}

impl SourceRegistry {
    /// Load the registry from a TOML file of `[sources.<id>]` tables.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: RegistryFile = toml::from_str(content)?;
        let sources = file
            .sources
            .into_iter()
            .map(|(id, mut source)| {
                source.id = id;
                source
            })
            .collect();
        Ok(Self { sources })
    }

    /// Build a registry from already-constructed sources.
    pub fn from_sources(mut sources: Vec<Source>) -> Self {
        sources.sort_by(|a, b| a.id.cmp(&b.id));
        Self { sources }
    }

    /// Validate every source and reject duplicate ids.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.id.as_str()) {
                return Err(AppError::validation(format!(
                    "duplicate source id '{}'",
                    source.id
                )));
            }
            source.validate()?;
        }
        Ok(())
    }

    pub fn all(&self) -> &[Source] {
        &self.sources
    }

    /// Active sources in id order.
    pub fn active(&self) -> Vec<&Source> {
        self.sources.iter().filter(|s| s.active).collect()
    }

    pub fn get(&self, id: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.id == id)
    }

    /// Keep only the given ids; unknown ids are an error.
    pub fn retain_ids(&mut self, ids: &[String]) -> Result<()> {
        for id in ids {
            if self.get(id).is_none() {
                return Err(AppError::config(format!("unknown source '{id}'")));
            }
        }
        self.sources.retain(|s| ids.contains(&s.id));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTRY: &str = r#"
        [sources.ic-nord]
        name = "IC Nord"
        listing_url = "https://www.icnord.edu.it/pnrr/"
        detail_pattern = "/pnrr/[a-z0-9-]+/?$"
        title_selector = "h1.entry-title"
        default_category = "PNRR"

        [sources.ic-nord.pacing]
        min_delay_ms = 4000
        max_delay_ms = 9000

        [sources.ca-liceo]
        name = "Liceo Classico"
        listing_url = "https://liceo.example.it/albo"
        active = false
        detail_cap = 3
    "#;

    #[test]
    fn test_load_keyed_by_id_in_stable_order() {
        let registry = SourceRegistry::from_toml_str(REGISTRY).unwrap();
        let ids: Vec<_> = registry.all().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["ca-liceo", "ic-nord"]);
        assert!(registry.validate().is_ok());

        let nord = registry.get("ic-nord").unwrap();
        assert_eq!(nord.selectors.link_selector, "a[href]");
        assert_eq!(
            nord.pacing,
            Some(PacingOverride {
                min_delay_ms: 4000,
                max_delay_ms: 9000
            })
        );
        assert!(nord.stable_urls);
    }

    #[test]
    fn test_active_and_caps() {
        let registry = SourceRegistry::from_toml_str(REGISTRY).unwrap();
        let active: Vec<_> = registry.active().iter().map(|s| s.id.clone()).collect();
        assert_eq!(active, vec!["ic-nord"]);
        assert_eq!(registry.get("ca-liceo").unwrap().cap(10), 3);
        assert_eq!(registry.get("ic-nord").unwrap().cap(10), 10);
    }

    #[test]
    fn test_base_defaults_to_listing_origin() {
        let registry = SourceRegistry::from_toml_str(REGISTRY).unwrap();
        let base = registry.get("ca-liceo").unwrap().base().unwrap();
        assert_eq!(base.as_str(), "https://liceo.example.it/");
    }

    #[test]
    fn test_validate_rejects_bad_pattern() {
        let mut registry = SourceRegistry::from_toml_str(REGISTRY).unwrap();
        registry.sources[1].detail_pattern = Some("(unclosed".into());
        assert!(registry.validate().is_err());
    }

    #[test]
    fn test_retain_unknown_id() {
        let mut registry = SourceRegistry::from_toml_str(REGISTRY).unwrap();
        assert!(registry.retain_ids(&["nope".to_string()]).is_err());
        registry.retain_ids(&["ic-nord".to_string()]).unwrap();
        assert_eq!(registry.len(), 1);
    }
}
