use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use lw_sources::{RuleGroup, RuleSource, SchedulePolicy, SourceOrigin};

/// One entry of the `watch` sources file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub id: u32,
    pub group: RuleGroup,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub allow_abp_snippets: bool,
}

impl SourceConfig {
    pub fn origin(&self) -> Result<SourceOrigin, String> {
        match (&self.url, &self.path) {
            (Some(url), None) => Ok(SourceOrigin::Url(url.clone())),
            (None, Some(path)) => Ok(SourceOrigin::File(path.clone())),
            _ => Err(format!("source {}: set exactly one of `url` or `path`", self.id)),
        }
    }
}

pub fn parse_sources(json: &str) -> Result<Vec<SourceConfig>, String> {
    let configs: Vec<SourceConfig> =
        serde_json::from_str(json).map_err(|e| format!("Invalid sources file: {}", e))?;

    let mut seen = BTreeSet::new();
    for config in &configs {
        config.origin()?;
        if !seen.insert(config.id) {
            return Err(format!("duplicate source id {}", config.id));
        }
    }
    Ok(configs)
}

pub fn load_sources(path: &Path) -> Result<Vec<SourceConfig>, String> {
    let json = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
    parse_sources(&json)
}

pub fn load_policy(path: Option<&Path>) -> Result<SchedulePolicy, String> {
    let Some(path) = path else {
        return Ok(SchedulePolicy::default());
    };
    let json = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
    serde_json::from_str(&json).map_err(|e| format!("Invalid policy file: {}", e))
}

/// Build sources from configuration, resuming from a previous run's state
/// where the origin is unchanged.
pub fn resume_sources(configs: &[SourceConfig], state: Vec<RuleSource>) -> Vec<RuleSource> {
    let mut previous: BTreeMap<u32, RuleSource> =
        state.into_iter().map(|source| (source.id, source)).collect();

    configs
        .iter()
        .filter_map(|config| {
            let origin = config.origin().ok()?;
            let source = match previous.remove(&config.id) {
                Some(mut source) if source.origin == origin && source.group == config.group => {
                    source.allow_abp_snippets = config.allow_abp_snippets;
                    source
                }
                _ => RuleSource::new(config.id, config.group, origin)
                    .with_abp_snippets(config.allow_abp_snippets),
            };
            Some(source)
        })
        .collect()
}

pub fn load_state(path: &Path) -> Vec<RuleSource> {
    let Ok(json) = fs::read_to_string(path) else {
        return Vec::new();
    };
    match serde_json::from_str(&json) {
        Ok(state) => state,
        Err(e) => {
            log::warn!("Ignoring unreadable state file '{}': {}", path.display(), e);
            Vec::new()
        }
    }
}

pub fn save_state(path: &Path, sources: &[RuleSource]) -> Result<(), String> {
    let json = serde_json::to_string_pretty(sources).map_err(|e| e.to_string())?;
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| format!("Failed to create '{}': {}", dir.display(), e))?;
    }
    fs::write(path, json).map_err(|e| format!("Failed to write '{}': {}", path.display(), e))
}
