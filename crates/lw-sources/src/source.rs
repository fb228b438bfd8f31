//! Persistent state of one filter list source.

use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use lw_core::types::{FetchResult, ListMetadata, RulesInfo};

/// Which family of rules a source feeds; selects its output directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleGroup {
    Tracking,
    AdBlocking,
}

impl RuleGroup {
    pub fn dir_name(self) -> &'static str {
        match self {
            RuleGroup::Tracking => "tracking",
            RuleGroup::AdBlocking => "ad_blocking",
        }
    }
}

/// Where the list text comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceOrigin {
    Url(String),
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSource {
    pub id: u32,
    pub group: RuleGroup,
    pub origin: SourceOrigin,
    /// Time of the last successful compile.
    #[serde(default)]
    pub last_update: Option<SystemTime>,
    #[serde(default)]
    pub next_fetch: Option<SystemTime>,
    #[serde(default)]
    pub last_fetch_result: FetchResult,
    #[serde(default)]
    pub rules_list_checksum: String,
    #[serde(default)]
    pub allow_abp_snippets: bool,
    #[serde(default)]
    pub has_tracker_infos: bool,
    #[serde(skip)]
    pub is_fetching: bool,
    /// Metadata as declared by the list itself; not validated.
    #[serde(default)]
    pub unsafe_adblock_metadata: ListMetadata,
    #[serde(default)]
    pub rules_info: RulesInfo,
}

impl RuleSource {
    pub fn new(id: u32, group: RuleGroup, origin: SourceOrigin) -> Self {
        Self {
            id,
            group,
            origin,
            last_update: None,
            next_fetch: None,
            last_fetch_result: FetchResult::Unknown,
            rules_list_checksum: String::new(),
            allow_abp_snippets: false,
            has_tracker_infos: false,
            is_fetching: false,
            unsafe_adblock_metadata: ListMetadata::default(),
            rules_info: RulesInfo::default(),
        }
    }

    pub fn with_abp_snippets(mut self, allow: bool) -> Self {
        self.allow_abp_snippets = allow;
        self
    }

    pub fn is_from_url(&self) -> bool {
        matches!(self.origin, SourceOrigin::Url(_))
    }

    pub fn last_update_or_epoch(&self) -> SystemTime {
        self.last_update.unwrap_or(SystemTime::UNIX_EPOCH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persists_through_json() {
        let mut source = RuleSource::new(
            3,
            RuleGroup::AdBlocking,
            SourceOrigin::Url("https://example.org/list.txt".to_string()),
        );
        source.is_fetching = true;
        source.rules_info.valid = 12;

        let json = serde_json::to_string(&source).unwrap();
        assert!(json.contains("\"ad_blocking\""));

        let restored: RuleSource = serde_json::from_str(&json).unwrap();
        assert!(!restored.is_fetching);
        assert_eq!(restored.rules_info.valid, 12);
        assert!(restored.is_from_url());
        assert_eq!(restored.origin, source.origin);
    }

    #[test]
    fn minimal_json_uses_defaults() {
        let source: RuleSource =
            serde_json::from_str(r#"{"id":1,"group":"tracking","origin":{"file":"/tmp/list.txt"}}"#)
                .unwrap();
        assert!(!source.is_from_url());
        assert_eq!(source.last_fetch_result, FetchResult::Unknown);
        assert_eq!(source.last_update_or_epoch(), SystemTime::UNIX_EPOCH);
    }
}
