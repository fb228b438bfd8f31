//! Core type definitions for listwarden
//!
//! The unified rule model produced by both list parsers and consumed by the
//! ruleset builder. These are in-memory types; the on-disk layout lives in
//! [`crate::ruleset`] and is decoupled from the bit positions used here.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// =============================================================================
// Filter Rule Bit Sets
// =============================================================================

bitflags::bitflags! {
    /// Resource types a filter rule applies to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceTypes: u16 {
        const STYLESHEET = 1 << 0;
        const IMAGE = 1 << 1;
        const SCRIPT = 1 << 2;
        const XMLHTTPREQUEST = 1 << 3;
        const SUBDOCUMENT = 1 << 4;  // iframe/frame
        const FONT = 1 << 5;
        const MEDIA = 1 << 6;
        const WEBSOCKET = 1 << 7;
        const WEBRTC = 1 << 8;
        const PING = 1 << 9;
        const OBJECT = 1 << 10;
        const OTHER = 1 << 11;

        /// All resource types
        const ALL = 0x0FFF;
    }
}

bitflags::bitflags! {
    /// Party (first-party / third-party) mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PartyMask: u8 {
        /// Matches first-party requests
        const FIRST_PARTY = 1 << 0;
        /// Matches third-party requests
        const THIRD_PARTY = 1 << 1;
        /// Matches both
        const ALL = Self::FIRST_PARTY.bits() | Self::THIRD_PARTY.bits();
    }
}

bitflags::bitflags! {
    /// Page-level activation types ($popup, $document, $elemhide, ...).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ActivationTypes: u8 {
        const POPUP = 1 << 0;
        const DOCUMENT = 1 << 1;
        const ELEMENT_HIDE = 1 << 2;
        const GENERIC_HIDE = 1 << 3;
        const GENERIC_BLOCK = 1 << 4;
    }
}

bitflags::bitflags! {
    /// Pattern anchors.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AnchorType: u8 {
        /// `|pattern`
        const START = 1 << 0;
        /// `pattern|`
        const END = 1 << 1;
        /// `||pattern`
        const HOST = 1 << 2;
    }
}

bitflags::bitflags! {
    /// Flags for rule behavior.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RuleFlags: u8 {
        /// Exception rule (@@...)
        const ALLOW_RULE = 1 << 0;
        /// Case-sensitive matching ($match-case)
        const CASE_SENSITIVE = 1 << 1;
        /// Injects a Content-Security-Policy ($csp=)
        const CSP_RULE = 1 << 2;
    }
}

/// How the pattern of a filter rule is to be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PatternType {
    /// Literal substring
    #[default]
    Plain,
    /// Contains `*` or `^`
    Wildcarded,
    /// Opaque regular expression
    Regex,
}

// =============================================================================
// Rules
// =============================================================================

/// Network filter rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterRule {
    pub pattern: String,
    pub pattern_type: PatternType,
    pub anchor_type: AnchorType,
    pub host: String,
    pub included_domains: Vec<String>,
    pub excluded_domains: Vec<String>,
    pub resource_types: ResourceTypes,
    pub party: PartyMask,
    pub activation_types: ActivationTypes,
    pub flags: RuleFlags,
    pub redirect: Option<String>,
    pub csp: Option<String>,
    /// Reduced form of a regex pattern, `*` marking variable segments.
    pub ngram_search_string: Option<String>,
}

impl Default for FilterRule {
    fn default() -> Self {
        Self {
            pattern: String::new(),
            pattern_type: PatternType::Plain,
            anchor_type: AnchorType::empty(),
            host: String::new(),
            included_domains: Vec::new(),
            excluded_domains: Vec::new(),
            resource_types: ResourceTypes::ALL,
            party: PartyMask::ALL,
            activation_types: ActivationTypes::empty(),
            flags: RuleFlags::empty(),
            redirect: None,
            csp: None,
            ngram_search_string: None,
        }
    }
}

impl FilterRule {
    pub fn is_allow_rule(&self) -> bool {
        self.flags.contains(RuleFlags::ALLOW_RULE)
    }

    pub fn is_case_sensitive(&self) -> bool {
        self.flags.contains(RuleFlags::CASE_SENSITIVE)
    }

    pub fn is_csp_rule(&self) -> bool {
        self.flags.contains(RuleFlags::CSP_RULE)
    }
}

/// Fields shared by every rule that injects content into a page.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContentInjectionRuleCore {
    pub is_allow_rule: bool,
    pub included_domains: Vec<String>,
    pub excluded_domains: Vec<String>,
}

/// Element hiding rule (`domains##selector`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CosmeticRule {
    pub core: ContentInjectionRuleCore,
    pub selector: String,
}

/// Scriptlet injection rule (`domains##+js(name, args...)`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScriptletInjectionRule {
    pub core: ContentInjectionRuleCore,
    pub scriptlet_name: String,
    pub arguments: Vec<String>,
}

// =============================================================================
// Parse Results
// =============================================================================

/// Outcome of one fetch attempt for a rule source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchResult {
    Success,
    FileNotFound,
    FileReadError,
    DownloadFailed,
    FileFormatUnsupported,
    FileSaveFailed,
    /// Never fetched
    #[default]
    Unknown,
}

impl FetchResult {
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

/// Default list expiry when a list does not declare one.
pub const DEFAULT_LIST_EXPIRY: Duration = Duration::from_secs(5 * 24 * 60 * 60);

/// Metadata declared by a list (`! Title:`, `! Expires:`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListMetadata {
    pub title: Option<String>,
    pub homepage: Option<String>,
    pub version: Option<String>,
    pub license: Option<String>,
    pub expires: Duration,
}

impl Default for ListMetadata {
    fn default() -> Self {
        Self {
            title: None,
            homepage: None,
            version: None,
            license: None,
            expires: DEFAULT_LIST_EXPIRY,
        }
    }
}

/// Per-line parse counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RulesInfo {
    pub valid: u32,
    pub invalid: u32,
    pub unsupported: u32,
}

/// Company owning a tracker domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerOwner {
    pub name: String,
    #[serde(rename = "displayName", default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Reporting metadata for one tracker domain.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrackerInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<TrackerOwner>,
    #[serde(default)]
    pub categories: Vec<String>,
}

/// Tracker domain -> info. Ordered so side files are stable.
pub type TrackerInfos = BTreeMap<String, TrackerInfo>;

/// Everything produced by parsing one fetched document.
#[derive(Debug, Clone, Default)]
pub struct ParseResult {
    pub metadata: ListMetadata,
    pub filter_rules: Vec<FilterRule>,
    pub cosmetic_rules: Vec<CosmeticRule>,
    pub scriptlet_injection_rules: Vec<ScriptletInjectionRule>,
    pub fetch_result: FetchResult,
    pub rules_info: RulesInfo,
    pub tracker_infos: Option<TrackerInfos>,
}

impl ParseResult {
    pub fn rule_count(&self) -> usize {
        self.filter_rules.len() + self.cosmetic_rules.len() + self.scriptlet_injection_rules.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_rule_matches_everything() {
        let rule = FilterRule::default();
        assert_eq!(rule.resource_types, ResourceTypes::ALL);
        assert_eq!(rule.party, PartyMask::ALL);
        assert!(!rule.is_allow_rule());
    }

    #[test]
    fn rule_count_sums_all_tables() {
        let mut result = ParseResult::default();
        result.filter_rules.push(FilterRule::default());
        result.cosmetic_rules.push(CosmeticRule::default());
        result.scriptlet_injection_rules.push(ScriptletInjectionRule::default());
        assert_eq!(result.rule_count(), 3);
        assert_eq!(result.fetch_result, FetchResult::Unknown);
    }
}
