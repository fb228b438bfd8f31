//! listwarden Core Library
//!
//! Shared rule model and compiled ruleset format for the listwarden filter
//! list pipeline.
//!
//! # Modules
//!
//! - `types`: the unified rule model produced by every list parser
//! - `ruleset`: compiled ruleset format, wire enumerations and loader
//! - `hash`: checksum, CRC32 and Murmur3 helpers

pub mod hash;
pub mod ruleset;
pub mod types;

// Re-export commonly used types
pub use hash::ruleset_checksum;
pub use ruleset::{RulesetError, RulesetView};
pub use types::{
    ActivationTypes, AnchorType, ContentInjectionRuleCore, CosmeticRule, FetchResult, FilterRule,
    ListMetadata, ParseResult, PartyMask, PatternType, ResourceTypes, RuleFlags, RulesInfo,
    ScriptletInjectionRule, TrackerInfo, TrackerInfos, TrackerOwner,
};
