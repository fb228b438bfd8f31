//! DuckDuckGo tracker blocklist (Tracker Radar JSON) parser.
//!
//! Each tracker domain carries a default action and optional sub-rules that
//! either reinforce or override it. Sub-rules are translated into host-scoped
//! filter rules; the owning entity's own domains are always exempt.

use std::time::Duration;

use serde_json::{Map, Value};

use lw_core::types::{
    AnchorType, FetchResult, FilterRule, ParseResult, PatternType, ResourceTypes, RuleFlags,
    TrackerInfo, TrackerInfos, TrackerOwner,
};

use crate::domain::normalize_domain;
use crate::pattern::{ngram_search_string, regex_to_plain};

pub const DDG_LIST_TITLE: &str = "DuckDuckGo Tracker Radar";

/// The format has no expiry of its own.
pub const DDG_LIST_EXPIRY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Block,
    Ignore,
}

impl Action {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "block" => Some(Action::Block),
            "ignore" => Some(Action::Ignore),
            _ => None,
        }
    }

    fn opposite(self) -> Self {
        match self {
            Action::Block => Action::Ignore,
            Action::Ignore => Action::Block,
        }
    }

    fn rule_flags(self) -> RuleFlags {
        match self {
            Action::Block => RuleFlags::empty(),
            Action::Ignore => RuleFlags::ALLOW_RULE,
        }
    }
}

/// `types` + `domains` restriction found under `options` or `exceptions`.
#[derive(Debug, Default)]
struct Restriction {
    types: Option<ResourceTypes>,
    domains: Vec<String>,
}

impl Restriction {
    fn from_value(value: Option<&Value>) -> Option<Self> {
        let object = value?.as_object()?;
        let types = object.get("types").and_then(Value::as_array).map(|names| {
            names
                .iter()
                .filter_map(Value::as_str)
                .filter_map(ddg_resource_type)
                .fold(ResourceTypes::empty(), |acc, t| acc | t)
        });
        let domains = string_array(object.get("domains"))
            .filter_map(normalize_domain)
            .collect();
        Some(Self { types, domains })
    }
}

/// Parses the DuckDuckGo tracker blocklist into a [`ParseResult`].
pub struct DuckDuckGoRulesParser<'a> {
    result: &'a mut ParseResult,
}

impl<'a> DuckDuckGoRulesParser<'a> {
    pub fn new(result: &'a mut ParseResult) -> Self {
        Self { result }
    }

    pub fn parse(mut self, text: &str) {
        let root: Value = match serde_json::from_str(text) {
            Ok(root) => root,
            Err(err) => {
                log::warn!("Tracker blocklist is not valid JSON: {err}");
                self.result.fetch_result = FetchResult::FileFormatUnsupported;
                return;
            }
        };

        let Some(trackers) = root.get("trackers").and_then(Value::as_object) else {
            self.result.fetch_result = FetchResult::FileFormatUnsupported;
            return;
        };
        let empty = Map::new();
        let entities = root.get("entities").and_then(Value::as_object).unwrap_or(&empty);

        let mut tracker_infos = TrackerInfos::new();
        for (domain, tracker) in trackers {
            let Some(tracker) = tracker.as_object() else {
                self.result.rules_info.invalid += 1;
                continue;
            };
            self.parse_tracker(domain, tracker, entities, &mut tracker_infos);
        }

        self.result.rules_info.valid = self.result.filter_rules.len() as u32;
        if self.result.filter_rules.is_empty() {
            self.result.fetch_result = FetchResult::FileFormatUnsupported;
            return;
        }

        self.result.metadata.title = Some(DDG_LIST_TITLE.to_string());
        self.result.metadata.expires = DDG_LIST_EXPIRY;
        self.result.tracker_infos = Some(tracker_infos);
        self.result.fetch_result = FetchResult::Success;
    }

    fn parse_tracker(
        &mut self,
        domain: &str,
        tracker: &Map<String, Value>,
        entities: &Map<String, Value>,
        tracker_infos: &mut TrackerInfos,
    ) {
        let Some(domain) = normalize_domain(domain) else {
            self.result.rules_info.invalid += 1;
            return;
        };

        let owner = tracker_owner(tracker.get("owner"));
        let excluded_origins: Vec<String> = owner
            .as_ref()
            .and_then(|owner| entities.get(&owner.name))
            .map(|entity| string_array(entity.get("domains")))
            .into_iter()
            .flatten()
            .filter_map(normalize_domain)
            .collect();

        tracker_infos.insert(
            domain.clone(),
            TrackerInfo {
                owner,
                categories: string_array(tracker.get("categories"))
                    .map(str::to_string)
                    .collect(),
            },
        );

        let Some(default) = tracker
            .get("default")
            .and_then(Value::as_str)
            .and_then(Action::parse)
        else {
            self.result.rules_info.invalid += 1;
            return;
        };

        if default == Action::Block {
            self.result.filter_rules.push(FilterRule {
                pattern: domain.clone(),
                anchor_type: AnchorType::HOST,
                host: domain.clone(),
                excluded_domains: excluded_origins.clone(),
                ..FilterRule::default()
            });
        }

        let rules = tracker
            .get("rules")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for rule in rules {
            match build_sub_rule(&domain, default, &excluded_origins, rule) {
                SubRule::Emit(rule) => self.result.filter_rules.push(*rule),
                SubRule::Unsupported => self.result.rules_info.unsupported += 1,
                SubRule::Invalid => self.result.rules_info.invalid += 1,
            }
        }
    }
}

enum SubRule {
    Emit(Box<FilterRule>),
    Unsupported,
    Invalid,
}

fn build_sub_rule(
    domain: &str,
    default: Action,
    excluded_origins: &[String],
    rule: &Value,
) -> SubRule {
    let Some(pattern) = rule.get("rule").and_then(Value::as_str) else {
        return SubRule::Invalid;
    };
    let action = match rule.get("action").and_then(Value::as_str) {
        Some(action) => match Action::parse(action) {
            Some(action) => action,
            None => return SubRule::Invalid,
        },
        None => default,
    };

    let exceptions = Restriction::from_value(rule.get("exceptions"));
    let options = Restriction::from_value(rule.get("options")).unwrap_or_default();

    let (polarity, included_domains, mut excluded_domains, resource_types) = if action == default {
        // A reinforcing rule only narrows where the default re-applies.
        let Some(exceptions) = exceptions else {
            return SubRule::Unsupported;
        };
        (
            default,
            exceptions.domains,
            Vec::new(),
            exceptions.types.unwrap_or(ResourceTypes::ALL),
        )
    } else {
        let exceptions = exceptions.unwrap_or_default();
        let types = options
            .types
            .unwrap_or(ResourceTypes::ALL)
            .difference(exceptions.types.unwrap_or(ResourceTypes::empty()));
        (default.opposite(), options.domains, exceptions.domains, types)
    };

    if resource_types.is_empty() {
        return SubRule::Unsupported;
    }
    excluded_domains.extend(excluded_origins.iter().cloned());

    let (pattern, pattern_type, ngram_search_string) = match regex_to_plain(pattern) {
        Some(plain) => (plain.to_ascii_lowercase(), PatternType::Plain, None),
        None => (
            pattern.to_string(),
            PatternType::Regex,
            ngram_search_string(pattern),
        ),
    };

    SubRule::Emit(Box::new(FilterRule {
        pattern,
        pattern_type,
        host: domain.to_string(),
        included_domains,
        excluded_domains,
        resource_types,
        flags: polarity.rule_flags(),
        ngram_search_string,
        ..FilterRule::default()
    }))
}

fn tracker_owner(value: Option<&Value>) -> Option<TrackerOwner> {
    match value? {
        Value::String(name) => Some(TrackerOwner {
            name: name.clone(),
            display_name: None,
        }),
        Value::Object(object) => {
            let name = object.get("name")?.as_str()?.to_string();
            let display_name = object
                .get("displayName")
                .and_then(Value::as_str)
                .map(str::to_string);
            Some(TrackerOwner { name, display_name })
        }
        _ => None,
    }
}

fn string_array(value: Option<&Value>) -> impl Iterator<Item = &str> {
    value
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
}

fn ddg_resource_type(name: &str) -> Option<ResourceTypes> {
    match name {
        "script" => Some(ResourceTypes::SCRIPT),
        "xmlhttprequest" => Some(ResourceTypes::XMLHTTPREQUEST),
        "subdocument" => Some(ResourceTypes::SUBDOCUMENT),
        "image" => Some(ResourceTypes::IMAGE),
        "stylesheet" => Some(ResourceTypes::STYLESHEET),
        "font" => Some(ResourceTypes::FONT),
        "media" => Some(ResourceTypes::MEDIA),
        "object" => Some(ResourceTypes::OBJECT),
        "ping" | "beacon" => Some(ResourceTypes::PING),
        "websocket" => Some(ResourceTypes::WEBSOCKET),
        "other" => Some(ResourceTypes::OTHER),
        _ => None,
    }
}
