//! Line parser for Adblock-style text filter lists.

use std::time::Duration;

use lw_core::types::{
    ActivationTypes, AnchorType, ContentInjectionRuleCore, CosmeticRule, FilterRule, PartyMask,
    PatternType, ResourceTypes, RuleFlags, ScriptletInjectionRule,
};

use crate::domain::{normalize_domain, parse_domain_list};
use crate::pattern::ngram_search_string;

/// Scriptlet name given to ABP `#$#` snippet rules.
pub const ABP_SNIPPETS_SCRIPTLET: &str = "abp-snippets";

/// Result of parsing a single line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedLine {
    Filter(FilterRule),
    Cosmetic(CosmeticRule),
    Scriptlet(ScriptletInjectionRule),
    Comment,
    Metadata(MetadataDirective),
    /// Recognized syntax this pipeline does not support.
    Unsupported,
    /// Malformed line.
    Error,
}

/// A `! Key: value` directive from a list header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataDirective {
    Title(String),
    Homepage(String),
    Version(String),
    License(String),
    Expires(Duration),
}

/// Parses one line of the text rule-list grammar.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleParser {
    allow_abp_snippets: bool,
}

impl RuleParser {
    pub fn new(allow_abp_snippets: bool) -> Self {
        Self { allow_abp_snippets }
    }

    pub fn parse(&self, line: &str) -> ParsedLine {
        let line = line.trim();
        if line.is_empty() {
            return ParsedLine::Comment;
        }

        if let Some(comment) = line.strip_prefix('!') {
            return parse_comment(comment);
        }

        if line.starts_with('[') && line.ends_with(']') {
            // [Adblock Plus 2.0]
            return ParsedLine::Comment;
        }

        if let Some(parsed) = self.parse_content_injection(line) {
            return parsed;
        }

        if line.starts_with('#') {
            return ParsedLine::Comment;
        }

        // AdGuard HTML filtering
        if line.contains("$$") {
            return ParsedLine::Unsupported;
        }

        parse_network_rule(line)
    }

    fn parse_content_injection(&self, line: &str) -> Option<ParsedLine> {
        let (pos, marker) = find_injection_marker(line)?;
        let domains = &line[..pos];
        let body = line[pos + marker.len()..].trim();

        let is_allow_rule = match marker {
            "##" => false,
            "#@#" => true,
            "#$#" if self.allow_abp_snippets => false,
            _ => return Some(ParsedLine::Unsupported),
        };

        let Some((included_domains, excluded_domains)) = parse_domain_list(domains, ',') else {
            return Some(ParsedLine::Error);
        };
        let core = ContentInjectionRuleCore {
            is_allow_rule,
            included_domains,
            excluded_domains,
        };

        if body.is_empty() {
            return Some(ParsedLine::Error);
        }

        if marker == "#$#" {
            return Some(ParsedLine::Scriptlet(ScriptletInjectionRule {
                core,
                scriptlet_name: ABP_SNIPPETS_SCRIPTLET.to_string(),
                arguments: vec![body.to_string()],
            }));
        }

        if let Some(rest) = body.strip_prefix("+js") {
            return Some(parse_scriptlet(core, rest));
        }

        if is_procedural_selector(body) {
            return Some(ParsedLine::Unsupported);
        }

        Some(ParsedLine::Cosmetic(CosmeticRule {
            core,
            selector: body.to_string(),
        }))
    }
}

const INJECTION_MARKERS: [&str; 8] = ["#@$#", "#@%#", "#@?#", "#@#", "#$#", "#%#", "#?#", "##"];

const PROCEDURAL_OPERATORS: [&str; 11] = [
    ":has-text(",
    ":-abp-",
    ":matches-css",
    ":matches-path(",
    ":min-text-length(",
    ":others(",
    ":remove(",
    ":style(",
    ":upward(",
    ":watch-attr(",
    ":xpath(",
];

fn find_injection_marker(line: &str) -> Option<(usize, &'static str)> {
    line.match_indices('#').find_map(|(pos, _)| {
        let rest = &line[pos..];
        INJECTION_MARKERS
            .iter()
            .find(|marker| rest.starts_with(**marker))
            .map(|marker| (pos, *marker))
    })
}

fn is_procedural_selector(selector: &str) -> bool {
    PROCEDURAL_OPERATORS.iter().any(|op| selector.contains(op))
}

/// `+js(name, arg1, arg2)` with the `+js` prefix already removed.
fn parse_scriptlet(core: ContentInjectionRuleCore, rest: &str) -> ParsedLine {
    let Some(inner) = rest.strip_prefix('(').and_then(|r| r.strip_suffix(')')) else {
        return ParsedLine::Error;
    };

    let mut parts = split_scriptlet_args(inner).into_iter();
    let scriptlet_name = parts.next().unwrap_or_default();
    if scriptlet_name.is_empty() && !core.is_allow_rule {
        return ParsedLine::Error;
    }

    ParsedLine::Scriptlet(ScriptletInjectionRule {
        core,
        scriptlet_name,
        arguments: parts.collect(),
    })
}

/// Split on commas not preceded by a backslash; `\,` becomes `,`.
fn split_scriptlet_args(inner: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut chars = inner.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' if chars.peek() == Some(&',') => {
                current.push(',');
                chars.next();
            }
            ',' => args.push(std::mem::take(&mut current).trim().to_string()),
            c => current.push(c),
        }
    }
    let last = current.trim();
    if !last.is_empty() || !args.is_empty() {
        args.push(last.to_string());
    }
    args
}

fn parse_comment(comment: &str) -> ParsedLine {
    let Some((key, value)) = comment.split_once(':') else {
        return ParsedLine::Comment;
    };
    let value = value.trim();
    if value.is_empty() {
        return ParsedLine::Comment;
    }

    let directive = match key.trim().to_ascii_lowercase().as_str() {
        "title" => MetadataDirective::Title(value.to_string()),
        "homepage" => MetadataDirective::Homepage(value.to_string()),
        "version" => MetadataDirective::Version(value.to_string()),
        "license" | "licence" => MetadataDirective::License(value.to_string()),
        "expires" => match parse_expires(value) {
            Some(expires) => MetadataDirective::Expires(expires),
            None => return ParsedLine::Comment,
        },
        _ => return ParsedLine::Comment,
    };

    ParsedLine::Metadata(directive)
}

/// `4 days (update frequency)`, `12 hours`, `1d`, `6h`.
fn parse_expires(value: &str) -> Option<Duration> {
    let value = value.split('(').next().unwrap_or_default().trim();
    let digits_end = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let amount: u64 = value[..digits_end].parse().ok()?;
    let unit = value[digits_end..].trim().to_ascii_lowercase();

    let seconds = match unit.as_str() {
        "" | "d" | "day" | "days" => amount.checked_mul(24 * 60 * 60)?,
        "h" | "hour" | "hours" => amount.checked_mul(60 * 60)?,
        _ => return None,
    };
    Some(Duration::from_secs(seconds))
}

// =============================================================================
// Network rules
// =============================================================================

fn parse_network_rule(line: &str) -> ParsedLine {
    let mut flags = RuleFlags::empty();
    let mut body = line;
    if let Some(rest) = body.strip_prefix("@@") {
        flags |= RuleFlags::ALLOW_RULE;
        body = rest.trim_start();
    }

    let (pattern_part, options_text) = split_rule_options(body);
    let options = match options_text {
        Some(text) => match parse_options(text) {
            Ok(options) => options,
            Err(OptionError::Unsupported) => return ParsedLine::Unsupported,
            Err(OptionError::Invalid) => return ParsedLine::Error,
        },
        None => ParsedOptions::default(),
    };

    if options.match_case {
        flags |= RuleFlags::CASE_SENSITIVE;
    }
    if let Some(csp) = &options.csp {
        if csp.is_empty() && !flags.contains(RuleFlags::ALLOW_RULE) {
            return ParsedLine::Error;
        }
        flags |= RuleFlags::CSP_RULE;
    }

    let Some(parsed) = parse_pattern(pattern_part.trim(), options.match_case) else {
        return ParsedLine::Error;
    };
    if parsed.pattern.is_empty() && options_text.is_none() {
        return ParsedLine::Error;
    }

    ParsedLine::Filter(FilterRule {
        pattern: parsed.pattern,
        pattern_type: parsed.pattern_type,
        anchor_type: parsed.anchor_type,
        host: parsed.host,
        included_domains: options.included_domains,
        excluded_domains: options.excluded_domains,
        resource_types: options.resource_types,
        party: options.party,
        activation_types: options.activation_types,
        flags,
        redirect: options.redirect,
        csp: options.csp,
        ngram_search_string: parsed.ngram_search_string,
    })
}

fn split_rule_options(body: &str) -> (&str, Option<&str>) {
    // The `$` inside a /regex/ body is part of the pattern.
    let search_from = match body.strip_prefix('/') {
        Some(rest) => rest.rfind('/').map(|p| p + 2).unwrap_or(0),
        None => 0,
    };
    match body[search_from..].rfind('$') {
        Some(pos) => {
            let pos = search_from + pos;
            (&body[..pos], Some(&body[pos + 1..]))
        }
        None => (body, None),
    }
}

struct ParsedPattern {
    pattern: String,
    pattern_type: PatternType,
    anchor_type: AnchorType,
    host: String,
    ngram_search_string: Option<String>,
}

fn parse_pattern(text: &str, match_case: bool) -> Option<ParsedPattern> {
    let mut anchor_type = AnchorType::empty();
    let mut rest = text;

    if let Some(r) = rest.strip_prefix("||") {
        anchor_type |= AnchorType::HOST;
        rest = r;
        if rest.is_empty() {
            return None;
        }
    } else if let Some(r) = rest.strip_prefix('|') {
        anchor_type |= AnchorType::START;
        rest = r;
    }

    if rest.len() > 2 && anchor_type.is_empty() && rest.starts_with('/') && rest.ends_with('/') {
        let regex = &rest[1..rest.len() - 1];
        return Some(ParsedPattern {
            pattern: regex.to_string(),
            pattern_type: PatternType::Regex,
            anchor_type,
            host: String::new(),
            ngram_search_string: ngram_search_string(regex),
        });
    }

    if let Some(r) = rest.strip_suffix('|') {
        anchor_type |= AnchorType::END;
        rest = r;
    }

    // Leading/trailing `*` are implied unless anchored.
    if !anchor_type.intersects(AnchorType::START | AnchorType::HOST) {
        rest = rest.trim_start_matches('*');
    }
    if !anchor_type.contains(AnchorType::END) {
        rest = rest.trim_end_matches('*');
    }

    let pattern = if match_case {
        rest.to_string()
    } else {
        rest.to_ascii_lowercase()
    };

    let pattern_type = if pattern.contains(['*', '^']) {
        PatternType::Wildcarded
    } else {
        PatternType::Plain
    };

    let host = if anchor_type.contains(AnchorType::HOST) {
        extract_host(&pattern)
    } else {
        String::new()
    };

    Some(ParsedPattern {
        pattern,
        pattern_type,
        anchor_type,
        host,
        ngram_search_string: None,
    })
}

fn extract_host(pattern: &str) -> String {
    let end = pattern
        .find(['/', '^', '*', '?', ':', '|'])
        .unwrap_or(pattern.len());
    normalize_domain(&pattern[..end]).unwrap_or_default()
}

// =============================================================================
// Options
// =============================================================================

enum OptionError {
    Unsupported,
    Invalid,
}

struct ParsedOptions {
    resource_types: ResourceTypes,
    party: PartyMask,
    activation_types: ActivationTypes,
    match_case: bool,
    included_domains: Vec<String>,
    excluded_domains: Vec<String>,
    redirect: Option<String>,
    csp: Option<String>,
}

impl Default for ParsedOptions {
    fn default() -> Self {
        Self {
            resource_types: ResourceTypes::ALL,
            party: PartyMask::ALL,
            activation_types: ActivationTypes::empty(),
            match_case: false,
            included_domains: Vec::new(),
            excluded_domains: Vec::new(),
            redirect: None,
            csp: None,
        }
    }
}

fn parse_options(text: &str) -> Result<ParsedOptions, OptionError> {
    let mut options = ParsedOptions::default();
    let mut type_include = ResourceTypes::empty();
    let mut type_exclude = ResourceTypes::empty();
    let mut party_include = PartyMask::empty();
    let mut party_exclude = PartyMask::empty();

    for raw in text.split(',') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        let (negated, token) = match raw.strip_prefix('~') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        let (name, value) = match token.split_once('=') {
            Some((name, value)) => (name.to_ascii_lowercase(), Some(value.trim())),
            None => (token.to_ascii_lowercase(), None),
        };

        match (name.as_str(), value) {
            ("match-case", None) if !negated => options.match_case = true,
            ("domain", Some(value)) if !negated => {
                let (inc, exc) = parse_domain_list(value, '|').ok_or(OptionError::Invalid)?;
                if inc.is_empty() && exc.is_empty() {
                    return Err(OptionError::Invalid);
                }
                options.included_domains.extend(inc);
                options.excluded_domains.extend(exc);
            }
            ("redirect" | "redirect-rule", Some(value)) if !negated => {
                if value.is_empty() {
                    return Err(OptionError::Invalid);
                }
                options.redirect = Some(value.to_string());
            }
            ("rewrite", Some(value)) if !negated => {
                let resource = value
                    .strip_prefix("abp-resource:")
                    .ok_or(OptionError::Unsupported)?;
                options.redirect = Some(resource.to_string());
            }
            ("csp", value) if !negated => options.csp = Some(value.unwrap_or_default().to_string()),
            (name, None) => {
                if let Some(mask) = party_mask(name) {
                    // ~third-party == first-party
                    if negated {
                        party_exclude |= mask;
                    } else {
                        party_include |= mask;
                    }
                } else if let Some(mask) = request_type_mask(name) {
                    if negated {
                        type_exclude |= mask;
                    } else {
                        type_include |= mask;
                    }
                } else if let Some(activation) = activation_type(name) {
                    if negated {
                        return Err(OptionError::Unsupported);
                    }
                    options.activation_types |= activation;
                } else {
                    return Err(OptionError::Unsupported);
                }
            }
            _ => return Err(OptionError::Unsupported),
        }
    }

    options.resource_types = finalize_mask(type_include, type_exclude, ResourceTypes::ALL);
    options.party = finalize_mask(party_include, party_exclude, PartyMask::ALL);
    if options.resource_types.is_empty() || options.party.is_empty() {
        return Err(OptionError::Invalid);
    }

    Ok(options)
}

fn finalize_mask<F: bitflags::Flags + Copy>(include: F, exclude: F, all: F) -> F {
    let base = if include.is_empty() { all } else { include };
    base.difference(exclude)
}

fn request_type_mask(name: &str) -> Option<ResourceTypes> {
    match name {
        "stylesheet" | "css" => Some(ResourceTypes::STYLESHEET),
        "image" => Some(ResourceTypes::IMAGE),
        "script" => Some(ResourceTypes::SCRIPT),
        "xmlhttprequest" | "xhr" => Some(ResourceTypes::XMLHTTPREQUEST),
        "subdocument" | "frame" => Some(ResourceTypes::SUBDOCUMENT),
        "font" => Some(ResourceTypes::FONT),
        "media" => Some(ResourceTypes::MEDIA),
        "websocket" => Some(ResourceTypes::WEBSOCKET),
        "webrtc" => Some(ResourceTypes::WEBRTC),
        "ping" | "beacon" => Some(ResourceTypes::PING),
        "object" => Some(ResourceTypes::OBJECT),
        "other" => Some(ResourceTypes::OTHER),
        "all" => Some(ResourceTypes::ALL),
        _ => None,
    }
}

fn party_mask(name: &str) -> Option<PartyMask> {
    match name {
        "third-party" | "3p" => Some(PartyMask::THIRD_PARTY),
        "first-party" | "1p" => Some(PartyMask::FIRST_PARTY),
        _ => None,
    }
}

fn activation_type(name: &str) -> Option<ActivationTypes> {
    match name {
        "popup" => Some(ActivationTypes::POPUP),
        "document" | "doc" => Some(ActivationTypes::DOCUMENT),
        "elemhide" | "ehide" => Some(ActivationTypes::ELEMENT_HIDE),
        "generichide" | "ghide" => Some(ActivationTypes::GENERIC_HIDE),
        "genericblock" => Some(ActivationTypes::GENERIC_BLOCK),
        _ => None,
    }
}
