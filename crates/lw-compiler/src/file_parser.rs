//! Whole-document parser for text filter lists.

use lw_core::types::{FetchResult, ParseResult};

use crate::parser::{MetadataDirective, ParsedLine, RuleParser};

/// Feeds every line of a text list through [`RuleParser`] and collects the
/// results into a [`ParseResult`].
pub struct RulesetFileParser<'a> {
    result: &'a mut ParseResult,
    parser: RuleParser,
}

impl<'a> RulesetFileParser<'a> {
    pub fn new(result: &'a mut ParseResult, allow_abp_snippets: bool) -> Self {
        Self {
            result,
            parser: RuleParser::new(allow_abp_snippets),
        }
    }

    pub fn parse(mut self, text: &str) {
        for line in text.split(['\n', '\r']) {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            self.add_line(line);
        }

        let info = &self.result.rules_info;
        log::debug!(
            "Parsed text list: {} valid, {} invalid, {} unsupported",
            info.valid,
            info.invalid,
            info.unsupported
        );

        self.result.fetch_result = if self.result.rule_count() == 0 {
            FetchResult::FileFormatUnsupported
        } else {
            FetchResult::Success
        };
    }

    fn add_line(&mut self, line: &str) {
        let info = &mut self.result.rules_info;
        match self.parser.parse(line) {
            ParsedLine::Filter(rule) => {
                info.valid += 1;
                self.result.filter_rules.push(rule);
            }
            ParsedLine::Cosmetic(rule) => {
                info.valid += 1;
                self.result.cosmetic_rules.push(rule);
            }
            ParsedLine::Scriptlet(rule) => {
                info.valid += 1;
                self.result.scriptlet_injection_rules.push(rule);
            }
            ParsedLine::Metadata(directive) => self.apply_metadata(directive),
            ParsedLine::Comment => {}
            ParsedLine::Unsupported => info.unsupported += 1,
            ParsedLine::Error => {
                info.invalid += 1;
                log::trace!("Invalid rule: {line}");
            }
        }
    }

    fn apply_metadata(&mut self, directive: MetadataDirective) {
        let metadata = &mut self.result.metadata;
        match directive {
            MetadataDirective::Title(title) => metadata.title = Some(title),
            MetadataDirective::Homepage(homepage) => metadata.homepage = Some(homepage),
            MetadataDirective::Version(version) => metadata.version = Some(version),
            MetadataDirective::License(license) => metadata.license = Some(license),
            MetadataDirective::Expires(expires) => metadata.expires = expires,
        }
    }
}

/// Parse a complete text list into a fresh [`ParseResult`].
pub fn parse_text_list(text: &str, allow_abp_snippets: bool) -> ParseResult {
    let mut result = ParseResult::default();
    RulesetFileParser::new(&mut result, allow_abp_snippets).parse(text);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use lw_core::types::{ResourceTypes, DEFAULT_LIST_EXPIRY};
    use std::time::Duration;

    const EASYLIST_SAMPLE: &str = "[Adblock Plus 2.0]\r\n\
        ! Title: Sample List\r\n\
        ! Homepage: https://example.org/list\r\n\
        ! Expires: 2 days\r\n\
        ||ads.example.com^\r\n\
        @@||ads.example.com/allowed.js$script\r\n\
        example.com##.banner\r\n\
        example.com##+js(abort-on-property-read, adblock)\r\n\
        ||tracker.net^$unknown-option\r\n\
        ||\r\n\
        \r\n";

    #[test]
    fn collects_rules_and_counters() {
        let result = parse_text_list(EASYLIST_SAMPLE, false);

        assert_eq!(result.fetch_result, FetchResult::Success);
        assert_eq!(result.filter_rules.len(), 2);
        assert_eq!(result.cosmetic_rules.len(), 1);
        assert_eq!(result.scriptlet_injection_rules.len(), 1);
        assert_eq!(result.rules_info.valid, 4);
        assert_eq!(result.rules_info.unsupported, 1);
        assert_eq!(result.rules_info.invalid, 1);

        assert_eq!(result.metadata.title.as_deref(), Some("Sample List"));
        assert_eq!(result.metadata.homepage.as_deref(), Some("https://example.org/list"));
        assert_eq!(result.metadata.expires, Duration::from_secs(2 * 86400));
    }

    #[test]
    fn handles_bare_carriage_returns() {
        let result = parse_text_list("||a.com^\r||b.com^\r", false);
        assert_eq!(result.filter_rules.len(), 2);
        assert!(result
            .filter_rules
            .iter()
            .all(|rule| rule.resource_types == ResourceTypes::ALL));
    }

    #[test]
    fn comment_only_list_is_unsupported() {
        let result = parse_text_list("! Title: Empty\n! nothing here\n", false);
        assert_eq!(result.fetch_result, FetchResult::FileFormatUnsupported);
        assert_eq!(result.rules_info.valid, 0);
        assert_eq!(result.metadata.expires, DEFAULT_LIST_EXPIRY);
    }

    #[test]
    fn cosmetic_only_list_is_supported() {
        let result = parse_text_list("example.com##.ad\n", false);
        assert_eq!(result.fetch_result, FetchResult::Success);
    }
}
