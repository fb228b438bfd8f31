//! Picks the parser for a fetched document by sniffing its content.

use lw_core::types::ParseResult;

use crate::ddg::DuckDuckGoRulesParser;
use crate::file_parser::RulesetFileParser;

const UTF8_BOM: &str = "\u{feff}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    TrackerBlocklist,
    TextList,
}

pub fn sniff_content(text: &str) -> ContentKind {
    let body = text.strip_prefix(UTF8_BOM).unwrap_or(text);
    if body.trim_start().starts_with('{') {
        ContentKind::TrackerBlocklist
    } else {
        ContentKind::TextList
    }
}

/// Parse a fetched document with whichever parser its content calls for.
pub fn parse_content(text: &str, allow_abp_snippets: bool) -> ParseResult {
    let text = text.strip_prefix(UTF8_BOM).unwrap_or(text);
    let mut result = ParseResult::default();
    match sniff_content(text) {
        ContentKind::TrackerBlocklist => DuckDuckGoRulesParser::new(&mut result).parse(text),
        ContentKind::TextList => RulesetFileParser::new(&mut result, allow_abp_snippets).parse(text),
    }
    result
}
