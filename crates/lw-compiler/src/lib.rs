//! listwarden Filter List Compiler
//!
//! This crate parses Adblock-style text lists and the DuckDuckGo tracker
//! blocklist into the shared rule model, then compiles the result into the
//! binary ruleset format.

pub mod builder;
pub mod ddg;
pub mod dispatch;
pub mod domain;
pub mod file_parser;
pub mod parser;
pub mod pattern;

pub use builder::{save_ruleset, serialize_ruleset, SaveError};
pub use ddg::DuckDuckGoRulesParser;
pub use dispatch::{parse_content, sniff_content, ContentKind};
pub use file_parser::{parse_text_list, RulesetFileParser};
pub use parser::{MetadataDirective, ParsedLine, RuleParser};
