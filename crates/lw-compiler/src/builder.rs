use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use lw_core::hash::{crc32, ruleset_checksum};
use lw_core::ruleset::{
    align_offset, header, header_flags, section_entry, wire, SectionId, COSMETIC_RULE_SIZE,
    FILTER_RULE_SIZE, HEADER_SIZE, NO_DOMAIN_LIST, NO_STRING, RULESET_HEADER, RULESET_MAGIC,
    RULESET_VERSION, SCRIPTLET_RULE_SIZE, SECTION_ENTRY_SIZE,
};
use lw_core::ruleset::{cosmetic_rule, filter_rule, scriptlet_rule};
use lw_core::types::{ContentInjectionRuleCore, ParseResult};

use crate::domain::canonicalize_domains;

/// Failure to persist a compiled ruleset.
#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    #[error("Failed to create directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("Failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

/// Serialize the rules of a parse result into a ruleset buffer.
pub fn serialize_ruleset(result: &ParseResult) -> Vec<u8> {
    let mut str_pool = StringPool::new();
    let mut domain_lists = ListPool::new();
    let mut arg_lists = ListPool::new();

    let filter_rules = build_filter_rules_section(result, &mut str_pool, &mut domain_lists);
    let cosmetic_rules = build_cosmetic_rules_section(result, &mut str_pool, &mut domain_lists);
    let scriptlet_rules =
        build_scriptlet_rules_section(result, &mut str_pool, &mut domain_lists, &mut arg_lists);

    log::debug!(
        "Serialized {} domain lists ({} interning hits), {} pool bytes",
        domain_lists.len(),
        domain_lists.hits,
        str_pool.data.len()
    );

    let mut sections = vec![
        SectionData::new(SectionId::StrPool, str_pool.build()),
        SectionData::new(SectionId::DomainLists, domain_lists.build()),
        SectionData::new(SectionId::FilterRules, filter_rules),
        SectionData::new(SectionId::CosmeticRules, cosmetic_rules),
        SectionData::new(SectionId::ScriptletRules, scriptlet_rules),
        SectionData::new(SectionId::ArgLists, arg_lists.build()),
    ];

    let section_count = sections.len();
    let section_dir_offset = HEADER_SIZE;
    let section_dir_bytes = section_count * SECTION_ENTRY_SIZE;
    let mut data_offset = align_offset(section_dir_offset + section_dir_bytes, 4);

    for section in &mut sections {
        section.offset = data_offset;
        data_offset = align_offset(data_offset + section.data.len(), 4);
    }

    let mut buffer = vec![0u8; data_offset];

    buffer[header::MAGIC..header::MAGIC + 4].copy_from_slice(&RULESET_MAGIC);
    write_u16_le(&mut buffer, header::VERSION, RULESET_VERSION);
    write_u16_le(&mut buffer, header::FLAGS, header_flags::HAS_CRC32);
    write_u32_le(&mut buffer, header::HEADER_BYTES, HEADER_SIZE as u32);
    write_u32_le(&mut buffer, header::SECTION_COUNT, section_count as u32);
    write_u32_le(&mut buffer, header::SECTION_DIR_OFFSET, section_dir_offset as u32);
    write_u32_le(&mut buffer, header::SECTION_DIR_BYTES, section_dir_bytes as u32);

    for (index, section) in sections.iter().enumerate() {
        let entry_offset = section_dir_offset + index * SECTION_ENTRY_SIZE;
        write_u16_le(&mut buffer, entry_offset + section_entry::ID, section.id as u16);
        write_u16_le(&mut buffer, entry_offset + section_entry::FLAGS, 0);
        write_u32_le(&mut buffer, entry_offset + section_entry::OFFSET, section.offset as u32);
        write_u32_le(&mut buffer, entry_offset + section_entry::LENGTH, section.data.len() as u32);

        let end = section.offset + section.data.len();
        buffer[section.offset..end].copy_from_slice(&section.data);
    }

    let crc = crc32(&buffer[HEADER_SIZE..]);
    write_u32_le(&mut buffer, header::BODY_CRC32, crc);

    buffer
}

/// Serialize `result` and write it to `path` behind the textual header.
///
/// Returns the checksum of the buffer. The file is replaced atomically.
pub fn save_ruleset(result: &ParseResult, path: &Path) -> Result<String, SaveError> {
    let buffer = serialize_ruleset(result);
    let checksum = ruleset_checksum(&buffer);

    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|source| SaveError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let mut file = Vec::with_capacity(RULESET_HEADER.len() + buffer.len());
    file.extend_from_slice(RULESET_HEADER.as_bytes());
    file.extend_from_slice(&buffer);

    let tmp_path = path.with_extension("tmp");
    let write_err = |source| SaveError::Write {
        path: path.to_path_buf(),
        source,
    };
    fs::write(&tmp_path, &file).map_err(write_err)?;
    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(write_err(err));
    }

    log::info!(
        "Wrote ruleset {} ({} bytes, checksum {})",
        path.display(),
        file.len(),
        checksum
    );
    Ok(checksum)
}

struct SectionData {
    id: SectionId,
    data: Vec<u8>,
    offset: usize,
}

impl SectionData {
    fn new(id: SectionId, data: Vec<u8>) -> Self {
        Self { id, data, offset: 0 }
    }
}

struct StringPool {
    data: Vec<u8>,
    index: HashMap<String, u32>,
}

impl StringPool {
    fn new() -> Self {
        Self {
            data: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn intern(&mut self, s: &str) -> (u32, u32) {
        if let Some(&offset) = self.index.get(s) {
            return (offset, s.len() as u32);
        }
        let offset = self.data.len() as u32;
        self.data.extend_from_slice(s.as_bytes());
        self.index.insert(s.to_string(), offset);
        (offset, s.len() as u32)
    }

    fn intern_opt(&mut self, s: Option<&str>) -> (u32, u32) {
        match s {
            Some(s) => self.intern(s),
            None => (NO_STRING, 0),
        }
    }

    fn build(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.data.len());
        buf.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.data);
        buf
    }
}

/// Interned string lists, keyed by their exact sequence.
struct ListPool {
    data: Vec<u8>,
    index: HashMap<Vec<String>, u32>,
    hits: usize,
}

impl ListPool {
    fn new() -> Self {
        Self {
            data: Vec::new(),
            index: HashMap::new(),
            hits: 0,
        }
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn intern(&mut self, items: Vec<String>, str_pool: &mut StringPool) -> u32 {
        if items.is_empty() {
            return NO_DOMAIN_LIST;
        }
        if let Some(&offset) = self.index.get(&items) {
            self.hits += 1;
            return offset;
        }

        let offset = self.data.len() as u32;
        self.data.extend_from_slice(&(items.len() as u32).to_le_bytes());
        for item in &items {
            let (str_off, str_len) = str_pool.intern(item);
            self.data.extend_from_slice(&str_off.to_le_bytes());
            self.data.extend_from_slice(&str_len.to_le_bytes());
        }
        self.index.insert(items, offset);
        offset
    }

    /// Domain lists are canonicalized first, so equal sets share one entry.
    fn intern_domains(&mut self, domains: &[String], str_pool: &mut StringPool) -> u32 {
        self.intern(canonicalize_domains(domains), str_pool)
    }

    fn build(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.data.len());
        buf.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.data);
        buf
    }
}

fn build_filter_rules_section(
    result: &ParseResult,
    str_pool: &mut StringPool,
    domain_lists: &mut ListPool,
) -> Vec<u8> {
    let rules = &result.filter_rules;
    let mut section = table_with_capacity(rules.len(), FILTER_RULE_SIZE);

    for rule in rules {
        let mut rec = [0u8; FILTER_RULE_SIZE];
        let (pattern_off, pattern_len) = str_pool.intern(&rule.pattern);
        let host = (!rule.host.is_empty()).then_some(rule.host.as_str());
        let (host_off, host_len) = str_pool.intern_opt(host);
        let (redirect_off, redirect_len) = str_pool.intern_opt(rule.redirect.as_deref());
        let (csp_off, csp_len) = str_pool.intern_opt(rule.csp.as_deref());
        let (ngram_off, ngram_len) = str_pool.intern_opt(rule.ngram_search_string.as_deref());

        write_u32_le(&mut rec, filter_rule::PATTERN_OFF, pattern_off);
        write_u32_le(&mut rec, filter_rule::PATTERN_LEN, pattern_len);
        write_u32_le(&mut rec, filter_rule::HOST_OFF, host_off);
        write_u32_le(&mut rec, filter_rule::HOST_LEN, host_len);
        write_u32_le(
            &mut rec,
            filter_rule::INCLUDED_DOMAINS,
            domain_lists.intern_domains(&rule.included_domains, str_pool),
        );
        write_u32_le(
            &mut rec,
            filter_rule::EXCLUDED_DOMAINS,
            domain_lists.intern_domains(&rule.excluded_domains, str_pool),
        );
        write_u32_le(&mut rec, filter_rule::REDIRECT_OFF, redirect_off);
        write_u32_le(&mut rec, filter_rule::REDIRECT_LEN, redirect_len);
        write_u32_le(&mut rec, filter_rule::CSP_OFF, csp_off);
        write_u32_le(&mut rec, filter_rule::CSP_LEN, csp_len);
        write_u32_le(&mut rec, filter_rule::NGRAM_OFF, ngram_off);
        write_u32_le(&mut rec, filter_rule::NGRAM_LEN, ngram_len);
        write_u32_le(
            &mut rec,
            filter_rule::RESOURCE_TYPES,
            wire::encode_resource_types(rule.resource_types),
        );
        write_u16_le(
            &mut rec,
            filter_rule::FLAGS,
            wire::encode_rule_flags(rule.flags, rule.anchor_type),
        );
        rec[filter_rule::PATTERN_TYPE] = wire::encode_pattern_type(rule.pattern_type);
        rec[filter_rule::PARTY] = wire::encode_party(rule.party);
        rec[filter_rule::ACTIVATION] = wire::encode_activation(rule.activation_types);

        section.extend_from_slice(&rec);
    }

    section
}

fn build_cosmetic_rules_section(
    result: &ParseResult,
    str_pool: &mut StringPool,
    domain_lists: &mut ListPool,
) -> Vec<u8> {
    let rules = &result.cosmetic_rules;
    let mut section = table_with_capacity(rules.len(), COSMETIC_RULE_SIZE);

    for rule in rules {
        let mut rec = [0u8; COSMETIC_RULE_SIZE];
        let (included, excluded) = intern_core_domains(&rule.core, str_pool, domain_lists);
        let (selector_off, selector_len) = str_pool.intern(&rule.selector);

        write_u32_le(&mut rec, cosmetic_rule::INCLUDED_DOMAINS, included);
        write_u32_le(&mut rec, cosmetic_rule::EXCLUDED_DOMAINS, excluded);
        write_u32_le(&mut rec, cosmetic_rule::SELECTOR_OFF, selector_off);
        write_u32_le(&mut rec, cosmetic_rule::SELECTOR_LEN, selector_len);
        write_u16_le(&mut rec, cosmetic_rule::FLAGS, injection_flags(&rule.core));

        section.extend_from_slice(&rec);
    }

    section
}

fn build_scriptlet_rules_section(
    result: &ParseResult,
    str_pool: &mut StringPool,
    domain_lists: &mut ListPool,
    arg_lists: &mut ListPool,
) -> Vec<u8> {
    let rules = &result.scriptlet_injection_rules;
    let mut section = table_with_capacity(rules.len(), SCRIPTLET_RULE_SIZE);

    for rule in rules {
        let mut rec = [0u8; SCRIPTLET_RULE_SIZE];
        let (included, excluded) = intern_core_domains(&rule.core, str_pool, domain_lists);
        let (name_off, name_len) = str_pool.intern(&rule.scriptlet_name);
        // Argument order is significant, so no canonicalization here.
        let arguments = arg_lists.intern(rule.arguments.clone(), str_pool);

        write_u32_le(&mut rec, scriptlet_rule::INCLUDED_DOMAINS, included);
        write_u32_le(&mut rec, scriptlet_rule::EXCLUDED_DOMAINS, excluded);
        write_u32_le(&mut rec, scriptlet_rule::NAME_OFF, name_off);
        write_u32_le(&mut rec, scriptlet_rule::NAME_LEN, name_len);
        write_u32_le(&mut rec, scriptlet_rule::ARGUMENTS, arguments);
        write_u16_le(&mut rec, scriptlet_rule::FLAGS, injection_flags(&rule.core));

        section.extend_from_slice(&rec);
    }

    section
}

fn intern_core_domains(
    core: &ContentInjectionRuleCore,
    str_pool: &mut StringPool,
    domain_lists: &mut ListPool,
) -> (u32, u32) {
    (
        domain_lists.intern_domains(&core.included_domains, str_pool),
        domain_lists.intern_domains(&core.excluded_domains, str_pool),
    )
}

fn injection_flags(core: &ContentInjectionRuleCore) -> u16 {
    if core.is_allow_rule {
        wire::injection_flags::ALLOW_RULE
    } else {
        0
    }
}

fn table_with_capacity(count: usize, record_size: usize) -> Vec<u8> {
    let mut section = Vec::with_capacity(4 + count * record_size);
    section.extend_from_slice(&(count as u32).to_le_bytes());
    section
}

fn write_u16_le(data: &mut [u8], offset: usize, value: u16) {
    let bytes = value.to_le_bytes();
    data[offset..offset + 2].copy_from_slice(&bytes);
}

fn write_u32_le(data: &mut [u8], offset: usize, value: u32) {
    let bytes = value.to_le_bytes();
    data[offset..offset + 4].copy_from_slice(&bytes);
}

#[cfg(test)]
mod tests {
    use lw_core::ruleset::{strip_header, RulesetError, RulesetView};
    use lw_core::types::{
        ActivationTypes, AnchorType, CosmeticRule, FilterRule, PartyMask, PatternType,
        ResourceTypes, RuleFlags, ScriptletInjectionRule,
    };

    use crate::file_parser::parse_text_list;

    use super::*;

    fn injection_core(is_allow_rule: bool, included: &[&str], excluded: &[&str]) -> ContentInjectionRuleCore {
        ContentInjectionRuleCore {
            is_allow_rule,
            included_domains: included.iter().map(|d| d.to_string()).collect(),
            excluded_domains: excluded.iter().map(|d| d.to_string()).collect(),
        }
    }

    fn sample_result() -> ParseResult {
        let mut result = ParseResult::default();
        result.filter_rules.push(FilterRule {
            pattern: "ads.example.com^".to_string(),
            pattern_type: PatternType::Wildcarded,
            anchor_type: AnchorType::HOST,
            host: "ads.example.com".to_string(),
            included_domains: vec!["news.com".to_string(), "blog.example.org".to_string()],
            excluded_domains: vec!["shop.news.com".to_string()],
            resource_types: ResourceTypes::SCRIPT | ResourceTypes::IMAGE | ResourceTypes::WEBRTC,
            party: PartyMask::THIRD_PARTY,
            activation_types: ActivationTypes::empty(),
            flags: RuleFlags::empty(),
            redirect: Some("noop.js".to_string()),
            csp: None,
            ngram_search_string: None,
        });
        result.filter_rules.push(FilterRule {
            pattern: r"track(er)?\.js".to_string(),
            pattern_type: PatternType::Regex,
            anchor_type: AnchorType::START | AnchorType::END,
            flags: RuleFlags::ALLOW_RULE | RuleFlags::CASE_SENSITIVE,
            activation_types: ActivationTypes::DOCUMENT | ActivationTypes::POPUP,
            ngram_search_string: Some("track*.js".to_string()),
            ..FilterRule::default()
        });
        result.filter_rules.push(FilterRule {
            pattern: String::new(),
            flags: RuleFlags::CSP_RULE,
            csp: Some("script-src 'self'".to_string()),
            ..FilterRule::default()
        });
        result.cosmetic_rules.push(CosmeticRule {
            core: injection_core(false, &["news.com", "blog.example.org"], &[]),
            selector: ".ad-banner".to_string(),
        });
        result.cosmetic_rules.push(CosmeticRule {
            core: injection_core(true, &["shop.news.com"], &[]),
            selector: ".ad-banner".to_string(),
        });
        result.scriptlet_injection_rules.push(ScriptletInjectionRule {
            core: injection_core(false, &[], &["news.com"]),
            scriptlet_name: "set-constant".to_string(),
            arguments: vec!["ads.enabled".to_string(), "false".to_string()],
        });
        result
    }

    /// Rules as the loader should return them: domain lists canonicalized.
    fn canonical(mut result: ParseResult) -> ParseResult {
        for rule in &mut result.filter_rules {
            rule.included_domains = canonicalize_domains(&rule.included_domains);
            rule.excluded_domains = canonicalize_domains(&rule.excluded_domains);
        }
        for rule in &mut result.cosmetic_rules {
            rule.core.included_domains = canonicalize_domains(&rule.core.included_domains);
            rule.core.excluded_domains = canonicalize_domains(&rule.core.excluded_domains);
        }
        for rule in &mut result.scriptlet_injection_rules {
            rule.core.included_domains = canonicalize_domains(&rule.core.included_domains);
            rule.core.excluded_domains = canonicalize_domains(&rule.core.excluded_domains);
        }
        result
    }

    #[test]
    fn round_trips_every_rule_table() {
        let result = sample_result();
        let bytes = serialize_ruleset(&result);
        let view = RulesetView::load(&bytes).expect("ruleset should load");
        let decoded = view.decode().expect("ruleset should decode");

        let expected = canonical(result);
        assert_eq!(decoded.filter_rules, expected.filter_rules);
        assert_eq!(decoded.cosmetic_rules, expected.cosmetic_rules);
        assert_eq!(decoded.scriptlet_injection_rules, expected.scriptlet_injection_rules);
    }

    #[test]
    fn equal_domain_lists_share_one_entry() {
        let bytes = serialize_ruleset(&sample_result());
        let view = RulesetView::load(&bytes).unwrap();

        // Filter rule 0 includes {news.com, blog.example.org}; cosmetic rule 0
        // includes the same set in another order. shop.news.com appears once
        // as an exclusion and once as an inclusion.
        let (included, excluded) = view.filter_rule_domain_lists(0).unwrap();
        let decoded = view.decode().unwrap();
        assert_eq!(decoded.cosmetic_rules[0].core.included_domains, view.domain_list(included).unwrap());
        assert_eq!(decoded.cosmetic_rules[1].core.included_domains, view.domain_list(excluded).unwrap());
        assert!(!decoded.cosmetic_rules[0].core.is_allow_rule);
        assert!(decoded.cosmetic_rules[1].core.is_allow_rule);

        let (no_included, no_excluded) = view.filter_rule_domain_lists(1).unwrap();
        assert_eq!(no_included, NO_DOMAIN_LIST);
        assert_eq!(no_excluded, NO_DOMAIN_LIST);

        // {news.com, blog.example.org}, {shop.news.com}, {news.com}
        let pool = view.get_section(SectionId::DomainLists).unwrap();
        assert_eq!(pool.len(), 4 + (4 + 2 * 8) + (4 + 8) + (4 + 8));

        let mut reordered = sample_result();
        reordered.cosmetic_rules[0].core.included_domains.reverse();
        assert_eq!(serialize_ruleset(&reordered), bytes);
    }

    #[test]
    fn serialization_is_deterministic() {
        let result = parse_text_list(
            "||a.com^$domain=x.com|y.com\n||b.com^$domain=y.com|x.com\nx.com,y.com##.ad\n",
            false,
        );
        let first = serialize_ruleset(&result);
        assert_eq!(first, serialize_ruleset(&result));
        assert_eq!(ruleset_checksum(&first), ruleset_checksum(&serialize_ruleset(&result)));

        let view = RulesetView::load(&first).unwrap();
        let (a_included, _) = view.filter_rule_domain_lists(0).unwrap();
        let (b_included, _) = view.filter_rule_domain_lists(1).unwrap();
        assert_eq!(a_included, b_included);
    }

    #[test]
    fn corrupted_buffer_fails_crc() {
        let mut bytes = serialize_ruleset(&sample_result());
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            RulesetView::load(&bytes),
            Err(RulesetError::Crc32Mismatch { .. })
        ));
    }

    #[test]
    fn saves_with_header_and_returns_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracking").join("7.dat");

        let result = sample_result();
        let checksum = save_ruleset(&result, &path).expect("save should succeed");
        assert_eq!(checksum.len(), 16);
        assert!(!path.with_extension("tmp").exists());

        let file = fs::read(&path).unwrap();
        let buffer = strip_header(&file).unwrap();
        assert_eq!(checksum, ruleset_checksum(buffer));
        assert_eq!(RulesetView::load(buffer).unwrap().filter_rule_count(), 3);
    }

    #[test]
    fn save_into_unwritable_location_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("tracking");
        fs::write(&blocker, b"not a directory").unwrap();

        let err = save_ruleset(&sample_result(), &blocker.join("1.dat")).unwrap_err();
        assert!(matches!(err, SaveError::CreateDir { .. }));
    }
}
