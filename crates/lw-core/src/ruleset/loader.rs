//! Zero-copy compiled ruleset loader

use std::collections::HashMap;

use crate::hash::crc32;
use crate::types::{ContentInjectionRuleCore, CosmeticRule, FilterRule, ScriptletInjectionRule};
use super::format::*;
use super::wire;

/// Error type for ruleset loading.
#[derive(Debug, thiserror::Error)]
pub enum RulesetError {
    #[error("Missing ruleset header")]
    MissingHeader,
    #[error("Invalid magic bytes")]
    InvalidMagic,
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u16),
    #[error("CRC32 mismatch: stored={stored}, computed={computed}")]
    Crc32Mismatch { stored: u32, computed: u32 },
    #[error("Invalid section: {0}")]
    InvalidSection(String),
    #[error("Invalid record in {section:?} at index {index}")]
    InvalidRecord { section: SectionId, index: usize },
    #[error("Data too short")]
    DataTooShort,
}

/// Split the textual version line off a ruleset file.
pub fn strip_header(file: &[u8]) -> Result<&[u8], RulesetError> {
    file.strip_prefix(RULESET_HEADER.as_bytes())
        .ok_or(RulesetError::MissingHeader)
}

/// Section metadata.
#[derive(Debug, Clone)]
pub struct SectionInfo {
    pub id: SectionId,
    pub flags: u16,
    pub offset: usize,
    pub length: usize,
}

/// Every rule table of a ruleset, decoded back into the rule model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedRuleset {
    pub filter_rules: Vec<FilterRule>,
    pub cosmetic_rules: Vec<CosmeticRule>,
    pub scriptlet_injection_rules: Vec<ScriptletInjectionRule>,
}

/// Zero-copy view over a ruleset buffer (textual header already stripped).
pub struct RulesetView<'a> {
    data: &'a [u8],
    pub version: u16,
    pub flags: u16,
    sections: HashMap<SectionId, SectionInfo>,
}

impl<'a> RulesetView<'a> {
    /// Load a ruleset from its buffer bytes.
    pub fn load(data: &'a [u8]) -> Result<Self, RulesetError> {
        if data.len() < HEADER_SIZE {
            return Err(RulesetError::DataTooShort);
        }

        if !validate_magic(data) {
            return Err(RulesetError::InvalidMagic);
        }

        let version = read_u16_le(data, header::VERSION);
        if version != RULESET_VERSION {
            return Err(RulesetError::UnsupportedVersion(version));
        }

        let flags = read_u16_le(data, header::FLAGS);
        let section_count = read_u32_le(data, header::SECTION_COUNT) as usize;
        let section_dir_offset = read_u32_le(data, header::SECTION_DIR_OFFSET) as usize;

        if flags & header_flags::HAS_CRC32 != 0 {
            let stored = read_u32_le(data, header::BODY_CRC32);
            let computed = crc32(&data[HEADER_SIZE..]);
            if stored != computed {
                return Err(RulesetError::Crc32Mismatch { stored, computed });
            }
        }

        let mut sections = HashMap::new();
        for i in 0..section_count {
            let entry_offset = section_dir_offset + i * SECTION_ENTRY_SIZE;
            if entry_offset + SECTION_ENTRY_SIZE > data.len() {
                return Err(RulesetError::DataTooShort);
            }

            let id_raw = read_u16_le(data, entry_offset + section_entry::ID);
            let id = match SectionId::try_from(id_raw) {
                Ok(id) => id,
                Err(_) => continue, // Skip unknown sections
            };

            let info = SectionInfo {
                id,
                flags: read_u16_le(data, entry_offset + section_entry::FLAGS),
                offset: read_u32_le(data, entry_offset + section_entry::OFFSET) as usize,
                length: read_u32_le(data, entry_offset + section_entry::LENGTH) as usize,
            };

            if info.offset + info.length > data.len() {
                return Err(RulesetError::InvalidSection(format!(
                    "{:?} spans {}..{} past end {}",
                    id,
                    info.offset,
                    info.offset + info.length,
                    data.len()
                )));
            }

            sections.insert(id, info);
        }

        log::debug!("loaded ruleset v{} with {} sections", version, sections.len());

        Ok(Self {
            data,
            version,
            flags,
            sections,
        })
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    pub fn get_section(&self, id: SectionId) -> Option<&'a [u8]> {
        let info = self.sections.get(&id)?;
        Some(&self.data[info.offset..info.offset + info.length])
    }

    /// Get section info.
    pub fn get_section_info(&self, id: SectionId) -> Option<&SectionInfo> {
        self.sections.get(&id)
    }

    pub fn filter_rule_count(&self) -> usize {
        self.table_count(SectionId::FilterRules)
    }

    pub fn cosmetic_rule_count(&self) -> usize {
        self.table_count(SectionId::CosmeticRules)
    }

    pub fn scriptlet_rule_count(&self) -> usize {
        self.table_count(SectionId::ScriptletRules)
    }

    /// Decode filter rule `index`.
    pub fn filter_rule(&self, index: usize) -> Result<FilterRule, RulesetError> {
        let section = SectionId::FilterRules;
        let rec = self.record(section, index, FILTER_RULE_SIZE)?;
        let bad = || RulesetError::InvalidRecord { section, index };

        let pattern_type = wire::decode_pattern_type(rec[filter_rule::PATTERN_TYPE]).ok_or_else(bad)?;
        let (flags, anchor_type) = wire::decode_rule_flags(read_u16_le(rec, filter_rule::FLAGS));

        Ok(FilterRule {
            pattern: self.string_at(rec, filter_rule::PATTERN_OFF)?.ok_or_else(bad)?,
            pattern_type,
            anchor_type,
            host: self.string_at(rec, filter_rule::HOST_OFF)?.unwrap_or_default(),
            included_domains: self.domain_list(read_u32_le(rec, filter_rule::INCLUDED_DOMAINS))?,
            excluded_domains: self.domain_list(read_u32_le(rec, filter_rule::EXCLUDED_DOMAINS))?,
            resource_types: wire::decode_resource_types(read_u32_le(rec, filter_rule::RESOURCE_TYPES)),
            party: wire::decode_party(rec[filter_rule::PARTY]),
            activation_types: wire::decode_activation(rec[filter_rule::ACTIVATION]),
            flags,
            redirect: self.string_at(rec, filter_rule::REDIRECT_OFF)?,
            csp: self.string_at(rec, filter_rule::CSP_OFF)?,
            ngram_search_string: self.string_at(rec, filter_rule::NGRAM_OFF)?,
        })
    }

    /// Raw (included, excluded) domain list offsets of filter rule `index`.
    pub fn filter_rule_domain_lists(&self, index: usize) -> Result<(u32, u32), RulesetError> {
        let rec = self.record(SectionId::FilterRules, index, FILTER_RULE_SIZE)?;
        Ok((
            read_u32_le(rec, filter_rule::INCLUDED_DOMAINS),
            read_u32_le(rec, filter_rule::EXCLUDED_DOMAINS),
        ))
    }

    /// Decode cosmetic rule `index`.
    pub fn cosmetic_rule(&self, index: usize) -> Result<CosmeticRule, RulesetError> {
        let section = SectionId::CosmeticRules;
        let rec = self.record(section, index, COSMETIC_RULE_SIZE)?;
        let flags = read_u16_le(rec, cosmetic_rule::FLAGS);

        Ok(CosmeticRule {
            core: ContentInjectionRuleCore {
                is_allow_rule: flags & wire::injection_flags::ALLOW_RULE != 0,
                included_domains: self.domain_list(read_u32_le(rec, cosmetic_rule::INCLUDED_DOMAINS))?,
                excluded_domains: self.domain_list(read_u32_le(rec, cosmetic_rule::EXCLUDED_DOMAINS))?,
            },
            selector: self
                .string_at(rec, cosmetic_rule::SELECTOR_OFF)?
                .ok_or(RulesetError::InvalidRecord { section, index })?,
        })
    }

    /// Decode scriptlet injection rule `index`.
    pub fn scriptlet_rule(&self, index: usize) -> Result<ScriptletInjectionRule, RulesetError> {
        let section = SectionId::ScriptletRules;
        let rec = self.record(section, index, SCRIPTLET_RULE_SIZE)?;
        let flags = read_u16_le(rec, scriptlet_rule::FLAGS);

        Ok(ScriptletInjectionRule {
            core: ContentInjectionRuleCore {
                is_allow_rule: flags & wire::injection_flags::ALLOW_RULE != 0,
                included_domains: self.domain_list(read_u32_le(rec, scriptlet_rule::INCLUDED_DOMAINS))?,
                excluded_domains: self.domain_list(read_u32_le(rec, scriptlet_rule::EXCLUDED_DOMAINS))?,
            },
            scriptlet_name: self
                .string_at(rec, scriptlet_rule::NAME_OFF)?
                .ok_or(RulesetError::InvalidRecord { section, index })?,
            arguments: self.read_list(SectionId::ArgLists, read_u32_le(rec, scriptlet_rule::ARGUMENTS))?,
        })
    }

    /// Decode every rule table.
    pub fn decode(&self) -> Result<DecodedRuleset, RulesetError> {
        Ok(DecodedRuleset {
            filter_rules: (0..self.filter_rule_count())
                .map(|i| self.filter_rule(i))
                .collect::<Result<_, _>>()?,
            cosmetic_rules: (0..self.cosmetic_rule_count())
                .map(|i| self.cosmetic_rule(i))
                .collect::<Result<_, _>>()?,
            scriptlet_injection_rules: (0..self.scriptlet_rule_count())
                .map(|i| self.scriptlet_rule(i))
                .collect::<Result<_, _>>()?,
        })
    }

    /// Resolve a domain list offset. `NO_DOMAIN_LIST` is the empty list.
    pub fn domain_list(&self, offset: u32) -> Result<Vec<String>, RulesetError> {
        self.read_list(SectionId::DomainLists, offset)
    }

    fn table_count(&self, id: SectionId) -> usize {
        match self.get_section(id) {
            Some(data) if data.len() >= TABLE_HEADER_SIZE => read_u32_le(data, 0) as usize,
            _ => 0,
        }
    }

    fn record(&self, section: SectionId, index: usize, size: usize) -> Result<&'a [u8], RulesetError> {
        let data = self
            .get_section(section)
            .ok_or_else(|| RulesetError::InvalidSection(format!("{:?} missing", section)))?;
        if index >= self.table_count(section) {
            return Err(RulesetError::InvalidRecord { section, index });
        }
        let start = TABLE_HEADER_SIZE + index * size;
        data.get(start..start + size)
            .ok_or(RulesetError::InvalidRecord { section, index })
    }

    /// Read an `(offset, length)` string reference stored at `field` in `rec`.
    fn string_at(&self, rec: &[u8], field: usize) -> Result<Option<String>, RulesetError> {
        let offset = read_u32_le(rec, field);
        if offset == NO_STRING {
            return Ok(None);
        }
        let length = read_u32_le(rec, field + 4);
        self.get_string(offset as usize, length as usize)
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| RulesetError::InvalidSection(format!("string {offset}+{length} out of pool")))
    }

    /// Get string from string pool.
    pub fn get_string(&self, offset: usize, length: usize) -> Option<&'a str> {
        let section = self.get_section(SectionId::StrPool)?;
        let pool_data = pool_bytes(section)?;
        let bytes = pool_data.get(offset..offset + length)?;
        std::str::from_utf8(bytes).ok()
    }

    fn read_list(&self, id: SectionId, offset: u32) -> Result<Vec<String>, RulesetError> {
        if offset == NO_DOMAIN_LIST {
            return Ok(Vec::new());
        }
        let invalid = || RulesetError::InvalidSection(format!("{:?} entry at {offset}", id));
        let pool = self.get_section(id).and_then(pool_bytes).ok_or_else(invalid)?;

        let offset = offset as usize;
        if offset + 4 > pool.len() {
            return Err(invalid());
        }
        let count = read_u32_le(pool, offset) as usize;
        let items_start = offset + 4;
        if items_start + count * LIST_ITEM_SIZE > pool.len() {
            return Err(invalid());
        }

        (0..count)
            .map(|i| {
                let item = items_start + i * LIST_ITEM_SIZE;
                let str_off = read_u32_le(pool, item) as usize;
                let str_len = read_u32_le(pool, item + 4) as usize;
                self.get_string(str_off, str_len)
                    .map(str::to_string)
                    .ok_or_else(invalid)
            })
            .collect()
    }
}

/// Pools are a u32 byte length followed by the bytes.
fn pool_bytes(section: &[u8]) -> Option<&[u8]> {
    if section.len() < 4 {
        return None;
    }
    let len = read_u32_le(section, 0) as usize;
    section.get(4..4 + len)
}
