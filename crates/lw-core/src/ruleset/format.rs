//! Compiled Ruleset Format v1 Constants
//!
//! A ruleset file is the textual [`RULESET_HEADER`] followed by the binary
//! buffer described here. All integers are little-endian.
//!
//! ```text
//! buffer := header(32) section_dir(n * 12) sections...
//! ```
//!
//! Strings are referenced as `(offset, length)` into the string pool; domain
//! and argument lists as a single offset into their list pool.

/// Textual version line written in front of the buffer.
pub const RULESET_HEADER: &str = "lw-ruleset/1\n";

/// Magic bytes: "LWR1"
pub const RULESET_MAGIC: [u8; 4] = *b"LWR1";

/// Current buffer version
pub const RULESET_VERSION: u16 = 1;

/// Header size in bytes
pub const HEADER_SIZE: usize = 32;

/// Section directory entry size
pub const SECTION_ENTRY_SIZE: usize = 12;

// =============================================================================
// Header Field Offsets
// =============================================================================

/// Header field byte offsets.
pub mod header {
    /// u8[4] magic = "LWR1"
    pub const MAGIC: usize = 0;
    /// u16 version
    pub const VERSION: usize = 4;
    /// u16 flags
    pub const FLAGS: usize = 6;
    /// u32 headerBytes (always 32)
    pub const HEADER_BYTES: usize = 8;
    /// u32 sectionCount
    pub const SECTION_COUNT: usize = 12;
    /// u32 sectionDirOffset
    pub const SECTION_DIR_OFFSET: usize = 16;
    /// u32 sectionDirBytes
    pub const SECTION_DIR_BYTES: usize = 20;
    /// u32 CRC32 of everything after the header
    pub const BODY_CRC32: usize = 24;
}

/// Header flags.
pub mod header_flags {
    /// Header carries a body CRC32
    pub const HAS_CRC32: u16 = 1 << 0;
}

pub mod section_entry {
    /// u16 section id
    pub const ID: usize = 0;
    /// u16 flags
    pub const FLAGS: usize = 2;
    /// u32 buffer offset
    pub const OFFSET: usize = 4;
    /// u32 byte length
    pub const LENGTH: usize = 8;
}

// =============================================================================
// Section IDs
// =============================================================================

/// Section type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum SectionId {
    /// String pool for all interned strings
    StrPool = 0x0001,
    /// Interned, canonically sorted domain lists
    DomainLists = 0x0002,
    /// Network filter rules
    FilterRules = 0x0003,
    /// Element hiding rules
    CosmeticRules = 0x0004,
    /// Scriptlet injection rules
    ScriptletRules = 0x0005,
    /// Scriptlet argument lists
    ArgLists = 0x0006,
}

impl TryFrom<u16> for SectionId {
    type Error = ();

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x0001 => Ok(Self::StrPool),
            0x0002 => Ok(Self::DomainLists),
            0x0003 => Ok(Self::FilterRules),
            0x0004 => Ok(Self::CosmeticRules),
            0x0005 => Ok(Self::ScriptletRules),
            0x0006 => Ok(Self::ArgLists),
            _ => Err(()),
        }
    }
}

// =============================================================================
// Rule Table Layouts
// =============================================================================

/// Every rule table starts with a u32 record count.
pub const TABLE_HEADER_SIZE: usize = 4;

/// Filter rule record size
pub const FILTER_RULE_SIZE: usize = 60;

pub mod filter_rule {
    pub const PATTERN_OFF: usize = 0;
    pub const PATTERN_LEN: usize = 4;
    pub const HOST_OFF: usize = 8;
    pub const HOST_LEN: usize = 12;
    pub const INCLUDED_DOMAINS: usize = 16;
    pub const EXCLUDED_DOMAINS: usize = 20;
    pub const REDIRECT_OFF: usize = 24;
    pub const REDIRECT_LEN: usize = 28;
    pub const CSP_OFF: usize = 32;
    pub const CSP_LEN: usize = 36;
    pub const NGRAM_OFF: usize = 40;
    pub const NGRAM_LEN: usize = 44;
    /// u32 wire resource types
    pub const RESOURCE_TYPES: usize = 48;
    /// u16 wire rule flags (polarity, case, csp, anchors)
    pub const FLAGS: usize = 52;
    pub const PATTERN_TYPE: usize = 54;
    pub const PARTY: usize = 55;
    pub const ACTIVATION: usize = 56;
}

/// Cosmetic rule record size
pub const COSMETIC_RULE_SIZE: usize = 20;

pub mod cosmetic_rule {
    pub const INCLUDED_DOMAINS: usize = 0;
    pub const EXCLUDED_DOMAINS: usize = 4;
    pub const SELECTOR_OFF: usize = 8;
    pub const SELECTOR_LEN: usize = 12;
    pub const FLAGS: usize = 16;
}

/// Scriptlet rule record size
pub const SCRIPTLET_RULE_SIZE: usize = 24;

pub mod scriptlet_rule {
    pub const INCLUDED_DOMAINS: usize = 0;
    pub const EXCLUDED_DOMAINS: usize = 4;
    pub const NAME_OFF: usize = 8;
    pub const NAME_LEN: usize = 12;
    pub const ARGUMENTS: usize = 16;
    pub const FLAGS: usize = 20;
}

/// List pool entry: u32 count followed by count * (u32 strOff, u32 strLen).
pub const LIST_ITEM_SIZE: usize = 8;

// =============================================================================
// Sentinels
// =============================================================================

/// Absent optional string
pub const NO_STRING: u32 = 0xFFFF_FFFF;

/// Empty domain list
pub const NO_DOMAIN_LIST: u32 = 0xFFFF_FFFF;

// =============================================================================
// Helpers
// =============================================================================

/// Align offset to boundary.
#[inline]
pub const fn align_offset(offset: usize, alignment: usize) -> usize {
    (offset + alignment - 1) & !(alignment - 1)
}

/// Validate magic bytes.
#[inline]
pub fn validate_magic(data: &[u8]) -> bool {
    data.len() >= 4 && data[..4] == RULESET_MAGIC
}

/// Read u16 little-endian.
#[inline]
pub fn read_u16_le(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

/// Read u32 little-endian.
#[inline]
pub fn read_u32_le(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
}
