//! Fixed wire enumerations for bit-flag fields.
//!
//! The in-memory bitflags in [`crate::types`] are free to change order; these
//! values are part of the file format and must not.

use crate::types::{ActivationTypes, AnchorType, PartyMask, PatternType, ResourceTypes, RuleFlags};

/// Wire resource type bits (u32).
pub mod resource_type {
    pub const OTHER: u32 = 1 << 0;
    pub const SCRIPT: u32 = 1 << 1;
    pub const IMAGE: u32 = 1 << 2;
    pub const STYLESHEET: u32 = 1 << 3;
    pub const OBJECT: u32 = 1 << 4;
    pub const SUBDOCUMENT: u32 = 1 << 5;
    pub const XMLHTTPREQUEST: u32 = 1 << 6;
    pub const WEBSOCKET: u32 = 1 << 7;
    pub const FONT: u32 = 1 << 8;
    pub const MEDIA: u32 = 1 << 9;
    pub const PING: u32 = 1 << 10;
    pub const WEBRTC: u32 = 1 << 11;
}

/// Wire party bits (u8).
pub mod party {
    pub const FIRST_PARTY: u8 = 1 << 0;
    pub const THIRD_PARTY: u8 = 1 << 1;
}

/// Wire activation bits (u8).
pub mod activation {
    pub const DOCUMENT: u8 = 1 << 0;
    pub const ELEMENT_HIDE: u8 = 1 << 1;
    pub const GENERIC_HIDE: u8 = 1 << 2;
    pub const GENERIC_BLOCK: u8 = 1 << 3;
    pub const POPUP: u8 = 1 << 4;
}

/// Wire filter rule flags (u16).
pub mod rule_flags {
    pub const ALLOW_RULE: u16 = 1 << 0;
    pub const CASE_SENSITIVE: u16 = 1 << 1;
    pub const CSP_RULE: u16 = 1 << 2;
    pub const ANCHOR_START: u16 = 1 << 8;
    pub const ANCHOR_END: u16 = 1 << 9;
    pub const ANCHOR_HOST: u16 = 1 << 10;
}

/// Wire flags for cosmetic and scriptlet records (u16).
pub mod injection_flags {
    pub const ALLOW_RULE: u16 = 1 << 0;
}

/// Wire pattern types (u8).
pub mod pattern_type {
    pub const PLAIN: u8 = 0;
    pub const WILDCARDED: u8 = 1;
    pub const REGEX: u8 = 2;
}

const RESOURCE_TYPE_TABLE: [(ResourceTypes, u32); 12] = [
    (ResourceTypes::STYLESHEET, resource_type::STYLESHEET),
    (ResourceTypes::IMAGE, resource_type::IMAGE),
    (ResourceTypes::SCRIPT, resource_type::SCRIPT),
    (ResourceTypes::XMLHTTPREQUEST, resource_type::XMLHTTPREQUEST),
    (ResourceTypes::SUBDOCUMENT, resource_type::SUBDOCUMENT),
    (ResourceTypes::FONT, resource_type::FONT),
    (ResourceTypes::MEDIA, resource_type::MEDIA),
    (ResourceTypes::WEBSOCKET, resource_type::WEBSOCKET),
    (ResourceTypes::WEBRTC, resource_type::WEBRTC),
    (ResourceTypes::PING, resource_type::PING),
    (ResourceTypes::OBJECT, resource_type::OBJECT),
    (ResourceTypes::OTHER, resource_type::OTHER),
];

const PARTY_TABLE: [(PartyMask, u8); 2] = [
    (PartyMask::FIRST_PARTY, party::FIRST_PARTY),
    (PartyMask::THIRD_PARTY, party::THIRD_PARTY),
];

const ACTIVATION_TABLE: [(ActivationTypes, u8); 5] = [
    (ActivationTypes::POPUP, activation::POPUP),
    (ActivationTypes::DOCUMENT, activation::DOCUMENT),
    (ActivationTypes::ELEMENT_HIDE, activation::ELEMENT_HIDE),
    (ActivationTypes::GENERIC_HIDE, activation::GENERIC_HIDE),
    (ActivationTypes::GENERIC_BLOCK, activation::GENERIC_BLOCK),
];

const RULE_FLAG_TABLE: [(RuleFlags, u16); 3] = [
    (RuleFlags::ALLOW_RULE, rule_flags::ALLOW_RULE),
    (RuleFlags::CASE_SENSITIVE, rule_flags::CASE_SENSITIVE),
    (RuleFlags::CSP_RULE, rule_flags::CSP_RULE),
];

const ANCHOR_TABLE: [(AnchorType, u16); 3] = [
    (AnchorType::START, rule_flags::ANCHOR_START),
    (AnchorType::END, rule_flags::ANCHOR_END),
    (AnchorType::HOST, rule_flags::ANCHOR_HOST),
];

pub fn encode_resource_types(types: ResourceTypes) -> u32 {
    RESOURCE_TYPE_TABLE
        .iter()
        .filter(|(flag, _)| types.contains(*flag))
        .fold(0, |acc, (_, bit)| acc | bit)
}

pub fn decode_resource_types(bits: u32) -> ResourceTypes {
    RESOURCE_TYPE_TABLE
        .iter()
        .filter(|(_, bit)| bits & bit != 0)
        .fold(ResourceTypes::empty(), |acc, (flag, _)| acc | *flag)
}

pub fn encode_party(mask: PartyMask) -> u8 {
    PARTY_TABLE
        .iter()
        .filter(|(flag, _)| mask.contains(*flag))
        .fold(0, |acc, (_, bit)| acc | bit)
}

pub fn decode_party(bits: u8) -> PartyMask {
    PARTY_TABLE
        .iter()
        .filter(|(_, bit)| bits & bit != 0)
        .fold(PartyMask::empty(), |acc, (flag, _)| acc | *flag)
}

pub fn encode_activation(types: ActivationTypes) -> u8 {
    ACTIVATION_TABLE
        .iter()
        .filter(|(flag, _)| types.contains(*flag))
        .fold(0, |acc, (_, bit)| acc | bit)
}

pub fn decode_activation(bits: u8) -> ActivationTypes {
    ACTIVATION_TABLE
        .iter()
        .filter(|(_, bit)| bits & bit != 0)
        .fold(ActivationTypes::empty(), |acc, (flag, _)| acc | *flag)
}

/// Packs rule flags and anchors into one u16.
pub fn encode_rule_flags(flags: RuleFlags, anchors: AnchorType) -> u16 {
    let flag_bits = RULE_FLAG_TABLE
        .iter()
        .filter(|(flag, _)| flags.contains(*flag))
        .fold(0, |acc, (_, bit)| acc | bit);
    ANCHOR_TABLE
        .iter()
        .filter(|(anchor, _)| anchors.contains(*anchor))
        .fold(flag_bits, |acc, (_, bit)| acc | bit)
}

pub fn decode_rule_flags(bits: u16) -> (RuleFlags, AnchorType) {
    let flags = RULE_FLAG_TABLE
        .iter()
        .filter(|(_, bit)| bits & bit != 0)
        .fold(RuleFlags::empty(), |acc, (flag, _)| acc | *flag);
    let anchors = ANCHOR_TABLE
        .iter()
        .filter(|(_, bit)| bits & bit != 0)
        .fold(AnchorType::empty(), |acc, (anchor, _)| acc | *anchor);
    (flags, anchors)
}

pub fn encode_pattern_type(pattern: PatternType) -> u8 {
    match pattern {
        PatternType::Plain => pattern_type::PLAIN,
        PatternType::Wildcarded => pattern_type::WILDCARDED,
        PatternType::Regex => pattern_type::REGEX,
    }
}

pub fn decode_pattern_type(value: u8) -> Option<PatternType> {
    match value {
        pattern_type::PLAIN => Some(PatternType::Plain),
        pattern_type::WILDCARDED => Some(PatternType::Wildcarded),
        pattern_type::REGEX => Some(PatternType::Regex),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_resource_types_cover_every_wire_bit() {
        assert_eq!(encode_resource_types(ResourceTypes::ALL), 0x0FFF);
        assert_eq!(decode_resource_types(0x0FFF), ResourceTypes::ALL);
    }

    #[test]
    fn wire_order_differs_from_memory_order() {
        assert_eq!(encode_resource_types(ResourceTypes::STYLESHEET), resource_type::STYLESHEET);
        assert_ne!(ResourceTypes::STYLESHEET.bits() as u32, resource_type::STYLESHEET);
        assert_eq!(decode_resource_types(resource_type::OTHER), ResourceTypes::OTHER);
    }

    #[test]
    fn rule_flags_and_anchors_share_one_field() {
        let bits = encode_rule_flags(RuleFlags::ALLOW_RULE, AnchorType::HOST | AnchorType::END);
        assert_eq!(bits, rule_flags::ALLOW_RULE | rule_flags::ANCHOR_HOST | rule_flags::ANCHOR_END);
        let (flags, anchors) = decode_rule_flags(bits);
        assert_eq!(flags, RuleFlags::ALLOW_RULE);
        assert_eq!(anchors, AnchorType::HOST | AnchorType::END);
    }

    #[test]
    fn unknown_pattern_type_rejected() {
        assert_eq!(decode_pattern_type(7), None);
    }
}
