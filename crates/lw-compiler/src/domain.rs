//! Domain normalization and the canonical domain ordering used when
//! interning domain lists.

use std::cmp::Ordering;

/// Lowercase and validate a domain taken from a rule.
///
/// Accepts `*` so entity wildcards such as `google.*` survive.
pub fn normalize_domain(host: &str) -> Option<String> {
    let trimmed = host.trim().trim_matches('.');
    if trimmed.is_empty() {
        return None;
    }

    if !trimmed
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_' | b'*'))
    {
        return None;
    }

    Some(trimmed.to_ascii_lowercase())
}

/// Compare two domains label by label starting from the TLD, so that
/// subdomains sort next to their parent.
pub fn compare_domains(a: &str, b: &str) -> Ordering {
    a.rsplit('.').cmp(b.rsplit('.'))
}

/// Sort and deduplicate a domain list into its canonical form.
pub fn canonicalize_domains(domains: &[String]) -> Vec<String> {
    let mut sorted = domains.to_vec();
    sorted.sort_by(|a, b| compare_domains(a, b));
    sorted.dedup();
    sorted
}

/// Split a `sep`-separated domain list; `~` marks an excluded domain.
/// Returns `None` if any entry is malformed.
pub fn parse_domain_list(text: &str, sep: char) -> Option<(Vec<String>, Vec<String>)> {
    let mut included = Vec::new();
    let mut excluded = Vec::new();

    for raw in text.split(sep) {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        match raw.strip_prefix('~') {
            Some(rest) => excluded.push(normalize_domain(rest)?),
            None => included.push(normalize_domain(raw)?),
        }
    }

    Some((included, excluded))
}
