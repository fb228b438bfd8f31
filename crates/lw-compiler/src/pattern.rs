//! Best-effort handling of regex patterns.
//!
//! Regexes stay opaque strings. Two reductions are computed: a rewrite into a
//! plain substring when the regex only contains escaped literals, and an
//! ngram search string for pre-filtering candidates.

/// Characters that may appear escaped in a plain-convertible regex.
const ESCAPABLE: &[char] = &['.', '*', '+', '?', '^', '$', '|', '/', '(', ')', '[', ']', '{', '}'];

/// Regex metacharacters that must not appear unescaped in a plain pattern.
const METACHARS: &[char] = &['.', '*', '+', '?', '^', '$', '|', '(', ')', '[', ']', '{', '}'];

/// Marker for a variable segment in an ngram search string.
pub const WILDCARD: char = '*';

/// Shortest literal run worth pre-filtering on.
const MIN_NGRAM_LEN: usize = 3;

/// Rewrite an escaped regex into the literal substring it matches.
///
/// Returns `None` as soon as anything other than a plain character or an
/// escaped metacharacter is found.
pub fn regex_to_plain(regex: &str) -> Option<String> {
    let mut out = String::with_capacity(regex.len());
    let mut chars = regex.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some(escaped) if ESCAPABLE.contains(&escaped) => out.push(escaped),
                _ => return None,
            },
            c if METACHARS.contains(&c) => return None,
            c => out.push(c),
        }
    }

    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Derive the ngram search string of a regex: literal text with every
/// variable segment replaced by [`WILDCARD`].
///
/// Returns `None` when no literal run of at least three characters survives
/// or when the regex uses alternation, which a single string cannot express.
pub fn ngram_search_string(regex: &str) -> Option<String> {
    if has_top_level_alternation(regex) {
        return None;
    }

    let chars: Vec<char> = regex.chars().collect();
    let mut out = String::with_capacity(regex.len());
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '\\' => {
                match chars.get(i + 1) {
                    Some(c) if !c.is_ascii_alphanumeric() => out.push(c.to_ascii_lowercase()),
                    // \d, \w, \s, \b ... and a trailing backslash
                    _ => push_wildcard(&mut out),
                }
                i += 2;
            }
            '[' => {
                i = skip_class(&chars, i);
                push_wildcard(&mut out);
            }
            '(' => {
                i = skip_group(&chars, i);
                push_wildcard(&mut out);
            }
            '{' => {
                let (next, optional) = skip_repetition(&chars, i);
                if optional {
                    drop_last_literal(&mut out);
                }
                push_wildcard(&mut out);
                i = next;
            }
            '*' | '?' => {
                drop_last_literal(&mut out);
                push_wildcard(&mut out);
                i += 1;
            }
            '.' | '+' => {
                push_wildcard(&mut out);
                i += 1;
            }
            '^' | '$' => i += 1,
            c => {
                out.push(c.to_ascii_lowercase());
                i += 1;
            }
        }
    }

    let trimmed = out.trim_matches(WILDCARD);
    if trimmed.split(WILDCARD).any(|run| run.chars().count() >= MIN_NGRAM_LEN) {
        Some(trimmed.to_string())
    } else {
        None
    }
}

fn push_wildcard(out: &mut String) {
    if !out.ends_with(WILDCARD) {
        out.push(WILDCARD);
    }
}

fn drop_last_literal(out: &mut String) {
    if !out.is_empty() && !out.ends_with(WILDCARD) {
        out.pop();
    }
}

/// Index just past the `]` closing the class opened at `start`.
fn skip_class(chars: &[char], start: usize) -> usize {
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            ']' if i > start + 1 => return i + 1,
            _ => i += 1,
        }
    }
    chars.len()
}

/// Index just past the `)` closing the group opened at `start`.
fn skip_group(chars: &[char], start: usize) -> usize {
    let mut depth = 0usize;
    let mut i = start;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 1,
            '[' => {
                i = skip_class(chars, i);
                continue;
            }
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return i + 1;
                }
            }
            _ => {}
        }
        i += 1;
    }
    chars.len()
}

/// Skip a `{m,n}` quantifier; reports whether it allows zero repetitions.
fn skip_repetition(chars: &[char], start: usize) -> (usize, bool) {
    let mut i = start + 1;
    let mut min = String::new();
    while i < chars.len() && chars[i] != '}' {
        if min.len() == i - start - 1 && chars[i].is_ascii_digit() {
            min.push(chars[i]);
        }
        i += 1;
    }
    let optional = min.is_empty() || min.parse::<u32>().map(|m| m == 0).unwrap_or(true);
    ((i + 1).min(chars.len()), optional)
}

fn has_top_level_alternation(regex: &str) -> bool {
    let chars: Vec<char> = regex.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            '[' => i = skip_class(&chars, i),
            '(' => i = skip_group(&chars, i),
            '|' => return true,
            _ => i += 1,
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escaped_literals_become_plain() {
        assert_eq!(
            regex_to_plain(r"example\.com\/ads\.js"),
            Some("example.com/ads.js".to_string())
        );
        assert_eq!(regex_to_plain(r"a\(b\)\[c\]\{d\}\?\$"), Some("a(b)[c]{d}?$".to_string()));
        assert_eq!(regex_to_plain("tracker/pixel"), Some("tracker/pixel".to_string()));
    }

    #[test]
    fn unescaped_constructs_abort_plain_conversion() {
        assert_eq!(regex_to_plain(r"example\.com/.*"), None);
        assert_eq!(regex_to_plain(r"ads[0-9]"), None);
        assert_eq!(regex_to_plain(r"\d+"), None);
        assert_eq!(regex_to_plain(r"trailing\"), None);
        assert_eq!(regex_to_plain(""), None);
    }

    #[test]
    fn ngram_replaces_variable_segments() {
        assert_eq!(
            ngram_search_string(r"example\.com\/.*\/ads"),
            Some("example.com/*/ads".to_string())
        );
        assert_eq!(ngram_search_string(r"ads[0-9]+\.js"), Some("ads*.js".to_string()));
        assert_eq!(
            ngram_search_string(r"^https?:\/\/tracker\."),
            Some("http*://tracker.".to_string())
        );
        assert_eq!(ngram_search_string(r"pixel\d{2,4}gif"), Some("pixel*gif".to_string()));
        assert_eq!(ngram_search_string(r"banners?(_\d+)?\.png"), Some("banner*.png".to_string()));
        assert_eq!(ngram_search_string(r"(foo|bar)\.js"), Some(".js".to_string()));
    }

    #[test]
    fn ngram_gives_up_without_enough_literal_text() {
        assert_eq!(ngram_search_string(r"a|b"), None);
        assert_eq!(ngram_search_string(r"(foo|bar)\.j"), None);
        assert_eq!(ngram_search_string(r"\d+\w*"), None);
    }
}
