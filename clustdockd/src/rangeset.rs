//! RangeCodec: parsing and formatting of bracketed range expressions
//! (`web[0-3,5]`) and the set arithmetic used by [`crate::placement`].

use std::collections::BTreeSet;
use std::fmt;

/// Non-negative integer index set, kept sorted for deterministic formatting.
pub type IndexSet = BTreeSet<u32>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RangeError {
    #[error("bad range expression: {0}")]
    BadRange(String),
}

/// Parses a comma-separated list of index tokens (`"0-3,7,9-10"`) into a set.
/// Fails with [`RangeError::BadRange`] on a non-numeric or non-monotonic
/// (`hi < lo`) token.
pub fn parse_ranges(expr: &str) -> Result<IndexSet, RangeError> {
    let mut set = IndexSet::new();
    if expr.is_empty() {
        return Ok(set);
    }
    for token in expr.split(',') {
        let token = token.trim();
        if token.is_empty() {
            return Err(RangeError::BadRange(expr.to_string()));
        }
        match token.split_once('-') {
            Some((lo, hi)) => {
                let lo: u32 = lo
                    .parse()
                    .map_err(|_| RangeError::BadRange(token.to_string()))?;
                let hi: u32 = hi
                    .parse()
                    .map_err(|_| RangeError::BadRange(token.to_string()))?;
                if hi < lo {
                    return Err(RangeError::BadRange(token.to_string()));
                }
                set.extend(lo..=hi);
            }
            None => {
                let v: u32 = token
                    .parse()
                    .map_err(|_| RangeError::BadRange(token.to_string()))?;
                set.insert(v);
            }
        }
    }
    Ok(set)
}

/// Formats an index set in canonical bracket-run form: ascending order,
/// contiguous runs collapsed, singletons and runs comma-separated.
pub fn format_ranges(set: &IndexSet) -> String {
    let mut parts = Vec::new();
    let mut iter = set.iter().copied().peekable();
    while let Some(start) = iter.next() {
        let mut end = start;
        while iter.peek() == Some(&(end + 1)) {
            end = iter.next().unwrap();
        }
        if start == end {
            parts.push(start.to_string());
        } else {
            parts.push(format!("{start}-{end}"));
        }
    }
    parts.join(",")
}

/// Splits `"web[0-3,7]"` into `("web", {0,1,2,3,7})`. A bracket-less name
/// with a trailing decimal suffix (`"web3"`) parses as a single-element set;
/// one with no suffix at all (`"web"`) parses as an empty set over that base.
pub fn parse(expr: &str) -> Result<(String, IndexSet), RangeError> {
    if let Some(open) = expr.find('[') {
        if !expr.ends_with(']') {
            return Err(RangeError::BadRange(expr.to_string()));
        }
        let base = expr[..open].to_string();
        let inner = &expr[open + 1..expr.len() - 1];
        let set = parse_ranges(inner)?;
        Ok((base, set))
    } else {
        let (base, idx) = split_name_impl(expr);
        let mut set = IndexSet::new();
        if let Some(idx) = idx {
            set.insert(idx);
        }
        Ok((base, set))
    }
}

/// Formats `base` + `set` into the minimal bracket form: no brackets for a
/// single element, empty string for an empty set.
pub fn format(base: &str, set: &IndexSet) -> String {
    match set.len() {
        0 => String::new(),
        1 => format!("{base}{}", set.iter().next().unwrap()),
        _ => format!("{base}[{}]", format_ranges(set)),
    }
}

/// Extends `set` with every integer in `[lo, hi]` inclusive.
pub fn add_range(set: &mut IndexSet, lo: u32, hi: u32) {
    set.extend(lo..=hi);
}

/// Splits a comma-separated nodeset expression into its top-level groups,
/// respecting bracket nesting so that commas inside `[...]` don't split a
/// group (`"web[1-2,9],db0"` is two groups, not four).
fn split_top_level(expr: &str) -> Vec<&str> {
    let mut groups = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in expr.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                groups.push(&expr[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    groups.push(&expr[start..]);
    groups
}

/// Expands a nodeset expression (possibly several comma-separated groups,
/// each with its own base name) into the flat list of concrete node names.
pub fn expand_nodeset(expr: &str) -> Result<Vec<String>, RangeError> {
    let mut names = Vec::new();
    for group in split_top_level(expr) {
        if group.is_empty() {
            continue;
        }
        let (base, set) = parse(group)?;
        if set.is_empty() {
            names.push(base);
        } else {
            names.extend(set.iter().map(|idx| format!("{base}{idx}")));
        }
    }
    Ok(names)
}

/// The clustername grammar: `^[a-z][a-z_-]+$`.
pub fn valid_clustername_impl(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_ascii_lowercase() {
        return false;
    }
    let rest: Vec<char> = chars.collect();
    rest.len() >= 1 && rest.iter().all(|c| c.is_ascii_lowercase() || *c == '_' || *c == '-')
}

/// `split_name(name) = (prefix, idx)`: `prefix` matches the clustername
/// grammar, `idx` is the trailing decimal suffix, or `(name, None)` when no
/// such suffix exists.
pub fn split_name_impl(name: &str) -> (String, Option<u32>) {
    let digit_start = name
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i);
    if let Some(digit_start) = digit_start {
        let (prefix, digits) = name.split_at(digit_start);
        if valid_clustername_impl(prefix) {
            if let Ok(idx) = digits.parse::<u32>() {
                return (prefix.to_string(), Some(idx));
            }
        }
    }
    (name.to_string(), None)
}

impl fmt::Display for RangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ranges_basic() {
        let set = parse_ranges("0-3,7,9-10").unwrap();
        assert_eq!(
            set,
            [0, 1, 2, 3, 7, 9, 10].into_iter().collect::<IndexSet>()
        );
    }

    #[test]
    fn parse_ranges_rejects_non_monotonic() {
        assert!(parse_ranges("5-2").is_err());
    }

    #[test]
    fn parse_ranges_rejects_non_numeric() {
        assert!(parse_ranges("a-3").is_err());
    }

    #[test]
    fn format_collapses_runs() {
        let set = parse_ranges("0-3,7,9-10").unwrap();
        assert_eq!(format_ranges(&set), "0-3,7,9-10");
    }

    #[test]
    fn format_single_element_has_no_brackets() {
        let mut set = IndexSet::new();
        set.insert(4);
        assert_eq!(format("web", &set), "web4");
    }

    #[test]
    fn format_empty_set_is_empty_string() {
        assert_eq!(format("web", &IndexSet::new()), "");
    }

    #[test]
    fn roundtrip_parse_format() {
        let (base, set) = parse("web[0-3,7,9-10]").unwrap();
        assert_eq!(base, "web");
        assert_eq!(format(&base, &set), "web[0-3,7,9-10]");
    }

    #[test]
    fn expand_nodeset_multi_group() {
        let names = expand_nodeset("web[1-2,9],db0").unwrap();
        assert_eq!(names, vec!["web1", "web2", "web9", "db0"]);
    }

    #[test]
    fn split_name_with_suffix() {
        assert_eq!(split_name_impl("web12"), ("web".to_string(), Some(12)));
    }

    #[test]
    fn split_name_without_suffix() {
        assert_eq!(split_name_impl("web"), ("web".to_string(), None));
    }

    #[test]
    fn split_name_rejects_invalid_prefix_digits_only() {
        // "w3" has an empty rest before the digit, which fails the
        // clustername grammar (needs at least one trailing char), so the
        // whole string is the prefix with no idx.
        assert_eq!(split_name_impl("w3"), ("w3".to_string(), None));
    }

    #[test]
    fn split_name_accepts_two_char_prefix() {
        assert_eq!(split_name_impl("ab3"), ("ab".to_string(), Some(3)));
    }

    #[test]
    fn valid_clustername_accepts_underscores_and_dashes() {
        assert!(valid_clustername_impl("web_node"));
        assert!(valid_clustername_impl("web-node"));
        assert!(valid_clustername_impl("ab"));
        assert!(!valid_clustername_impl("Web"));
        assert!(!valid_clustername_impl("1web"));
        assert!(!valid_clustername_impl("w"));
        assert!(!valid_clustername_impl(""));
    }
}
