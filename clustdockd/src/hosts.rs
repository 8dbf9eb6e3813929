//! The managed-host set: a static, unordered set of host identifiers loaded
//! from configuration.

use crate::rangeset::{self, RangeError};
use std::collections::BTreeSet;

/// Parses the managed-host set syntax: a comma-separated string (or an
/// already-split list) where each item is itself a range expression
/// (`host[2-4]`). Resolves to a flat set of distinct host names.
pub fn parse_hosts<I, S>(items: I) -> Result<BTreeSet<String>, RangeError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hosts = BTreeSet::new();
    for item in items {
        for part in item.as_ref().split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            hosts.extend(rangeset::expand_nodeset(part)?);
        }
    }
    Ok(hosts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_bracketed_host_range() {
        let hosts = parse_hosts(["host[2-4]"]).unwrap();
        assert_eq!(
            hosts,
            ["host2", "host3", "host4"]
                .into_iter()
                .map(String::from)
                .collect::<BTreeSet<_>>()
        );
    }

    #[test]
    fn accepts_comma_separated_string_with_plain_names() {
        let hosts = parse_hosts(["hostA,hostB,host[1-2]"]).unwrap();
        assert_eq!(
            hosts,
            ["hostA", "hostB", "host1", "host2"]
                .into_iter()
                .map(String::from)
                .collect::<BTreeSet<_>>()
        );
    }

    #[test]
    fn accepts_pre_split_list() {
        let hosts = parse_hosts(["hostA", "hostB"]).unwrap();
        assert_eq!(hosts.len(), 2);
    }
}
