//! Pure predicate deciding whether a hostname should be synced against a
//! given zone (spec §4.1).

use regex::Regex;

use crate::config::ZoneSpec;

/// Evaluates the ordered, short-circuiting rule chain from spec §4.1.
///
/// Substring matching (rather than a strict label-boundary suffix match)
/// against `zone.name` is intentional: it replicates the original
/// companion's tolerant matching. See spec §9 "Open questions": an
/// operator who wants stricter matching should scope `zone.name` itself.
pub fn should_sync(hostname: &str, include: &[Regex], exclude: &[Regex], zone: &ZoneSpec) -> bool {
    if hostname == zone.target {
        return false;
    }

    if !hostname.contains(zone.name.as_str()) {
        return false;
    }

    for sub in &zone.excluded_subdomains {
        let excluded = format!("{}.{}", sub, zone.name);
        if hostname.contains(excluded.as_str()) {
            return false;
        }
    }

    let matches_include = if include.is_empty() {
        true
    } else {
        include.iter().any(|p| p.is_match(hostname))
    };
    if !matches_include {
        return false;
    }

    if exclude.iter().any(|p| p.is_match(hostname)) {
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone(name: &str, target: &str, excluded: &[&str]) -> ZoneSpec {
        ZoneSpec {
            name: name.to_string(),
            zone_id: "Z1".to_string(),
            proxied: true,
            ttl: 1,
            target: target.to_string(),
            comment: None,
            excluded_subdomains: excluded.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn rejects_hostname_equal_to_target() {
        let z = zone("example.com", "target.example.com", &[]);
        assert!(!should_sync("target.example.com", &[], &[], &z));
    }

    #[test]
    fn rejects_hostname_not_containing_zone_name() {
        let z = zone("example.com", "target.example.com", &[]);
        assert!(!should_sync("foo.other.net", &[], &[], &z));
    }

    #[test]
    fn rejects_excluded_subdomain() {
        let z = zone("example.com", "target.example.com", &["sub"]);
        assert!(!should_sync("sub.example.com", &[], &[], &z));
    }

    #[test]
    fn excluded_subdomain_only_applies_to_its_own_zone() {
        let excluded_zone = zone("example.com", "target.example.com", &["sub"]);
        let other_zone = zone("other.com", "target.other.com", &[]);
        assert!(!should_sync("sub.example.com", &[], &[], &excluded_zone));
        assert!(should_sync("sub.example.com.other.com", &[], &[], &other_zone));
    }

    #[test]
    fn empty_include_list_behaves_like_match_all() {
        let z = zone("example.com", "target.example.com", &[]);
        assert!(should_sync("new.example.com", &[], &[], &z));
    }

    #[test]
    fn explicit_include_must_match() {
        let z = zone("example.com", "target.example.com", &[]);
        let include = vec![Regex::new(r"^new\.").unwrap()];
        assert!(should_sync("new.example.com", &include, &[], &z));
        assert!(!should_sync("old.example.com", &include, &[], &z));
    }

    #[test]
    fn exclude_pattern_overrides_include() {
        let z = zone("example.com", "target.example.com", &[]);
        let exclude = vec![Regex::new(r"internal").unwrap()];
        assert!(!should_sync("internal.example.com", &[], &exclude, &z));
    }

    #[test]
    fn accepts_ordinary_hostname() {
        let z = zone("example.com", "target.example.com", &[]);
        assert!(should_sync("new.example.com", &[], &[], &z));
    }
}
