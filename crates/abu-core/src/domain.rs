//! Domain helpers: registrable-domain extraction, third-party checks and
//! suffix walking for `domain=` restrictions.
//!
//! # Examples
//!
//! ```
//! use abu_core::domain::get_etld1;
//!
//! assert_eq!(get_etld1("sub.example.com"), "example.com");
//! assert_eq!(get_etld1("sub.example.co.uk"), "example.co.uk");
//! ```

/// Common two-part public suffixes.
const COMMON_TWO_PART_TLDS: &[&str] = &[
    "co.uk", "co.jp", "co.nz", "co.za", "co.in", "co.kr", "co.il",
    "com.au", "com.br", "com.cn", "com.mx", "com.tw", "com.hk", "com.tr", "com.ua",
    "net.au", "net.nz",
    "org.uk", "org.au",
    "gov.uk", "gov.au",
    "ac.uk", "ac.jp",
    "ne.jp", "or.jp",
];

/// Get the registrable domain (eTLD+1) of a hostname.
pub fn get_etld1(host: &str) -> String {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    let n = labels.len();
    if n <= 2 {
        return labels.join(".");
    }

    let last_two = format!("{}.{}", labels[n - 2], labels[n - 1]);
    if COMMON_TWO_PART_TLDS.contains(&last_two.as_str()) {
        return labels[n - 3..].join(".");
    }

    labels[n - 2..].join(".")
}

/// Check if a request is third-party relative to its document.
///
/// An unknown document host counts as first-party.
pub fn is_third_party(document_host: &str, request_host: &str) -> bool {
    if document_host.is_empty() || request_host.is_empty() {
        return false;
    }
    get_etld1(document_host) != get_etld1(request_host)
}

/// Get the parent domain (strip leftmost label).
pub fn get_parent_domain(host: &str) -> Option<&str> {
    match host.find('.') {
        Some(idx) if idx < host.len() - 1 => Some(&host[idx + 1..]),
        _ => None,
    }
}

/// Iterator over a domain and each of its parents, most specific first.
pub struct DomainSuffixIter<'a> {
    current: Option<&'a str>,
}

impl<'a> Iterator for DomainSuffixIter<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let result = self.current?;
        self.current = get_parent_domain(result);
        Some(result)
    }
}

/// Walk `a.b.example.com`, `b.example.com`, `example.com`, `com`.
pub fn walk_domain_suffixes(domain: &str) -> DomainSuffixIter<'_> {
    DomainSuffixIter {
        current: if domain.is_empty() { None } else { Some(domain) },
    }
}

/// Whether `domain` equals `target` or is one of its subdomains.
pub fn is_domain_or_subdomain(domain: &str, target: &str) -> bool {
    if domain.len() == target.len() {
        return domain.eq_ignore_ascii_case(target);
    }
    let d = domain.as_bytes();
    let t = target.as_bytes();
    d.len() > t.len() && d[d.len() - t.len() - 1] == b'.' && d[d.len() - t.len()..].eq_ignore_ascii_case(t)
}

/// Normalize a domain token from a rule: trims dots, lowercases and rejects
/// anything outside the hostname alphabet (wildcard `*` labels allowed).
pub fn normalize_domain(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_matches('.');
    if trimmed.is_empty() {
        return None;
    }
    if !trimmed
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-' || b == b'_' || b == b'*' || b >= 0x80)
    {
        return None;
    }
    Some(trimmed.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_etld1() {
        assert_eq!(get_etld1("example.com"), "example.com");
        assert_eq!(get_etld1("a.b.example.com"), "example.com");
        assert_eq!(get_etld1("sub.example.co.uk"), "example.co.uk");
        assert_eq!(get_etld1("localhost"), "localhost");
    }

    #[test]
    fn test_third_party() {
        assert!(!is_third_party("www.example.com", "cdn.example.com"));
        assert!(is_third_party("example.com", "ads.tracker.net"));
        assert!(!is_third_party("", "ads.tracker.net"));
    }

    #[test]
    fn test_walk_suffixes() {
        let all: Vec<&str> = walk_domain_suffixes("a.example.com").collect();
        assert_eq!(all, vec!["a.example.com", "example.com", "com"]);
        assert_eq!(walk_domain_suffixes("").count(), 0);
    }

    #[test]
    fn test_domain_or_subdomain() {
        assert!(is_domain_or_subdomain("example.com", "example.com"));
        assert!(is_domain_or_subdomain("www.example.com", "example.com"));
        assert!(!is_domain_or_subdomain("badexample.com", "example.com"));
        assert!(!is_domain_or_subdomain("com", "example.com"));
    }

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain(" Example.COM. "), Some("example.com".to_string()));
        assert_eq!(normalize_domain("bad/domain"), None);
        assert_eq!(normalize_domain(""), None);
    }
}
