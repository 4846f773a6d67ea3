//! Network (URL) rules: `||ads.example.com^$script,third-party`.

use once_cell::sync::OnceCell;
use regex::Regex;

use super::{ContentRule, DomainRestrictions, FilterRule, RuleMeta};
use crate::error::RuleError;
use crate::types::{FilterId, PartyMask, RequestType, UrlRuleOptions};
use crate::url::{find_case_insensitive, MIN_TOKEN_LEN};

const WHITELIST_MARKER: &str = "@@";

/// Regex replacement for the `^` separator placeholder.
const SEPARATOR_REGEX: &str = r"(?:[^\w\-.%]|$)";
/// Regex replacement for the `||` host anchor: scheme, optional userinfo, optional subdomains.
const HOST_ANCHOR_REGEX: &str = r"^[a-z][a-z0-9+.\-]*:(?://)?(?:[^/?#@]*@)?(?:[^/?#:]*\.)?";

/// Types a rule applies to when it names none.
const DEFAULT_TYPES: RequestType =
    RequestType::from_bits_truncate(RequestType::ALL.bits() & !RequestType::DOCUMENT.bits());

/// A parsed network rule.
#[derive(Debug, Clone)]
pub struct UrlFilterRule {
    pub(crate) meta: RuleMeta,
    whitelist: bool,
    pattern: String,
    is_regex: bool,
    options: UrlRuleOptions,
    permitted_types: RequestType,
    restricted_types: RequestType,
    party: PartyMask,
    domains: DomainRestrictions,
    csp: Option<String>,
    shortcut: String,
    token: Option<String>,
    content: String,
    regex: OnceCell<Option<Regex>>,
}

#[derive(Default)]
struct ParsedOptions {
    options: UrlRuleOptions,
    include_types: RequestType,
    exclude_types: RequestType,
    party: Option<PartyMask>,
    domains: DomainRestrictions,
    csp: Option<String>,
    /// Options other than `domain=`, in source order.
    content_options: Vec<String>,
}

impl UrlFilterRule {
    pub fn parse(text: &str, filter_id: FilterId) -> Result<Self, RuleError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(RuleError::Empty);
        }

        let (whitelist, body) = match text.strip_prefix(WHITELIST_MARKER) {
            Some(rest) => (true, rest),
            None => (false, text),
        };

        let (pattern, options_text) = split_rule_options(body);
        let parsed = match options_text {
            Some(opts) => parse_options(opts, whitelist)?,
            None => ParsedOptions::default(),
        };

        let is_regex = pattern.len() > 2 && pattern.starts_with('/') && pattern.ends_with('/');

        let bare = pattern.trim_start_matches('|').trim_end_matches('|');
        if (bare.is_empty() || bare == "*")
            && parsed.domains.is_empty()
            && !parsed.options.intersects(UrlRuleOptions::EXCEPTION_ONLY)
            && parsed.csp.is_none()
        {
            return Err(RuleError::TooWide(text.to_string()));
        }

        let permitted_types = finalize_types(&parsed, whitelist);

        let mut content = pattern.to_string();
        if !parsed.content_options.is_empty() {
            content.push('$');
            content.push_str(&parsed.content_options.join(","));
        }

        let (shortcut, token) = if is_regex {
            (String::new(), None)
        } else {
            (extract_shortcut(pattern), extract_token(pattern))
        };

        let rule = Self {
            meta: RuleMeta::new(text, filter_id),
            whitelist,
            pattern: pattern.to_string(),
            is_regex,
            options: parsed.options,
            permitted_types,
            restricted_types: parsed.exclude_types,
            party: parsed.party.unwrap_or(PartyMask::ALL),
            domains: parsed.domains,
            csp: parsed.csp,
            shortcut,
            token,
            content,
            regex: OnceCell::new(),
        };

        // Regex literals are validated up front; plain patterns compile on first use.
        if rule.is_regex {
            let compiled = rule.compile().map_err(|e| RuleError::InvalidRegex {
                pattern: rule.pattern.clone(),
                reason: e.to_string(),
            })?;
            let _ = rule.regex.set(Some(compiled));
        }

        Ok(rule)
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn options(&self) -> UrlRuleOptions {
        self.options
    }

    pub fn has_option(&self, option: UrlRuleOptions) -> bool {
        self.options.contains(option)
    }

    pub fn is_important(&self) -> bool {
        self.options.contains(UrlRuleOptions::IMPORTANT)
    }

    /// Exception carrying `$document`: the whole page is whitelisted.
    pub fn is_document_whitelist(&self) -> bool {
        self.whitelist && self.options.contains(UrlRuleOptions::DOCUMENT_WHITELIST)
    }

    /// Exception that disables URL blocking on the page.
    pub fn is_url_block(&self) -> bool {
        self.whitelist && self.options.contains(UrlRuleOptions::URLBLOCK)
    }

    pub fn is_csp(&self) -> bool {
        self.csp.is_some()
    }

    /// CSP directive of a `$csp` rule. Empty for a `$csp` exception that
    /// disables every directive.
    pub fn csp_directive(&self) -> Option<&str> {
        self.csp.as_deref()
    }

    /// Lowercased index token, if the pattern has one that is guaranteed to
    /// appear as a whole token in every matching URL.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Whether the rule has no `domain=` permitted list.
    pub fn is_generic(&self) -> bool {
        self.domains.is_generic()
    }

    pub fn matches_request_type(&self, request_type: RequestType) -> bool {
        self.permitted_types.intersects(request_type) && !self.restricted_types.intersects(request_type)
    }

    pub fn matches_party(&self, third_party: bool) -> bool {
        self.party.intersects(PartyMask::of_request(third_party))
    }

    /// Full request check except domain restrictions, which depend on the page.
    pub fn is_filtered(&self, url: &str, third_party: bool, request_type: RequestType) -> bool {
        self.matches_request_type(request_type) && self.matches_party(third_party) && self.matches_url(url)
    }

    /// Pattern check alone.
    pub fn matches_url(&self, url: &str) -> bool {
        if !self.shortcut.is_empty() {
            let found = if self.options.contains(UrlRuleOptions::MATCH_CASE) {
                url.contains(&self.shortcut)
            } else {
                find_case_insensitive(url, &self.shortcut).is_some()
            };
            if !found {
                return false;
            }
            if self.is_plain() {
                return true;
            }
        }

        let regex = self.regex.get_or_init(|| match self.compile() {
            Ok(re) => Some(re),
            Err(e) => {
                log::warn!("cannot compile rule '{}': {}", self.meta.rule_text, e);
                None
            }
        });
        regex.as_ref().map_or(false, |re| re.is_match(url))
    }

    /// Pattern is a bare substring, so the shortcut check is the full check.
    fn is_plain(&self) -> bool {
        !self.is_regex && self.shortcut.len() == self.pattern.len()
    }

    fn compile(&self) -> Result<Regex, regex::Error> {
        let match_case = self.options.contains(UrlRuleOptions::MATCH_CASE);
        if self.is_regex {
            let body = &self.pattern[1..self.pattern.len() - 1];
            let source = if match_case { body.to_string() } else { format!("(?i){}", body) };
            return Regex::new(&source);
        }
        Regex::new(&pattern_to_regex(&self.pattern, match_case))
    }
}

impl FilterRule for UrlFilterRule {
    fn meta(&self) -> &RuleMeta {
        &self.meta
    }

    fn is_whitelist(&self) -> bool {
        self.whitelist
    }

    fn is_permitted(&self, domain: &str) -> bool {
        self.domains.is_permitted(domain)
    }
}

impl ContentRule for UrlFilterRule {
    fn content(&self) -> &str {
        &self.content
    }

    fn domains(&self) -> &DomainRestrictions {
        &self.domains
    }
}

// =============================================================================
// Options
// =============================================================================

/// Split at the last unescaped `$` that starts an option list. A `$` closing
/// a regex literal (`/ad$/`) is part of the pattern.
fn split_rule_options(body: &str) -> (&str, Option<&str>) {
    let bytes = body.as_bytes();
    let mut end = body.len();
    while let Some(pos) = body[..end].rfind('$') {
        let escaped = pos > 0 && bytes[pos - 1] == b'\\';
        let next = bytes.get(pos + 1).copied();
        if !escaped && matches!(next, Some(c) if c != b'/' && c != b')' && c != b'|') {
            return (&body[..pos], Some(&body[pos + 1..]));
        }
        if pos + 1 == body.len() && !body.starts_with('/') {
            // Trailing `$` with an empty option list.
            return (&body[..pos], None);
        }
        end = pos;
    }
    (body, None)
}

fn parse_options(text: &str, whitelist: bool) -> Result<ParsedOptions, RuleError> {
    let mut parsed = ParsedOptions::default();
    let mut party_include = PartyMask::empty();
    let mut party_exclude = PartyMask::empty();

    for raw in text.split(',') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        let lower = raw.to_ascii_lowercase();

        if let Some(value) = lower.strip_prefix("domain=") {
            parsed.domains = DomainRestrictions::parse(value, '|')?;
            continue;
        }

        parsed.content_options.push(raw.to_string());

        if lower == "csp" || lower.starts_with("csp=") {
            // Directive values are case-sensitive.
            let value = raw.split_once('=').map(|(_, v)| v.trim()).unwrap_or("");
            if value.is_empty() && !whitelist {
                return Err(RuleError::UnknownOption(raw.to_string()));
            }
            parsed.csp = Some(value.to_string());
            continue;
        }

        let (negated, name) = match lower.strip_prefix('~') {
            Some(rest) => (true, rest),
            None => (false, lower.as_str()),
        };

        let flag = match name {
            "important" => Some(UrlRuleOptions::IMPORTANT),
            "match-case" => Some(UrlRuleOptions::MATCH_CASE),
            "popup" => Some(UrlRuleOptions::POPUP),
            "empty" => Some(UrlRuleOptions::EMPTY_RESPONSE),
            "elemhide" => Some(UrlRuleOptions::ELEMHIDE),
            "generichide" => Some(UrlRuleOptions::GENERICHIDE),
            "genericblock" => Some(UrlRuleOptions::GENERICBLOCK),
            "jsinject" => Some(UrlRuleOptions::JSINJECT),
            "urlblock" => Some(UrlRuleOptions::URLBLOCK),
            "content" => Some(UrlRuleOptions::CONTENT),
            _ => None,
        };
        if let Some(flag) = flag {
            if negated {
                return Err(RuleError::UnknownOption(raw.to_string()));
            }
            if !whitelist && UrlRuleOptions::EXCEPTION_ONLY.contains(flag) {
                return Err(RuleError::ExceptionOnlyOption(raw.to_string()));
            }
            parsed.options |= flag;
            continue;
        }

        if name == "document" && whitelist && !negated {
            parsed.options |= UrlRuleOptions::DOCUMENT_LEVEL;
            parsed.include_types |= RequestType::DOCUMENT;
            continue;
        }

        if name == "third-party" || name == "first-party" {
            let mask = if name == "third-party" { PartyMask::THIRD_PARTY } else { PartyMask::FIRST_PARTY };
            if negated {
                party_exclude |= mask;
            } else {
                party_include |= mask;
            }
            continue;
        }

        if let Some(mask) = RequestType::from_option_name(name) {
            if negated {
                parsed.exclude_types |= mask;
            } else {
                parsed.include_types |= mask;
            }
            continue;
        }

        return Err(RuleError::UnknownOption(raw.to_string()));
    }

    let include = if party_include.is_empty() { PartyMask::ALL } else { party_include };
    let party = include & !party_exclude;
    if party.is_empty() {
        return Err(RuleError::UnknownOption(text.to_string()));
    }
    parsed.party = Some(party);

    Ok(parsed)
}

fn finalize_types(parsed: &ParsedOptions, whitelist: bool) -> RequestType {
    if parsed.options.contains(UrlRuleOptions::POPUP) {
        return parsed.include_types | RequestType::POPUP;
    }
    if !parsed.include_types.is_empty() {
        return parsed.include_types;
    }
    if parsed.csp.is_some() {
        return RequestType::CSP_TARGETS;
    }
    // Page-level exceptions ($elemhide, $generichide, ...) act on documents only.
    if whitelist && parsed.options.intersects(UrlRuleOptions::EXCEPTION_ONLY) {
        return RequestType::DOCUMENT | RequestType::SUBDOCUMENT;
    }
    DEFAULT_TYPES
}

// =============================================================================
// Pattern
// =============================================================================

/// Translate an adblock pattern into a regex source string.
fn pattern_to_regex(pattern: &str, match_case: bool) -> String {
    let mut out = String::with_capacity(pattern.len() * 2);
    if !match_case {
        out.push_str("(?i)");
    }

    let mut rest = pattern;
    if let Some(r) = rest.strip_prefix("||") {
        out.push_str(HOST_ANCHOR_REGEX);
        rest = r;
    } else if let Some(r) = rest.strip_prefix('|') {
        out.push('^');
        rest = r;
    }

    let (body, end_anchor) = match rest.strip_suffix('|') {
        Some(b) => (b, true),
        None => (rest, false),
    };

    let mut buf = [0u8; 4];
    for c in body.chars() {
        match c {
            '*' => out.push_str(".*"),
            '^' => out.push_str(SEPARATOR_REGEX),
            _ => out.push_str(&regex::escape(c.encode_utf8(&mut buf))),
        }
    }

    if end_anchor {
        out.push('$');
    }
    out
}

/// Longest literal run of the pattern; must occur in every matching URL.
fn extract_shortcut(pattern: &str) -> String {
    let body = pattern.trim_start_matches('|').trim_end_matches('|');
    body.split(|c| c == '*' || c == '^')
        .max_by_key(|s| s.len())
        .unwrap_or("")
        .to_string()
}

/// Pick an alphanumeric run that is delimited on both sides, so it shows up
/// as a complete token of any matching URL.
fn extract_token(pattern: &str) -> Option<String> {
    let left_anchor = pattern.starts_with('|');
    let body = pattern.trim_start_matches('|');
    let right_anchor = body.ends_with('|');
    let body = body.strip_suffix('|').unwrap_or(body);

    let mut best: Option<&str> = None;
    let mut seg_start = 0;
    let bytes = body.as_bytes();

    for seg_end in (0..=bytes.len()).filter(|&i| i == bytes.len() || bytes[i] == b'*' || bytes[i] == b'^') {
        let seg = &body[seg_start..seg_end];
        let left_bounded = if seg_start == 0 { left_anchor } else { bytes[seg_start - 1] == b'^' };
        let right_bounded = if seg_end == bytes.len() { right_anchor } else { bytes[seg_end] == b'^' };

        let sb = seg.as_bytes();
        let mut i = 0;
        while i < sb.len() {
            if !sb[i].is_ascii_alphanumeric() {
                i += 1;
                continue;
            }
            let start = i;
            while i < sb.len() && sb[i].is_ascii_alphanumeric() {
                i += 1;
            }
            let bounded = (start > 0 || left_bounded) && (i < sb.len() || right_bounded);
            if bounded && i - start >= MIN_TOKEN_LEN && best.map_or(true, |b| i - start > b.len()) {
                best = Some(&seg[start..i]);
            }
        }
        seg_start = seg_end + 1;
    }

    best.map(|t| t.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(text: &str) -> UrlFilterRule {
        UrlFilterRule::parse(text, 1).unwrap()
    }

    #[test]
    fn test_host_anchor() {
        let r = rule("||ads.example.com^");
        assert!(r.matches_url("https://ads.example.com/banner.js"));
        assert!(r.matches_url("http://sub.ads.example.com/"));
        assert!(!r.matches_url("https://badads.example.com/"));
        assert!(!r.matches_url("https://ads.example.community/"));
    }

    #[test]
    fn test_plain_substring() {
        let r = rule("-ad-banner.$image");
        assert!(r.is_filtered("http://example.com/-ad-banner.jpg", false, RequestType::IMAGE));
        assert!(!r.is_filtered("http://example.com/-ad-banner.jpg", false, RequestType::SCRIPT));
        assert_eq!(r.token(), Some("banner"));
    }

    #[test]
    fn test_anchors_and_wildcards() {
        let r = rule("|https://cdn.*/ads/");
        assert!(r.matches_url("https://cdn.example.net/ads/1.png"));
        assert!(!r.matches_url("http://cdn.example.net/ads/1.png"));

        let r = rule("/banner.gif|");
        assert!(r.matches_url("http://x.org/banner.gif"));
        assert!(!r.matches_url("http://x.org/banner.gif?x=1"));
    }

    #[test]
    fn test_regex_rule() {
        let r = rule(r"/banner\d+\.png$/");
        assert!(r.matches_url("http://x.org/banner42.png"));
        assert!(!r.matches_url("http://x.org/banner.png"));
        assert!(UrlFilterRule::parse("/ad[/", 1).is_err());
    }

    #[test]
    fn test_match_case() {
        let r = rule("/Ads/$match-case");
        assert!(r.matches_url("http://x.org/Ads/1"));
        assert!(!r.matches_url("http://x.org/ads/1"));
    }

    #[test]
    fn test_party_and_domains() {
        let r = rule("||tracker.net^$third-party,domain=example.com|~shop.example.com");
        assert!(r.matches_party(true));
        assert!(!r.matches_party(false));
        assert!(r.is_permitted("news.example.com"));
        assert!(!r.is_permitted("shop.example.com"));
        assert!(!r.is_generic());
    }

    #[test]
    fn test_document_exception() {
        let r = rule("@@||example.com^$document");
        assert!(r.is_whitelist());
        assert!(r.is_document_whitelist());
        assert!(r.is_url_block());
        assert!(r.matches_request_type(RequestType::DOCUMENT));
    }

    #[test]
    fn test_exception_only_options() {
        assert_eq!(
            UrlFilterRule::parse("||example.com^$elemhide", 1).unwrap_err(),
            RuleError::ExceptionOnlyOption("elemhide".to_string())
        );
        let r = rule("@@||example.com^$generichide");
        assert!(r.has_option(UrlRuleOptions::GENERICHIDE));
        assert!(!r.matches_request_type(RequestType::IMAGE));
    }

    #[test]
    fn test_default_types_skip_document() {
        let r = rule("||example.org^");
        assert!(r.matches_request_type(RequestType::SCRIPT));
        assert!(!r.matches_request_type(RequestType::DOCUMENT));
        let r = rule("||example.org^$~image");
        assert!(!r.matches_request_type(RequestType::IMAGE));
        assert!(r.matches_request_type(RequestType::SCRIPT));
    }

    #[test]
    fn test_popup_matches_popups_only() {
        let r = rule("||popads.net^$popup");
        assert!(r.matches_request_type(RequestType::POPUP));
        assert!(!r.matches_request_type(RequestType::DOCUMENT));
        assert!(!r.matches_request_type(RequestType::SCRIPT));

        let r = rule("||popads.net^$popup,script");
        assert!(r.matches_request_type(RequestType::POPUP));
        assert!(r.matches_request_type(RequestType::SCRIPT));

        assert!(!rule("||popads.net^").matches_request_type(RequestType::POPUP));
        assert!(!rule("||popads.net^$~image").matches_request_type(RequestType::POPUP));
    }

    #[test]
    fn test_csp() {
        let r = rule("||example.org^$csp=script-src 'self'");
        assert_eq!(r.csp_directive(), Some("script-src 'self'"));
        assert!(r.matches_request_type(RequestType::SUBDOCUMENT));
        let e = rule("@@||example.org^$csp");
        assert_eq!(e.csp_directive(), Some(""));
        assert!(UrlFilterRule::parse("||example.org^$csp", 1).is_err());
    }

    #[test]
    fn test_rejects_bad_rules() {
        assert!(UrlFilterRule::parse("*", 1).is_err());
        assert!(UrlFilterRule::parse("||ads^$bogus", 1).is_err());
        assert!(UrlFilterRule::parse("", 1).is_err());
        assert!(UrlFilterRule::parse("*$domain=example.com", 1).is_ok());
    }

    #[test]
    fn test_content_ignores_domains() {
        let a = rule("||ads.net^$script,domain=a.com");
        let b = rule("@@||ads.net^$script,domain=b.com");
        assert_eq!(a.content(), b.content());
        assert_eq!(a.content(), "||ads.net^$script");
    }

    #[test]
    fn test_token_extraction() {
        assert_eq!(extract_token("||example.com^"), Some("example".to_string()));
        assert_eq!(extract_token("banner"), None);
        assert_eq!(extract_token("*/adserver/*"), Some("adserver".to_string()));
        assert_eq!(extract_token("ad*"), None);
    }
}
