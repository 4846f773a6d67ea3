//! Cosmetic rules: element hiding (`##`), extended CSS (`#?#`) and style
//! injection (`#$#`), with their `#@…#` exceptions.

use super::{ContentRule, DomainRestrictions, FilterRule, RuleMeta};
use crate::error::RuleError;
use crate::types::FilterId;

/// Pseudo-classes that a browser engine cannot evaluate on its own.
const EXTENDED_PSEUDO: &[&str] = &[
    ":has(",
    ":has-text(",
    ":contains(",
    ":-abp-has(",
    ":-abp-contains(",
    ":matches-css(",
    ":matches-css-before(",
    ":matches-css-after(",
    ":xpath(",
    ":nth-ancestor(",
    ":upward(",
    ":if(",
    ":if-not(",
    "[-ext-",
];

/// Separator between the domain list and the body of a cosmetic rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CosmeticMarker {
    /// `##`
    Hide,
    /// `#@#`
    HideException,
    /// `#?#`
    ExtHide,
    /// `#@?#`
    ExtHideException,
    /// `#$#`
    Inject,
    /// `#@$#`
    InjectException,
    /// `#$?#`
    ExtInject,
    /// `#@$?#`
    ExtInjectException,
}

impl CosmeticMarker {
    /// Longest markers first so `#@$?#` is not read as `#@$#`.
    const ALL: [(&'static str, CosmeticMarker); 8] = [
        ("#@$?#", CosmeticMarker::ExtInjectException),
        ("#$?#", CosmeticMarker::ExtInject),
        ("#@?#", CosmeticMarker::ExtHideException),
        ("#@$#", CosmeticMarker::InjectException),
        ("#@#", CosmeticMarker::HideException),
        ("#?#", CosmeticMarker::ExtHide),
        ("#$#", CosmeticMarker::Inject),
        ("##", CosmeticMarker::Hide),
    ];

    pub fn as_str(self) -> &'static str {
        Self::ALL
            .iter()
            .find(|(_, m)| *m == self)
            .map(|(s, _)| *s)
            .unwrap_or("##")
    }

    pub fn is_exception(self) -> bool {
        matches!(
            self,
            Self::HideException | Self::ExtHideException | Self::InjectException | Self::ExtInjectException
        )
    }

    pub fn is_extended(self) -> bool {
        matches!(
            self,
            Self::ExtHide | Self::ExtHideException | Self::ExtInject | Self::ExtInjectException
        )
    }

    pub fn is_inject(self) -> bool {
        matches!(
            self,
            Self::Inject | Self::InjectException | Self::ExtInject | Self::ExtInjectException
        )
    }

    /// Find the first cosmetic marker in `text` preceded by a plausible domain list.
    pub fn find(text: &str) -> Option<(usize, CosmeticMarker)> {
        let bytes = text.as_bytes();
        for (i, &b) in bytes.iter().enumerate() {
            if b != b'#' {
                continue;
            }
            if !is_domain_list(&text[..i]) {
                return None;
            }
            let rest = &text[i..];
            if let Some((_, marker)) = Self::ALL.iter().find(|(s, _)| rest.starts_with(s)) {
                return Some((i, *marker));
            }
        }
        None
    }
}

fn is_domain_list(s: &str) -> bool {
    s.bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_' | b',' | b'~' | b'*') || b >= 0x80)
}

/// Whether the line is a cosmetic (CSS) rule.
pub fn is_cosmetic_rule(text: &str) -> bool {
    CosmeticMarker::find(text.trim()).is_some()
}

/// A parsed cosmetic rule.
#[derive(Debug, Clone)]
pub struct CssFilterRule {
    pub(crate) meta: RuleMeta,
    whitelist: bool,
    extended: bool,
    inject: bool,
    content: String,
    domains: DomainRestrictions,
}

impl CssFilterRule {
    pub fn parse(text: &str, filter_id: FilterId) -> Result<Self, RuleError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(RuleError::Empty);
        }
        let (pos, marker) = CosmeticMarker::find(text).ok_or_else(|| RuleError::NotCosmetic(text.to_string()))?;

        let domains_text = &text[..pos];
        let content = text[pos + marker.as_str().len()..].trim();
        if content.is_empty() {
            return Err(RuleError::EmptyContent(text.to_string()));
        }

        let inject = marker.is_inject();
        if inject && !(content.contains('{') && content.ends_with('}')) {
            return Err(RuleError::EmptyContent(text.to_string()));
        }

        let domains = if domains_text.is_empty() {
            DomainRestrictions::default()
        } else {
            DomainRestrictions::parse(domains_text, ',')?
        };

        let extended = marker.is_extended() || EXTENDED_PSEUDO.iter().any(|p| content.contains(p));

        Ok(Self {
            meta: RuleMeta::new(text, filter_id),
            whitelist: marker.is_exception(),
            extended,
            inject,
            content: content.to_string(),
            domains,
        })
    }

    /// Selector, or `selector { style }` for injection rules.
    pub fn selector(&self) -> &str {
        &self.content
    }

    pub fn is_extended_css(&self) -> bool {
        self.extended
    }

    pub fn is_inject(&self) -> bool {
        self.inject
    }

    /// Whether the rule has no permitted domains.
    pub fn is_generic(&self) -> bool {
        self.domains.is_generic()
    }

    /// Stylesheet text for this rule.
    pub fn css_text(&self) -> String {
        if self.inject {
            self.content.clone()
        } else {
            format!("{} {{ display: none !important; }}", self.content)
        }
    }
}

impl FilterRule for CssFilterRule {
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

impl ContentRule for CssFilterRule {
    fn content(&self) -> &str {
        &self.content
    }

    fn domains(&self) -> &DomainRestrictions {
        &self.domains
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_hide() {
        let r = CssFilterRule::parse("##.ad-banner", 1).unwrap();
        assert!(r.is_generic());
        assert!(!r.is_whitelist());
        assert_eq!(r.css_text(), ".ad-banner { display: none !important; }");
    }

    #[test]
    fn test_domain_exception() {
        let r = CssFilterRule::parse("example.com,~shop.example.com#@#.ad", 1).unwrap();
        assert!(r.is_whitelist());
        assert!(r.is_permitted("example.com"));
        assert!(!r.is_permitted("shop.example.com"));
        assert_eq!(r.content(), ".ad");
    }

    #[test]
    fn test_extended_detection() {
        assert!(CssFilterRule::parse("#?#.banner", 1).unwrap().is_extended_css());
        assert!(CssFilterRule::parse("##div:has(> .ad)", 1).unwrap().is_extended_css());
        assert!(!CssFilterRule::parse("##div > .ad", 1).unwrap().is_extended_css());
    }

    #[test]
    fn test_injection() {
        let r = CssFilterRule::parse("example.com#$#body { overflow: auto !important; }", 1).unwrap();
        assert!(r.is_inject());
        assert_eq!(r.css_text(), "body { overflow: auto !important; }");
        assert!(CssFilterRule::parse("#$#body", 1).is_err());
    }

    #[test]
    fn test_marker_detection() {
        assert!(is_cosmetic_rule("example.com##.ad"));
        assert!(!is_cosmetic_rule("||example.com^"));
        assert!(!is_cosmetic_rule("||example.com/#anchor##x"));
        assert!(!is_cosmetic_rule("example.com#%#window.x = 1;"));
        assert_eq!(CosmeticMarker::find("a.com#@$?#x { a: b }").map(|(_, m)| m), Some(CosmeticMarker::ExtInjectException));
        assert!(CssFilterRule::parse("example.com##", 1).is_err());
    }
}
