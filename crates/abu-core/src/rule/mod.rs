//! Rule model.
//!
//! Every rule line that survives conversion becomes one [`Rule`]. Rules are
//! immutable once built and are shared between indices through `Arc`, so a
//! rule object never changes after it has been added to a filter.

mod composite;
mod css_rule;
mod script_rule;
mod url_rule;

pub use composite::CompositeRule;
pub use css_rule::{is_cosmetic_rule, CosmeticMarker, CssFilterRule};
pub use script_rule::{is_script_rule, is_scriptlet_rule, ScriptFilterRule, ScriptletCall, ScriptletRule};
pub use url_rule::UrlFilterRule;

use crate::domain::{is_domain_or_subdomain, normalize_domain};
use crate::error::RuleError;
use crate::types::FilterId;

// =============================================================================
// Shared metadata
// =============================================================================

/// Text and origin carried by every rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMeta {
    /// Text used for display, editing and removal.
    pub rule_text: String,
    /// Text the rule was actually built from when a converter rewrote it.
    pub converted_rule_text: Option<String>,
    pub filter_id: FilterId,
}

impl RuleMeta {
    pub fn new(rule_text: &str, filter_id: FilterId) -> Self {
        Self {
            rule_text: rule_text.to_string(),
            converted_rule_text: None,
            filter_id,
        }
    }
}

/// Behaviour common to all rule kinds.
pub trait FilterRule {
    fn meta(&self) -> &RuleMeta;

    fn is_whitelist(&self) -> bool;

    /// Whether the rule may apply on a page of `domain`.
    fn is_permitted(&self, domain: &str) -> bool;

    fn rule_text(&self) -> &str {
        &self.meta().rule_text
    }

    fn filter_id(&self) -> FilterId {
        self.meta().filter_id
    }
}

/// A leaf rule that can be paired with an exception by content.
pub trait ContentRule: FilterRule {
    /// Rule body without domain restrictions or the exception marker.
    /// A blocking rule and an exception with equal content cancel out on
    /// the exception's domains.
    fn content(&self) -> &str;

    fn domains(&self) -> &DomainRestrictions;
}

// =============================================================================
// Domain restrictions
// =============================================================================

/// Permitted and restricted domains of a rule.
///
/// A rule with no permitted domains is generic. A restricted domain wins
/// over a permitted parent (`example.com,~sub.example.com`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainRestrictions {
    permitted: Vec<String>,
    restricted: Vec<String>,
}

impl DomainRestrictions {
    /// Parse a `sep`-separated list where `~` marks a restricted domain.
    pub fn parse(list: &str, sep: char) -> Result<Self, RuleError> {
        let mut out = Self::default();
        for raw in list.split(sep) {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            let (restricted, name) = match raw.strip_prefix('~') {
                Some(rest) => (true, rest),
                None => (false, raw),
            };
            let domain = normalize_domain(name).ok_or_else(|| RuleError::InvalidDomains(list.to_string()))?;
            if restricted {
                out.restricted.push(domain);
            } else {
                out.permitted.push(domain);
            }
        }
        if out.permitted.is_empty() && out.restricted.is_empty() {
            return Err(RuleError::InvalidDomains(list.to_string()));
        }
        Ok(out)
    }

    pub fn permitted(&self) -> &[String] {
        &self.permitted
    }

    pub fn restricted(&self) -> &[String] {
        &self.restricted
    }

    /// No permitted domains: the rule applies everywhere not restricted.
    pub fn is_generic(&self) -> bool {
        self.permitted.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.permitted.is_empty() && self.restricted.is_empty()
    }

    pub fn is_permitted(&self, domain: &str) -> bool {
        if domain.is_empty() {
            return self.permitted.is_empty();
        }
        if matches_any(domain, &self.restricted) {
            return false;
        }
        self.permitted.is_empty() || matches_any(domain, &self.permitted)
    }
}

fn matches_any(domain: &str, list: &[String]) -> bool {
    list.iter().any(|d| is_domain_or_subdomain(domain, d))
}

// =============================================================================
// Rule
// =============================================================================

/// A built rule of any kind.
#[derive(Debug, Clone)]
pub enum Rule {
    Url(UrlFilterRule),
    Css(CssFilterRule),
    Script(ScriptFilterRule),
    Scriptlet(ScriptletRule),
    /// One source line that expanded into several rules.
    Composite(CompositeRule),
}

impl Rule {
    fn meta_mut(&mut self) -> &mut RuleMeta {
        match self {
            Rule::Url(r) => &mut r.meta,
            Rule::Css(r) => &mut r.meta,
            Rule::Script(r) => &mut r.meta,
            Rule::Scriptlet(r) => &mut r.meta,
            Rule::Composite(r) => &mut r.meta,
        }
    }

    /// Remember `original` as the rule text, keeping the current text as the
    /// converted form. Used when a converter rewrote the source line.
    pub fn restore_original_text(&mut self, original: &str) {
        let meta = self.meta_mut();
        if meta.rule_text == original {
            return;
        }
        let converted = std::mem::replace(&mut meta.rule_text, original.to_string());
        meta.converted_rule_text = Some(converted);
    }

    /// Script text to inject for script and scriptlet rules.
    pub fn script(&self) -> Option<String> {
        match self {
            Rule::Script(r) => Some(r.script().to_string()),
            Rule::Scriptlet(r) => Some(r.script()),
            _ => None,
        }
    }

    pub fn as_url(&self) -> Option<&UrlFilterRule> {
        match self {
            Rule::Url(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_css(&self) -> Option<&CssFilterRule> {
        match self {
            Rule::Css(r) => Some(r),
            _ => None,
        }
    }
}

impl FilterRule for Rule {
    fn meta(&self) -> &RuleMeta {
        match self {
            Rule::Url(r) => &r.meta,
            Rule::Css(r) => &r.meta,
            Rule::Script(r) => &r.meta,
            Rule::Scriptlet(r) => &r.meta,
            Rule::Composite(r) => &r.meta,
        }
    }

    fn is_whitelist(&self) -> bool {
        match self {
            Rule::Url(r) => r.is_whitelist(),
            Rule::Css(r) => r.is_whitelist(),
            Rule::Script(r) => r.is_whitelist(),
            Rule::Scriptlet(r) => r.is_whitelist(),
            Rule::Composite(r) => r.is_whitelist(),
        }
    }

    fn is_permitted(&self, domain: &str) -> bool {
        match self {
            Rule::Url(r) => r.is_permitted(domain),
            Rule::Css(r) => r.is_permitted(domain),
            Rule::Script(r) => r.is_permitted(domain),
            Rule::Scriptlet(r) => r.is_permitted(domain),
            Rule::Composite(r) => r.is_permitted(domain),
        }
    }
}

impl From<UrlFilterRule> for Rule {
    fn from(rule: UrlFilterRule) -> Self {
        Rule::Url(rule)
    }
}

impl From<CssFilterRule> for Rule {
    fn from(rule: CssFilterRule) -> Self {
        Rule::Css(rule)
    }
}

impl From<ScriptFilterRule> for Rule {
    fn from(rule: ScriptFilterRule) -> Self {
        Rule::Script(rule)
    }
}

impl From<ScriptletRule> for Rule {
    fn from(rule: ScriptletRule) -> Self {
        Rule::Scriptlet(rule)
    }
}
