//! Cosmetic rule index.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use super::rule_set::RuleSet;
use crate::rule::CssFilterRule;
use crate::types::CssOptions;

/// Stylesheets for a page, split by the engine that applies them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectorsResult {
    /// Plain CSS, one rule per entry.
    pub css: Vec<String>,
    /// Extended CSS, evaluated by the content script.
    pub extended_css: Vec<String>,
}

impl SelectorsResult {
    pub fn is_empty(&self) -> bool {
        self.css.is_empty() && self.extended_css.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct CssFilter {
    rules: RuleSet<CssFilterRule>,
}

impl CssFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rule(&mut self, rule: Arc<CssFilterRule>) {
        self.rules.add(rule);
    }

    pub fn remove_rule(&mut self, rule_text: &str) -> usize {
        self.rules.remove_by_text(rule_text).len()
    }

    /// Stylesheets that apply on `domain`.
    pub fn get_selectors(&self, domain: &str, options: CssOptions) -> SelectorsResult {
        let traditional = options.contains(CssOptions::RETRIEVE_TRADITIONAL_CSS);
        let extended = options.contains(CssOptions::RETRIEVE_EXTCSS);
        let skip_generic = options.contains(CssOptions::GENERIC_HIDE_APPLIED);

        let mut result = SelectorsResult::default();
        let mut seen: HashSet<String> = HashSet::new();

        for (_, entry) in self.rules.blocking() {
            let rule = &entry.rule;
            let wanted = if rule.is_extended_css() { extended } else { traditional };
            if !wanted || (skip_generic && rule.is_generic()) || !entry.is_permitted(domain) {
                continue;
            }
            let text = rule.css_text();
            if !seen.insert(text.clone()) {
                continue;
            }
            if rule.is_extended_css() {
                result.extended_css.push(text);
            } else {
                result.css.push(text);
            }
        }

        result
    }

    pub fn rules(&self) -> Vec<Arc<CssFilterRule>> {
        self.rules.rules()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(rules: &[&str]) -> CssFilter {
        let mut f = CssFilter::new();
        for r in rules {
            f.add_rule(Arc::new(CssFilterRule::parse(r, 1).unwrap()));
        }
        f
    }

    const ALL: CssOptions = CssOptions::RETRIEVE_TRADITIONAL_CSS.union(CssOptions::RETRIEVE_EXTCSS);

    #[test]
    fn test_generic_and_specific() {
        let f = filter(&["##.ad-banner", "example.com##.sidebar-ad", "#?#div:has(> .ad)"]);
        let r = f.get_selectors("example.com", ALL);
        assert_eq!(
            r.css,
            vec![
                ".ad-banner { display: none !important; }".to_string(),
                ".sidebar-ad { display: none !important; }".to_string()
            ]
        );
        assert_eq!(r.extended_css, vec!["div:has(> .ad) { display: none !important; }".to_string()]);

        let r = f.get_selectors("other.org", CssOptions::RETRIEVE_TRADITIONAL_CSS);
        assert_eq!(r.css.len(), 1);
        assert!(r.extended_css.is_empty());
    }

    #[test]
    fn test_generic_hide_applied() {
        let f = filter(&["##.ad-banner", "example.com##.sidebar-ad"]);
        let r = f.get_selectors("example.com", ALL | CssOptions::GENERIC_HIDE_APPLIED);
        assert_eq!(r.css, vec![".sidebar-ad { display: none !important; }".to_string()]);
    }

    #[test]
    fn test_exception_then_removal() {
        let mut f = filter(&["##.ad", "example.com#@#.ad"]);
        assert!(f.get_selectors("example.com", ALL).is_empty());
        assert_eq!(f.get_selectors("other.org", ALL).css.len(), 1);

        f.remove_rule("example.com#@#.ad");
        assert_eq!(f.get_selectors("example.com", ALL).css.len(), 1);
    }

    #[test]
    fn test_injection_passes_style_through() {
        let f = filter(&["example.com#$#.ad { visibility: hidden; }"]);
        let r = f.get_selectors("example.com", ALL);
        assert_eq!(r.css, vec![".ad { visibility: hidden; }".to_string()]);
    }
}
