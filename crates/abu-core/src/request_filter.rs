//! Aggregate filter answering every query the extension makes.

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::is_third_party;
use crate::filter::{CssFilter, RequestQuery, ScriptFilter, SelectorsResult, UrlFilter};
use crate::rule::{FilterRule, Rule, UrlFilterRule};
use crate::types::{CssOptions, RequestType, UrlRuleOptions};
use crate::url::host_of;

/// Separator used when joining injected scripts.
const SCRIPT_SEPARATOR: &str = "\r\n";

/// URL, CSS and script indices behind one object.
///
/// Composite rules are spread across the indices; they count as one rule.
#[derive(Debug, Default)]
pub struct RequestFilter {
    url_filter: UrlFilter,
    css_filter: CssFilter,
    script_filter: ScriptFilter,
    rules_count: usize,
    /// Rule text to how many counted rules carry it.
    counted: HashMap<String, usize>,
}

impl RequestFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a batch of rules, all counted.
    pub fn add_rules<I: IntoIterator<Item = Rule>>(&mut self, rules: I) {
        for rule in rules {
            self.add_rule(rule, true);
        }
    }

    pub fn add_rule(&mut self, rule: Rule, count_toward_total: bool) {
        if count_toward_total {
            self.rules_count += 1;
            *self.counted.entry(rule.rule_text().to_string()).or_default() += 1;
        }
        self.add_leaf(rule);
    }

    fn add_leaf(&mut self, rule: Rule) {
        match rule {
            Rule::Url(r) => self.url_filter.add_rule(Arc::new(r)),
            Rule::Css(r) => self.css_filter.add_rule(Arc::new(r)),
            Rule::Script(r) => self.script_filter.add_script(Arc::new(r)),
            Rule::Scriptlet(r) => self.script_filter.add_scriptlet(Arc::new(r)),
            Rule::Composite(c) => {
                for part in c.into_rules() {
                    self.add_leaf(part);
                }
            }
        }
    }

    /// Remove every rule with this text from all indices. Returns whether
    /// anything was removed.
    pub fn remove_rule(&mut self, rule_text: &str) -> bool {
        let removed = self.url_filter.remove_rule(rule_text)
            + self.css_filter.remove_rule(rule_text)
            + self.script_filter.remove_rule(rule_text);
        if let Some(n) = self.counted.remove(rule_text) {
            self.rules_count = self.rules_count.saturating_sub(n);
        }
        if removed > 0 {
            log::debug!("removed {} rule(s) for '{}'", removed, rule_text);
        }
        removed > 0
    }

    pub fn rules_count(&self) -> usize {
        self.rules_count
    }

    /// Distinct rule texts across all indices.
    pub fn get_rules(&self) -> Vec<String> {
        let mut texts: Vec<String> = Vec::new();
        let mut push = |t: &str| {
            if !texts.iter().any(|x| x == t) {
                texts.push(t.to_string());
            }
        };
        for r in self.url_filter.rules() {
            push(r.rule_text());
        }
        for r in self.css_filter.rules() {
            push(r.rule_text());
        }
        for r in self.script_filter.script_rules() {
            push(r.rule_text());
        }
        for r in self.script_filter.scriptlet_rules() {
            push(r.rule_text());
        }
        texts
    }

    pub fn url_filter(&self) -> &UrlFilter {
        &self.url_filter
    }

    pub fn css_filter(&self) -> &CssFilter {
        &self.css_filter
    }

    pub fn script_filter(&self) -> &ScriptFilter {
        &self.script_filter
    }

    // ===== Queries =====

    /// Rule governing a request made from `document_url`.
    ///
    /// A page-level exception that disables URL blocking is returned as is.
    /// A `$genericblock` one turns off generic blocking rules.
    pub fn find_rule_for_request(
        &self,
        request_url: &str,
        document_url: &str,
        request_type: RequestType,
        document_whitelist_rule: Option<&Arc<UrlFilterRule>>,
    ) -> Option<Arc<UrlFilterRule>> {
        if let Some(rule) = document_whitelist_rule {
            if rule.is_url_block() {
                return Some(Arc::clone(rule));
            }
        }
        let generic_block = document_whitelist_rule.map_or(false, |r| r.has_option(UrlRuleOptions::GENERICBLOCK));

        let document_host = host_of(document_url);
        let request_host = host_of(request_url);
        let query = RequestQuery {
            url: request_url,
            document_host: &document_host,
            third_party: is_third_party(&document_host, &request_host),
            request_type,
        };
        self.url_filter.find_rule_for_request(&query, generic_block)
    }

    /// Exception rule for `url` loaded from `referrer`, if any.
    pub fn find_whitelist_rule(
        &self,
        url: &str,
        referrer: &str,
        request_type: RequestType,
    ) -> Option<Arc<UrlFilterRule>> {
        let url_host = host_of(url);
        let referrer_host = host_of(referrer);
        let document_host = if referrer_host.is_empty() { url_host.clone() } else { referrer_host };
        let query = RequestQuery {
            url,
            document_host: &document_host,
            third_party: is_third_party(&document_host, &url_host),
            request_type,
        };
        self.url_filter.find_whitelist_rule(&query)
    }

    pub fn get_selectors_for_url(&self, document_url: &str, options: CssOptions) -> SelectorsResult {
        self.css_filter.get_selectors(&host_of(document_url), options)
    }

    pub fn get_scripts_for_url(&self, document_url: &str) -> Vec<String> {
        self.script_filter.build_script(&host_of(document_url))
    }

    /// Scripts joined into one string, or `None` when nothing applies.
    pub fn get_scripts_string_for_url(&self, document_url: &str) -> Option<String> {
        let scripts = self.get_scripts_for_url(document_url);
        if scripts.is_empty() {
            None
        } else {
            Some(scripts.join(SCRIPT_SEPARATOR))
        }
    }

    pub fn find_csp_rules(&self, url: &str, referrer: &str, request_type: RequestType) -> Vec<Arc<UrlFilterRule>> {
        let url_host = host_of(url);
        let referrer_host = host_of(referrer);
        let document_host = if referrer_host.is_empty() { url_host.clone() } else { referrer_host };
        let query = RequestQuery {
            url,
            document_host: &document_host,
            third_party: is_third_party(&document_host, &url_host),
            request_type,
        };
        self.url_filter.find_csp_rules(&query)
    }
}
