//! URL rule index.
//!
//! Rules are looked up by one token of their pattern. A request URL is split
//! into tokens and only the rules filed under those tokens (plus the rules
//! without a usable token) are tested.

use std::collections::HashMap;
use std::sync::Arc;

use super::rule_set::{EntryId, RuleSet};
use crate::rule::{FilterRule, UrlFilterRule};
use crate::types::{RequestType, UrlRuleOptions};
use crate::url::url_tokens;

// =============================================================================
// Token index
// =============================================================================

#[derive(Debug, Default)]
struct TokenIndex {
    by_token: HashMap<String, Vec<EntryId>>,
    untokenized: Vec<EntryId>,
}

impl TokenIndex {
    fn insert(&mut self, id: EntryId, token: Option<&str>) {
        match token {
            Some(t) => self.by_token.entry(t.to_string()).or_default().push(id),
            None => self.untokenized.push(id),
        }
    }

    fn remove(&mut self, id: EntryId, token: Option<&str>) {
        match token {
            Some(t) => {
                if let Some(ids) = self.by_token.get_mut(t) {
                    ids.retain(|x| *x != id);
                    if ids.is_empty() {
                        self.by_token.remove(t);
                    }
                }
            }
            None => self.untokenized.retain(|x| *x != id),
        }
    }

    /// Candidate entries for a tokenized URL, in insertion order.
    fn candidates(&self, tokens: &[String]) -> Vec<EntryId> {
        let mut ids: Vec<EntryId> = self.untokenized.clone();
        for token in tokens {
            if let Some(list) = self.by_token.get(token) {
                ids.extend_from_slice(list);
            }
        }
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

// =============================================================================
// UrlFilter
// =============================================================================

/// A single request to check.
#[derive(Debug, Clone, Copy)]
pub struct RequestQuery<'a> {
    pub url: &'a str,
    /// Host of the page that made the request.
    pub document_host: &'a str,
    pub third_party: bool,
    pub request_type: RequestType,
}

/// Index of network rules.
#[derive(Debug, Default)]
pub struct UrlFilter {
    rules: RuleSet<UrlFilterRule>,
    blocking_index: TokenIndex,
    exception_index: TokenIndex,
    csp_rules: RuleSet<UrlFilterRule>,
}

impl UrlFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rule(&mut self, rule: Arc<UrlFilterRule>) {
        if rule.is_csp() {
            self.csp_rules.add(rule);
            return;
        }
        let whitelist = rule.is_whitelist();
        let token = rule.token().map(str::to_string);
        let id = self.rules.add(rule);
        if whitelist {
            self.exception_index.insert(id, token.as_deref());
        } else {
            self.blocking_index.insert(id, token.as_deref());
        }
    }

    /// Remove every rule with this text. Returns how many were removed.
    pub fn remove_rule(&mut self, rule_text: &str) -> usize {
        let removed = self.rules.remove_by_text(rule_text);
        for (id, rule) in &removed {
            if rule.is_whitelist() {
                self.exception_index.remove(*id, rule.token());
            } else {
                self.blocking_index.remove(*id, rule.token());
            }
        }
        removed.len() + self.csp_rules.remove_by_text(rule_text).len()
    }

    /// Decide which rule governs a request.
    ///
    /// Order: important blocking rules, then exceptions, then the remaining
    /// blocking rules. `generic_block` skips blocking rules without
    /// permitted domains (`$genericblock` on the page).
    pub fn find_rule_for_request(&self, query: &RequestQuery<'_>, generic_block: bool) -> Option<Arc<UrlFilterRule>> {
        let tokens = url_tokens(query.url);
        let blocking = self.blocking_index.candidates(&tokens);

        let important = self.find_blocking(&blocking, query, generic_block, true);
        if important.is_some() {
            return important;
        }

        let exception = self.find_exception(&tokens, query, false);
        if exception.is_some() {
            return exception;
        }

        self.find_blocking(&blocking, query, generic_block, false)
    }

    /// First exception matching the request. For a document lookup the
    /// page-level exceptions count, and a `$urlblock`/`$document` one wins.
    pub fn find_whitelist_rule(&self, query: &RequestQuery<'_>) -> Option<Arc<UrlFilterRule>> {
        let tokens = url_tokens(query.url);
        self.find_exception(&tokens, query, true)
    }

    /// `$csp` rules for a document or frame, minus directives disabled by
    /// `$csp` exceptions. A `$csp` exception without a directive disables all.
    pub fn find_csp_rules(&self, query: &RequestQuery<'_>) -> Vec<Arc<UrlFilterRule>> {
        if !RequestType::CSP_TARGETS.intersects(query.request_type) {
            return Vec::new();
        }

        let mut disabled: Vec<&str> = Vec::new();
        for (_, rule) in self.csp_rules.exceptions() {
            if rule.is_filtered(query.url, query.third_party, query.request_type)
                && rule.is_permitted(query.document_host)
            {
                match rule.csp_directive() {
                    Some("") | None => return Vec::new(),
                    Some(directive) => disabled.push(directive),
                }
            }
        }

        let mut out: Vec<Arc<UrlFilterRule>> = Vec::new();
        for (_, entry) in self.csp_rules.blocking() {
            let rule = &entry.rule;
            let directive = rule.csp_directive().unwrap_or("");
            if disabled.contains(&directive) || out.iter().any(|r| r.csp_directive() == Some(directive)) {
                continue;
            }
            if rule.is_filtered(query.url, query.third_party, query.request_type)
                && entry.is_permitted(query.document_host)
            {
                out.push(Arc::clone(rule));
            }
        }
        out
    }

    fn find_blocking(
        &self,
        candidates: &[EntryId],
        query: &RequestQuery<'_>,
        generic_block: bool,
        important: bool,
    ) -> Option<Arc<UrlFilterRule>> {
        candidates.iter().find_map(|id| {
            let entry = self.rules.blocking_entry(*id)?;
            let rule = &entry.rule;
            let ok = rule.is_important() == important
                && !(generic_block && rule.is_generic())
                && rule.is_filtered(query.url, query.third_party, query.request_type)
                && entry.is_permitted(query.document_host);
            ok.then(|| Arc::clone(rule))
        })
    }

    fn find_exception(&self, tokens: &[String], query: &RequestQuery<'_>, page_level: bool) -> Option<Arc<UrlFilterRule>> {
        let mut first: Option<&Arc<UrlFilterRule>> = None;
        for id in self.exception_index.candidates(tokens) {
            let rule = match self.rules.exception(id) {
                Some(r) => r,
                None => continue,
            };
            // $elemhide, $generichide and friends say nothing about loading resources.
            let page_only = rule.options().intersects(UrlRuleOptions::EXCEPTION_ONLY) && !rule.is_url_block();
            if page_only && !page_level {
                continue;
            }
            if !rule.is_filtered(query.url, query.third_party, query.request_type)
                || !rule.is_permitted(query.document_host)
            {
                continue;
            }
            if !page_level || rule.is_url_block() {
                return Some(Arc::clone(rule));
            }
            first.get_or_insert(rule);
        }
        first.cloned()
    }

    /// All rules in insertion order, CSP rules last.
    pub fn rules(&self) -> Vec<Arc<UrlFilterRule>> {
        let mut all = self.rules.rules();
        all.extend(self.csp_rules.rules());
        all
    }

    pub fn len(&self) -> usize {
        self.rules.len() + self.csp_rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty() && self.csp_rules.is_empty()
    }
}
