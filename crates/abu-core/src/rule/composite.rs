use super::{FilterRule, Rule, RuleMeta};
use crate::types::FilterId;

/// A source line that converted into several rules, e.g. an ABP snippet
/// list. Every part carries the source line as its rule text, so removing
/// the line removes all of them.
#[derive(Debug, Clone)]
pub struct CompositeRule {
    pub(crate) meta: RuleMeta,
    rules: Vec<Rule>,
}

impl CompositeRule {
    pub fn new(rule_text: &str, filter_id: FilterId, rules: Vec<Rule>) -> Self {
        let rules = rules
            .into_iter()
            .map(|mut r| {
                r.restore_original_text(rule_text);
                r
            })
            .collect();
        Self {
            meta: RuleMeta::new(rule_text, filter_id),
            rules,
        }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn into_rules(self) -> Vec<Rule> {
        self.rules
    }
}

impl FilterRule for CompositeRule {
    fn meta(&self) -> &RuleMeta {
        &self.meta
    }

    fn is_whitelist(&self) -> bool {
        !self.rules.is_empty() && self.rules.iter().all(|r| r.is_whitelist())
    }

    fn is_permitted(&self, domain: &str) -> bool {
        self.rules.iter().any(|r| r.is_permitted(domain))
    }
}
