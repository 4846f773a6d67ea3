//! Script and scriptlet rule index.

use std::sync::Arc;

use super::rule_set::RuleSet;
use crate::rule::{ScriptFilterRule, ScriptletRule};

#[derive(Debug, Default)]
pub struct ScriptFilter {
    scripts: RuleSet<ScriptFilterRule>,
    scriptlets: RuleSet<ScriptletRule>,
}

impl ScriptFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_script(&mut self, rule: Arc<ScriptFilterRule>) {
        self.scripts.add(rule);
    }

    pub fn add_scriptlet(&mut self, rule: Arc<ScriptletRule>) {
        self.scriptlets.add(rule);
    }

    pub fn remove_rule(&mut self, rule_text: &str) -> usize {
        self.scripts.remove_by_text(rule_text).len() + self.scriptlets.remove_by_text(rule_text).len()
    }

    /// Scripts to inject on `domain`, raw scripts first, duplicates dropped.
    pub fn build_script(&self, domain: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();

        for (_, entry) in self.scripts.blocking() {
            if entry.is_permitted(domain) {
                let script = entry.rule.script();
                if !out.iter().any(|s| s == script) {
                    out.push(script.to_string());
                }
            }
        }

        for (_, entry) in self.scriptlets.blocking() {
            if entry.is_permitted(domain) {
                let script = entry.rule.script();
                if !out.contains(&script) {
                    out.push(script);
                }
            }
        }

        out
    }

    pub fn script_rules(&self) -> Vec<Arc<ScriptFilterRule>> {
        self.scripts.rules()
    }

    pub fn scriptlet_rules(&self) -> Vec<Arc<ScriptletRule>> {
        self.scriptlets.rules()
    }

    pub fn len(&self) -> usize {
        self.scripts.len() + self.scriptlets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty() && self.scriptlets.is_empty()
    }
}
