//! Blocking rules paired with their exceptions.
//!
//! An exception applies to every blocking rule with the same content. The
//! pairing happens when either side is added and is undone when the
//! exception is removed, so queries only look at a rule's own entry.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::rule::ContentRule;

/// Insertion-ordered identifier of an entry within one set.
pub(crate) type EntryId = u64;

#[derive(Debug)]
pub(crate) struct Entry<R> {
    pub rule: Arc<R>,
    /// Exceptions with equal content; each one switches the rule off on its domains.
    exceptions: Vec<Arc<R>>,
}

impl<R: ContentRule> Entry<R> {
    /// Rule domains minus the domains of matching exceptions.
    pub fn is_permitted(&self, domain: &str) -> bool {
        self.rule.is_permitted(domain) && !self.exceptions.iter().any(|e| e.is_permitted(domain))
    }

    #[cfg(test)]
    pub fn exception_count(&self) -> usize {
        self.exceptions.len()
    }
}

#[derive(Debug)]
pub(crate) struct RuleSet<R> {
    next_id: EntryId,
    blocking: BTreeMap<EntryId, Entry<R>>,
    blocking_by_content: HashMap<String, Vec<EntryId>>,
    exceptions: BTreeMap<EntryId, Arc<R>>,
    exceptions_by_content: HashMap<String, Vec<EntryId>>,
}

impl<R> Default for RuleSet<R> {
    fn default() -> Self {
        Self {
            next_id: 0,
            blocking: BTreeMap::new(),
            blocking_by_content: HashMap::new(),
            exceptions: BTreeMap::new(),
            exceptions_by_content: HashMap::new(),
        }
    }
}

impl<R: ContentRule> RuleSet<R> {
    pub fn add(&mut self, rule: Arc<R>) -> EntryId {
        let id = self.next_id;
        self.next_id += 1;
        let content = rule.content().to_string();

        if rule.is_whitelist() {
            if let Some(ids) = self.blocking_by_content.get(&content) {
                for bid in ids {
                    if let Some(entry) = self.blocking.get_mut(bid) {
                        entry.exceptions.push(Arc::clone(&rule));
                    }
                }
            }
            self.exceptions.insert(id, rule);
            self.exceptions_by_content.entry(content).or_default().push(id);
        } else {
            let exceptions = self
                .exceptions_by_content
                .get(&content)
                .map(|ids| ids.iter().filter_map(|eid| self.exceptions.get(eid)).cloned().collect())
                .unwrap_or_default();
            self.blocking.insert(id, Entry { rule, exceptions });
            self.blocking_by_content.entry(content).or_default().push(id);
        }
        id
    }

    /// Remove every rule whose text equals `text`. Returns what was removed.
    pub fn remove_by_text(&mut self, text: &str) -> Vec<(EntryId, Arc<R>)> {
        let mut removed = Vec::new();

        let blocking_ids: Vec<EntryId> = self
            .blocking
            .iter()
            .filter(|(_, e)| e.rule.rule_text() == text)
            .map(|(id, _)| *id)
            .collect();
        for id in blocking_ids {
            if let Some(entry) = self.blocking.remove(&id) {
                detach(&mut self.blocking_by_content, entry.rule.content(), id);
                removed.push((id, entry.rule));
            }
        }

        let exception_ids: Vec<EntryId> = self
            .exceptions
            .iter()
            .filter(|(_, r)| r.rule_text() == text)
            .map(|(id, _)| *id)
            .collect();
        for id in exception_ids {
            if let Some(rule) = self.exceptions.remove(&id) {
                detach(&mut self.exceptions_by_content, rule.content(), id);
                if let Some(ids) = self.blocking_by_content.get(rule.content()) {
                    for bid in ids {
                        if let Some(entry) = self.blocking.get_mut(bid) {
                            entry.exceptions.retain(|e| !Arc::ptr_eq(e, &rule));
                        }
                    }
                }
                removed.push((id, rule));
            }
        }

        removed
    }

    pub fn blocking(&self) -> impl Iterator<Item = (EntryId, &Entry<R>)> {
        self.blocking.iter().map(|(id, e)| (*id, e))
    }

    pub fn blocking_entry(&self, id: EntryId) -> Option<&Entry<R>> {
        self.blocking.get(&id)
    }

    pub fn exceptions(&self) -> impl Iterator<Item = (EntryId, &Arc<R>)> {
        self.exceptions.iter().map(|(id, r)| (*id, r))
    }

    pub fn exception(&self, id: EntryId) -> Option<&Arc<R>> {
        self.exceptions.get(&id)
    }

    /// All rules, blocking and exceptions, in insertion order.
    pub fn rules(&self) -> Vec<Arc<R>> {
        let mut all: Vec<(EntryId, &Arc<R>)> = self
            .blocking
            .iter()
            .map(|(id, e)| (*id, &e.rule))
            .chain(self.exceptions.iter().map(|(id, r)| (*id, r)))
            .collect();
        all.sort_by_key(|(id, _)| *id);
        all.into_iter().map(|(_, r)| Arc::clone(r)).collect()
    }

    pub fn len(&self) -> usize {
        self.blocking.len() + self.exceptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn detach(index: &mut HashMap<String, Vec<EntryId>>, content: &str, id: EntryId) {
    if let Some(ids) = index.get_mut(content) {
        ids.retain(|x| *x != id);
        if ids.is_empty() {
            index.remove(content);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{CssFilterRule, FilterRule};

    fn css(text: &str) -> Arc<CssFilterRule> {
        Arc::new(CssFilterRule::parse(text, 1).unwrap())
    }

    #[test]
    fn test_exception_narrows_either_order() {
        let mut set = RuleSet::default();
        let id = set.add(css("##.ad"));
        set.add(css("example.com#@#.ad"));
        let late = set.add(css("##.ad"));

        for bid in [id, late] {
            let entry = set.blocking_entry(bid).unwrap();
            assert_eq!(entry.exception_count(), 1);
            assert!(!entry.is_permitted("example.com"));
            assert!(!entry.is_permitted("www.example.com"));
            assert!(entry.is_permitted("other.org"));
        }
    }

    #[test]
    fn test_removing_exception_rolls_back() {
        let mut set = RuleSet::default();
        let id = set.add(css("##.ad"));
        set.add(css("example.com#@#.ad"));
        assert!(!set.blocking_entry(id).unwrap().is_permitted("example.com"));

        let removed = set.remove_by_text("example.com#@#.ad");
        assert_eq!(removed.len(), 1);
        assert!(set.blocking_entry(id).unwrap().is_permitted("example.com"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_other_content_untouched() {
        let mut set = RuleSet::default();
        let id = set.add(css("##.banner"));
        set.add(css("example.com#@#.ad"));
        assert!(set.blocking_entry(id).unwrap().is_permitted("example.com"));
    }

    #[test]
    fn test_rules_in_insertion_order() {
        let mut set = RuleSet::default();
        set.add(css("##.a"));
        set.add(css("x.com#@#.b"));
        set.add(css("##.c"));
        let texts: Vec<String> = set.rules().iter().map(|r| r.rule_text().to_string()).collect();
        assert_eq!(texts, vec!["##.a", "x.com#@#.b", "##.c"]);
    }
}
