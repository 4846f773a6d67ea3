use std::collections::HashSet;

use abu_core::rule::{FilterRule, Rule};

pub struct DedupStats {
    pub before: usize,
    pub after: usize,
    pub deduped: usize,
}

/// Drop rules whose text was already seen, in this batch or in `seen`.
///
/// `seen` carries over between calls so several filters can be
/// deduplicated in order, the first occurrence winning.
pub fn dedup_rules(rules: &mut Vec<Rule>, seen: &mut HashSet<String>) -> DedupStats {
    let before = rules.len();
    rules.retain(|rule| seen.insert(rule.rule_text().to_string()));
    let after = rules.len();

    DedupStats {
        before,
        after,
        deduped: before - after,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::create_rule;

    fn rules(texts: &[&str], filter_id: u32) -> Vec<Rule> {
        texts.iter().filter_map(|t| create_rule(t, filter_id)).collect()
    }

    #[test]
    fn test_first_occurrence_wins_across_filters() {
        let mut seen = HashSet::new();

        let mut first = rules(&["||ads.net^", "##.ad", "||ads.net^"], 1);
        let stats = dedup_rules(&mut first, &mut seen);
        assert_eq!(stats.before, 3);
        assert_eq!(stats.after, 2);
        assert_eq!(stats.deduped, 1);

        let mut second = rules(&["##.ad", "##.banner"], 2);
        dedup_rules(&mut second, &mut seen);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].rule_text(), "##.banner");
        assert_eq!(first[1].filter_id(), 1);
    }
}
