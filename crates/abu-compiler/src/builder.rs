//! Rule builder: text line to [`Rule`].

use abu_core::rule::{
    is_cosmetic_rule, is_script_rule, is_scriptlet_rule, CompositeRule, CssFilterRule, Rule, ScriptFilterRule,
    ScriptletRule, UrlFilterRule,
};
use abu_core::types::FilterId;
use abu_core::RuleError;

use crate::converter::convert_rule;

const COMMENT_MARKER: char = '!';
const WHITELIST_MARKER: &str = "@@";
/// HTML filtering rules, which the engine does not apply.
const HTML_FILTER_MARKER: &str = "##^";

/// Comment, `[Adblock Plus 2.0]`-style header or HTML filtering rule.
pub fn is_ignored_line(text: &str) -> bool {
    text.starts_with(COMMENT_MARKER)
        || (text.starts_with('[') && text.ends_with(']'))
        || text.contains(HTML_FILTER_MARKER)
}

/// Parse one canonical line. `Ok(None)` for lines that carry no rule.
pub fn parse_rule(text: &str, filter_id: FilterId) -> Result<Option<Rule>, RuleError> {
    let text = text.trim();
    if text.is_empty() || is_ignored_line(text) {
        return Ok(None);
    }

    let rule = if text.starts_with(WHITELIST_MARKER) {
        Rule::Url(UrlFilterRule::parse(text, filter_id)?)
    } else if is_cosmetic_rule(text) {
        Rule::Css(CssFilterRule::parse(text, filter_id)?)
    } else if is_script_rule(text) {
        if is_scriptlet_rule(text) {
            Rule::Scriptlet(ScriptletRule::parse(text, filter_id)?)
        } else {
            Rule::Script(ScriptFilterRule::parse(text, filter_id)?)
        }
    } else {
        Rule::Url(UrlFilterRule::parse(text, filter_id)?)
    };
    Ok(Some(rule))
}

fn build_single(text: &str, filter_id: FilterId) -> Option<Rule> {
    match parse_rule(text, filter_id) {
        Ok(rule) => rule,
        Err(e) => {
            log::debug!("Cannot create rule from filter {}: {}, cause {}", filter_id, text, e);
            None
        }
    }
}

/// Convert and parse a line. Malformed lines are logged and yield `None`.
///
/// A line that converts into several lines becomes a [`CompositeRule`]
/// holding the parts that parsed; if none did, the line yields `None`.
pub fn create_rule(text: &str, filter_id: FilterId) -> Option<Rule> {
    let text = text.trim();
    if text.is_empty() || is_ignored_line(text) {
        return None;
    }

    let converted = match convert_rule(text) {
        Ok(lines) => lines,
        Err(e) => {
            log::debug!("Cannot convert rule from filter {}: {}, cause {}", filter_id, text, e);
            return None;
        }
    };

    if converted.len() > 1 {
        let parts: Vec<Rule> = converted.iter().filter_map(|line| build_single(line, filter_id)).collect();
        if parts.is_empty() {
            return None;
        }
        return Some(Rule::Composite(CompositeRule::new(text, filter_id, parts)));
    }

    let line = converted.into_iter().next()?;
    let mut rule = build_single(&line, filter_id)?;
    if line != text {
        rule.restore_original_text(text);
    }
    Some(rule)
}

/// Result of compiling one filter's rule lines.
#[derive(Debug, Default)]
pub struct CompiledList {
    pub rules: Vec<Rule>,
    /// Non-empty, non-comment lines that produced no rule.
    pub dropped: usize,
}

/// Compile every line of a filter.
pub fn compile_filter_list<I, S>(lines: I, filter_id: FilterId) -> CompiledList
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = CompiledList::default();
    for line in lines {
        let line = line.as_ref().trim();
        if line.is_empty() || is_ignored_line(line) {
            continue;
        }
        match create_rule(line, filter_id) {
            Some(rule) => out.rules.push(rule),
            None => out.dropped += 1,
        }
    }
    out
}
