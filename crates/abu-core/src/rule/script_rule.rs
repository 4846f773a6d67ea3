//! JavaScript injection rules (`#%#`) and scriptlet calls (`#%#//scriptlet(...)`).

use serde::Serialize;

use super::{ContentRule, DomainRestrictions, FilterRule, RuleMeta};
use crate::error::RuleError;
use crate::types::FilterId;

const SCRIPT_MARKER: &str = "#%#";
const SCRIPT_EXCEPTION_MARKER: &str = "#@%#";
const SCRIPTLET_PREFIX: &str = "//scriptlet(";

/// Locate a script marker after a plausible domain list.
fn find_script_marker(text: &str) -> Option<(usize, bool)> {
    let pos = text.find('#')?;
    let prefix = &text[..pos];
    if !prefix
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_' | b',' | b'~' | b'*') || b >= 0x80)
    {
        return None;
    }
    let rest = &text[pos..];
    if rest.starts_with(SCRIPT_EXCEPTION_MARKER) {
        Some((pos, true))
    } else if rest.starts_with(SCRIPT_MARKER) {
        Some((pos, false))
    } else {
        None
    }
}

/// Whether the line is a `#%#` / `#@%#` rule, scriptlet or raw script.
pub fn is_script_rule(text: &str) -> bool {
    find_script_marker(text.trim()).is_some()
}

struct ScriptParts<'a> {
    whitelist: bool,
    domains: DomainRestrictions,
    body: &'a str,
}

fn split_script_rule(text: &str) -> Result<ScriptParts<'_>, RuleError> {
    let (pos, whitelist) = find_script_marker(text).ok_or_else(|| RuleError::NotScript(text.to_string()))?;
    let marker_len = if whitelist { SCRIPT_EXCEPTION_MARKER.len() } else { SCRIPT_MARKER.len() };
    let body = text[pos + marker_len..].trim();
    if body.is_empty() {
        return Err(RuleError::EmptyContent(text.to_string()));
    }
    let domains = if pos == 0 {
        DomainRestrictions::default()
    } else {
        DomainRestrictions::parse(&text[..pos], ',')?
    };
    Ok(ScriptParts { whitelist, domains, body })
}

// =============================================================================
// Raw script
// =============================================================================

/// `example.com#%#window.adsbygoogle = [];`
#[derive(Debug, Clone)]
pub struct ScriptFilterRule {
    pub(crate) meta: RuleMeta,
    whitelist: bool,
    script: String,
    domains: DomainRestrictions,
}

impl ScriptFilterRule {
    pub fn parse(text: &str, filter_id: FilterId) -> Result<Self, RuleError> {
        let text = text.trim();
        let parts = split_script_rule(text)?;
        if parts.body.starts_with(SCRIPTLET_PREFIX) {
            return Err(RuleError::NotScript(text.to_string()));
        }
        Ok(Self {
            meta: RuleMeta::new(text, filter_id),
            whitelist: parts.whitelist,
            script: parts.body.to_string(),
            domains: parts.domains,
        })
    }

    pub fn script(&self) -> &str {
        &self.script
    }
}

impl FilterRule for ScriptFilterRule {
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

impl ContentRule for ScriptFilterRule {
    fn content(&self) -> &str {
        &self.script
    }

    fn domains(&self) -> &DomainRestrictions {
        &self.domains
    }
}

// =============================================================================
// Scriptlet
// =============================================================================

/// Name and arguments of a scriptlet invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptletCall {
    pub name: String,
    pub args: Vec<String>,
}

impl ScriptletCall {
    /// Parse the argument list of `//scriptlet('name', 'arg', "arg")`.
    pub fn parse(body: &str) -> Option<Self> {
        let inner = body.strip_prefix(SCRIPTLET_PREFIX)?.trim_end().strip_suffix(')')?;
        let mut values = parse_quoted_args(inner)?.into_iter();
        let name = values.next().filter(|n| !n.is_empty())?;
        Some(Self {
            name,
            args: values.collect(),
        })
    }
}

fn parse_quoted_args(s: &str) -> Option<Vec<String>> {
    let mut out = Vec::new();
    let mut chars = s.chars().peekable();
    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace() || *c == ',') {
            chars.next();
        }
        let quote = match chars.next() {
            None => return Some(out),
            Some(q @ ('\'' | '"')) => q,
            Some(_) => return None,
        };
        let mut value = String::new();
        loop {
            match chars.next()? {
                '\\' => value.push(chars.next()?),
                c if c == quote => break,
                c => value.push(c),
            }
        }
        out.push(value);
    }
}

/// `example.com#%#//scriptlet('abort-on-property-read', 'alert')`
#[derive(Debug, Clone)]
pub struct ScriptletRule {
    pub(crate) meta: RuleMeta,
    whitelist: bool,
    call: ScriptletCall,
    /// JSON form of the call; equal calls written with different quoting compare equal.
    content: String,
    domains: DomainRestrictions,
}

impl ScriptletRule {
    pub fn parse(text: &str, filter_id: FilterId) -> Result<Self, RuleError> {
        let text = text.trim();
        let parts = split_script_rule(text)?;
        let call = ScriptletCall::parse(parts.body).ok_or_else(|| RuleError::InvalidScriptlet(text.to_string()))?;
        let content = serde_json::json!({ "name": call.name, "args": call.args }).to_string();
        Ok(Self {
            meta: RuleMeta::new(text, filter_id),
            whitelist: parts.whitelist,
            call,
            content,
            domains: parts.domains,
        })
    }

    pub fn call(&self) -> &ScriptletCall {
        &self.call
    }

    /// Invocation handed to the injected scriptlet library.
    pub fn script(&self) -> String {
        format!(
            "(function(source) {{ try {{ if (window.abuScriptlets) {{ window.abuScriptlets.invoke(source); }} }} catch (e) {{ console.error(e); }} }})({});",
            self.content
        )
    }
}

/// Whether a `#%#` body is a scriptlet call rather than raw JavaScript.
pub fn is_scriptlet_rule(text: &str) -> bool {
    split_script_rule(text.trim()).map_or(false, |p| p.body.starts_with(SCRIPTLET_PREFIX))
}

impl FilterRule for ScriptletRule {
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

impl ContentRule for ScriptletRule {
    fn content(&self) -> &str {
        &self.content
    }

    fn domains(&self) -> &DomainRestrictions {
        &self.domains
    }
}
