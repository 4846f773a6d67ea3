//! Syntax normalization.
//!
//! Lists written for other blockers use a few constructs the core does not
//! parse directly. [`convert_rule`] rewrites them into canonical lines; a
//! line that needs nothing comes back unchanged.
//!
//! | input | output |
//! |---|---|
//! | `a.com##+js(set-constant, x, 1)` | `a.com#%#//scriptlet('ubo-set-constant', 'x', '1')` |
//! | `a.com##.ad:style(color: red)` | `a.com#$#.ad { color: red }` |
//! | `a.com#$#abort-on-property-read x; log y` | one `#%#//scriptlet('abp-…')` line per snippet |
//! | `||a.com^$3p,xhr` | `||a.com^$third-party,xmlhttprequest` |
//! | `||a.com^$all` | plain, `$document` and `$popup` lines |

use abu_core::rule::{is_cosmetic_rule, is_script_rule, CosmeticMarker};

use crate::error::ConvertError;

const UBO_SCRIPTLET_MARKER: &str = "##+js(";
const UBO_SCRIPTLET_EXCEPTION_MARKER: &str = "#@#+js(";
const STYLE_PSEUDO: &str = ":style(";

/// Rewrite one rule line into one or more canonical lines.
pub fn convert_rule(text: &str) -> Result<Vec<String>, ConvertError> {
    let text = text.trim();
    if text.is_empty() || text.starts_with('!') {
        return Ok(vec![text.to_string()]);
    }
    if let Some(converted) = convert_ubo_scriptlet(text) {
        return converted;
    }
    if let Some(converted) = convert_style(text) {
        return converted;
    }
    if let Some(converted) = convert_abp_snippet(text) {
        return converted;
    }
    if let Some(lines) = convert_options(text) {
        return Ok(lines);
    }
    Ok(vec![text.to_string()])
}

// =============================================================================
// Scriptlets
// =============================================================================

fn quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn scriptlet_line(domains: &str, exception: bool, name: &str, args: &[String]) -> String {
    let marker = if exception { "#@%#" } else { "#%#" };
    let mut parts = vec![quote(name)];
    parts.extend(args.iter().map(|a| quote(a)));
    format!("{}{}//scriptlet({})", domains, marker, parts.join(", "))
}

/// Split on `sep`, honouring `\` escapes.
fn split_escaped(s: &str, sep: char) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                if next != sep {
                    current.push('\\');
                }
                current.push(next);
            }
        } else if c == sep {
            out.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    out.push(current);
    out
}

fn convert_ubo_scriptlet(text: &str) -> Option<Result<Vec<String>, ConvertError>> {
    let (pos, marker, exception) = if let Some(p) = text.find(UBO_SCRIPTLET_EXCEPTION_MARKER) {
        (p, UBO_SCRIPTLET_EXCEPTION_MARKER, true)
    } else {
        (text.find(UBO_SCRIPTLET_MARKER)?, UBO_SCRIPTLET_MARKER, false)
    };

    let domains = &text[..pos];
    let inner = match text[pos + marker.len()..].strip_suffix(')') {
        Some(inner) => inner,
        None => return Some(Err(ConvertError::MalformedScriptlet(text.to_string()))),
    };

    let mut args: Vec<String> = split_escaped(inner, ',').iter().map(|a| a.trim().to_string()).collect();
    let name = args.remove(0);
    let name = name.trim_end_matches(".js");
    if name.is_empty() {
        return Some(Err(ConvertError::MalformedScriptlet(text.to_string())));
    }

    Some(Ok(vec![scriptlet_line(domains, exception, &format!("ubo-{}", name), &args)]))
}

fn convert_abp_snippet(text: &str) -> Option<Result<Vec<String>, ConvertError>> {
    let (pos, marker) = CosmeticMarker::find(text)?;
    if !matches!(marker, CosmeticMarker::Inject | CosmeticMarker::InjectException) {
        return None;
    }
    let body = text[pos + marker.as_str().len()..].trim();
    if body.contains('{') {
        return None;
    }

    let domains = &text[..pos];
    let exception = marker.is_exception();
    let lines: Vec<String> = body
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|snippet| {
            let mut words = snippet.split_whitespace();
            let name = words.next()?;
            let args: Vec<String> = words.map(|w| w.trim_matches('\'').trim_matches('"').to_string()).collect();
            Some(scriptlet_line(domains, exception, &format!("abp-{}", name), &args))
        })
        .collect();

    if lines.is_empty() {
        return Some(Err(ConvertError::EmptySnippet(text.to_string())));
    }
    Some(Ok(lines))
}

// =============================================================================
// Cosmetic :style()
// =============================================================================

fn convert_style(text: &str) -> Option<Result<Vec<String>, ConvertError>> {
    if !text.contains(STYLE_PSEUDO) {
        return None;
    }
    let (pos, marker) = CosmeticMarker::find(text)?;
    let inject_marker = match marker {
        CosmeticMarker::Hide => CosmeticMarker::Inject,
        CosmeticMarker::HideException => CosmeticMarker::InjectException,
        CosmeticMarker::ExtHide => CosmeticMarker::ExtInject,
        CosmeticMarker::ExtHideException => CosmeticMarker::ExtInjectException,
        _ => return None,
    };

    let body = &text[pos + marker.as_str().len()..];
    let style_pos = body.rfind(STYLE_PSEUDO)?;
    let selector = body[..style_pos].trim();
    let declarations = match body[style_pos + STYLE_PSEUDO.len()..].strip_suffix(')') {
        Some(d) if !selector.is_empty() => d.trim(),
        _ => return Some(Err(ConvertError::MalformedStyle(text.to_string()))),
    };

    Some(Ok(vec![format!(
        "{}{}{} {{ {} }}",
        &text[..pos],
        inject_marker.as_str(),
        selector,
        declarations
    )]))
}

// =============================================================================
// URL rule options
// =============================================================================

fn option_alias(name: &str) -> Option<&'static str> {
    let alias = match name {
        "1p" | "first-party" => "~third-party",
        "3p" => "third-party",
        "xhr" => "xmlhttprequest",
        "css" => "stylesheet",
        "frame" => "subdocument",
        "ghide" => "generichide",
        "doc" => "document",
        _ => return None,
    };
    Some(alias)
}

fn convert_options(text: &str) -> Option<Vec<String>> {
    if is_cosmetic_rule(text) || is_script_rule(text) {
        return None;
    }
    let dollar = text.rfind('$')?;
    let pattern = &text[..dollar];
    let options = &text[dollar + 1..];

    let mut changed = false;
    let mut has_all = false;
    let mut out: Vec<String> = Vec::new();

    for opt in options.split(',') {
        let opt = opt.trim();
        let (negated, name) = match opt.strip_prefix('~') {
            Some(rest) => (true, rest),
            None => (false, opt),
        };
        let lower = name.to_ascii_lowercase();

        if lower == "all" && !negated {
            has_all = true;
            changed = true;
            continue;
        }

        match option_alias(&lower) {
            Some(alias) => {
                changed = true;
                let (alias_negated, alias_name) = match alias.strip_prefix('~') {
                    Some(rest) => (true, rest),
                    None => (false, alias),
                };
                let prefix = if negated != alias_negated { "~" } else { "" };
                out.push(format!("{}{}", prefix, alias_name));
            }
            None => out.push(opt.to_string()),
        }
    }

    if !changed {
        return None;
    }

    let build = |extra: Option<&str>| {
        let mut opts: Vec<&str> = out.iter().map(String::as_str).filter(|o| !o.is_empty()).collect();
        if let Some(e) = extra {
            opts.push(e);
        }
        if opts.is_empty() {
            pattern.to_string()
        } else {
            format!("{}${}", pattern, opts.join(","))
        }
    };

    if has_all {
        Some(vec![build(None), build(Some("document")), build(Some("popup"))])
    } else {
        Some(vec![build(None)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough() {
        assert_eq!(convert_rule("||example.com^").unwrap(), vec!["||example.com^"]);
        assert_eq!(convert_rule("example.com##.ad").unwrap(), vec!["example.com##.ad"]);
        assert_eq!(convert_rule("/ad$/").unwrap(), vec!["/ad$/"]);
        assert_eq!(convert_rule("! comment").unwrap(), vec!["! comment"]);
    }

    #[test]
    fn test_ubo_scriptlet() {
        assert_eq!(
            convert_rule("example.com##+js(set-constant.js, ads, false)").unwrap(),
            vec!["example.com#%#//scriptlet('ubo-set-constant', 'ads', 'false')"]
        );
        assert_eq!(
            convert_rule("example.com#@#+js(nowebrtc)").unwrap(),
            vec!["example.com#@%#//scriptlet('ubo-nowebrtc')"]
        );
        assert_eq!(
            convert_rule(r"##+js(remove-attr, href\, src)").unwrap(),
            vec!["#%#//scriptlet('ubo-remove-attr', 'href, src')"]
        );
        assert!(convert_rule("example.com##+js(noeval").is_err());
    }

    #[test]
    fn test_style() {
        assert_eq!(
            convert_rule("example.com##.ad:style(visibility: hidden !important)").unwrap(),
            vec!["example.com#$#.ad { visibility: hidden !important }"]
        );
        assert_eq!(
            convert_rule("example.com#@#.ad:style(color: red)").unwrap(),
            vec!["example.com#@$#.ad { color: red }"]
        );
        assert!(convert_rule("example.com##:style(color: red)").is_err());
    }

    #[test]
    fn test_abp_snippets() {
        let lines = convert_rule("example.com#$#abort-on-property-read adsbygoogle; log 'hello'").unwrap();
        assert_eq!(
            lines,
            vec![
                "example.com#%#//scriptlet('abp-abort-on-property-read', 'adsbygoogle')",
                "example.com#%#//scriptlet('abp-log', 'hello')",
            ]
        );
        assert_eq!(
            convert_rule("example.com#$#body { color: red }").unwrap(),
            vec!["example.com#$#body { color: red }"]
        );
        assert!(convert_rule("example.com#$#;;").is_err());
    }

    #[test]
    fn test_option_aliases() {
        assert_eq!(
            convert_rule("||ads.net^$3p,xhr,css").unwrap(),
            vec!["||ads.net^$third-party,xmlhttprequest,stylesheet"]
        );
        assert_eq!(convert_rule("||ads.net^$1p").unwrap(), vec!["||ads.net^$~third-party"]);
        assert_eq!(convert_rule("||ads.net^$~1p").unwrap(), vec!["||ads.net^$third-party"]);
        assert_eq!(convert_rule("@@||a.com^$ghide").unwrap(), vec!["@@||a.com^$generichide"]);
    }

    #[test]
    fn test_all_option() {
        assert_eq!(
            convert_rule("||ads.net^$all").unwrap(),
            vec!["||ads.net^", "||ads.net^$document", "||ads.net^$popup"]
        );
        assert_eq!(
            convert_rule("||ads.net^$all,domain=a.com").unwrap(),
            vec![
                "||ads.net^$domain=a.com",
                "||ads.net^$domain=a.com,document",
                "||ads.net^$domain=a.com,popup"
            ]
        );
    }
}
