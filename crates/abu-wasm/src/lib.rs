//! WebAssembly bindings for the ABU request filter

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use wasm_bindgen::prelude::*;

use abu_compiler::{compile_filter_list, create_rule, dedup_rules};
use abu_core::blocking::{self, get_blocked_response_by_rule, BlockedResponse};
use abu_core::rule::{FilterRule, UrlFilterRule};
use abu_core::types::{ANTI_CIRCUMVENTION, USER_FILTER_ID};
use abu_core::{FilterId, RequestFilter, RequestType, WhitelistEngine};

#[derive(Default)]
struct Engine {
    filter: RequestFilter,
    whitelist: WhitelistEngine,
}

#[derive(Debug, Default, PartialEq)]
struct BuildStats {
    rules: usize,
    dropped: usize,
    deduped: usize,
}

static ENGINE: RwLock<Option<Engine>> = RwLock::new(None);

/// Compile lists numbered from 1 in order. Earlier lists win duplicates.
fn build_filter(texts: &[String]) -> (RequestFilter, BuildStats) {
    let mut filter = RequestFilter::new();
    let mut seen = HashSet::new();
    let mut stats = BuildStats::default();

    for (index, text) in texts.iter().enumerate() {
        let filter_id = FilterId::try_from(index + 1).unwrap_or(FilterId::MAX);
        let mut compiled = compile_filter_list(text.lines(), filter_id);
        let dedup = dedup_rules(&mut compiled.rules, &mut seen);
        stats.rules += dedup.after;
        stats.dropped += compiled.dropped;
        stats.deduped += dedup.deduped;
        for rule in compiled.rules {
            filter.add_rule(rule, filter_id != ANTI_CIRCUMVENTION);
        }
    }
    (filter, stats)
}

fn set(target: &js_sys::Object, key: &str, value: &JsValue) {
    let _ = js_sys::Reflect::set(target, &key.into(), value);
}

fn string_array<I, S>(values: I) -> js_sys::Array
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let array = js_sys::Array::new();
    for value in values {
        array.push(&JsValue::from_str(value.as_ref()));
    }
    array
}

fn strings_from(value: &JsValue, what: &str) -> Result<Vec<String>, JsValue> {
    js_sys::Array::from(value)
        .iter()
        .map(|v| v.as_string().ok_or_else(|| JsValue::from_str(&format!("{} must be a string", what))))
        .collect()
}

fn rule_object(rule: &UrlFilterRule) -> js_sys::Object {
    let obj = js_sys::Object::new();
    set(&obj, "ruleText", &JsValue::from_str(rule.rule_text()));
    set(&obj, "filterId", &JsValue::from(rule.filter_id()));
    set(&obj, "whitelist", &JsValue::from(rule.is_whitelist()));
    obj
}

/// Replace the request filter with one built from `list_texts`, an array of
/// filter list texts. Whitelisted domains survive.
#[wasm_bindgen]
pub fn init(list_texts: JsValue) -> Result<JsValue, JsValue> {
    let texts = strings_from(&list_texts, "List text")?;
    if texts.is_empty() {
        return Err(JsValue::from_str("No list texts provided"));
    }

    let (filter, stats) = build_filter(&texts);
    let rules_count = filter.rules_count();
    {
        let mut engine = ENGINE.write();
        let whitelist = engine.take().map(|e| e.whitelist).unwrap_or_default();
        *engine = Some(Engine { filter, whitelist });
    }

    if stats.dropped > 0 {
        web_sys::console::warn_1(&JsValue::from_str(&format!("{} filter lines were not understood", stats.dropped)));
    }

    let result = js_sys::Object::new();
    set(&result, "rulesCount", &JsValue::from(rules_count as u32));
    set(&result, "dropped", &JsValue::from(stats.dropped as u32));
    set(&result, "deduped", &JsValue::from(stats.deduped as u32));
    Ok(result.into())
}

#[wasm_bindgen]
pub fn is_initialized() -> bool {
    ENGINE.read().is_some()
}

#[wasm_bindgen]
pub fn rules_count() -> u32 {
    ENGINE.read().as_ref().map_or(0, |e| e.filter.rules_count() as u32)
}

/// Add user rules to the live filter. Returns the texts that became rules.
#[wasm_bindgen]
pub fn add_user_rules(text: &str) -> js_sys::Array {
    let mut guard = ENGINE.write();
    let engine = guard.get_or_insert_with(Engine::default);
    let rules: Vec<_> = text.lines().filter_map(|l| create_rule(l, USER_FILTER_ID)).collect();
    let added = string_array(rules.iter().map(|r| r.rule_text().to_string()));
    engine.filter.add_rules(rules);
    added
}

#[wasm_bindgen]
pub fn remove_user_rule(text: &str) -> bool {
    ENGINE
        .write()
        .as_mut()
        .map_or(false, |e| e.filter.remove_rule(text.trim()))
}

/// Replace the whitelisted domains.
#[wasm_bindgen]
pub fn set_whitelist(domains: JsValue) -> Result<(), JsValue> {
    let domains = strings_from(&domains, "Domain")?;
    let mut guard = ENGINE.write();
    let engine = guard.get_or_insert_with(Engine::default);
    engine.whitelist = WhitelistEngine::with_domains(&domains);
    Ok(())
}

#[wasm_bindgen]
pub fn whitelist_domains() -> js_sys::Array {
    match ENGINE.read().as_ref() {
        Some(engine) => string_array(engine.whitelist.whitelist_domains()),
        None => js_sys::Array::new(),
    }
}

/// Decision for one request: `{ blocked, redirectUrl?, rule? }`.
#[wasm_bindgen]
pub fn find_rule_for_request(url: &str, document_url: &str, request_type: &str) -> JsValue {
    let result = js_sys::Object::new();
    let guard = ENGINE.read();
    let Some(engine) = guard.as_ref() else {
        set(&result, "blocked", &JsValue::from(false));
        return result.into();
    };

    let rule = blocking::get_rule_for_request(
        &engine.filter,
        &engine.whitelist,
        url,
        document_url,
        RequestType::from_browser_type(request_type),
        None,
    );
    let response = get_blocked_response_by_rule(rule.as_deref());

    set(&result, "blocked", &JsValue::from(response.is_some()));
    if let Some(BlockedResponse::Redirect(target)) = response {
        set(&result, "redirectUrl", &JsValue::from_str(&target));
    }
    if let Some(rule) = rule {
        set(&result, "rule", &rule_object(&rule));
    }
    result.into()
}

#[wasm_bindgen]
pub fn should_block(url: &str, document_url: &str, request_type: &str) -> bool {
    let guard = ENGINE.read();
    let Some(engine) = guard.as_ref() else {
        return false;
    };
    let rule = blocking::get_rule_for_request(
        &engine.filter,
        &engine.whitelist,
        url,
        document_url,
        RequestType::from_browser_type(request_type),
        None,
    );
    blocking::is_request_blocked_by_rule(rule.as_deref())
}

/// Cosmetics for a page: `{ css, extendedCss }`, both empty when the page is
/// whitelisted or filtering is not initialized.
#[wasm_bindgen]
pub fn get_selectors_for_url(document_url: &str, extended: bool) -> JsValue {
    let result = js_sys::Object::new();
    let guard = ENGINE.read();
    let cosmetics = guard.as_ref().map(|engine| {
        let frame_rule = blocking::get_frame_whitelist_rule(&engine.filter, &engine.whitelist, document_url);
        blocking::get_selectors_and_scripts(&engine.filter, document_url, frame_rule.as_ref(), extended, false)
    });

    let selectors = cosmetics.and_then(|c| c.selectors).unwrap_or_default();
    set(&result, "css", &string_array(&selectors.css));
    set(&result, "extendedCss", &string_array(&selectors.extended_css));
    result.into()
}

/// Script to inject into a page, if any.
#[wasm_bindgen]
pub fn get_scripts_for_url(document_url: &str) -> Option<String> {
    let guard = ENGINE.read();
    let engine = guard.as_ref()?;
    let frame_rule = blocking::get_frame_whitelist_rule(&engine.filter, &engine.whitelist, document_url);
    blocking::get_selectors_and_scripts(&engine.filter, document_url, frame_rule.as_ref(), false, false).scripts
}

/// CSP directives to add to a document response.
#[wasm_bindgen]
pub fn find_csp_rules(url: &str, referrer: &str, request_type: &str) -> js_sys::Array {
    let guard = ENGINE.read();
    let Some(engine) = guard.as_ref() else {
        return js_sys::Array::new();
    };
    let frame_rule = blocking::get_frame_whitelist_rule(&engine.filter, &engine.whitelist, referrer);
    let rules: Vec<Arc<UrlFilterRule>> = blocking::get_csp_rules(
        &engine.filter,
        frame_rule.as_ref(),
        url,
        referrer,
        RequestType::from_browser_type(request_type),
    );
    string_array(rules.iter().filter_map(|r| r.csp_directive()))
}
