//! Request-level decisions built on [`RequestFilter`] and [`WhitelistEngine`]:
//! which rule governs a request, what to answer when it is blocked, and
//! which cosmetics a frame gets.

use std::sync::Arc;

use serde::Serialize;

use crate::filter::SelectorsResult;
use crate::request_filter::RequestFilter;
use crate::rule::{FilterRule, UrlFilterRule};
use crate::types::{CssOptions, RequestType, UrlRuleOptions};
use crate::whitelist::WhitelistEngine;

/// Redirect target for `$empty` rules.
pub const EMPTY_RESPONSE_URL: &str = "data:,";

/// What the browser should do with a blocked request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "action", content = "url")]
pub enum BlockedResponse {
    Cancel,
    Redirect(String),
}

pub fn is_request_blocked_by_rule(rule: Option<&UrlFilterRule>) -> bool {
    rule.map_or(false, |r| !r.is_whitelist())
}

pub fn get_blocked_response_by_rule(rule: Option<&UrlFilterRule>) -> Option<BlockedResponse> {
    let rule = rule.filter(|r| !r.is_whitelist())?;
    if rule.has_option(UrlRuleOptions::EMPTY_RESPONSE) {
        Some(BlockedResponse::Redirect(EMPTY_RESPONSE_URL.to_string()))
    } else {
        Some(BlockedResponse::Cancel)
    }
}

/// Page-level exception for a frame: the domain whitelist first, then the
/// filter's own `$document`-style exceptions.
pub fn get_frame_whitelist_rule(
    filter: &RequestFilter,
    whitelist: &WhitelistEngine,
    frame_url: &str,
) -> Option<Arc<UrlFilterRule>> {
    whitelist
        .find_whitelist_rule(frame_url)
        .or_else(|| filter.find_whitelist_rule(frame_url, frame_url, RequestType::DOCUMENT))
}

/// Rule governing a request made from a frame.
///
/// `frame_whitelist_rule` is the frame's cached page-level exception, if the
/// caller tracks one. A `$document` exception there decides immediately.
pub fn get_rule_for_request(
    filter: &RequestFilter,
    whitelist: &WhitelistEngine,
    request_url: &str,
    frame_url: &str,
    request_type: RequestType,
    frame_whitelist_rule: Option<&Arc<UrlFilterRule>>,
) -> Option<Arc<UrlFilterRule>> {
    if let Some(rule) = frame_whitelist_rule {
        if rule.is_document_whitelist() {
            return Some(Arc::clone(rule));
        }
    }

    let document_rule = match frame_whitelist_rule {
        Some(rule) => Some(Arc::clone(rule)),
        None => get_frame_whitelist_rule(filter, whitelist, frame_url),
    };

    filter.find_rule_for_request(request_url, frame_url, request_type, document_rule.as_ref())
}

/// `$csp` rules for a document, none when the page disables URL blocking.
pub fn get_csp_rules(
    filter: &RequestFilter,
    frame_whitelist_rule: Option<&Arc<UrlFilterRule>>,
    request_url: &str,
    referrer: &str,
    request_type: RequestType,
) -> Vec<Arc<UrlFilterRule>> {
    if frame_whitelist_rule.map_or(false, |r| r.is_url_block()) {
        return Vec::new();
    }
    filter.find_csp_rules(request_url, referrer, request_type)
}

/// Cosmetics for one frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CosmeticResult {
    pub selectors: Option<SelectorsResult>,
    pub scripts: Option<String>,
    pub collapse_all_elements: bool,
}

/// Selectors and scripts for a frame, honouring its page-level exception.
pub fn get_selectors_and_scripts(
    filter: &RequestFilter,
    document_url: &str,
    frame_whitelist_rule: Option<&Arc<UrlFilterRule>>,
    retrieve_extended_css: bool,
    collapse_all_elements: bool,
) -> CosmeticResult {
    let mut result = CosmeticResult {
        collapse_all_elements,
        ..CosmeticResult::default()
    };

    if frame_whitelist_rule.map_or(false, |r| r.is_document_whitelist()) {
        return result;
    }

    let has = |option: UrlRuleOptions| frame_whitelist_rule.map_or(false, |r| r.has_option(option));

    if !has(UrlRuleOptions::ELEMHIDE) {
        let mut options = CssOptions::RETRIEVE_TRADITIONAL_CSS;
        if retrieve_extended_css {
            options |= CssOptions::RETRIEVE_EXTCSS;
        }
        if has(UrlRuleOptions::GENERICHIDE) {
            options |= CssOptions::GENERIC_HIDE_APPLIED;
        }
        result.selectors = Some(filter.get_selectors_for_url(document_url, options));
    }

    if !has(UrlRuleOptions::JSINJECT) {
        result.scripts = filter.get_scripts_string_for_url(document_url);
    }

    result
}
