//! Domain whitelist.
//!
//! Each whitelisted domain becomes a `$document` exception in a dedicated
//! URL index, registered for both the bare and the `www.` form.

use std::sync::Arc;

use crate::domain::normalize_domain;
use crate::filter::{RequestQuery, UrlFilter};
use crate::rule::UrlFilterRule;
use crate::types::{RequestType, WHITE_LIST_FILTER_ID};
use crate::url::{crop_www, host_of, trim_http};

/// Exception text for a whitelisted domain. The separator keeps `a.com`
/// from covering `a.community`.
pub fn whitelist_rule_text(domain: &str) -> String {
    format!("@@//{}^$document", domain)
}

/// Reduce user input (`https://www.Example.com/page`) to a bare domain.
pub fn normalize_whitelist_domain(raw: &str) -> Option<String> {
    let trimmed = trim_http(raw.trim()).trim_matches('/');
    let host = trimmed.split(|c| c == '/' || c == '?' || c == '#').next().unwrap_or("");
    let host = host.split(':').next().unwrap_or("");
    let domain = normalize_domain(host)?;
    Some(crop_www(&domain).to_string())
}

#[derive(Debug, Default)]
pub struct WhitelistEngine {
    filter: UrlFilter,
    domains: Vec<String>,
}

impl WhitelistEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine preloaded with stored domains.
    pub fn with_domains<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut engine = Self::new();
        for d in domains {
            engine.add_to_whitelist(d.as_ref());
        }
        engine
    }

    /// Whitelist a domain. Returns the stored form, or `None` when the
    /// input is not a domain or is already whitelisted.
    pub fn add_to_whitelist(&mut self, raw: &str) -> Option<String> {
        let domain = normalize_whitelist_domain(raw)?;
        if self.domains.contains(&domain) {
            return None;
        }
        for host in [domain.clone(), format!("www.{}", domain)] {
            match UrlFilterRule::parse(&whitelist_rule_text(&host), WHITE_LIST_FILTER_ID) {
                Ok(rule) => self.filter.add_rule(Arc::new(rule)),
                Err(e) => {
                    log::warn!("cannot whitelist '{}': {}", host, e);
                    return None;
                }
            }
        }
        self.domains.push(domain.clone());
        Some(domain)
    }

    pub fn remove_from_whitelist(&mut self, raw: &str) -> bool {
        let domain = match normalize_whitelist_domain(raw) {
            Some(d) => d,
            None => return false,
        };
        let before = self.domains.len();
        self.domains.retain(|d| d != &domain);
        if self.domains.len() == before {
            return false;
        }
        self.filter.remove_rule(&whitelist_rule_text(&domain));
        self.filter.remove_rule(&whitelist_rule_text(&format!("www.{}", domain)));
        true
    }

    /// Whitelist rule covering a page URL.
    pub fn find_whitelist_rule(&self, url: &str) -> Option<Arc<UrlFilterRule>> {
        if self.domains.is_empty() {
            return None;
        }
        let host = host_of(url);
        let query = RequestQuery {
            url,
            document_host: &host,
            third_party: false,
            request_type: RequestType::DOCUMENT,
        };
        self.filter.find_whitelist_rule(&query)
    }

    pub fn is_whitelisted(&self, url: &str) -> bool {
        self.find_whitelist_rule(url).is_some()
    }

    pub fn whitelist_domains(&self) -> &[String] {
        &self.domains
    }

    pub fn clear(&mut self) {
        self.filter = UrlFilter::new();
        self.domains.clear();
    }
}
