//! Core type definitions shared by the rule model, the matching indices
//! and the lifecycle service.

// =============================================================================
// Filter identifiers
// =============================================================================

/// Numeric identifier of a filter (subscription, user or whitelist pseudo-filter).
pub type FilterId = u32;

/// Rules typed in by the user.
pub const USER_FILTER_ID: FilterId = 0;
/// Main ad-blocking list.
pub const ABU_FILTER: FilterId = 1;
/// Always-on internal list. Bypasses group gating and is not counted.
pub const ANTI_CIRCUMVENTION: FilterId = 2;
pub const ABU_PRIVACY: FilterId = 4;
pub const FANBOY_SOCIAL: FilterId = 5;
pub const ABU_SECURITY: FilterId = 6;
pub const SPAM_404: FilterId = 7;
pub const NO_COIN: FilterId = 8;
/// Synthetic filter holding whitelisted domains.
pub const WHITE_LIST_FILTER_ID: FilterId = 100;
/// First identifier handed out to custom (user-subscribed) filters.
pub const CUSTOM_FILTERS_START_ID: FilterId = 1000;

// =============================================================================
// Request Types (bit mask for type filtering)
// =============================================================================

bitflags::bitflags! {
    /// Request type bit mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RequestType: u32 {
        const DOCUMENT = 1 << 0;
        const SUBDOCUMENT = 1 << 1;  // iframe/frame
        const SCRIPT = 1 << 2;
        const STYLESHEET = 1 << 3;
        const OBJECT = 1 << 4;
        const IMAGE = 1 << 5;
        const XMLHTTPREQUEST = 1 << 6;
        const OBJECT_SUBREQUEST = 1 << 7;
        const MEDIA = 1 << 8;
        const FONT = 1 << 9;
        const WEBSOCKET = 1 << 10;
        const WEBRTC = 1 << 11;
        const OTHER = 1 << 12;
        const CSP = 1 << 13;
        const PING = 1 << 14;

        /// Page opened by `window.open` or a `target=_blank` link. Only
        /// `$popup` rules match it.
        const POPUP = 1 << 15;

        /// Every type a page itself loads; leaves out `POPUP`
        const ALL = (1 << 15) - 1;
        /// Types a `$csp` rule may apply to
        const CSP_TARGETS = Self::DOCUMENT.bits() | Self::SUBDOCUMENT.bits();
    }
}

impl RequestType {
    /// Parse from a browser request type string.
    pub fn from_browser_type(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "main_frame" | "document" => Self::DOCUMENT,
            "sub_frame" | "subdocument" => Self::SUBDOCUMENT,
            "stylesheet" => Self::STYLESHEET,
            "script" => Self::SCRIPT,
            "image" => Self::IMAGE,
            "font" => Self::FONT,
            "object" => Self::OBJECT,
            "object_subrequest" | "object-subrequest" => Self::OBJECT_SUBREQUEST,
            "xmlhttprequest" => Self::XMLHTTPREQUEST,
            "ping" | "beacon" => Self::PING,
            "csp_report" | "csp" => Self::CSP,
            "media" => Self::MEDIA,
            "websocket" => Self::WEBSOCKET,
            "webrtc" => Self::WEBRTC,
            "popup" => Self::POPUP,
            _ => Self::OTHER,
        }
    }

    /// Map a rule option name (`$image`, `$xmlhttprequest`, ...) to its type bit.
    pub fn from_option_name(name: &str) -> Option<Self> {
        let mask = match name {
            "document" => Self::DOCUMENT,
            "subdocument" => Self::SUBDOCUMENT,
            "script" => Self::SCRIPT,
            "stylesheet" => Self::STYLESHEET,
            "object" => Self::OBJECT,
            "image" => Self::IMAGE,
            "xmlhttprequest" => Self::XMLHTTPREQUEST,
            "object-subrequest" => Self::OBJECT_SUBREQUEST,
            "media" => Self::MEDIA,
            "font" => Self::FONT,
            "websocket" => Self::WEBSOCKET,
            "webrtc" => Self::WEBRTC,
            "other" => Self::OTHER,
            "ping" => Self::PING,
            _ => return None,
        };
        Some(mask)
    }
}

// =============================================================================
// URL rule option flags
// =============================================================================

bitflags::bitflags! {
    /// Boolean modifiers carried by a URL rule.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct UrlRuleOptions: u32 {
        /// $important - beats exception rules
        const IMPORTANT = 1 << 0;
        /// Case-sensitive matching ($match-case)
        const MATCH_CASE = 1 << 1;
        /// $elemhide - disables cosmetic rules on matching documents
        const ELEMHIDE = 1 << 2;
        /// $generichide - disables generic cosmetic rules
        const GENERICHIDE = 1 << 3;
        /// $genericblock - disables generic URL blocking rules
        const GENERICBLOCK = 1 << 4;
        /// $jsinject - disables script injection
        const JSINJECT = 1 << 5;
        /// $urlblock - disables URL blocking on matching documents
        const URLBLOCK = 1 << 6;
        /// $content - disables content (HTML) filtering
        const CONTENT = 1 << 7;
        /// Exception carrying `$document`
        const DOCUMENT_WHITELIST = 1 << 8;
        /// $popup
        const POPUP = 1 << 9;
        /// $empty - answer with an empty response instead of cancelling
        const EMPTY_RESPONSE = 1 << 10;

        /// Everything implied by `$document` on an exception
        const DOCUMENT_LEVEL = Self::ELEMHIDE.bits()
            | Self::JSINJECT.bits()
            | Self::URLBLOCK.bits()
            | Self::CONTENT.bits()
            | Self::DOCUMENT_WHITELIST.bits();
        /// Modifiers only meaningful on exceptions
        const EXCEPTION_ONLY = Self::DOCUMENT_LEVEL.bits()
            | Self::GENERICHIDE.bits()
            | Self::GENERICBLOCK.bits();
    }
}

bitflags::bitflags! {
    /// Party (first-party / third-party) mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PartyMask: u8 {
        /// Matches first-party requests
        const FIRST_PARTY = 1 << 0;
        /// Matches third-party requests
        const THIRD_PARTY = 1 << 1;
        /// Matches both
        const ALL = Self::FIRST_PARTY.bits() | Self::THIRD_PARTY.bits();
    }
}

impl PartyMask {
    /// Party of a request given whether it crosses sites.
    pub fn of_request(third_party: bool) -> Self {
        if third_party {
            Self::THIRD_PARTY
        } else {
            Self::FIRST_PARTY
        }
    }
}

// =============================================================================
// Cosmetic retrieval options
// =============================================================================

bitflags::bitflags! {
    /// Caller-supplied flags for [`crate::CssFilter::get_selectors`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CssOptions: u8 {
        /// Return plain `##` selectors
        const RETRIEVE_TRADITIONAL_CSS = 1 << 0;
        /// Return extended `#?#` selectors
        const RETRIEVE_EXTCSS = 1 << 1;
        /// A `$generichide` exception applies to the page
        const GENERIC_HIDE_APPLIED = 1 << 2;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_browser_types() {
        assert_eq!(RequestType::from_browser_type("main_frame"), RequestType::DOCUMENT);
        assert_eq!(RequestType::from_browser_type("sub_frame"), RequestType::SUBDOCUMENT);
        assert_eq!(RequestType::from_browser_type("IMAGE"), RequestType::IMAGE);
        assert_eq!(RequestType::from_browser_type("popup"), RequestType::POPUP);
        assert_eq!(RequestType::from_browser_type("something"), RequestType::OTHER);
    }

    #[test]
    fn test_option_names() {
        assert_eq!(RequestType::from_option_name("image"), Some(RequestType::IMAGE));
        assert_eq!(
            RequestType::from_option_name("object-subrequest"),
            Some(RequestType::OBJECT_SUBREQUEST)
        );
        assert_eq!(RequestType::from_option_name("important"), None);
    }

    #[test]
    fn test_document_level_flags() {
        assert!(UrlRuleOptions::DOCUMENT_LEVEL.contains(UrlRuleOptions::URLBLOCK));
        assert!(!UrlRuleOptions::DOCUMENT_LEVEL.contains(UrlRuleOptions::GENERICHIDE));
        assert!(RequestType::ALL.contains(RequestType::PING));
        assert!(!RequestType::ALL.intersects(RequestType::POPUP));
    }
}
