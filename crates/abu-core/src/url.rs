//! URL helpers used on the matching path.
//!
//! These work on string slices and do not build a full `Url`; request URLs
//! reach the filter already normalized by the browser.

// =============================================================================
// Scheme / host
// =============================================================================

/// Get the position right after the scheme separator (`://`, or `:` for `data:`).
#[inline]
pub fn get_scheme_end(url: &str) -> Option<usize> {
    let bytes = url.as_bytes();
    let colon_pos = bytes.iter().position(|&b| b == b':')?;

    if bytes.len() > colon_pos + 2 && bytes[colon_pos + 1] == b'/' && bytes[colon_pos + 2] == b'/' {
        return Some(colon_pos + 3);
    }

    if bytes[..colon_pos].eq_ignore_ascii_case(b"data") {
        return Some(colon_pos + 1);
    }

    None
}

/// Start and end offsets of the hostname, skipping userinfo and port.
#[inline]
pub fn get_host_position(url: &str) -> Option<(usize, usize)> {
    let scheme_end = get_scheme_end(url)?;
    let bytes = url.as_bytes();

    let mut host_start = scheme_end;
    for (i, &b) in bytes.iter().enumerate().skip(scheme_end) {
        if b == b'@' {
            host_start = i + 1;
            break;
        }
        if b == b'/' || b == b'?' || b == b'#' {
            break;
        }
    }

    let host_end = bytes[host_start..]
        .iter()
        .position(|&b| b == b'/' || b == b'?' || b == b'#' || b == b':')
        .map_or(bytes.len(), |p| host_start + p);

    Some((host_start, host_end))
}

/// Extract the hostname of a URL as a slice of the input.
#[inline]
pub fn extract_host(url: &str) -> Option<&str> {
    let (start, end) = get_host_position(url)?;
    if start == end {
        return None;
    }
    Some(&url[start..end])
}

/// Lowercased hostname, or an empty string when the URL has none.
pub fn host_of(url: &str) -> String {
    extract_host(url).map(|h| h.to_ascii_lowercase()).unwrap_or_default()
}

/// Whether the string starts with an `http://` or `https://` scheme.
pub fn is_http_request(s: &str) -> bool {
    let lower = s.get(..8).unwrap_or(s).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Strip a leading `http://` / `https://`.
pub fn trim_http(s: &str) -> &str {
    if !is_http_request(s) {
        return s;
    }
    match s.find("://") {
        Some(pos) => &s[pos + 3..],
        None => s,
    }
}

/// Strip a single leading `www.`.
pub fn crop_www(domain: &str) -> &str {
    domain.strip_prefix("www.").unwrap_or(domain)
}

// =============================================================================
// Separator semantics (`^`)
// =============================================================================

/// Check if a byte is a separator: anything but a letter, digit, or one of `_-.%`.
#[inline]
pub fn is_separator_char(c: u8) -> bool {
    !(c.is_ascii_alphanumeric() || c == b'_' || c == b'-' || c == b'.' || c == b'%')
}

/// Check if position in string is a separator or the end of the string.
#[inline]
pub fn is_at_separator(s: &str, pos: usize) -> bool {
    if pos >= s.len() {
        return true;
    }
    is_separator_char(s.as_bytes()[pos])
}

// =============================================================================
// Tokens
// =============================================================================

/// Minimum length of an indexable token.
pub const MIN_TOKEN_LEN: usize = 3;

/// Lowercased alphanumeric runs of at least [`MIN_TOKEN_LEN`] bytes.
pub fn url_tokens(url: &str) -> Vec<String> {
    url.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| t.len() >= MIN_TOKEN_LEN)
        .map(|t| t.to_ascii_lowercase())
        .collect()
}

/// ASCII case-insensitive substring search.
pub fn find_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    let h = haystack.as_bytes();
    let n = needle.as_bytes();
    if n.is_empty() {
        return Some(0);
    }
    if n.len() > h.len() {
        return None;
    }
    (0..=h.len() - n.len()).find(|&i| h[i..i + n.len()].eq_ignore_ascii_case(n))
}
