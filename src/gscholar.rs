//! Google Scholar site conventions shared by the structured client and the
//! markup extractor: URL shapes, block-page detection, selector helpers.

use crate::error::TransportError;
use regex::Regex;
use scraper::{ElementRef, Selector};
use std::sync::OnceLock;
use url::Url;

/// Publications requested per profile page (single page, no pagination)
pub const PROFILE_PAGE_SIZE: u32 = 100;

/// Build a profile page URL.
///
/// `hl=en` forces the English locale so labels parse consistently.
pub fn profile_url(base_url: &str, profile_id: &str) -> Result<Url, TransportError> {
    let mut url = Url::parse(&format!("{}/citations", base_url.trim_end_matches('/')))
        .map_err(|e| TransportError::Client(format!("Invalid base URL: {}", e)))?;

    url.query_pairs_mut()
        .append_pair("user", profile_id)
        .append_pair("hl", "en")
        .append_pair("cstart", "0")
        .append_pair("pagesize", &PROFILE_PAGE_SIZE.to_string());

    Ok(url)
}

/// Resolve a (usually relative) link from a Scholar page
pub fn resolve_link(base_url: &str, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with("javascript:") {
        return None;
    }
    Url::parse(base_url).ok()?.join(href).ok()
}

/// Whether the page is a CAPTCHA / unusual-traffic interstitial
pub fn is_blocked_page(html: &str) -> bool {
    html.contains("Solving the above CAPTCHA")
        || html.contains("unusual traffic")
        || html.contains("id=\"gs_captcha_f\"")
}

/// Whether the page looks like a Scholar profile
pub fn is_profile_page(html: &str) -> bool {
    html.contains("gsc_prf_in") || html.contains("gsc_a_t") || html.contains("gsc_a_b")
}

/// First 4-digit year token in `text`
pub fn find_year(text: &str) -> Option<i32> {
    static YEAR: OnceLock<Option<Regex>> = OnceLock::new();
    let year = YEAR.get_or_init(|| Regex::new(r"\b(\d{4})\b").ok()).as_ref()?;
    year.captures(text)?.get(1)?.as_str().parse().ok()
}

/// Compile a selector, turning the parse error into a message
pub fn selector(css: &str) -> Result<Selector, String> {
    Selector::parse(css).map_err(|e| format!("{}: {}", css, e))
}

/// Trimmed text content of the first match
pub fn first_text(element: &ElementRef<'_>, selector: &Selector) -> Option<String> {
    element
        .select(selector)
        .next()
        .map(|e| e.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_url() {
        let url = profile_url("https://scholar.google.com/", "qc6CJjYAAAAJ").expect("valid url");
        assert_eq!(
            url.as_str(),
            "https://scholar.google.com/citations?user=qc6CJjYAAAAJ&hl=en&cstart=0&pagesize=100"
        );
    }

    #[test]
    fn test_profile_url_encodes_id() {
        let url = profile_url("https://scholar.google.com", "a b&c").expect("valid url");
        assert!(url.as_str().contains("user=a+b%26c"));
    }

    #[test]
    fn test_resolve_link() {
        let url = resolve_link(
            "https://scholar.google.com",
            "/citations?view_op=view_citation&citation_for_view=X:Y",
        )
        .expect("resolves");
        assert_eq!(
            url.as_str(),
            "https://scholar.google.com/citations?view_op=view_citation&citation_for_view=X:Y"
        );
        assert!(resolve_link("https://scholar.google.com", "javascript:void(0)").is_none());
        assert!(resolve_link("https://scholar.google.com", "").is_none());
    }

    #[test]
    fn test_find_year() {
        assert_eq!(find_year("Nature 521, 436-444, 2015"), Some(2015));
        assert_eq!(find_year("2019/3/12"), Some(2019));
        assert_eq!(find_year("vol 12345"), None);
        assert_eq!(find_year(""), None);
    }

    #[test]
    fn test_blocked_page() {
        assert!(is_blocked_page("<p>Our systems have detected unusual traffic</p>"));
        assert!(!is_blocked_page("<div id=\"gsc_prf_in\">Ada</div>"));
    }
}
