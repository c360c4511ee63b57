use url::Url;

/// Canonical form of a URL for cache lookups.
///
/// Parsing already lower-cases the scheme and host and drops default ports;
/// on top of that an empty fragment is removed so `http://x/a#` and
/// `http://x/a` share a key.
pub fn normalize_url(url: &Url) -> Url {
    let mut url = url.clone();
    if url.fragment() == Some("") {
        url.set_fragment(None);
    }
    url
}

/// Resolve an item link found inside a feed. Relative links are resolved
/// against the feed's own URL.
pub fn resolve_link(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }

    Url::parse(href)
        .or_else(|_| base.join(href))
        .ok()
        .map(|url| normalize_url(&url))
}
