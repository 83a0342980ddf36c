//! Link frontier: which discovered links are worth following.
//!
//! Traversal stays on the seed's organizational site (same registrable domain,
//! so `news.example.com` and `www.example.com` both belong to `example.com`) and only
//! follows fetchable `http`/`https` links.

use itertools::Itertools;
use scraper::{Html, Selector};
use tracing::trace;
use url::Url;

/// The registrable domain of a URL's host, e.g. `bbc.co.uk` for `www.bbc.co.uk`.
///
/// IP addresses and hosts without a public suffix are returned whole, so
/// `localhost` only matches itself.
pub fn registrable_domain(url: &Url) -> Option<String> {
    let host = url.host_str()?.trim_end_matches('.').to_ascii_lowercase();
    if url.domain().is_none() {
        return Some(host);
    }
    match psl::domain_str(&host) {
        Some(domain) => Some(domain.to_string()),
        None => Some(host),
    }
}

/// Decide whether a candidate link should be followed from `origin`.
pub fn should_follow(candidate: &Url, origin: &Url) -> bool {
    if !matches!(candidate.scheme(), "http" | "https") {
        return false;
    }
    match (registrable_domain(candidate), registrable_domain(origin)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// [`should_follow`] for raw strings; anything that does not parse is not followed.
#[cfg(test)]
pub fn should_follow_str(candidate: &str, origin: &str) -> bool {
    match (Url::parse(candidate), Url::parse(origin)) {
        (Ok(c), Ok(o)) => should_follow(&c, &o),
        _ => false,
    }
}

/// Collect the followable links of a page, resolved against its URL.
///
/// Fragments are dropped and duplicates removed, keeping first-seen order.
pub fn discover_links(document: &Html, base: &Url) -> Vec<Url> {
    let Ok(anchor) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    document
        .select(&anchor)
        .filter_map(|el| el.value().attr("href"))
        .filter_map(|href| base.join(href.trim()).ok())
        .map(|mut url| {
            url.set_fragment(None);
            url
        })
        .filter(|url| {
            let follow = should_follow(url, base);
            if !follow {
                trace!(%url, "Link outside frontier");
            }
            follow
        })
        .unique()
        .collect()
}
