// src/page/html.rs
// =============================================================================
// This module pulls page links and image sources out of HTML.
//
// We use the `scraper` crate which:
// - Parses HTML into a DOM (Document Object Model)
// - Supports CSS selectors for finding elements
//
// and the `url` crate to resolve relative references against the page URL,
// the same way a browser would.
//
// Two kinds of elements are extracted:
// - <a href="...">  -> page links (candidates for recursion)
// - <img src="..."> -> images (fed to the image pipeline)
// =============================================================================

use scraper::{Html, Selector};
use url::Url;

// Everything we need from one HTML document, already resolved to absolute
// URLs and with fragments removed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub links: Vec<String>,
    pub images: Vec<String>,
}

// Extracts links and images from HTML content
//
// Parameters:
//   html: the HTML content to parse
//   base: the URL of the page (for resolving relative references)
//
// Example:
//   html = "<a href='/docs'>Docs</a><img src='logo.png'>"
//   base = "https://example.com/"
//   links  = ["https://example.com/docs"]
//   images = ["https://example.com/logo.png"]
pub fn extract_elements(html: &str, base: &Url) -> Extracted {
    let document = Html::parse_document(html);

    // Both selectors are constants and known to be valid
    let link_selector = Selector::parse("a[href]").unwrap();
    let image_selector = Selector::parse("img[src]").unwrap();

    let links = document
        .select(&link_selector)
        .filter_map(|element| element.value().attr("href"))
        .filter_map(|href| resolve_url(base, href))
        .collect();

    let images = document
        .select(&image_selector)
        .filter_map(|element| element.value().attr("src"))
        .filter_map(|src| resolve_url(base, src))
        .collect();

    Extracted { links, images }
}

// Resolves a possibly-relative reference to an absolute URL
//
// Returns None for anchors, non-fetchable schemes (mailto:, tel:,
// javascript:, data:) and anything that does not parse. A file:// page may
// only reference file:// resources, a web page only http(s) ones.
fn resolve_url(base: &Url, reference: &str) -> Option<String> {
    let reference = reference.trim();
    if reference.is_empty() || reference.starts_with('#') {
        return None;
    }

    let mut url = base.join(reference).ok()?;
    if !same_scheme_family(base, &url) {
        return None;
    }

    // page.html#top and page.html are the same page
    url.set_fragment(None);
    Some(url.to_string())
}

fn same_scheme_family(base: &Url, url: &Url) -> bool {
    match base.scheme() {
        "file" => url.scheme() == "file",
        _ => matches!(url.scheme(), "http" | "https"),
    }
}
