use once_cell::sync::Lazy;
use regex::Regex;

static ASIN_IN_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/dp/([A-Z0-9]{10})|/gp/product/([A-Z0-9]{10})|asin=([A-Z0-9]{10})").unwrap()
});

/// Pull a marketplace ASIN out of an affiliate link, if the link carries one.
pub fn extract_asin(affiliate_link: &str) -> Option<String> {
    let caps = ASIN_IN_LINK.captures(affiliate_link)?;
    caps.iter()
        .skip(1)
        .flatten()
        .next()
        .map(|m| m.as_str().to_ascii_uppercase())
}

/// An ASIN is exactly ten ASCII alphanumerics.
pub fn is_valid_asin(asin: &str) -> bool {
    asin.len() == 10 && asin.chars().all(|c| c.is_ascii_alphanumeric())
}
