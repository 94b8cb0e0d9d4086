//! Link extraction and site filtering for clipboard text

use regex::Regex;
use url::Url;

/// Hosts whose links are handed to the downloader. Subdomains match too.
const TARGET_HOSTS: [&str; 2] = ["xhslink.com", "xiaohongshu.com"];

lazy_static::lazy_static! {
    static ref URL_PATTERN: Regex =
        Regex::new(r"https?://[A-Za-z0-9_\-.]+(?:/[A-Za-z0-9_\-.~:/?#\[\]@!$&'()*+,;=%]*)?")
            .expect("url pattern");
}

/// First http(s) link in `text`, if any.
pub fn extract_first_url(text: &str) -> Option<&str> {
    URL_PATTERN.find(text).map(|m| m.as_str())
}

/// Whether `url` points at the target site.
pub fn is_xhs_link(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    let host = host.trim_end_matches('.');
    TARGET_HOSTS.iter().any(|target| {
        host.eq_ignore_ascii_case(target)
            || host
                .to_ascii_lowercase()
                .ends_with(&format!(".{}", target))
    })
}
