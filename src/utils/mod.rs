//! Utility functions and helpers.

pub mod http;

use url::Url;

/// Check that `candidate` is an absolute http(s) URL starting with `prefix`.
pub fn is_allowed_listing_url(candidate: &str, prefix: &str) -> bool {
    let Ok(parsed) = Url::parse(candidate) else {
        return false;
    };
    matches!(parsed.scheme(), "http" | "https")
        && parsed.host_str().is_some()
        && candidate.starts_with(prefix)
}
