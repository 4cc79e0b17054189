//! Platform identification.
//!
//! Queue items usually arrive without a platform tag; it is inferred
//! lazily from the job URL's host.

use url::Url;

pub const PLATFORM_LINKEDIN: &str = "linkedin";
pub const PLATFORM_INDEED: &str = "indeed";
pub const PLATFORM_GREENHOUSE: &str = "greenhouse";
pub const PLATFORM_WORKDAY: &str = "workday";
pub const PLATFORM_LEVER: &str = "lever";
pub const PLATFORM_ASHBY: &str = "ashby";
pub const PLATFORM_UNKNOWN: &str = "unknown";

/// Detect which platform a job URL belongs to.
///
/// Matches on the URL host; falls back to a substring scan for URLs that
/// do not parse (some boards embed redirect fragments).
pub fn detect_platform_from_url(url: &str) -> String {
    let haystack = Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
        .unwrap_or_else(|| url.to_lowercase());

    if haystack.contains("linkedin.com") {
        PLATFORM_LINKEDIN.into()
    } else if haystack.contains("indeed.com") {
        PLATFORM_INDEED.into()
    } else if haystack.contains("greenhouse.io") || haystack.contains("boards.greenhouse") {
        PLATFORM_GREENHOUSE.into()
    } else if haystack.contains("myworkdayjobs.com") {
        PLATFORM_WORKDAY.into()
    } else if haystack.contains("lever.co") {
        PLATFORM_LEVER.into()
    } else if haystack.contains("ashbyhq.com") {
        PLATFORM_ASHBY.into()
    } else {
        PLATFORM_UNKNOWN.into()
    }
}
