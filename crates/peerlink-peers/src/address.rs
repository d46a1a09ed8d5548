//! Address literals to connection URLs.

use std::net::IpAddr;

use peerlink_core::config::ADDRESS_PLACEHOLDER;

/// Display form of a raw membership address, or `None` if it is not an IP
/// literal.
///
/// IPv6 literals are wrapped in brackets so they can be embedded in a URL
/// authority; IPv4 literals are returned unchanged. The raw text is kept
/// as-is rather than re-rendered, so the display form always matches the
/// peer id derived from the same address.
pub fn format_display(addr: &str) -> Option<String> {
    match addr.parse::<IpAddr>().ok()? {
        IpAddr::V4(_) => Some(addr.to_string()),
        IpAddr::V6(_) => Some(format!("[{addr}]")),
    }
}

/// Substitute `display` into the `%s` placeholder of `template`.
pub fn build_url(template: &str, display: &str) -> String {
    template.replacen(ADDRESS_PLACEHOLDER, display, 1)
}
