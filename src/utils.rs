/*!
 * Utility functions for edudrop
 */

use std::net::SocketAddr;

/// Client identifier used when nothing better is known
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Format a human-readable file size
pub fn format_file_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}

/// Key identifying a client for rate limiting and analytics.
///
/// Takes the first entry of `X-Forwarded-For`, then the peer address.
pub fn client_key(forwarded_for: Option<&str>, remote: Option<SocketAddr>) -> String {
    forwarded_for
        .and_then(|header| header.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
        .or_else(|| remote.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}
