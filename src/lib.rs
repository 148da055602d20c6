/*!
 * edudrop - serve teaching material and package downloads
 *
 * Lists downloadable files while honouring gitignore-style rules, builds ZIP
 * archives from user selections and from HTML presentations with their
 * assets, and exposes everything over a small HTTP API.
 */

pub mod analytics;
pub mod archive;
pub mod config;
pub mod error;
pub mod ignore_rules;
pub mod limiter;
pub mod logging;
pub mod paths;
pub mod scanner;
pub mod server;
pub mod types;
pub mod utils;

#[cfg(test)]
mod tests;

// Re-export main components for easier access
pub use analytics::{Analytics, EventType, InMemoryAnalytics, Stats, TrackedEvent};
pub use archive::{build_archive, build_presentation_archive, bundle_presentation, extract_asset_refs};
pub use config::Config;
pub use error::{EduDropError, Result};
pub use ignore_rules::{load_ignore_rules, IgnoreMatcher};
pub use limiter::{InMemoryRateLimiter, RateDecision, RateLimiter};
pub use scanner::{ScanSummary, Scanner};
pub use server::{routes, AppState};
pub use types::{DownloadableItem, ItemType};
pub use utils::format_file_size;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
