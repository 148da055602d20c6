/*!
 * Configuration handling for edudrop
 */

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use clap_complete::Shell;

use crate::ensure;
use crate::error::Result;

/// Default name of the ignore rules file inside the downloads directory
pub const DEFAULT_IGNORE_FILE: &str = ".downloadignore";

/// Command-line arguments for edudrop
#[derive(Parser, Debug, Clone)]
#[clap(
    name = "edudrop",
    version = env!("CARGO_PKG_VERSION"),
    about = "Serve teaching material and bundle downloads as ZIP archives",
    long_about = "Serves a public directory of course material, lists downloadable files while honouring gitignore-style rules, and packages selections and HTML presentations into ZIP archives."
)]
pub struct Args {
    /// Address to listen on
    #[clap(long, default_value = "127.0.0.1:3000")]
    pub bind: String,

    /// Directory served under /files
    #[clap(long, default_value = "./public")]
    pub public_dir: String,

    /// Directory listed for bulk downloads (default: <public-dir>/downloads)
    #[clap(long)]
    pub downloads_dir: Option<String>,

    /// Directory holding HTML presentations and their assets/ folder
    /// (default: <public-dir>/presentations)
    #[clap(long)]
    pub presentations_dir: Option<String>,

    /// Ignore rules file (default: <downloads-dir>/.downloadignore)
    #[clap(long)]
    pub ignore_file: Option<String>,

    /// Maximum directory depth expanded in the download listing
    #[clap(long)]
    pub max_depth: Option<usize>,

    /// Downloads allowed per client within one window
    #[clap(long, default_value = "10")]
    pub rate_limit: u32,

    /// Length of the rate limit window in seconds
    #[clap(long, default_value = "3600")]
    pub rate_window_secs: u64,

    /// Log level used when RUST_LOG is not set
    #[clap(long, default_value = "info")]
    pub log_level: String,

    /// Generate shell completions
    #[clap(long = "generate", value_enum)]
    pub generate: Option<Shell>,
}

/// Application configuration
#[derive(Clone, Debug)]
pub struct Config {
    /// Listen address
    pub bind: String,

    /// Root of the raw file endpoint
    pub public_dir: PathBuf,

    /// Root of the download listing and bulk archives
    pub downloads_dir: PathBuf,

    /// Presentations and their assets/
    pub presentations_dir: PathBuf,

    /// Ignore rules file
    pub ignore_file: PathBuf,

    /// Maximum listing depth (unbounded when `None`)
    pub max_depth: Option<usize>,

    /// Downloads per client per window
    pub rate_limit: u32,

    /// Rate limit window
    pub rate_window: Duration,

    /// Default log level
    pub log_level: String,
}

impl Config {
    /// Create configuration from command-line arguments
    pub fn from_args(args: Args) -> Self {
        let public_dir = PathBuf::from(&args.public_dir);
        let downloads_dir = args
            .downloads_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| public_dir.join("downloads"));
        let presentations_dir = args
            .presentations_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| public_dir.join("presentations"));
        let ignore_file = args
            .ignore_file
            .map(PathBuf::from)
            .unwrap_or_else(|| downloads_dir.join(DEFAULT_IGNORE_FILE));

        Self {
            bind: args.bind,
            public_dir,
            downloads_dir,
            presentations_dir,
            ignore_file,
            max_depth: args.max_depth,
            rate_limit: args.rate_limit,
            rate_window: Duration::from_secs(args.rate_window_secs),
            log_level: args.log_level,
        }
    }

    /// Configuration rooted at `public_dir` with every other setting defaulted
    pub fn with_public_dir(public_dir: impl Into<PathBuf>) -> Self {
        let public_dir = public_dir.into();
        let downloads_dir = public_dir.join("downloads");
        Self {
            bind: "127.0.0.1:3000".to_string(),
            presentations_dir: public_dir.join("presentations"),
            ignore_file: downloads_dir.join(DEFAULT_IGNORE_FILE),
            downloads_dir,
            public_dir,
            max_depth: None,
            rate_limit: 10,
            rate_window: Duration::from_secs(3600),
            log_level: "info".to_string(),
        }
    }

    /// Parsed listen address
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.bind
            .parse()
            .map_err(|e| crate::error!(Config, "Invalid bind address '{}': {}", self.bind, e))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;

        for (label, dir) in [
            ("Public", &self.public_dir),
            ("Downloads", &self.downloads_dir),
            ("Presentations", &self.presentations_dir),
        ] {
            ensure!(
                dir.is_dir(),
                Config,
                "{} directory not found: {}",
                label,
                dir.display()
            );
        }

        ensure!(self.rate_limit > 0, Config, "Rate limit must be at least 1");
        ensure!(
            !self.rate_window.is_zero(),
            Config,
            "Rate limit window must be longer than zero seconds"
        );

        // A missing ignore file is allowed: nothing gets ignored.
        Ok(())
    }
}
