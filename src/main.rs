/*!
 * Command-line entry point for edudrop
 */

use std::io;

use clap::{CommandFactory, Parser};
use tracing::info;

use edudrop::config::{Args, Config};
use edudrop::logging::init_logger;
use edudrop::server::{self, AppState};

#[tokio::main]
async fn main() -> io::Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    if let Some(shell) = args.generate {
        let mut command = Args::command();
        clap_complete::generate(shell, &mut command, "edudrop", &mut io::stdout());
        return Ok(());
    }

    // Create configuration
    let config = Config::from_args(args);
    init_logger(&config.log_level);

    // Validate configuration
    config.validate()?;

    info!(
        version = edudrop::VERSION,
        public = %config.public_dir.display(),
        downloads = %config.downloads_dir.display(),
        presentations = %config.presentations_dir.display(),
        "starting"
    );

    let state = AppState::from_config(config);
    server::serve(state).await?;

    Ok(())
}
