//! Command-line argument definitions (clap).

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "hush")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Closed-loop fan control for server fleets", long_about = None)]
pub struct Args {
    /// Configuration file (default: config.json next to the executable)
    #[arg(short = 'c', long, value_name = "PATH", help_heading = "Config & Debug")]
    pub config: Option<PathBuf>,

    /// Print the loaded configuration with passwords masked
    #[arg(long = "show-config", help_heading = "Config & Debug")]
    pub show_config: bool,

    /// Run one cycle for every host, print the results and exit
    #[arg(long, help_heading = "Config & Debug")]
    pub test: bool,

    /// Set log level (TRACE, DEBUG, INFO, WARN, ERROR, CRITICAL)
    #[arg(long = "log-level", help_heading = "Logging")]
    pub log_level: Option<String>,
}
