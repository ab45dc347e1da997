mod config;
mod session;

use std::path::PathBuf;
use std::process;

use anyhow::Result;
use clap::Parser;

/// A lightweight program to keep a directory tree synchronized with a git
/// repository over the version 2 smart HTTP protocol, without a local
/// .git directory.
#[derive(Parser)]
#[command(name = "treeup", version, disable_help_flag = true)]
pub struct Cli {
    /// Configuration section to synchronize
    pub section: String,

    /// Override the default configuration file
    #[arg(short = 'C', value_name = "FILE", default_value = "./treeup.conf")]
    pub config_file: PathBuf,

    /// Force a clone of the repository
    #[arg(short = 'c')]
    pub clone: bool,

    /// Limit the display of changes to this many directory levels
    /// (0 = display the entire path)
    #[arg(short = 'd', value_name = "DEPTH")]
    pub display_depth: Option<u32>,

    /// Override the 'have' checksum
    #[arg(short = 'h', value_name = "HASH")]
    pub have: Option<String>,

    /// Save a copy of the pack data to the current working directory
    #[arg(short = 'k')]
    pub keep_pack_file: bool,

    /// Low memory mode: store temporary object data on disk
    #[arg(short = 'l')]
    pub low_memory: bool,

    /// Repair all missing or modified files in the local tree
    #[arg(short = 'r')]
    pub repair: bool,

    /// Fetch the commit referenced by this tag
    #[arg(short = 't', value_name = "TAG")]
    pub tag: Option<String>,

    /// Load a saved copy of the pack data, skipping the download
    #[arg(short = 'u', value_name = "PACKFILE")]
    pub use_pack_file: Option<PathBuf>,

    /// Output verbosity (0 = none, 1 = normal, 2 = debug)
    #[arg(short = 'v', value_name = "LEVEL")]
    pub verbosity: Option<u8>,

    /// Override the 'want' checksum
    #[arg(short = 'w', value_name = "HASH")]
    pub want: Option<String>,

    #[arg(long, action = clap::ArgAction::HelpLong)]
    help: Option<bool>,
}

fn main() {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => {}
        Err(e) => {
            eprintln!("treeup: {e:#}");
            process::exit(1);
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    session::run(cli)
}
