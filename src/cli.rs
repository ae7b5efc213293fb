//! 命令行参数
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "callrelay")]
#[command(version)]
#[command(about = "WebRTC call signaling gateway with accepted/rejected call audit sinks")]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Option<Commands>,

    /// Configuration file path (falls back to /etc/callrelay/config.toml)
    #[arg(short, long, default_value = "config.toml")]
    pub(crate) config: PathBuf,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Commands {
    /// Parse and validate a configuration file without starting services
    Test {
        #[arg(index = 1)]
        config_file: Option<PathBuf>,
    },
}
