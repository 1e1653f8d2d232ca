//! CLI argument parsing using clap.

use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// File recognition for directory trees
#[derive(Parser)]
#[command(
    name = "datapool",
    version = env!("CARGO_PKG_VERSION"),
    about = "Recognize files as typed objects",
    long_about = "Mirror a directory, group its files into typed objects, and watch them change.",
    next_line_help = true,
    styles = clap_cargo_style(),
    after_help = "Examples:\n  datapool init\n  datapool scan src --recursive\n  datapool scan . --json\n  datapool watch ."
)]
pub struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true, env = "DATAPOOL_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Initialize project
    #[command(about = "Set up .datapool directory with default configuration")]
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show current configuration settings
    #[command(about = "Display active settings from .datapool/settings.toml")]
    Config,

    /// Recognize a directory once and list its objects
    #[command(about = "List the objects recognized in a directory")]
    Scan {
        /// Directory to recognize
        #[arg(value_name = "DIR", default_value = ".")]
        dir: PathBuf,

        /// Descend into subfolders
        #[arg(short, long)]
        recursive: bool,

        /// Output JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Keep recognizing a directory as it changes
    #[command(about = "Watch a directory and report object changes")]
    Watch {
        /// Directory to watch
        #[arg(value_name = "DIR", default_value = ".")]
        dir: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_arguments() {
        let cli = Cli::try_parse_from(["datapool", "scan", "src", "-r", "--json"]).unwrap();
        match cli.command {
            Commands::Scan { dir, recursive, json } => {
                assert_eq!(dir, PathBuf::from("src"));
                assert!(recursive);
                assert!(json);
            }
            _ => panic!("expected scan"),
        }
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::try_parse_from(["datapool", "watch", "--config", "custom.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        assert!(matches!(cli.command, Commands::Watch { .. }));
    }
}
