//! Init and Config commands.

use std::path::Path;

use anyhow::Context;

use crate::config::Settings;

/// Run init command - create configuration file.
pub fn run_init(dir: &Path, force: bool) -> anyhow::Result<()> {
    let path = Settings::init_config_file(dir, force)
        .with_context(|| format!("cannot initialize {}", dir.display()))?;
    println!("Created configuration file at: {}", path.display());
    println!("Edit this file to customize your settings.");
    Ok(())
}

/// Run config command - display current configuration.
pub fn run_config(config: &Settings) -> anyhow::Result<()> {
    println!("Current Configuration:");
    println!("{}", "=".repeat(50));
    let toml_str = toml::to_string_pretty(config).context("cannot render configuration")?;
    println!("{toml_str}");
    Ok(())
}
