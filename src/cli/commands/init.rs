//! Init and Config commands.

use anyhow::{Result, anyhow};

use crate::config::Settings;

/// Run init command - create configuration file in the current directory.
pub fn run_init(force: bool) -> Result<()> {
    let root = std::env::current_dir()?;
    let path = Settings::init_config_file(&root, force).map_err(|e| anyhow!("{e}"))?;

    println!("Created configuration file at: {}", path.display());
    println!("Add your view directories to `view_paths` in this file.");
    Ok(())
}

/// Run config command - display current configuration.
pub fn run_config(config: &Settings) -> Result<()> {
    println!("Current Configuration:");
    println!("{}", "=".repeat(50));
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
