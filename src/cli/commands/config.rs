//! Config file inspection.

use crate::config::{Config, config_path, save};

/// Print the config file location and the effective settings.
///
/// With `init`, the effective settings are written to the config file.
pub fn cmd_config(config: &Config, init: bool) -> anyhow::Result<()> {
    match config_path() {
        Some(path) if path.exists() => println!("# Config file: {}", path.display()),
        Some(path) => println!("# Config file: {} (not created, using defaults)", path.display()),
        None => println!("# No config directory on this platform"),
    }
    println!("{}", toml::to_string_pretty(config)?);

    if init {
        let path = save(config)?;
        println!("# Saved to {}", path.display());
    }
    Ok(())
}
