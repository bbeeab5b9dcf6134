//! Config command.

use crate::config::Settings;

/// Print the effective settings.
pub fn run_config(settings: &Settings) -> anyhow::Result<()> {
    println!("{}", settings.to_toml()?);
    Ok(())
}
