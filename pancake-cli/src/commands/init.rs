//! Init-config command implementation.

use anyhow::{bail, Result};
use pancake::config::{expand_tilde, Config};
use std::path::Path;

/// Write the default configuration to `path`.
pub fn run_init_config(path: &Path, force: bool) -> Result<()> {
    let path = expand_tilde(path)?;
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    Config::default().save(&path)?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}
