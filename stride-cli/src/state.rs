use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

/// `$STRIDE_HOME`, or `~/.stride`.
pub fn stride_home() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("STRIDE_HOME") {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    let home = std::env::var("HOME").context("HOME is not set")?;
    Ok(PathBuf::from(home).join(".stride"))
}

pub fn ensure_stride_home() -> Result<PathBuf> {
    let dir = stride_home()?;
    fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    Ok(dir)
}

pub fn state_path() -> Result<PathBuf> {
    Ok(ensure_stride_home()?.join("state.json"))
}
