pub mod check;
pub mod config;
pub mod plan;
pub mod provision;
pub mod run;

use anyhow::Context;
use bootseq_core::Config;
use std::path::Path;

/// Defaults, then the config file when one was found, then the process
/// environment.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let cfg = Config::resolve(path, |key| std::env::var(key).ok());
    match path {
        Some(p) => cfg.with_context(|| format!("failed to load config from {}", p.display())),
        None => cfg.context("failed to load config from environment"),
    }
}
