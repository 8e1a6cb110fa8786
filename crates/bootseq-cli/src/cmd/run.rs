use super::load_config;
use anyhow::Context;
use bootseq_core::config::WarnLevel;
use bootseq_core::{BootPlan, RunMode, SeedPolicy, Sequencer};
use std::path::Path;

/// Command-line flags that take precedence over file and environment.
#[derive(Debug, Default)]
pub struct Overrides {
    pub mode: Option<RunMode>,
    pub seed_policy: Option<SeedPolicy>,
    pub skip_identity: bool,
}

pub fn run(config_path: Option<&Path>, overrides: Overrides) -> anyhow::Result<()> {
    let mut cfg = load_config(config_path)?;
    if let Some(mode) = overrides.mode {
        cfg.service.mode = mode;
    }
    if let Some(policy) = overrides.seed_policy {
        cfg.seed.policy = policy;
    }
    if overrides.skip_identity {
        cfg.identity.enabled = false;
    }

    let mut errors = Vec::new();
    for w in cfg.validate() {
        match w.level {
            WarnLevel::Warning => tracing::warn!("{}", w.message),
            WarnLevel::Error => errors.push(w.message),
        }
    }
    if !errors.is_empty() {
        anyhow::bail!("invalid configuration: {}", errors.join("; "));
    }

    let plan = BootPlan::from_config(&cfg);
    let mut sequencer = Sequencer::from_config(&cfg).context("failed to prepare startup")?;

    // Only returns when the launcher hands back control, which the exec
    // launcher does solely on failure.
    sequencer.run(&plan)?;
    Ok(())
}
