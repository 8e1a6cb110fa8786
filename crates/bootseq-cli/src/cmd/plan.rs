use super::load_config;
use crate::output::print_json;
use bootseq_core::{build_plan, RunMode};
use std::path::Path;

pub fn run(config_path: Option<&Path>, mode: Option<RunMode>, json: bool) -> anyhow::Result<()> {
    let mut cfg = load_config(config_path)?;
    if let Some(mode) = mode {
        cfg.service.mode = mode;
    }

    let plan = build_plan(&cfg.service);
    if json {
        print_json(&plan)?;
    } else {
        println!("mode:    {}", plan.mode.as_str());
        println!("command: {}", plan.display());
        for (key, value) in &plan.env {
            println!("env:     {key}={value}");
        }
    }
    Ok(())
}
