use super::load_config;
use crate::output::print_json;
use anyhow::Context;
use bootseq_core::readiness::{build_probe, PostgresProbe};
use bootseq_core::{KeycloakClient, ProbeKind, ReadinessProbe};
use clap::Subcommand;
use std::path::Path;
use std::time::Duration;

#[derive(Subcommand)]
pub enum CheckSubcommand {
    /// Probe the datastore once (no retries)
    Db,

    /// Check that the identity provider answers
    Idp,
}

pub fn run(config_path: Option<&Path>, subcmd: CheckSubcommand, json: bool) -> anyhow::Result<()> {
    let cfg = load_config(config_path)?;
    match subcmd {
        CheckSubcommand::Db => check_db(&cfg, json),
        CheckSubcommand::Idp => check_idp(&cfg, json),
    }
}

fn check_db(cfg: &bootseq_core::Config, json: bool) -> anyhow::Result<()> {
    let db = cfg.database.parsed_url()?;
    let (target, result) = match cfg.database.probe.resolve(db.kind()) {
        ProbeKind::Postgres => {
            let mut probe =
                PostgresProbe::new(&db, Duration::from_secs(cfg.database.connect_timeout_secs))?;
            (probe.target(), probe.server_version().map(Some))
        }
        _ => {
            let mut probe = build_probe(&cfg.database)?;
            (probe.target(), probe.probe().map(|()| None))
        }
    };

    if json {
        print_json(&serde_json::json!({
            "target": target,
            "ready": result.is_ok(),
            "version": result.as_ref().ok().and_then(|v| v.as_deref()),
            "error": result.as_ref().err().map(ToString::to_string),
        }))?;
    } else if let Ok(version) = &result {
        match version {
            Some(v) => println!("{target}: ready ({v})"),
            None => println!("{target}: ready"),
        }
    }

    result
        .map(|_| ())
        .with_context(|| format!("{target} is not ready"))
}

fn check_idp(cfg: &bootseq_core::Config, json: bool) -> anyhow::Result<()> {
    let Some(base) = cfg.identity.base_url() else {
        anyhow::bail!("identity.server_url is not set (KEYCLOAK_SERVER_URL)");
    };
    let client = KeycloakClient::new(
        base,
        &cfg.identity.realm,
        Duration::from_secs(cfg.identity.request_timeout_secs),
    )?;
    let result = client.health();

    if json {
        print_json(&serde_json::json!({
            "server": base,
            "healthy": result.is_ok(),
            "error": result.as_ref().err().map(ToString::to_string),
        }))?;
    } else if result.is_ok() {
        println!("{base}: healthy");
    }

    result.with_context(|| format!("identity provider at {base} is not healthy"))
}
