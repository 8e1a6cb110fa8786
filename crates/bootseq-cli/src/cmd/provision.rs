use super::load_config;
use crate::output::print_json;
use bootseq_core::{IdentityOutcome, IdentityProvisioner, KeycloakProvisioner};
use std::path::Path;

/// Standalone provisioning. Unlike the startup sequence, a failure or a
/// skip here is reported as an error.
pub fn run(config_path: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let mut cfg = load_config(config_path)?;
    // An explicit request overrides a disabled flag; a missing URL still skips.
    cfg.identity.enabled = true;

    match KeycloakProvisioner::new(cfg.identity).provision()? {
        IdentityOutcome::Provisioned(summary) => {
            if json {
                print_json(&serde_json::json!({
                    "realm": summary.realm,
                    "realm_created": summary.realm_created,
                    "client_id": summary.client_id,
                    "client_created": summary.client_created,
                    "env_file_updated": summary.env_file_updated,
                }))?;
            } else {
                let verb = |created: bool| if created { "created" } else { "exists" };
                println!("realm  {} ({})", summary.realm, verb(summary.realm_created));
                println!("client {} ({})", summary.client_id, verb(summary.client_created));
                if summary.env_file_updated {
                    println!("client secret written to env file");
                }
            }
            Ok(())
        }
        IdentityOutcome::Skipped(reason) => anyhow::bail!("provisioning skipped: {reason}"),
        IdentityOutcome::Failed(error) => anyhow::bail!("provisioning failed: {error}"),
    }
}
