//! Best-effort Keycloak provisioning.
//!
//! Ensures the application realm and confidential client exist, reads the
//! client secret back, and writes it into the service's env file when that
//! file still carries the placeholder. Every call goes through the Keycloak
//! admin REST API using a token obtained from the master realm.
//!
//! The sequencer treats every error from here as degraded, not fatal.

use std::path::Path;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

use crate::config::IdentityConfig;
use crate::error::{BootError, Result};

/// Line written into fresh `.env` templates before provisioning has run.
pub const SECRET_PLACEHOLDER: &str = "KEYCLOAK_CLIENT_SECRET=your-client-secret";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionSummary {
    pub realm: String,
    pub realm_created: bool,
    pub client_id: String,
    pub client_created: bool,
    pub env_file_updated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityOutcome {
    Provisioned(ProvisionSummary),
    Skipped(String),
    Failed(String),
}

impl IdentityOutcome {
    pub fn is_configured(&self) -> bool {
        matches!(self, IdentityOutcome::Provisioned(_))
    }
}

pub trait IdentityProvisioner {
    /// `Ok(Provisioned | Skipped)` or an error describing what went wrong.
    fn provision(&mut self) -> Result<IdentityOutcome>;
}

// ---------------------------------------------------------------------------
// KeycloakClient
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct ClientRepresentation {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SecretRepresentation {
    value: String,
}

pub struct KeycloakClient {
    base: String,
    realm: String,
    http: Client,
}

impl KeycloakClient {
    pub fn new(base: &str, realm: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base: base.trim_end_matches('/').to_string(),
            realm: realm.to_string(),
            http,
        })
    }

    pub fn admin_token(&self, username: &str, password: &str) -> Result<String> {
        let resp = self
            .http
            .post(format!(
                "{}/realms/master/protocol/openid-connect/token",
                self.base
            ))
            .form(&[
                ("grant_type", "password"),
                ("client_id", "admin-cli"),
                ("username", username),
                ("password", password),
            ])
            .send()?;
        let resp = expect_status(resp, StatusCode::OK, "admin token")?;
        Ok(resp.json::<TokenResponse>()?.access_token)
    }

    pub fn realm_exists(&self, token: &str) -> Result<bool> {
        let resp = self
            .http
            .get(format!("{}/admin/realms/{}", self.base, self.realm))
            .bearer_auth(token)
            .send()?;
        Ok(resp.status() == StatusCode::OK)
    }

    pub fn create_realm(&self, token: &str) -> Result<()> {
        let body = json!({
            "realm": self.realm,
            "enabled": true,
            "displayName": "BuyZaar",
            "loginTheme": "keycloak",
            "accountTheme": "keycloak",
            "adminTheme": "keycloak",
            "emailTheme": "keycloak",
            "accessTokenLifespan": 900,
            "ssoSessionIdleTimeout": 1800,
            "ssoSessionMaxLifespan": 36000,
            "offlineSessionIdleTimeout": 2_592_000,
            "accessCodeLifespan": 60,
            "accessCodeLifespanUserAction": 300,
            "accessCodeLifespanLogin": 1800,
            "bruteForceProtected": true,
            "permanentLockout": false,
            "maxFailureWaitSeconds": 900,
            "minimumQuickLoginWaitSeconds": 60,
            "waitIncrementSeconds": 60,
            "quickLoginCheckMilliSeconds": 1000,
            "maxDeltaTimeSeconds": 43200,
            "failureFactor": 3
        });
        let resp = self
            .http
            .post(format!("{}/admin/realms", self.base))
            .bearer_auth(token)
            .json(&body)
            .send()?;
        expect_status(resp, StatusCode::CREATED, "create realm")?;
        Ok(())
    }

    /// Internal id of the client with the given `clientId`, if it exists.
    pub fn find_client(&self, token: &str, client_id: &str) -> Result<Option<String>> {
        let resp = self
            .http
            .get(self.clients_url())
            .query(&[("clientId", client_id)])
            .bearer_auth(token)
            .send()?;
        let resp = expect_status(resp, StatusCode::OK, "list clients")?;
        let clients: Vec<ClientRepresentation> = resp.json()?;
        Ok(clients.into_iter().next().map(|c| c.id))
    }

    /// Create a confidential client and return its internal id.
    pub fn create_client(&self, token: &str, cfg: &IdentityConfig) -> Result<String> {
        let body = json!({
            "clientId": cfg.client_id,
            "enabled": true,
            "name": "BuyZaar Client",
            "description": "BuyZaar Client",
            "rootUrl": cfg.root_url,
            "adminUrl": cfg.root_url,
            "baseUrl": cfg.root_url,
            "redirectUris": cfg.redirect_uris,
            "webOrigins": cfg.web_origins,
            "publicClient": false,
            "directAccessGrantsEnabled": true,
            "standardFlowEnabled": true,
            "implicitFlowEnabled": false,
            "serviceAccountsEnabled": true,
            "authorizationServicesEnabled": true,
            "fullScopeAllowed": true
        });
        let resp = self
            .http
            .post(self.clients_url())
            .bearer_auth(token)
            .json(&body)
            .send()?;
        let resp = expect_status(resp, StatusCode::CREATED, "create client")?;

        // Keycloak answers 201 with Location: …/clients/{id}
        let from_location = resp
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|loc| loc.rsplit('/').next())
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        match from_location {
            Some(id) => Ok(id),
            None => self.find_client(token, &cfg.client_id)?.ok_or_else(|| {
                BootError::Identity(format!(
                    "client '{}' not found after creation",
                    cfg.client_id
                ))
            }),
        }
    }

    pub fn client_secret(&self, token: &str, internal_id: &str) -> Result<String> {
        let resp = self
            .http
            .get(format!("{}/{internal_id}/client-secret", self.clients_url()))
            .bearer_auth(token)
            .send()?;
        let resp = expect_status(resp, StatusCode::OK, "client secret")?;
        Ok(resp.json::<SecretRepresentation>()?.value)
    }

    /// `GET /health`, falling back to the realm's OpenID discovery document.
    pub fn health(&self) -> Result<()> {
        match self.http.get(format!("{}/health", self.base)).send() {
            Ok(resp) if resp.status() == StatusCode::OK => return Ok(()),
            Ok(resp) => {
                tracing::debug!(status = %resp.status(), "health endpoint not available");
            }
            Err(e) => tracing::debug!(error = %e, "health endpoint unreachable"),
        }

        let resp = self
            .http
            .get(format!(
                "{}/realms/{}/.well-known/openid-configuration",
                self.base, self.realm
            ))
            .send()?;
        expect_status(resp, StatusCode::OK, "realm discovery")?;
        Ok(())
    }

    fn clients_url(&self) -> String {
        format!("{}/admin/realms/{}/clients", self.base, self.realm)
    }
}

fn expect_status(resp: Response, want: StatusCode, what: &str) -> Result<Response> {
    if resp.status() == want {
        return Ok(resp);
    }
    let status = resp.status();
    let body: String = resp.text().unwrap_or_default().chars().take(500).collect();
    Err(BootError::Identity(format!("{what}: HTTP {status}: {body}")))
}

// ---------------------------------------------------------------------------
// KeycloakProvisioner
// ---------------------------------------------------------------------------

pub struct KeycloakProvisioner {
    cfg: IdentityConfig,
}

impl KeycloakProvisioner {
    pub fn new(cfg: IdentityConfig) -> Self {
        Self { cfg }
    }
}

impl IdentityProvisioner for KeycloakProvisioner {
    fn provision(&mut self) -> Result<IdentityOutcome> {
        if !self.cfg.enabled {
            return Ok(IdentityOutcome::Skipped("disabled".into()));
        }
        let Some(base) = self.cfg.base_url() else {
            return Ok(IdentityOutcome::Skipped("no server URL configured".into()));
        };

        let kc = KeycloakClient::new(
            base,
            &self.cfg.realm,
            Duration::from_secs(self.cfg.request_timeout_secs),
        )?;

        tracing::info!(server = %base, "requesting admin token");
        let token = kc.admin_token(&self.cfg.admin_user, &self.cfg.admin_password)?;

        let realm_created = if kc.realm_exists(&token)? {
            tracing::info!(realm = %self.cfg.realm, "realm already exists");
            false
        } else {
            tracing::info!(realm = %self.cfg.realm, "creating realm");
            kc.create_realm(&token)?;
            true
        };

        let (internal_id, client_created) = match kc.find_client(&token, &self.cfg.client_id)? {
            Some(id) => {
                tracing::info!(client = %self.cfg.client_id, "client already exists");
                (id, false)
            }
            None => {
                tracing::info!(client = %self.cfg.client_id, "creating client");
                (kc.create_client(&token, &self.cfg)?, true)
            }
        };

        let secret = kc.client_secret(&token, &internal_id)?;
        tracing::info!(client = %self.cfg.client_id, "fetched client secret");

        let env_file_updated = match &self.cfg.env_file {
            Some(path) => write_secret(Path::new(path), &secret)?,
            None => false,
        };

        Ok(IdentityOutcome::Provisioned(ProvisionSummary {
            realm: self.cfg.realm.clone(),
            realm_created,
            client_id: self.cfg.client_id.clone(),
            client_created,
            env_file_updated,
        }))
    }
}

/// Swap the placeholder secret line in an env file for the real secret.
pub fn write_secret(path: &Path, secret: &str) -> Result<bool> {
    let updated = crate::io::replace_line(
        path,
        SECRET_PLACEHOLDER,
        &format!("KEYCLOAK_CLIENT_SECRET={secret}"),
    )?;
    if updated {
        tracing::info!(path = %path.display(), "wrote client secret to env file");
    }
    Ok(updated)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
