//! Datastore connection strings.
//!
//! The service reads SQLAlchemy-style URLs (`postgresql+psycopg2://…`), so the
//! driver suffix is stripped before the URL is handed to a probe.

use url::Url;

use crate::error::{BootError, Result};

pub const DEFAULT_POSTGRES_PORT: u16 = 5432;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseKind {
    Postgres,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseUrl {
    kind: DatabaseKind,
    url: Url,
}

impl DatabaseUrl {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (scheme, rest) = raw
            .split_once("://")
            .ok_or_else(|| BootError::Config(format!("malformed database URL '{raw}'")))?;

        // postgresql+psycopg2 -> postgresql
        let base = scheme.split('+').next().unwrap_or(scheme);
        let kind = match base {
            "postgres" | "postgresql" => DatabaseKind::Postgres,
            "sqlite" => DatabaseKind::Sqlite,
            other => return Err(BootError::UnsupportedScheme(other.to_string())),
        };

        let url = Url::parse(&format!("{base}://{rest}"))?;
        if kind == DatabaseKind::Postgres && url.host_str().map_or(true, str::is_empty) {
            return Err(BootError::Config(format!(
                "database URL has no host: {}",
                redact(&url)
            )));
        }

        Ok(Self { kind, url })
    }

    pub fn kind(&self) -> DatabaseKind {
        self.kind
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or("")
    }

    pub fn port(&self) -> u16 {
        self.url.port().unwrap_or(DEFAULT_POSTGRES_PORT)
    }

    pub fn database(&self) -> &str {
        self.url.path().trim_start_matches('/')
    }

    pub fn username(&self) -> &str {
        self.url.username()
    }

    /// The URL with the driver suffix removed, suitable for a Postgres client.
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    /// The URL with any password masked, for log lines.
    pub fn redacted(&self) -> String {
        redact(&self.url)
    }
}

fn redact(url: &Url) -> String {
    let mut masked = url.clone();
    if masked.password().is_some() {
        let _ = masked.set_password(Some("***"));
    }
    masked.to_string()
}

/// Resolve the datastore URL from the environment: `DATABASE_URL` first, then
/// `DEV_DATABASE_URL`.
pub fn url_from_env(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    ["DATABASE_URL", "DEV_DATABASE_URL"]
        .iter()
        .filter_map(|key| lookup(key))
        .find(|v| !v.trim().is_empty())
}
