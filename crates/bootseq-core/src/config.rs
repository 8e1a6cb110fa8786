use crate::database::{self, DatabaseKind, DatabaseUrl};
use crate::error::{BootError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

pub const CONFIG_FILE_NAME: &str = "bootseq.yaml";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// Enumerated choices
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    #[default]
    Auto,
    Postgres,
    Tcp,
    None,
}

impl ProbeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeKind::Auto => "auto",
            ProbeKind::Postgres => "postgres",
            ProbeKind::Tcp => "tcp",
            ProbeKind::None => "none",
        }
    }

    /// Collapse `Auto` into a concrete probe for the given datastore.
    pub fn resolve(self, kind: DatabaseKind) -> ProbeKind {
        match (self, kind) {
            (ProbeKind::Auto, DatabaseKind::Postgres) => ProbeKind::Postgres,
            (ProbeKind::Auto, DatabaseKind::Sqlite) => ProbeKind::None,
            (other, _) => other,
        }
    }
}

impl FromStr for ProbeKind {
    type Err = BootError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(ProbeKind::Auto),
            "postgres" | "postgresql" => Ok(ProbeKind::Postgres),
            "tcp" => Ok(ProbeKind::Tcp),
            "none" | "off" => Ok(ProbeKind::None),
            other => Err(BootError::Config(format!(
                "unknown probe kind '{other}' (expected auto, postgres, tcp or none)"
            ))),
        }
    }
}

/// What happens when the seed step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedPolicy {
    /// Abort startup; the service never launches.
    #[default]
    Fatal,
    /// Log a warning and keep going.
    Warn,
}

impl SeedPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeedPolicy::Fatal => "fatal",
            SeedPolicy::Warn => "warn",
        }
    }
}

impl FromStr for SeedPolicy {
    type Err = BootError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fatal" => Ok(SeedPolicy::Fatal),
            "warn" | "non-fatal" | "non_fatal" => Ok(SeedPolicy::Warn),
            other => Err(BootError::Config(format!(
                "unknown seed policy '{other}' (expected fatal or warn)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    #[default]
    Development,
    Production,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Development => "development",
            RunMode::Production => "production",
        }
    }
}

impl FromStr for RunMode {
    type Err = BootError;

    /// Only `production`/`prod` select production; any other non-empty value
    /// (`development`, `default`, `testing`) is the development server.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" => Err(BootError::Config("empty run mode".into())),
            "production" | "prod" => Ok(RunMode::Production),
            _ => Ok(RunMode::Development),
        }
    }
}

// ---------------------------------------------------------------------------
// DatabaseConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub probe: ProbeKind,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_connect_timeout() -> u64 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            probe: ProbeKind::Auto,
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl DatabaseConfig {
    pub fn parsed_url(&self) -> Result<DatabaseUrl> {
        let raw = self.url.as_deref().ok_or(BootError::MissingDatabaseUrl)?;
        DatabaseUrl::parse(raw)
    }
}

// ---------------------------------------------------------------------------
// ReadinessConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessConfig {
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    /// 0 means no attempt limit.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_secs: Option<u64>,
}

fn default_interval() -> u64 {
    2
}

fn default_max_attempts() -> u32 {
    90
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            max_attempts: default_max_attempts(),
            deadline_secs: None,
        }
    }
}

impl ReadinessConfig {
    pub fn is_unbounded(&self) -> bool {
        self.max_attempts == 0 && self.deadline_secs.is_none()
    }
}

// ---------------------------------------------------------------------------
// StepConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrateConfig {
    #[serde(default = "default_migrate_command")]
    pub command: Vec<String>,
}

fn default_migrate_command() -> Vec<String> {
    vec!["flask".into(), "db".into(), "upgrade".into()]
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            command: default_migrate_command(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedConfig {
    #[serde(default = "default_seed_command")]
    pub command: Vec<String>,
    #[serde(default)]
    pub policy: SeedPolicy,
}

fn default_seed_command() -> Vec<String> {
    vec!["python".into(), "scripts/init_db.py".into()]
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            command: default_seed_command(),
            policy: SeedPolicy::Fatal,
        }
    }
}

// ---------------------------------------------------------------------------
// IdentityConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
    #[serde(default = "default_realm")]
    pub realm: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_admin_user")]
    pub admin_user: String,
    #[serde(default = "default_admin_password")]
    pub admin_password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_file: Option<String>,
    #[serde(default = "default_root_url")]
    pub root_url: String,
    #[serde(default = "default_redirect_uris")]
    pub redirect_uris: Vec<String>,
    #[serde(default = "default_web_origins")]
    pub web_origins: Vec<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_realm() -> String {
    "buyzaar".to_string()
}

fn default_client_id() -> String {
    "buyzaar-client".to_string()
}

fn default_admin_user() -> String {
    "admin".to_string()
}

fn default_admin_password() -> String {
    "admin".to_string()
}

fn default_root_url() -> String {
    "http://localhost:5173".to_string()
}

fn default_redirect_uris() -> Vec<String> {
    vec![
        "http://localhost:5173/*".to_string(),
        "http://localhost:5000/*".to_string(),
    ]
}

fn default_web_origins() -> Vec<String> {
    vec![
        "http://localhost:5173".to_string(),
        "http://localhost:5000".to_string(),
    ]
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            server_url: None,
            realm: default_realm(),
            client_id: default_client_id(),
            admin_user: default_admin_user(),
            admin_password: default_admin_password(),
            env_file: None,
            root_url: default_root_url(),
            redirect_uris: default_redirect_uris(),
            web_origins: default_web_origins(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl IdentityConfig {
    /// Server URL without a trailing slash, if one is configured.
    pub fn base_url(&self) -> Option<&str> {
        self.server_url
            .as_deref()
            .map(|u| u.trim().trim_end_matches('/'))
            .filter(|u| !u.is_empty())
    }
}

// ---------------------------------------------------------------------------
// ServiceConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub mode: RunMode,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_workers")]
    pub workers: u32,
    #[serde(default = "default_worker_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_app")]
    pub app: String,
    /// Full argv override; empty means derive from `mode`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_args: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_workers() -> u32 {
    4
}

fn default_worker_timeout() -> u64 {
    120
}

fn default_app() -> String {
    "run:app".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::Development,
            host: default_host(),
            port: default_port(),
            workers: default_workers(),
            timeout_secs: default_worker_timeout(),
            app: default_app(),
            command: Vec::new(),
            extra_args: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub readiness: ReadinessConfig,
    #[serde(default)]
    pub migrate: MigrateConfig,
    #[serde(default)]
    pub seed: SeedConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub service: ServiceConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    /// Defaults, then the file (if any), then environment overrides.
    pub fn resolve(path: Option<&Path>, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = match path {
            Some(p) => Self::load(p)?,
            None => Self::default(),
        };
        cfg.apply_env(lookup)?;
        Ok(cfg)
    }

    /// Overlay recognised environment variables. Empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = database::url_from_env(&lookup) {
            self.database.url = Some(url);
        }
        if let Some(v) = get("DB_PROBE") {
            self.database.probe = v.parse()?;
        }
        if let Some(v) = get("DB_CONNECT_TIMEOUT") {
            self.database.connect_timeout_secs = parse_num("DB_CONNECT_TIMEOUT", &v)?;
        }

        if let Some(v) = get("DB_WAIT_INTERVAL") {
            self.readiness.interval_secs = parse_num("DB_WAIT_INTERVAL", &v)?;
        }
        if let Some(v) = get("DB_WAIT_MAX_ATTEMPTS") {
            self.readiness.max_attempts = parse_num("DB_WAIT_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("DB_WAIT_TIMEOUT") {
            self.readiness.deadline_secs = Some(parse_num("DB_WAIT_TIMEOUT", &v)?);
        }

        if let Some(v) = get("SEED_POLICY") {
            self.seed.policy = v.parse()?;
        }

        if let Some(v) = get("IDENTITY_PROVISIONING") {
            self.identity.enabled = parse_flag("IDENTITY_PROVISIONING", &v)?;
        }
        if let Some(v) = get("KEYCLOAK_SERVER_URL") {
            self.identity.server_url = Some(v);
        }
        if let Some(v) = get("KEYCLOAK_REALM") {
            self.identity.realm = v;
        }
        if let Some(v) = get("KEYCLOAK_CLIENT_ID") {
            self.identity.client_id = v;
        }
        if let Some(v) = get("KEYCLOAK_ADMIN") {
            self.identity.admin_user = v;
        }
        if let Some(v) = get("KEYCLOAK_ADMIN_PASSWORD") {
            self.identity.admin_password = v;
        }
        if let Some(v) = get("KEYCLOAK_ENV_FILE") {
            self.identity.env_file = Some(v);
        }

        if let Some(v) = get("RUN_MODE")
            .or_else(|| get("FLASK_CONFIG"))
            .or_else(|| get("FLASK_ENV"))
        {
            self.service.mode = v.parse()?;
        }
        if let Some(v) = get("HOST") {
            self.service.host = v;
        }
        if let Some(v) = get("PORT") {
            self.service.port = parse_num("PORT", &v)?;
        }
        if let Some(v) = get("WORKERS") {
            self.service.workers = parse_num("WORKERS", &v)?;
        }
        if let Some(v) = get("WORKER_TIMEOUT") {
            self.service.timeout_secs = parse_num("WORKER_TIMEOUT", &v)?;
        }
        if let Some(v) = get("APP_MODULE") {
            self.service.app = v;
        }

        Ok(())
    }

    /// A copy safe to print: passwords in the database URL and the identity
    /// admin password are masked.
    pub fn redacted(&self) -> Self {
        let mut cfg = self.clone();
        if let Some(url) = &cfg.database.url {
            if let Ok(parsed) = DatabaseUrl::parse(url) {
                cfg.database.url = Some(parsed.redacted());
            }
        }
        cfg.identity.admin_password = "***".to_string();
        cfg
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut error = |message: String| {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message,
            })
        };

        match &self.database.url {
            None => error("database.url is not set (DATABASE_URL)".to_string()),
            Some(raw) => {
                if let Err(e) = DatabaseUrl::parse(raw) {
                    error(format!("database.url is invalid: {e}"));
                }
            }
        }
        if self.service.workers == 0 {
            error("service.workers must be at least 1".to_string());
        }
        if self.service.port == 0 {
            error("service.port must be non-zero".to_string());
        }

        let mut warn = |message: String| {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message,
            })
        };

        if self.readiness.is_unbounded() {
            warn(
                "readiness has no attempt limit or deadline; an unreachable datastore blocks startup forever"
                    .to_string(),
            );
        }
        if self.readiness.interval_secs == 0 {
            warn(
                "readiness.interval_secs is 0; failed probes are retried without pause"
                    .to_string(),
            );
        }
        if self.migrate.command.is_empty() {
            warn("migrate.command is empty; migrations will be skipped".to_string());
        }
        if self.identity.enabled && self.identity.base_url().is_none() {
            warn(
                "identity.enabled is set but identity.server_url is not (KEYCLOAK_SERVER_URL); provisioning will be skipped"
                    .to_string(),
            );
        }
        if self.identity.enabled
            && self.service.mode == RunMode::Production
            && self.identity.admin_password == default_admin_password()
        {
            warn("identity.admin_password is the default value in production".to_string());
        }

        warnings
    }
}

fn parse_num<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| BootError::Config(format!("{key}: expected a number, got '{value}'")))
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(BootError::Config(format!(
            "{key}: expected true/false, got '{value}'"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
