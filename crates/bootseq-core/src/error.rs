use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BootError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unsupported database URL scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("no database URL configured: set DATABASE_URL")]
    MissingDatabaseUrl,

    #[error("readiness probe failed: {0}")]
    ProbeFailed(String),

    #[error("datastore unreachable after {attempts} attempt(s) in {elapsed:?}: {last_error}")]
    DatastoreUnreachable {
        attempts: u32,
        elapsed: Duration,
        last_error: String,
    },

    #[error("datastore wait cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },

    #[error("step '{step}' failed to start: {reason}")]
    StepSpawn { step: String, reason: String },

    #[error("step '{step}' exited with {}", describe_exit(.code))]
    StepFailed { step: String, code: Option<i32> },

    #[error("identity provider: {0}")]
    Identity(String),

    #[error("program not found on PATH: {0}")]
    ProgramNotFound(String),

    #[error("failed to launch service: {0}")]
    Launch(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl BootError {
    /// Process exit status for this error. A failed step hands its own
    /// non-zero code through; everything else is 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            BootError::StepFailed {
                code: Some(code), ..
            } if *code != 0 => *code,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, BootError>;

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("code {c}"),
        None => "a signal".to_string(),
    }
}
