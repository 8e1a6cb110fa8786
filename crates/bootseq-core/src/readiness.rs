//! Datastore readiness polling.
//!
//! A [`ReadinessProbe`] makes one lightweight attempt to reach the datastore.
//! [`wait_for_datastore`] repeats it on a fixed interval until it succeeds,
//! the [`RetryPolicy`] is exhausted, or the [`CancelToken`] fires.

use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use sqlx::postgres::PgConnection;
use sqlx::Connection;

use crate::config::{DatabaseConfig, ProbeKind, ReadinessConfig};
use crate::database::DatabaseUrl;
use crate::error::{BootError, Result};

// ---------------------------------------------------------------------------
// Readiness / RetryPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    NotYetReady,
    Ready,
    Unreachable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    /// `None` means no attempt limit.
    pub max_attempts: Option<u32>,
    pub deadline: Option<Duration>,
}

impl RetryPolicy {
    /// Poll forever. Only reachable through explicit configuration.
    pub fn unbounded(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
            deadline: None,
        }
    }

    /// Classify the state after `attempts` failed probes spanning `elapsed`.
    /// A successful probe is [`Readiness::Ready`] and never reaches this.
    pub fn assess(&self, attempts: u32, elapsed: Duration) -> Readiness {
        let out_of_attempts = self.max_attempts.is_some_and(|max| attempts >= max);
        let out_of_time = self.deadline.is_some_and(|d| elapsed >= d);
        if out_of_attempts || out_of_time {
            Readiness::Unreachable
        } else {
            Readiness::NotYetReady
        }
    }

    /// How long to sleep before the next attempt, clipped to the deadline.
    fn next_delay(&self, elapsed: Duration) -> Duration {
        match self.deadline {
            Some(d) => self.interval.min(d.saturating_sub(elapsed)),
            None => self.interval,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&ReadinessConfig::default())
    }
}

impl From<&ReadinessConfig> for RetryPolicy {
    fn from(cfg: &ReadinessConfig) -> Self {
        Self {
            interval: Duration::from_secs(cfg.interval_secs),
            max_attempts: (cfg.max_attempts > 0).then_some(cfg.max_attempts),
            deadline: cfg.deadline_secs.map(Duration::from_secs),
        }
    }
}

// ---------------------------------------------------------------------------
// CancelToken / Clock
// ---------------------------------------------------------------------------

/// Shared flag that interrupts a readiness wait, including one that is
/// currently sleeping between attempts.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock().unwrap_or_else(|e| e.into_inner()) = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Block for up to `timeout`. Returns `true` if the token was cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |cancelled| !*cancelled)
            .unwrap_or_else(|e| e.into_inner());
        *guard
    }
}

pub trait Clock {
    /// Monotonic time since an arbitrary fixed origin.
    fn now(&self) -> Duration;

    /// Sleep for `duration` unless cancelled first. Returns `true` on cancel.
    fn sleep(&mut self, duration: Duration, cancel: &CancelToken) -> bool;
}

#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&mut self, duration: Duration, cancel: &CancelToken) -> bool {
        cancel.wait_timeout(duration)
    }
}

// ---------------------------------------------------------------------------
// Probes
// ---------------------------------------------------------------------------

pub trait ReadinessProbe {
    /// Human-readable target for log lines. Must not contain credentials.
    fn target(&self) -> String;

    /// One attempt. `Err` means not reachable yet.
    fn probe(&mut self) -> Result<()>;
}

/// Succeeds immediately; used when there is nothing to wait for.
#[derive(Debug, Default)]
pub struct NoProbe;

impl ReadinessProbe for NoProbe {
    fn target(&self) -> String {
        "none".to_string()
    }

    fn probe(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Checks that something accepts TCP connections on the datastore's port.
#[derive(Debug)]
pub struct TcpProbe {
    host: String,
    port: u16,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }
}

impl ReadinessProbe for TcpProbe {
    fn target(&self) -> String {
        format!("tcp://{}:{}", self.host, self.port)
    }

    fn probe(&mut self) -> Result<()> {
        let addrs = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| BootError::ProbeFailed(format!("resolve {}: {e}", self.host)))?;

        let mut last = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(_) => return Ok(()),
                Err(e) => last = Some(format!("{addr}: {e}")),
            }
        }
        Err(BootError::ProbeFailed(
            last.unwrap_or_else(|| format!("no addresses for {}", self.host)),
        ))
    }
}

/// Opens a real Postgres connection and runs `SELECT version()`.
///
/// Drives a single connection on a private current-thread runtime so the
/// sequencer itself stays synchronous. The connection is closed after each
/// attempt.
pub struct PostgresProbe {
    url: String,
    display: String,
    timeout: Duration,
    runtime: tokio::runtime::Runtime,
}

impl PostgresProbe {
    pub fn new(db: &DatabaseUrl, timeout: Duration) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            url: db.as_str().to_string(),
            display: db.redacted(),
            timeout,
            runtime,
        })
    }

    /// Connect once and return the server's version string.
    pub fn server_version(&mut self) -> Result<String> {
        let url = self.url.as_str();
        let timeout = self.timeout;
        self.runtime.block_on(async move {
            let attempt = async {
                let mut conn = PgConnection::connect(url).await?;
                let version: String = sqlx::query_scalar("SELECT version()")
                    .fetch_one(&mut conn)
                    .await?;
                conn.close().await?;
                Ok::<_, sqlx::Error>(version)
            };
            match tokio::time::timeout(timeout, attempt).await {
                Ok(Ok(version)) => Ok(version),
                Ok(Err(e)) => Err(BootError::ProbeFailed(e.to_string())),
                Err(_) => Err(BootError::ProbeFailed(format!(
                    "no response within {timeout:?}"
                ))),
            }
        })
    }
}

impl ReadinessProbe for PostgresProbe {
    fn target(&self) -> String {
        self.display.clone()
    }

    fn probe(&mut self) -> Result<()> {
        let version = self.server_version()?;
        tracing::debug!(%version, "datastore answered");
        Ok(())
    }
}

/// Build the probe selected by the database configuration.
pub fn build_probe(cfg: &DatabaseConfig) -> Result<Box<dyn ReadinessProbe>> {
    let db = cfg.parsed_url()?;
    let timeout = Duration::from_secs(cfg.connect_timeout_secs);
    let probe: Box<dyn ReadinessProbe> = match cfg.probe.resolve(db.kind()) {
        ProbeKind::Postgres => Box::new(PostgresProbe::new(&db, timeout)?),
        ProbeKind::Tcp => Box::new(TcpProbe::new(db.host(), db.port(), timeout)),
        ProbeKind::None | ProbeKind::Auto => Box::new(NoProbe),
    };
    Ok(probe)
}

// ---------------------------------------------------------------------------
// wait_for_datastore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitReport {
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Probe until ready. Every attempt is logged; a failed attempt is followed
/// by a sleep of `policy.interval` (clipped to the deadline).
pub fn wait_for_datastore(
    probe: &mut dyn ReadinessProbe,
    policy: &RetryPolicy,
    clock: &mut dyn Clock,
    cancel: &CancelToken,
) -> Result<WaitReport> {
    let target = probe.target();
    let start = clock.now();
    let mut attempts = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(BootError::Cancelled { attempts });
        }

        attempts += 1;
        tracing::info!(attempt = attempts, %target, "probing datastore");

        let result = probe.probe();
        let elapsed = clock.now().saturating_sub(start);
        let readiness = match &result {
            Ok(()) => Readiness::Ready,
            Err(_) => policy.assess(attempts, elapsed),
        };
        let error = result.err().map(|e| e.to_string()).unwrap_or_default();

        match readiness {
            Readiness::Ready => {
                tracing::info!(attempt = attempts, ?elapsed, "datastore is ready");
                return Ok(WaitReport { attempts, elapsed });
            }
            Readiness::Unreachable => {
                tracing::error!(attempt = attempts, ?elapsed, %error, "giving up on datastore");
                return Err(BootError::DatastoreUnreachable {
                    attempts,
                    elapsed,
                    last_error: error,
                });
            }
            Readiness::NotYetReady => {
                let delay = policy.next_delay(elapsed);
                tracing::warn!(attempt = attempts, %error, ?delay, "datastore not ready, retrying");
                if clock.sleep(delay, cancel) {
                    return Err(BootError::Cancelled { attempts });
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
