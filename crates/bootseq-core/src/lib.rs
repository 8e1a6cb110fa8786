//! `bootseq-core`: startup sequencing for a service that depends on a
//! datastore and an optional identity provider.
//!
//! # Pipeline
//!
//! ```text
//! Config ──▶ BootPlan
//!               │
//!               ▼
//! Sequencer ── wait_for_datastore (ReadinessProbe + RetryPolicy)
//!           ── migrate / seed     (StepRunner)
//!           ── provision          (IdentityProvisioner, best effort)
//!           ── launch             (Launcher, exec hand-off)
//! ```
//!
//! Each collaborator is a trait so the ordering and failure policy can be
//! exercised without a database, a Keycloak server, or an `exec`.

pub mod config;
pub mod database;
pub mod error;
pub mod identity;
pub mod io;
pub mod launch;
pub mod readiness;
pub mod sequencer;
pub mod step;

pub use config::{Config, ConfigWarning, ProbeKind, RunMode, SeedPolicy, WarnLevel};
pub use error::{BootError, Result};
pub use identity::{IdentityOutcome, IdentityProvisioner, KeycloakClient, KeycloakProvisioner};
pub use launch::{build_plan, ExecLauncher, LaunchPlan, Launcher};
pub use readiness::{wait_for_datastore, CancelToken, Readiness, ReadinessProbe, RetryPolicy};
pub use sequencer::{BootPlan, Phase, SequenceReport, Sequencer, StepOutcome};
pub use step::{CommandRunner, StepRunner, StepSpec};
