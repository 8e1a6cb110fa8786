//! The startup pipeline.
//!
//! ```text
//! WAIT_DB ─▶ MIGRATE ─▶ SEED ─▶ PROVISION_AUTH ─▶ LAUNCH
//!    │          │         │
//!    └──────────┴─────────┴──▶ abort (non-zero exit)
//! ```
//!
//! One linear pass per process start. Every step is invoked on every run;
//! "already migrated" and "already seeded" are the steps' own business.

use std::fmt;

use crate::config::{Config, SeedPolicy};
use crate::error::Result;
use crate::identity::{IdentityOutcome, IdentityProvisioner, KeycloakProvisioner};
use crate::launch::{build_plan, ExecLauncher, LaunchPlan, Launcher};
use crate::readiness::{
    build_probe, wait_for_datastore, CancelToken, Clock, ReadinessProbe, RetryPolicy, SystemClock,
};
use crate::step::{CommandRunner, StepRunner, StepSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    WaitDb,
    Migrate,
    Seed,
    ProvisionAuth,
    Launch,
}

impl Phase {
    pub fn all() -> &'static [Phase] {
        &[
            Phase::WaitDb,
            Phase::Migrate,
            Phase::Seed,
            Phase::ProvisionAuth,
            Phase::Launch,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::WaitDb => "wait_db",
            Phase::Migrate => "migrate",
            Phase::Seed => "seed",
            Phase::ProvisionAuth => "provision_auth",
            Phase::Launch => "launch",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Ran,
    Skipped,
    /// Failed, but the configured policy let the sequence continue.
    Tolerated(String),
}

/// Everything the sequencer needs to know about this run.
#[derive(Debug, Clone)]
pub struct BootPlan {
    pub retry: RetryPolicy,
    pub migrate: StepSpec,
    pub seed: StepSpec,
    pub seed_policy: SeedPolicy,
    pub launch: LaunchPlan,
}

impl BootPlan {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            retry: RetryPolicy::from(&cfg.readiness),
            migrate: StepSpec::new(Phase::Migrate.as_str(), cfg.migrate.command.clone()),
            seed: StepSpec::new(Phase::Seed.as_str(), cfg.seed.command.clone()),
            seed_policy: cfg.seed.policy,
            launch: build_plan(&cfg.service),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceReport {
    pub probe_attempts: u32,
    pub migrate: StepOutcome,
    pub seed: StepOutcome,
    pub identity: IdentityOutcome,
}

pub struct Sequencer {
    probe: Box<dyn ReadinessProbe>,
    steps: Box<dyn StepRunner>,
    identity: Box<dyn IdentityProvisioner>,
    launcher: Box<dyn Launcher>,
    clock: Box<dyn Clock>,
    cancel: CancelToken,
}

impl Sequencer {
    pub fn new(
        probe: Box<dyn ReadinessProbe>,
        steps: Box<dyn StepRunner>,
        identity: Box<dyn IdentityProvisioner>,
        launcher: Box<dyn Launcher>,
    ) -> Self {
        Self {
            probe,
            steps,
            identity,
            launcher,
            clock: Box::new(SystemClock::new()),
            cancel: CancelToken::new(),
        }
    }

    /// Production wiring: real probe, subprocess steps, Keycloak, exec.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        Ok(Self::new(
            build_probe(&cfg.database)?,
            Box::new(CommandRunner),
            Box::new(KeycloakProvisioner::new(cfg.identity.clone())),
            Box::new(ExecLauncher),
        ))
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run the pipeline. With the exec launcher a successful run never
    /// returns; any `Err` is fatal and the caller should exit non-zero.
    pub fn run(&mut self, plan: &BootPlan) -> Result<SequenceReport> {
        // WAIT_DB
        started(Phase::WaitDb);
        let wait = wait_for_datastore(
            self.probe.as_mut(),
            &plan.retry,
            self.clock.as_mut(),
            &self.cancel,
        )?;
        finished(Phase::WaitDb);

        // MIGRATE
        let migrate = self.run_step(Phase::Migrate, &plan.migrate)?;

        // SEED
        let seed = match self.run_step(Phase::Seed, &plan.seed) {
            Ok(outcome) => outcome,
            Err(e) if plan.seed_policy == SeedPolicy::Warn => {
                tracing::warn!(phase = %Phase::Seed, error = %e, "seed failed; continuing (seed policy: warn)");
                StepOutcome::Tolerated(e.to_string())
            }
            Err(e) => return Err(e),
        };

        // PROVISION_AUTH
        started(Phase::ProvisionAuth);
        let identity = match self.identity.provision() {
            Ok(outcome) => outcome,
            Err(e) => IdentityOutcome::Failed(e.to_string()),
        };
        match &identity {
            IdentityOutcome::Provisioned(summary) => tracing::info!(
                phase = %Phase::ProvisionAuth,
                realm = %summary.realm,
                client = %summary.client_id,
                "identity provider configured"
            ),
            IdentityOutcome::Skipped(reason) => tracing::info!(
                phase = %Phase::ProvisionAuth,
                %reason,
                "identity provider provisioning skipped"
            ),
            IdentityOutcome::Failed(error) => tracing::warn!(
                phase = %Phase::ProvisionAuth,
                %error,
                "identity provider NOT configured; starting without it"
            ),
        }
        finished(Phase::ProvisionAuth);

        let report = SequenceReport {
            probe_attempts: wait.attempts,
            migrate,
            seed,
            identity,
        };

        // LAUNCH
        started(Phase::Launch);
        tracing::info!(phase = %Phase::Launch, mode = plan.launch.mode.as_str(), command = %plan.launch.display(), "launching service");
        self.launcher.launch(&plan.launch)?;
        finished(Phase::Launch);

        Ok(report)
    }

    fn run_step(&mut self, phase: Phase, step: &StepSpec) -> Result<StepOutcome> {
        started(phase);
        if step.is_disabled() {
            tracing::info!(phase = %phase, "no command configured, skipping");
            return Ok(StepOutcome::Skipped);
        }
        tracing::info!(phase = %phase, command = %step.display(), "running");
        if let Err(e) = self.steps.run(step) {
            tracing::error!(phase = %phase, error = %e, "step failed");
            return Err(e);
        }
        finished(phase);
        Ok(StepOutcome::Ran)
    }
}

fn started(phase: Phase) {
    tracing::info!(phase = %phase, "phase started");
}

fn finished(phase: Phase) {
    tracing::info!(phase = %phase, "phase finished");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RunMode, ServiceConfig};
    use crate::error::BootError;
    use crate::readiness::testing::ManualClock;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    type Log = Rc<RefCell<Vec<String>>>;

    struct FakeProbe {
        log: Log,
        failures_left: u32,
    }

    impl ReadinessProbe for FakeProbe {
        fn target(&self) -> String {
            "fake".into()
        }

        fn probe(&mut self) -> Result<()> {
            self.log.borrow_mut().push("probe".into());
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(BootError::ProbeFailed("refused".into()));
            }
            Ok(())
        }
    }

    struct FakeSteps {
        log: Log,
        failing: Vec<(&'static str, i32)>,
    }

    impl StepRunner for FakeSteps {
        fn run(&mut self, step: &StepSpec) -> Result<()> {
            self.log.borrow_mut().push(step.name.clone());
            match self.failing.iter().find(|(name, _)| *name == step.name) {
                Some((_, code)) => Err(BootError::StepFailed {
                    step: step.name.clone(),
                    code: Some(*code),
                }),
                None => Ok(()),
            }
        }
    }

    struct FakeIdentity {
        log: Log,
        fail: bool,
    }

    impl IdentityProvisioner for FakeIdentity {
        fn provision(&mut self) -> Result<IdentityOutcome> {
            self.log.borrow_mut().push("provision".into());
            if self.fail {
                Err(BootError::Identity("connection refused".into()))
            } else {
                Ok(IdentityOutcome::Skipped("test".into()))
            }
        }
    }

    struct FakeLauncher {
        log: Log,
        launched: Rc<RefCell<Vec<Vec<String>>>>,
    }

    impl Launcher for FakeLauncher {
        fn launch(&mut self, plan: &LaunchPlan) -> Result<()> {
            self.log.borrow_mut().push("launch".into());
            self.launched.borrow_mut().push(plan.argv.clone());
            Ok(())
        }
    }

    struct Harness {
        log: Log,
        launched: Rc<RefCell<Vec<Vec<String>>>>,
        sequencer: Sequencer,
    }

    fn harness(probe_failures: u32, failing: Vec<(&'static str, i32)>, identity_fails: bool) -> Harness {
        let log: Log = Rc::default();
        let launched: Rc<RefCell<Vec<Vec<String>>>> = Rc::default();
        let sequencer = Sequencer::new(
            Box::new(FakeProbe {
                log: Rc::clone(&log),
                failures_left: probe_failures,
            }),
            Box::new(FakeSteps {
                log: Rc::clone(&log),
                failing,
            }),
            Box::new(FakeIdentity {
                log: Rc::clone(&log),
                fail: identity_fails,
            }),
            Box::new(FakeLauncher {
                log: Rc::clone(&log),
                launched: Rc::clone(&launched),
            }),
        )
        .with_clock(Box::new(ManualClock::default()));
        Harness {
            log,
            launched,
            sequencer,
        }
    }

    fn plan(seed_policy: SeedPolicy) -> BootPlan {
        let mut cfg = Config::default();
        cfg.seed.policy = seed_policy;
        cfg.readiness.max_attempts = 20;
        BootPlan::from_config(&cfg)
    }

    fn count(log: &Log, entry: &str) -> usize {
        log.borrow().iter().filter(|e| *e == entry).count()
    }

    #[test]
    fn happy_path_runs_every_phase_in_order() {
        let mut h = harness(0, vec![], false);
        let report = h.sequencer.run(&plan(SeedPolicy::Fatal)).unwrap();
        assert_eq!(
            *h.log.borrow(),
            vec!["probe", "migrate", "seed", "provision", "launch"]
        );
        assert_eq!(report.probe_attempts, 1);
        assert_eq!(report.migrate, StepOutcome::Ran);
        assert_eq!(report.seed, StepOutcome::Ran);
    }

    #[derive(Clone, Default)]
    struct Capture(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for Capture {
        type Writer = Capture;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn every_phase_logs_started_then_finished() {
        let capture = Capture::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(capture.clone())
            .with_ansi(false)
            .with_target(false)
            .finish();

        let mut h = harness(0, vec![], false);
        tracing::subscriber::with_default(subscriber, || {
            h.sequencer.run(&plan(SeedPolicy::Fatal)).unwrap();
        });

        let output = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        let position = |needle: String| {
            output
                .find(&needle)
                .unwrap_or_else(|| panic!("missing '{needle}' in:\n{output}"))
        };

        let mut last = 0;
        for phase in Phase::all() {
            let start = position(format!("phase started phase={phase}"));
            let end = position(format!("phase finished phase={phase}"));
            assert!(last <= start, "{phase} started out of order");
            assert!(start < end, "{phase} finished before it started");
            last = end;
        }
    }

    #[test]
    fn migration_runs_once_after_n_plus_one_probes() {
        for n in [0u32, 1, 4, 12] {
            let mut h = harness(n, vec![], false);
            let report = h.sequencer.run(&plan(SeedPolicy::Fatal)).unwrap();
            assert_eq!(report.probe_attempts, n + 1);
            assert_eq!(count(&h.log, "probe"), (n + 1) as usize);
            assert_eq!(count(&h.log, "migrate"), 1);
            let first_migrate = h.log.borrow().iter().position(|e| e == "migrate").unwrap();
            assert_eq!(first_migrate, (n + 1) as usize);
        }
    }

    #[test]
    fn unreachable_datastore_never_migrates() {
        let mut h = harness(u32::MAX, vec![], false);
        let err = h.sequencer.run(&plan(SeedPolicy::Fatal)).unwrap_err();
        assert!(matches!(err, BootError::DatastoreUnreachable { attempts: 20, .. }));
        assert_eq!(count(&h.log, "migrate"), 0);
        assert_eq!(count(&h.log, "launch"), 0);
        assert_ne!(err.exit_code(), 0);
    }

    #[test]
    fn migration_failure_blocks_seed_and_launch() {
        let mut h = harness(0, vec![("migrate", 2)], false);
        let err = h.sequencer.run(&plan(SeedPolicy::Warn)).unwrap_err();
        assert_eq!(*h.log.borrow(), vec!["probe", "migrate"]);
        assert!(h.launched.borrow().is_empty());
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn seed_failure_is_fatal_by_default() {
        let mut h = harness(0, vec![("seed", 1)], false);
        let err = h.sequencer.run(&plan(SeedPolicy::Fatal)).unwrap_err();
        assert!(matches!(err, BootError::StepFailed { ref step, .. } if step == "seed"));
        assert_eq!(count(&h.log, "provision"), 0);
        assert!(h.launched.borrow().is_empty());
        assert_ne!(err.exit_code(), 0);
    }

    #[test]
    fn seed_failure_tolerated_under_warn_policy() {
        let mut h = harness(0, vec![("seed", 1)], false);
        let report = h.sequencer.run(&plan(SeedPolicy::Warn)).unwrap();
        assert!(matches!(report.seed, StepOutcome::Tolerated(_)));
        assert_eq!(h.launched.borrow().len(), 1);
    }

    #[test]
    fn identity_failure_still_launches_exact_command() {
        let mut h = harness(0, vec![], true);
        let mut cfg = Config::default();
        cfg.service = ServiceConfig {
            mode: RunMode::Production,
            port: 8080,
            workers: 3,
            timeout_secs: 60,
            ..Default::default()
        };
        let plan = BootPlan::from_config(&cfg);

        let report = h.sequencer.run(&plan).unwrap();
        assert!(matches!(report.identity, IdentityOutcome::Failed(_)));
        assert!(!report.identity.is_configured());
        assert_eq!(
            *h.launched.borrow(),
            vec![vec![
                "gunicorn",
                "--bind",
                "0.0.0.0:8080",
                "--workers",
                "3",
                "--timeout",
                "60",
                "run:app"
            ]]
        );
    }

    #[test]
    fn development_mode_launches_flask() {
        let mut h = harness(0, vec![], false);
        h.sequencer.run(&plan(SeedPolicy::Fatal)).unwrap();
        assert_eq!(
            h.launched.borrow()[0],
            vec!["flask", "run", "--host", "0.0.0.0", "--port", "5000"]
        );
    }

    #[test]
    fn running_twice_invokes_every_step_twice() {
        let mut h = harness(0, vec![], false);
        let p = plan(SeedPolicy::Fatal);
        h.sequencer.run(&p).unwrap();
        h.sequencer.run(&p).unwrap();
        assert_eq!(count(&h.log, "migrate"), 2);
        assert_eq!(count(&h.log, "seed"), 2);
        assert_eq!(count(&h.log, "launch"), 2);
    }

    #[test]
    fn empty_commands_are_skipped_not_run() {
        let mut h = harness(0, vec![], false);
        let mut p = plan(SeedPolicy::Fatal);
        p.migrate.argv.clear();
        p.seed.argv.clear();
        let report = h.sequencer.run(&p).unwrap();
        assert_eq!(report.migrate, StepOutcome::Skipped);
        assert_eq!(report.seed, StepOutcome::Skipped);
        assert_eq!(*h.log.borrow(), vec!["probe", "provision", "launch"]);
    }

    #[test]
    fn cancelled_wait_aborts_before_migration() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut h = harness(3, vec![], false);
        h.sequencer = h.sequencer.with_cancel(cancel);
        let err = h.sequencer.run(&plan(SeedPolicy::Fatal)).unwrap_err();
        assert!(matches!(err, BootError::Cancelled { .. }));
        assert!(h.log.borrow().is_empty());
    }

    #[test]
    fn retry_interval_comes_from_plan() {
        let plan = BootPlan::from_config(&Config::default());
        assert_eq!(plan.retry.interval, Duration::from_secs(2));
        assert_eq!(plan.retry.max_attempts, Some(90));
        assert_eq!(plan.migrate.name, "migrate");
        assert_eq!(plan.seed.name, "seed");
    }

    #[test]
    fn phases_are_listed_in_pipeline_order() {
        let names: Vec<&str> = Phase::all().iter().map(Phase::as_str).collect();
        assert_eq!(
            names,
            vec!["wait_db", "migrate", "seed", "provision_auth", "launch"]
        );
    }
}
