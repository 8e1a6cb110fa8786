//! Service launch: build the argv for the configured run mode, then hand the
//! process over to it.
//!
//! On unix the hand-off is `execvp`: the service keeps this process's pid, so
//! the container runtime's signals and exit-code handling apply to the
//! service directly and no wrapper stays behind.

use std::process::Command;

use serde::Serialize;

use crate::config::{RunMode, ServiceConfig};
use crate::error::{BootError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchPlan {
    pub mode: RunMode,
    pub argv: Vec<String>,
    /// Exported into the service's environment on top of the inherited one.
    pub env: Vec<(String, String)>,
}

impl LaunchPlan {
    pub fn program(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }

    pub fn display(&self) -> String {
        self.argv.join(" ")
    }
}

/// Resolve the service command line.
///
/// Production runs gunicorn with the configured bind address, worker count
/// and timeout. Development runs the single-process `flask run` server.
/// An explicit `service.command` replaces either.
pub fn build_plan(cfg: &ServiceConfig) -> LaunchPlan {
    let mut argv: Vec<String> = if !cfg.command.is_empty() {
        cfg.command.clone()
    } else {
        match cfg.mode {
            RunMode::Production => vec![
                "gunicorn".into(),
                "--bind".into(),
                format!("{}:{}", cfg.host, cfg.port),
                "--workers".into(),
                cfg.workers.to_string(),
                "--timeout".into(),
                cfg.timeout_secs.to_string(),
                cfg.app.clone(),
            ],
            RunMode::Development => vec![
                "flask".into(),
                "run".into(),
                "--host".into(),
                cfg.host.clone(),
                "--port".into(),
                cfg.port.to_string(),
            ],
        }
    };
    argv.extend(cfg.extra_args.iter().cloned());

    LaunchPlan {
        mode: cfg.mode,
        argv,
        env: vec![
            ("HOST".into(), cfg.host.clone()),
            ("PORT".into(), cfg.port.to_string()),
        ],
    }
}

pub trait Launcher {
    /// Transfer control to the service. A successful launch does not return
    /// on unix; `Ok` is only seen from test launchers.
    fn launch(&mut self, plan: &LaunchPlan) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct ExecLauncher;

impl Launcher for ExecLauncher {
    fn launch(&mut self, plan: &LaunchPlan) -> Result<()> {
        let (program, args) = plan
            .argv
            .split_first()
            .ok_or_else(|| BootError::Launch("empty service command".into()))?;

        let resolved = which::which(program)
            .map_err(|_| BootError::ProgramNotFound(program.clone()))?;

        let mut cmd = Command::new(&resolved);
        cmd.args(args).envs(plan.env.iter().map(|(k, v)| (k, v)));

        tracing::info!(program = %resolved.display(), args = ?args, "handing off to service");
        hand_off(cmd, program)
    }
}

#[cfg(unix)]
fn hand_off(mut cmd: Command, program: &str) -> Result<()> {
    use std::os::unix::process::CommandExt;

    // argv[0] stays as configured, not the resolved path
    cmd.arg0(program);
    // exec only returns on failure
    let err = cmd.exec();
    Err(BootError::Launch(err.to_string()))
}

#[cfg(not(unix))]
fn hand_off(mut cmd: Command, _program: &str) -> Result<()> {
    let status = cmd
        .status()
        .map_err(|e| BootError::Launch(e.to_string()))?;
    std::process::exit(status.code().unwrap_or(1));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn production_runs_gunicorn_with_bind_workers_timeout() {
        let cfg = ServiceConfig {
            mode: RunMode::Production,
            host: "0.0.0.0".into(),
            port: 8000,
            workers: 6,
            timeout_secs: 90,
            ..Default::default()
        };
        let plan = build_plan(&cfg);
        assert_eq!(
            plan.argv,
            vec![
                "gunicorn",
                "--bind",
                "0.0.0.0:8000",
                "--workers",
                "6",
                "--timeout",
                "90",
                "run:app"
            ]
        );
        assert_eq!(plan.mode, RunMode::Production);
    }

    #[test]
    fn development_runs_flask_bound_to_host() {
        let cfg = ServiceConfig {
            host: "127.0.0.1".into(),
            port: 5001,
            ..Default::default()
        };
        let plan = build_plan(&cfg);
        assert_eq!(
            plan.argv,
            vec!["flask", "run", "--host", "127.0.0.1", "--port", "5001"]
        );
    }

    #[test]
    fn explicit_command_and_extra_args() {
        let cfg = ServiceConfig {
            mode: RunMode::Production,
            command: vec!["uwsgi".into(), "--ini".into(), "app.ini".into()],
            extra_args: vec!["--master".into()],
            ..Default::default()
        };
        let plan = build_plan(&cfg);
        assert_eq!(plan.argv, vec!["uwsgi", "--ini", "app.ini", "--master"]);
        assert_eq!(plan.program(), Some("uwsgi"));
    }

    #[test]
    fn host_and_port_are_exported() {
        let plan = build_plan(&ServiceConfig::default());
        assert!(plan.env.contains(&("HOST".to_string(), "0.0.0.0".to_string())));
        assert!(plan.env.contains(&("PORT".to_string(), "5000".to_string())));
    }

    #[test]
    fn missing_program_is_reported_before_exec() {
        let plan = LaunchPlan {
            mode: RunMode::Development,
            argv: vec!["__bootseq_no_such_server__".into()],
            env: vec![],
        };
        let err = ExecLauncher.launch(&plan).unwrap_err();
        assert!(matches!(err, BootError::ProgramNotFound(p) if p == "__bootseq_no_such_server__"));
    }

    #[test]
    fn empty_command_is_a_launch_error() {
        let plan = LaunchPlan {
            mode: RunMode::Development,
            argv: vec![],
            env: vec![],
        };
        assert!(matches!(
            ExecLauncher.launch(&plan),
            Err(BootError::Launch(_))
        ));
    }
}
