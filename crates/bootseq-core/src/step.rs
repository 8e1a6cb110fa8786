//! Subprocess invocation for the migrate and seed steps.
//!
//! Both steps are external tools (a migration CLI, a seed script). They run
//! once, synchronously, with stdout and stderr inherited so their own error
//! output reaches the container log unmodified. A non-zero exit is reported
//! as [`BootError::StepFailed`] carrying the tool's exit code.

use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::error::{BootError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepSpec {
    /// Short name used in log lines and errors (`migrate`, `seed`).
    pub name: String,
    pub argv: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
}

impl StepSpec {
    pub fn new(name: impl Into<String>, argv: Vec<String>) -> Self {
        Self {
            name: name.into(),
            argv,
            env: Vec::new(),
            cwd: None,
        }
    }

    /// A step with no command is configured off.
    pub fn is_disabled(&self) -> bool {
        self.argv.is_empty()
    }

    pub fn display(&self) -> String {
        self.argv.join(" ")
    }
}

pub trait StepRunner {
    fn run(&mut self, step: &StepSpec) -> Result<()>;
}

/// Runs steps as child processes and waits for them.
#[derive(Debug, Default)]
pub struct CommandRunner;

impl StepRunner for CommandRunner {
    fn run(&mut self, step: &StepSpec) -> Result<()> {
        let (program, args) = step.argv.split_first().ok_or_else(|| BootError::StepSpawn {
            step: step.name.clone(),
            reason: "empty command".into(),
        })?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(step.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        if let Some(cwd) = &step.cwd {
            cmd.current_dir(cwd);
        }

        let status = cmd.status().map_err(|e| BootError::StepSpawn {
            step: step.name.clone(),
            reason: if e.kind() == std::io::ErrorKind::NotFound {
                format!("'{program}' not found")
            } else {
                e.to_string()
            },
        })?;

        if status.success() {
            Ok(())
        } else {
            Err(BootError::StepFailed {
                step: step.name.clone(),
                code: status.code(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(name: &str, script: &str) -> StepSpec {
        StepSpec::new(name, vec!["sh".into(), "-c".into(), script.into()])
    }

    #[test]
    fn successful_step_is_ok() {
        assert!(CommandRunner.run(&sh("migrate", "exit 0")).is_ok());
    }

    #[test]
    fn non_zero_exit_carries_code() {
        let err = CommandRunner.run(&sh("migrate", "exit 7")).unwrap_err();
        assert!(matches!(
            err,
            BootError::StepFailed { ref step, code: Some(7) } if step == "migrate"
        ));
        assert_eq!(err.exit_code(), 7);
    }

    #[test]
    fn missing_program_is_spawn_error() {
        let step = StepSpec::new("seed", vec!["__bootseq_missing_tool__".into()]);
        let err = CommandRunner.run(&step).unwrap_err();
        let BootError::StepSpawn { step, reason } = err else {
            panic!("expected StepSpawn")
        };
        assert_eq!(step, "seed");
        assert!(reason.contains("__bootseq_missing_tool__"));
    }

    #[test]
    fn env_and_cwd_are_applied() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut step = sh("seed", "printf '%s' \"$SEED_MARKER\" > marker.txt");
        step.env.push(("SEED_MARKER".into(), "seeded".into()));
        step.cwd = Some(dir.path().to_path_buf());

        CommandRunner.run(&step).unwrap();
        let written = std::fs::read_to_string(dir.path().join("marker.txt")).unwrap();
        assert_eq!(written, "seeded");
    }

    #[test]
    fn empty_argv_is_disabled() {
        let step = StepSpec::new("seed", vec![]);
        assert!(step.is_disabled());
        assert!(matches!(
            CommandRunner.run(&step),
            Err(BootError::StepSpawn { .. })
        ));
    }
}
