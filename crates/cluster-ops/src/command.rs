//! Process execution seam.
//!
//! Every external tool (ansible, helmfile, kubectl, sops, tailscale,
//! cloudflared, dig) is reached through [`CommandRunner`]. Production code
//! uses [`SystemRunner`]; tests substitute a scripted or mocked runner so
//! that no process is ever spawned.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use thiserror::Error;
use tracing::debug;

/// Number of output lines kept when a failing command is reported.
pub const DEFAULT_TAIL_LINES: usize = 15;

/// Errors raised while invoking an external tool.
#[derive(Error, Debug)]
pub enum ToolError {
    /// The program could not be started at all (usually: not installed).
    #[error("failed to start {program}: {message}")]
    Spawn { program: String, message: String },

    /// The program ran and exited non-zero.
    #[error("{program} exited with status {code}")]
    Failed {
        program: String,
        code: i32,
        /// Last lines of combined output, for the operator.
        tail: String,
    },

    /// Structured output could not be parsed.
    #[error("could not parse {what}: {message}")]
    Parse { what: String, message: String },

    /// Local file access failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ToolError {
    /// Output snippet captured from the failing tool, if any.
    #[must_use]
    pub fn output_tail(&self) -> Option<&str> {
        match self {
            Self::Failed { tail, .. } if !tail.is_empty() => Some(tail),
            _ => None,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(what: impl Into<String>, message: impl ToString) -> Self {
        Self::Parse {
            what: what.into(),
            message: message.to_string(),
        }
    }
}

/// A fully described command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub stdin: Option<String>,
    pub current_dir: Option<PathBuf>,
}

impl Invocation {
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append a path argument (lossy on non-UTF-8 paths).
    #[must_use]
    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy().into_owned())
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Render as a shell-like string for logs and remediation text.
    #[must_use]
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        for arg in &self.args {
            if arg.contains(' ') {
                parts.push(format!("'{arg}'"));
            } else {
                parts.push(arg.clone());
            }
        }
        parts.join(" ")
    }

    /// Whether the argument list starts with the given words.
    #[must_use]
    pub fn has_args_prefix(&self, prefix: &[&str]) -> bool {
        prefix.len() <= self.args.len() && prefix.iter().zip(&self.args).all(|(p, a)| p == a)
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    #[must_use]
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    #[must_use]
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Last `lines` non-empty lines of stdout followed by stderr.
    #[must_use]
    pub fn tail(&self, lines: usize) -> String {
        let all: Vec<&str> = self
            .stdout
            .lines()
            .chain(self.stderr.lines())
            .filter(|l| !l.trim().is_empty())
            .collect();
        let start = all.len().saturating_sub(lines);
        all[start..].join("\n")
    }

    /// Turn a non-zero exit into [`ToolError::Failed`].
    ///
    /// # Errors
    ///
    /// Returns `ToolError::Failed` when the exit code is non-zero.
    pub fn into_result(self, program: &str) -> Result<Self, ToolError> {
        if self.success() {
            Ok(self)
        } else {
            Err(ToolError::Failed {
                program: program.to_string(),
                code: self.code,
                tail: self.tail(DEFAULT_TAIL_LINES),
            })
        }
    }
}

/// Runs external programs.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait CommandRunner {
    /// Run to completion and capture output. A non-zero exit is NOT an error
    /// at this level; callers decide via [`ToolOutput::into_result`].
    ///
    /// # Errors
    ///
    /// Returns `ToolError::Spawn` when the program cannot be started.
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput, ToolError>;

    /// Resolve a program on `PATH`.
    fn locate(&self, program: &str) -> Option<PathBuf>;
}

/// Runs commands on the local machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput, ToolError> {
        debug!(command = %invocation.display(), "Running external tool");

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .envs(&invocation.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });
        if let Some(ref dir) = invocation.current_dir {
            cmd.current_dir(dir);
        }

        let spawn_err = |e: std::io::Error| ToolError::Spawn {
            program: invocation.program.clone(),
            message: e.to_string(),
        };

        let mut child = cmd.spawn().map_err(spawn_err)?;

        if let Some(ref input) = invocation.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(input.as_bytes()).map_err(spawn_err)?;
            }
        }

        let output = child.wait_with_output().map_err(spawn_err)?;

        Ok(ToolOutput {
            // Killed by signal: no code, report as generic failure.
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn locate(&self, program: &str) -> Option<PathBuf> {
        which::which(program).ok()
    }
}

/// Run and require a zero exit.
///
/// # Errors
///
/// Returns `ToolError::Spawn` or `ToolError::Failed`.
pub fn run_checked(runner: &dyn CommandRunner, invocation: &Invocation) -> Result<ToolOutput, ToolError> {
    runner.run(invocation)?.into_result(&invocation.program)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_builder_and_display() {
        let inv = Invocation::new("ansible-playbook")
            .args(["-i", "inventory/hosts.ini"])
            .arg("playbooks/mesh.yml")
            .arg("--extra-vars")
            .arg("a=b c=d")
            .env("ANSIBLE_FORCE_COLOR", "0");

        assert_eq!(
            inv.display(),
            "ansible-playbook -i inventory/hosts.ini playbooks/mesh.yml --extra-vars 'a=b c=d'"
        );
        assert!(inv.has_args_prefix(&["-i", "inventory/hosts.ini"]));
        assert!(!inv.has_args_prefix(&["playbooks/mesh.yml"]));
        assert_eq!(inv.env.get("ANSIBLE_FORCE_COLOR").map(String::as_str), Some("0"));
    }

    #[test]
    fn test_tail_combines_streams_and_skips_blank_lines() {
        let out = ToolOutput {
            code: 2,
            stdout: "one\n\ntwo\nthree\n".into(),
            stderr: "fatal: boom\n".into(),
        };
        assert_eq!(out.tail(2), "three\nfatal: boom");
        assert_eq!(out.tail(10), "one\ntwo\nthree\nfatal: boom");
    }

    #[test]
    fn test_into_result_maps_non_zero_exit() {
        let err = ToolOutput::failed(4, "UNREACHABLE! host-a")
            .into_result("ansible-playbook")
            .unwrap_err();
        match &err {
            ToolError::Failed { program, code, tail } => {
                assert_eq!(program, "ansible-playbook");
                assert_eq!(*code, 4);
                assert_eq!(tail, "UNREACHABLE! host-a");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.output_tail(), Some("UNREACHABLE! host-a"));
    }

    #[test]
    fn test_run_checked_with_mock() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|inv| inv.program == "kubectl")
            .times(1)
            .returning(|_| Ok(ToolOutput::ok("Kubernetes control plane is running")));

        let out = run_checked(&runner, &Invocation::new("kubectl").arg("cluster-info")).unwrap();
        assert!(out.stdout.contains("running"));
    }

    #[test]
    fn test_system_runner_reports_missing_program() {
        let err = SystemRunner
            .run(&Invocation::new("definitely-not-a-real-tool-4f1c"))
            .unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
    }
}
