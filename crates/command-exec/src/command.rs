use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::ExecError;
use crate::signal::{Signal, SignalHandle};
use crate::timer::KillTimer;

/// What a finished process left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal.
    pub return_code: Option<i32>,
    pub duration: Duration,
}

/// A command line plus the policy it is executed under.
#[derive(Debug, Clone)]
pub struct Command {
    argv: Vec<String>,
    soft_timeout: Option<Duration>,
    hard_timeout: Option<Duration>,
    working_dir: Option<PathBuf>,
    env: BTreeMap<String, String>,
    signal: SignalHandle,
    last_output: Option<CommandOutput>,
}

impl Command {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            soft_timeout: None,
            hard_timeout: None,
            working_dir: None,
            env: BTreeMap::new(),
            signal: SignalHandle::default(),
            last_output: None,
        }
    }

    /// SIGTERM the process group once `timeout` has elapsed.
    pub fn soft_timeout(mut self, timeout: Duration) -> Self {
        self.soft_timeout = Some(timeout);
        self
    }

    /// SIGKILL the process group once `timeout` has elapsed.
    pub fn hard_timeout(mut self, timeout: Duration) -> Self {
        self.hard_timeout = Some(timeout);
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Handle through which other threads can signal the running process.
    pub fn signal_handle(&self) -> SignalHandle {
        self.signal.clone()
    }

    /// Out-of-band signal to the whole process group of the running command.
    pub fn send_signal(&self, signal: Signal) -> Result<(), ExecError> {
        self.signal.send_signal(signal)
    }

    /// Wall-clock duration of the last completed run; `None` until a run has
    /// completed.
    pub fn duration(&self) -> Option<Duration> {
        self.last_output.as_ref().map(|output| output.duration)
    }

    pub fn already_executed(&self) -> bool {
        self.last_output.is_some()
    }

    pub fn last_output(&self) -> Option<&CommandOutput> {
        self.last_output.as_ref()
    }

    /// Run the command once and wait for it.
    ///
    /// A fired timer takes priority over the return code: hard timeout first,
    /// then soft timeout, then a mismatch with `expected_return_code`.
    pub fn execute(&mut self, expected_return_code: i32) -> Result<CommandOutput, ExecError> {
        let (program, args) = self.argv.split_first().ok_or(ExecError::EmptyCommand)?;
        if let (Some(soft), Some(hard)) = (self.soft_timeout, self.hard_timeout) {
            if hard < soft {
                return Err(ExecError::InvalidTimeouts { soft, hard });
            }
        }

        let mut command = std::process::Command::new(program);
        command
            .args(args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        debug!(argv = ?self.argv, soft_timeout = ?self.soft_timeout, hard_timeout = ?self.hard_timeout, "Spawning command");
        let started = Instant::now();
        let child = command.spawn().map_err(|source| ExecError::Spawn {
            program: program.clone(),
            source,
        })?;
        self.signal.attach(child.id());

        let mut soft_timer = self
            .soft_timeout
            .map(|t| KillTimer::start(t, self.signal.clone(), Signal::Terminate));
        let mut hard_timer = self
            .hard_timeout
            .map(|t| KillTimer::start(t, self.signal.clone(), Signal::Kill));

        let waited = child.wait_with_output();

        let soft_fired = soft_timer.as_mut().map(KillTimer::cancel).unwrap_or(false);
        let hard_fired = hard_timer.as_mut().map(KillTimer::cancel).unwrap_or(false);
        self.signal.detach();
        let duration = started.elapsed();

        let raw = waited?;
        let output = CommandOutput {
            stdout: String::from_utf8_lossy(&raw.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&raw.stderr).into_owned(),
            return_code: raw.status.code(),
            duration,
        };
        self.last_output = Some(output.clone());

        if hard_fired {
            let timeout = self.hard_timeout.unwrap_or_default();
            warn!(argv = ?self.argv, ?timeout, "Command killed by hard timeout");
            return Err(ExecError::HardTimeout {
                timeout,
                output: Box::new(output),
            });
        }
        if soft_fired {
            let timeout = self.soft_timeout.unwrap_or_default();
            warn!(argv = ?self.argv, ?timeout, "Command terminated by soft timeout");
            return Err(ExecError::SoftTimeout {
                timeout,
                output: Box::new(output),
            });
        }
        if output.return_code != Some(expected_return_code) {
            info!(
                argv = ?self.argv,
                expected = expected_return_code,
                actual = ?output.return_code,
                "Command returned unexpected code"
            );
            return Err(ExecError::CommandFailed {
                expected: expected_return_code,
                actual: output.return_code,
                output: Box::new(output),
            });
        }

        debug!(argv = ?self.argv, duration = ?output.duration, "Command finished");
        Ok(output)
    }

    /// Run the command up to `attempts` times until it succeeds, sleeping
    /// `sleep_between` between attempts. Returns the successful attempt number.
    pub fn execute_with_retries(
        &mut self,
        attempts: u32,
        expected_return_code: i32,
        sleep_between: Duration,
    ) -> Result<u32, ExecError> {
        let mut last = None;
        for attempt in 1..=attempts {
            match self.execute(expected_return_code) {
                Ok(_) => return Ok(attempt),
                Err(e) if e.is_retryable() => {
                    warn!(attempt, max_attempts = attempts, error = %e, "Command attempt failed");
                    last = Some(Box::new(e));
                    if attempt < attempts {
                        std::thread::sleep(sleep_between);
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(ExecError::FailedAfterRetries { attempts, last })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_argv() {
        let mut cmd = Command::new(Vec::<String>::new());
        assert!(matches!(cmd.execute(0), Err(ExecError::EmptyCommand)));
        assert!(!cmd.already_executed());
    }

    #[test]
    fn rejects_hard_timeout_shorter_than_soft() {
        let mut cmd = Command::new(["true"])
            .soft_timeout(Duration::from_secs(5))
            .hard_timeout(Duration::from_secs(1));
        assert!(matches!(
            cmd.execute(0),
            Err(ExecError::InvalidTimeouts { .. })
        ));
    }

    #[test]
    fn unknown_program_is_a_spawn_error() {
        let mut cmd = Command::new(["/definitely/not/a/program"]);
        match cmd.execute(0) {
            Err(ExecError::Spawn { program, .. }) => {
                assert_eq!(program, "/definitely/not/a/program")
            }
            other => panic!("expected spawn error, got {other:?}"),
        }
    }

    #[test]
    fn zero_attempts_fail_without_running() {
        let mut cmd = Command::new(["true"]);
        match cmd.execute_with_retries(0, 0, Duration::ZERO) {
            Err(ExecError::FailedAfterRetries { attempts: 0, last }) => assert!(last.is_none()),
            other => panic!("unexpected {other:?}"),
        }
        assert!(!cmd.already_executed());
    }
}
