//! External synth process supervision.
//!
//! Starts the backend with its output captured to a log file, probes
//! liveness after a settle delay, and guarantees a two-phase shutdown:
//! graceful quit over the command channel when one exists, then a
//! bounded wait, then a forced kill. `stop` is idempotent and never
//! fails; a shutdown timeout is recovered locally by escalation, not
//! surfaced to the caller.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::{BackendConfig, BackendMode};

#[derive(Debug, Error)]
pub enum SynthError {
    #[error("no sound bank found (checked: {candidates:?})")]
    ResourceNotFound { candidates: Vec<PathBuf> },

    #[error("failed to spawn '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("backend exited during startup; captured output:\n{diagnostics}")]
    DiedEarly { diagnostics: String },

    #[error("backend has no command channel (mode is not shell)")]
    NoCommandChannel,

    #[error("backend command channel write failed: {0}")]
    CommandFailed(#[from] std::io::Error),
}

/// Supervisor lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NotStarted,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

/// Owns the backend process for its whole lifetime.
pub struct SynthSupervisor {
    cfg: BackendConfig,
    channel: u8,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    phase: Phase,
}

impl SynthSupervisor {
    pub fn new(cfg: BackendConfig, channel: u8) -> Self {
        Self {
            cfg,
            channel,
            child: None,
            stdin: None,
            phase: Phase::NotStarted,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether the backend exposes an interactive command channel.
    pub fn has_command_channel(&self) -> bool {
        self.stdin.is_some()
    }

    /// Locate the sound bank, spawn the backend, and probe that it
    /// survived startup. On failure nothing is left running.
    pub async fn start(&mut self) -> Result<(), SynthError> {
        self.phase = Phase::Starting;

        let soundfont = match self.cfg.soundfont_paths.iter().find(|p| p.exists()) {
            Some(path) => path.clone(),
            None => {
                self.phase = Phase::Failed;
                return Err(SynthError::ResourceNotFound {
                    candidates: self.cfg.soundfont_paths.clone(),
                });
            }
        };
        debug!("Using sound bank: {}", soundfont.display());

        let log = std::fs::File::create(&self.cfg.log_path)
            .and_then(|f| Ok((f.try_clone()?, f)))
            .map_err(|e| {
                self.phase = Phase::Failed;
                SynthError::SpawnFailed { command: self.cfg.command.clone(), source: e }
            })?;

        let mut command = Command::new(&self.cfg.command);
        command
            .args(&self.cfg.args)
            .stdout(Stdio::from(log.0))
            .stderr(Stdio::from(log.1))
            .kill_on_drop(true);
        if self.cfg.pass_soundfont {
            command.arg(&soundfont);
        }
        command.stdin(match self.cfg.mode {
            BackendMode::Shell => Stdio::piped(),
            _ => Stdio::null(),
        });

        let mut child = command.spawn().map_err(|e| {
            self.phase = Phase::Failed;
            SynthError::SpawnFailed { command: self.cfg.command.clone(), source: e }
        })?;
        self.stdin = child.stdin.take();

        // Short settle before the liveness probe: a backend that cannot
        // open its audio device usually exits within this window.
        sleep(Duration::from_millis(self.cfg.settle_ms)).await;

        match child.try_wait() {
            Ok(Some(status)) => {
                warn!("Backend exited during startup with {}", status);
                self.stdin = None;
                self.phase = Phase::Failed;
                return Err(SynthError::DiedEarly { diagnostics: self.diagnostics() });
            }
            Ok(None) => {}
            Err(e) => {
                self.stdin = None;
                self.phase = Phase::Failed;
                return Err(SynthError::CommandFailed(e));
            }
        }

        self.child = Some(child);
        self.phase = Phase::Running;
        info!("Backend '{}' running", self.cfg.command);

        if self.cfg.mode == BackendMode::Shell {
            if let Some(select) = self.cfg.select {
                self.send_command(&format!(
                    "select {} {} {}",
                    self.channel, select.bank, select.preset
                ))
                .await?;
            }
        }

        Ok(())
    }

    /// Write one line-oriented command and flush immediately, so a
    /// partial command is never left sitting in the pipe.
    pub async fn send_command(&mut self, line: &str) -> Result<(), SynthError> {
        let stdin = self.stdin.as_mut().ok_or(SynthError::NoCommandChannel)?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Two-phase shutdown. Safe to call from any phase, any number of
    /// times; a no-op when nothing was started.
    pub async fn stop(&mut self) {
        match self.phase {
            Phase::NotStarted | Phase::Stopped => return,
            _ => {}
        }
        self.phase = Phase::Stopping;

        let Some(mut child) = self.child.take() else {
            self.stdin = None;
            self.phase = Phase::Stopped;
            return;
        };

        // Graceful phase: quit command, then close the pipe.
        if let Some(mut stdin) = self.stdin.take() {
            let quit = async {
                stdin.write_all(b"quit\n").await?;
                stdin.flush().await
            };
            if let Err(e) = quit.await {
                debug!("Graceful quit not delivered: {}", e);
            }
            // Closing the pipe is itself a quit signal for shell
            // backends reading stdin.
            drop(stdin);
        }

        // Bounded wait even without a command channel: a backend
        // already on its way out gets to exit cleanly instead of
        // being killed mid-write.
        let grace = Duration::from_millis(self.cfg.graceful_timeout_ms);
        let exited = match timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                debug!("Backend exited gracefully with {}", status);
                true
            }
            Ok(Err(e)) => {
                warn!("Wait for backend failed: {}", e);
                false
            }
            Err(_) => {
                warn!("Graceful shutdown timed out after {:?}, killing backend", grace);
                false
            }
        };

        if !exited {
            if let Err(e) = child.kill().await {
                warn!("Failed to kill backend: {}", e);
            }
        }

        self.phase = Phase::Stopped;
        info!("Backend stopped");
    }

    /// Captured backend output, for post-mortem inspection.
    pub fn diagnostics(&self) -> String {
        std::fs::read_to_string(&self.cfg.log_path).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cfg(dir: &tempfile::TempDir) -> BackendConfig {
        BackendConfig {
            log_path: dir.path().join("backend.log"),
            settle_ms: 50,
            graceful_timeout_ms: 500,
            pass_soundfont: false,
            select: None,
            ..BackendConfig::default()
        }
    }

    fn existing_soundfont(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("bank.sf2");
        std::fs::write(&path, b"sf2").unwrap();
        path
    }

    #[tokio::test]
    async fn test_empty_candidate_list_fails_without_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_cfg(&dir);
        cfg.soundfont_paths = vec![];

        let mut supervisor = SynthSupervisor::new(cfg, 9);
        let err = supervisor.start().await.unwrap_err();

        assert!(matches!(err, SynthError::ResourceNotFound { .. }));
        assert_eq!(supervisor.phase(), Phase::Failed);
        assert!(supervisor.child.is_none());
    }

    #[tokio::test]
    async fn test_missing_candidates_fail() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_cfg(&dir);
        cfg.soundfont_paths = vec![dir.path().join("nope.sf2")];

        let mut supervisor = SynthSupervisor::new(cfg, 9);
        assert!(matches!(
            supervisor.start().await,
            Err(SynthError::ResourceNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_stop_before_start_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut supervisor = SynthSupervisor::new(test_cfg(&dir), 9);

        supervisor.stop().await;
        assert_eq!(supervisor.phase(), Phase::NotStarted);
    }

    #[tokio::test]
    async fn test_died_early_surfaces_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_cfg(&dir);
        cfg.mode = BackendMode::Daemon;
        cfg.command = "sh".to_string();
        cfg.args = vec!["-c".to_string(), "echo cannot open audio device; exit 1".to_string()];
        cfg.soundfont_paths = vec![existing_soundfont(&dir)];

        let mut supervisor = SynthSupervisor::new(cfg, 9);
        match supervisor.start().await {
            Err(SynthError::DiedEarly { diagnostics }) => {
                assert!(diagnostics.contains("cannot open audio device"));
            }
            other => panic!("expected DiedEarly, got {:?}", other.map(|_| ())),
        }
        assert_eq!(supervisor.phase(), Phase::Failed);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_cfg(&dir);
        cfg.mode = BackendMode::Daemon;
        cfg.command = "sleep".to_string();
        cfg.args = vec!["30".to_string()];
        cfg.soundfont_paths = vec![existing_soundfont(&dir)];

        let mut supervisor = SynthSupervisor::new(cfg, 9);
        supervisor.start().await.unwrap();
        assert_eq!(supervisor.phase(), Phase::Running);

        supervisor.stop().await;
        assert_eq!(supervisor.phase(), Phase::Stopped);

        supervisor.stop().await;
        assert_eq!(supervisor.phase(), Phase::Stopped);
    }

    #[tokio::test]
    async fn test_daemon_stop_waits_for_natural_exit() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_cfg(&dir);
        cfg.mode = BackendMode::Daemon;
        // Outlives the settle probe, then exits on its own; the final
        // echo only lands in the log if stop waits instead of killing.
        cfg.command = "sh".to_string();
        cfg.args = vec!["-c".to_string(), "sleep 0.2; echo clean exit".to_string()];
        cfg.soundfont_paths = vec![existing_soundfont(&dir)];
        cfg.graceful_timeout_ms = 5000;

        let mut supervisor = SynthSupervisor::new(cfg, 9);
        supervisor.start().await.unwrap();
        assert_eq!(supervisor.phase(), Phase::Running);

        supervisor.stop().await;
        assert_eq!(supervisor.phase(), Phase::Stopped);
        assert!(supervisor.diagnostics().contains("clean exit"));
    }

    #[tokio::test]
    async fn test_shell_mode_quits_gracefully() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_cfg(&dir);
        cfg.mode = BackendMode::Shell;
        // cat exits when its stdin closes, standing in for a shell
        // backend honoring quit.
        cfg.command = "cat".to_string();
        cfg.args = vec![];
        cfg.soundfont_paths = vec![existing_soundfont(&dir)];
        cfg.graceful_timeout_ms = 2000;

        let mut supervisor = SynthSupervisor::new(cfg, 9);
        supervisor.start().await.unwrap();
        assert!(supervisor.has_command_channel());

        supervisor.send_command("noteon 9 42 100").await.unwrap();
        supervisor.stop().await;
        assert_eq!(supervisor.phase(), Phase::Stopped);
    }
}
