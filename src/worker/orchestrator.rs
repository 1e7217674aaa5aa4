//! Spawning and supervising worker processes.
//!
//! # Responsibilities
//! - Re-execute the host binary once per worker with the shared sockets
//! - Forward shutdown to every live worker as SIGTERM
//! - Report each exit as clean, non-zero, or killed by a named signal
//!
//! # Design Decisions
//! - Crashed workers are not respawned; the exit is logged and counted
//! - Workers share nothing with the parent besides the listening sockets

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use futures_util::future::join_all;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};

use crate::error::WorkerError;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::worker::sockets::{SharedSockets, LISTEN_FDS_ENV};

/// Environment variable carrying a worker's ordinal.
pub const WORKER_ENV: &str = "MICROHOST_WORKER";

/// How a worker process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitKind {
    Clean,
    Code(i32),
    Signal { signo: i32, name: &'static str },
}

impl ExitKind {
    pub fn from_status(status: ExitStatus) -> Self {
        if let Some(signo) = status.signal() {
            let name = Signal::try_from(signo).map(Signal::as_str).unwrap_or("unknown signal");
            return ExitKind::Signal { signo, name };
        }
        match status.code() {
            Some(0) | None => ExitKind::Clean,
            Some(code) => ExitKind::Code(code),
        }
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            ExitKind::Clean => "clean",
            ExitKind::Code(_) => "exit_code",
            ExitKind::Signal { .. } => "signal",
        }
    }
}

impl fmt::Display for ExitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitKind::Clean => f.write_str("exited cleanly"),
            ExitKind::Code(code) => write!(f, "exited with code {code}"),
            ExitKind::Signal { signo, name } => write!(f, "killed by {name} ({signo})"),
        }
    }
}

/// Outcome of one worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerExit {
    pub ordinal: usize,
    pub pid: Option<u32>,
    pub kind: ExitKind,
}

/// Program, arguments and environment each worker is started with.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// The running binary with its own command line.
    pub fn current_exe() -> std::io::Result<Self> {
        let mut command = Self::new(std::env::current_exe()?);
        command.args = std::env::args_os().skip(1).collect();
        Ok(command)
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.envs
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    fn build(&self, ordinal: usize, listen_fds: &str) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .env(WORKER_ENV, ordinal.to_string())
            .env(LISTEN_FDS_ENV, listen_fds)
            .stdin(Stdio::null());
        command
    }
}

/// A spawned worker awaiting supervision.
#[derive(Debug)]
pub struct WorkerProcess {
    pub ordinal: usize,
    pub pid: Option<u32>,
    child: Child,
}

/// Starts workers over one set of shared sockets.
#[derive(Debug)]
pub struct Orchestrator {
    sockets: SharedSockets,
    command: WorkerCommand,
    count: usize,
}

impl Orchestrator {
    pub fn new(sockets: SharedSockets, command: WorkerCommand, count: usize) -> Self {
        Self {
            sockets,
            command,
            count: count.max(1),
        }
    }

    pub fn sockets(&self) -> &SharedSockets {
        &self.sockets
    }

    /// Spawn every worker. Already-started workers are terminated if a
    /// later spawn fails.
    pub fn spawn(&self) -> Result<Vec<WorkerProcess>, WorkerError> {
        let listen_fds = self.sockets.env_value();
        let mut workers = Vec::with_capacity(self.count);

        for ordinal in 0..self.count {
            match self.command.build(ordinal, &listen_fds).spawn() {
                Ok(child) => {
                    let pid = child.id();
                    tracing::info!(worker = ordinal, pid = ?pid, "Worker started");
                    workers.push(WorkerProcess { ordinal, pid, child });
                }
                Err(source) => {
                    for worker in &workers {
                        terminate(worker.ordinal, worker.pid);
                    }
                    return Err(WorkerError::Spawn { ordinal, source });
                }
            }
        }
        Ok(workers)
    }

    /// Wait for every worker to exit, sending SIGTERM to those still running
    /// once `shutdown` triggers.
    pub async fn supervise(workers: Vec<WorkerProcess>, shutdown: Shutdown) -> Vec<WorkerExit> {
        let watchers = workers.into_iter().map(|worker| {
            let shutdown = shutdown.clone();
            async move { watch(worker, shutdown).await }
        });
        join_all(watchers).await
    }

    /// Spawn and supervise in one step; the parent keeps no socket copies
    /// once the workers hold them.
    pub async fn run(self, shutdown: Shutdown) -> Result<Vec<WorkerExit>, WorkerError> {
        let workers = self.spawn()?;
        drop(self.sockets);
        Ok(Self::supervise(workers, shutdown).await)
    }
}

async fn watch(mut worker: WorkerProcess, shutdown: Shutdown) -> WorkerExit {
    let mut listener = shutdown.subscribe();
    let status = tokio::select! {
        status = worker.child.wait() => status,
        _ = listener.wait() => {
            terminate(worker.ordinal, worker.pid);
            worker.child.wait().await
        }
    };

    let kind = match status {
        Ok(status) => ExitKind::from_status(status),
        Err(e) => {
            tracing::error!(worker = worker.ordinal, error = %e, "Failed to wait for worker");
            ExitKind::Code(-1)
        }
    };
    report(worker.ordinal, worker.pid, &kind);
    WorkerExit {
        ordinal: worker.ordinal,
        pid: worker.pid,
        kind,
    }
}

fn terminate(ordinal: usize, pid: Option<u32>) {
    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        if e != nix::errno::Errno::ESRCH {
            tracing::warn!(worker = ordinal, pid, error = %e, "Failed to signal worker");
        }
    }
}

fn report(ordinal: usize, pid: Option<u32>, kind: &ExitKind) {
    metrics::record_worker_exit(kind.as_label());
    match kind {
        ExitKind::Clean => tracing::info!(worker = ordinal, pid = ?pid, "Worker {kind}"),
        _ => tracing::error!(worker = ordinal, pid = ?pid, "Worker {kind}"),
    }
}
