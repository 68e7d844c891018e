//! Scoped scratch directories and decoder invocation lifecycle.
//!
//! Every decoding invocation gets a fresh directory that this module owns
//! outright. The decoder may write anything below it, but only this module
//! deletes it, and it does so whether the decoder finished, failed, or was
//! killed. Killing is unilateral: a subprocess invocation is sent SIGKILL
//! with no warning and no teardown hook, and its directory is reclaimed only
//! after the process has been reaped.
//!
//! State machine: `Created -> Invoked -> {Completed | Terminated} -> Reclaimed`.

use qdec_core::{ProtocolError, Result};
use qdec_plugin::{DecodeTask, Decoder};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{debug, warn};

/// Name of the scratch directory handed to the decoder, below the scope root.
const DECODER_SCRATCH: &str = "scratch";

/// File a subprocess worker writes its result to, below the scope root.
pub const REPORT_FILE: &str = "report.json";

/// File the worker job description is written to, below the scope root.
pub const JOB_FILE: &str = "job.json";

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// A directory that exists exactly as long as one invocation.
///
/// Layout: the root holds the orchestrator's own files (inputs, outputs, job
/// description) and a `scratch/` subdirectory that is passed to the decoder
/// as its `tmp_dir`. Reclaiming removes the whole tree.
#[derive(Debug)]
pub struct ScopedDir {
    dir: Option<TempDir>,
    scratch: PathBuf,
}

impl ScopedDir {
    /// Creates a fresh, empty scope under `parent` (or the system temp dir).
    pub fn create(parent: Option<&Path>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("qdec-");
        let dir = match parent {
            Some(parent) => builder
                .tempdir_in(parent)
                .map_err(|e| ProtocolError::resource(parent, e))?,
            None => builder
                .tempdir()
                .map_err(|e| ProtocolError::resource(std::env::temp_dir(), e))?,
        };
        let scratch = dir.path().join(DECODER_SCRATCH);
        fs::create_dir(&scratch).map_err(|e| ProtocolError::resource(&scratch, e))?;
        Ok(Self {
            dir: Some(dir),
            scratch,
        })
    }

    /// Root of the scope, for the orchestrator's own files.
    pub fn root(&self) -> &Path {
        self.dir
            .as_ref()
            .map(TempDir::path)
            .unwrap_or_else(|| Path::new(""))
    }

    /// The decoder's `tmp_dir`.
    pub fn scratch(&self) -> &Path {
        &self.scratch
    }

    /// Deletes the scope recursively.
    ///
    /// Whatever the decoder left behind (half-written files, nested
    /// directories, or nothing at all because it removed its own scratch
    /// area) is removed without error.
    pub fn reclaim(mut self) -> Result<()> {
        self.remove()
    }

    fn remove(&mut self) -> Result<()> {
        let Some(dir) = self.dir.take() else {
            return Ok(());
        };
        let path = dir.path().to_path_buf();
        match dir.close() {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ProtocolError::resource(path, e)),
        }
    }
}

impl Drop for ScopedDir {
    fn drop(&mut self) {
        if let Err(e) = self.remove() {
            warn!("failed to reclaim scratch directory: {e}");
        }
    }
}

/// External trigger for terminating invocations.
///
/// Cloned into whoever decides to stop work; every wait loop holding a clone
/// notices within one poll interval and kills its invocation.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    Created,
    Invoked,
    Completed,
    Terminated,
    Reclaimed,
}

/// Category of a failed invocation, mirroring [`ProtocolError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Format,
    Decode,
    Resource,
    Io,
    /// The worker process died or produced no report.
    Worker,
}

/// Why an invocation failed, in a form that survives process boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&ProtocolError> for Failure {
    fn from(e: &ProtocolError) -> Self {
        let kind = match e {
            ProtocolError::Format(_) => FailureKind::Format,
            ProtocolError::Decode(_) => FailureKind::Decode,
            ProtocolError::Resource { .. } => FailureKind::Resource,
            ProtocolError::Io(_) => FailureKind::Io,
        };
        Self {
            kind,
            message: e.to_string(),
        }
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// What a worker process leaves in [`REPORT_FILE`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub failure: Option<Failure>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationOutcome {
    /// The decoder returned normally; the output file is valid.
    Succeeded,
    /// The decoder reported an error; the output file is undefined.
    Failed(Failure),
    /// The invocation was killed; the output file is undefined.
    Terminated,
}

/// One decoder invocation and the scratch directory it owns.
#[derive(Debug)]
pub struct Invocation {
    state: InvocationState,
    scope: Option<ScopedDir>,
    child: Option<Child>,
}

impl Invocation {
    /// Creates the scope for a new invocation.
    pub fn create(scratch_root: Option<&Path>) -> Result<Self> {
        let scope = ScopedDir::create(scratch_root)?;
        debug!(dir = %scope.root().display(), "invocation created");
        Ok(Self {
            state: InvocationState::Created,
            scope: Some(scope),
            child: None,
        })
    }

    pub fn state(&self) -> InvocationState {
        self.state
    }

    /// Root of the invocation's scope, for inputs and outputs.
    pub fn root(&self) -> &Path {
        self.scope
            .as_ref()
            .map(ScopedDir::root)
            .unwrap_or_else(|| Path::new(""))
    }

    /// The decoder's `tmp_dir`.
    pub fn tmp_dir(&self) -> &Path {
        self.scope
            .as_ref()
            .map(ScopedDir::scratch)
            .unwrap_or_else(|| Path::new(""))
    }

    fn transition(&mut self, from: &[InvocationState], to: InvocationState) -> Result<()> {
        if !from.contains(&self.state) {
            return Err(ProtocolError::resource(
                self.root(),
                format!("invocation cannot move from {:?} to {to:?}", self.state),
            ));
        }
        debug!(from = ?self.state, to = ?to, "invocation transition");
        self.state = to;
        Ok(())
    }

    /// Runs `decoder` on the calling thread until it returns.
    ///
    /// In-process invocations cannot be terminated; they always end
    /// `Completed`.
    pub fn run_in_process(
        &mut self,
        decoder: &dyn Decoder,
        task: &DecodeTask,
    ) -> Result<InvocationOutcome> {
        self.transition(&[InvocationState::Created], InvocationState::Invoked)?;
        let outcome = match decoder.decode_via_files(task) {
            Ok(()) => InvocationOutcome::Succeeded,
            Err(e) => InvocationOutcome::Failed(Failure::from(&e)),
        };
        self.transition(&[InvocationState::Invoked], InvocationState::Completed)?;
        Ok(outcome)
    }

    /// Starts `program worker --job <root>/job.json` in its own process group.
    ///
    /// `job_json` is written into the scope before the process starts.
    pub fn spawn_worker(&mut self, program: &Path, job_json: &str) -> Result<()> {
        if self.state != InvocationState::Created {
            return Err(ProtocolError::resource(
                self.root(),
                "worker already started",
            ));
        }
        let job_path = self.root().join(JOB_FILE);
        fs::write(&job_path, job_json).map_err(|e| ProtocolError::resource(&job_path, e))?;

        let mut command = Command::new(program);
        command
            .arg("worker")
            .arg("--job")
            .arg(&job_path)
            .current_dir(self.tmp_dir())
            .stdin(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let child = command
            .spawn()
            .map_err(|e| ProtocolError::resource(program, e))?;
        debug!(pid = child.id(), "worker process started");
        self.child = Some(child);
        self.transition(&[InvocationState::Created], InvocationState::Invoked)
    }

    /// Kills the running worker immediately and reaps it.
    ///
    /// No signal precedes the kill and nothing inside the worker gets to run.
    /// Calling this on an invocation that already stopped is a no-op.
    pub fn terminate(&mut self) -> Result<()> {
        if self.state != InvocationState::Invoked {
            return Ok(());
        }
        if let Some(mut child) = self.child.take() {
            kill_tree(&mut child);
            child.wait()?;
            #[cfg(unix)]
            settle_group(child.id());
        }
        self.transition(&[InvocationState::Invoked], InvocationState::Terminated)
    }

    /// Blocks until the worker exits on its own.
    pub fn wait(&mut self) -> Result<InvocationOutcome> {
        self.wait_until(None, None)
    }

    /// Waits up to `timeout` (forever when `None`), terminating the worker
    /// when the deadline passes or `cancel` fires.
    pub fn wait_timeout(
        &mut self,
        timeout: Option<Duration>,
        cancel: &CancelToken,
    ) -> Result<InvocationOutcome> {
        self.wait_until(timeout.map(|t| Instant::now() + t), Some(cancel))
    }

    fn wait_until(
        &mut self,
        deadline: Option<Instant>,
        cancel: Option<&CancelToken>,
    ) -> Result<InvocationOutcome> {
        if self.child.is_none() {
            return Err(ProtocolError::resource(self.root(), "no worker to wait for"));
        }
        let status = loop {
            if let Some(child) = self.child.as_mut() {
                if leader_exited(child)? {
                    // Still unreaped, so its pid keeps naming the group.
                    let signalled = kill_rest_of_group(child.id());
                    let status = child.wait()?;
                    if signalled {
                        #[cfg(unix)]
                        settle_group(child.id());
                    }
                    break status;
                }
            }
            let expired = deadline.is_some_and(|d| Instant::now() >= d);
            let cancelled = cancel.is_some_and(CancelToken::is_cancelled);
            if expired || cancelled {
                debug!(expired, cancelled, "terminating worker");
                self.terminate()?;
                return Ok(InvocationOutcome::Terminated);
            }
            thread::sleep(POLL_INTERVAL);
        };

        self.child = None;
        self.transition(&[InvocationState::Invoked], InvocationState::Completed)?;
        Ok(self.read_report(status))
    }

    fn read_report(&self, status: ExitStatus) -> InvocationOutcome {
        let path = self.root().join(REPORT_FILE);
        let report = fs::read_to_string(&path)
            .ok()
            .and_then(|text| serde_json::from_str::<WorkerReport>(&text).ok());
        match report {
            Some(WorkerReport { failure: None }) if status.success() => {
                InvocationOutcome::Succeeded
            }
            Some(WorkerReport {
                failure: Some(failure),
            }) => InvocationOutcome::Failed(failure),
            _ => InvocationOutcome::Failed(Failure {
                kind: FailureKind::Worker,
                message: format!("worker exited with {status} and no usable report"),
            }),
        }
    }

    /// Deletes the invocation's scope.
    ///
    /// Refused while a worker may still be writing into it.
    pub fn reclaim(mut self) -> Result<()> {
        self.transition(
            &[
                InvocationState::Created,
                InvocationState::Completed,
                InvocationState::Terminated,
            ],
            InvocationState::Reclaimed,
        )?;
        match self.scope.take() {
            Some(scope) => scope.reclaim(),
            None => Ok(()),
        }
    }
}

impl Drop for Invocation {
    fn drop(&mut self) {
        if let Err(e) = self.terminate() {
            warn!("failed to stop worker while dropping invocation: {e}");
        }
    }
}

#[cfg(unix)]
fn kill_tree(child: &mut Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    if let Err(e) = killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL) {
        debug!("killpg failed ({e}), falling back to kill");
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) {
    let _ = child.kill();
}

/// Whether the worker has exited, without reaping it.
#[cfg(any(target_os = "linux", target_os = "android"))]
fn leader_exited(child: &mut Child) -> Result<bool> {
    use nix::sys::wait::{Id, WaitPidFlag, WaitStatus, waitid};
    use nix::unistd::Pid;

    let flags = WaitPidFlag::WEXITED | WaitPidFlag::WNOHANG | WaitPidFlag::WNOWAIT;
    match waitid(Id::Pid(Pid::from_raw(child.id() as i32)), flags) {
        Ok(WaitStatus::StillAlive) => Ok(false),
        Ok(_) => Ok(true),
        Err(e) => Err(std::io::Error::from(e).into()),
    }
}

/// Elsewhere the exit can only be seen by reaping, so the group id is no
/// longer reserved and the rest of the group is left alone.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn leader_exited(child: &mut Child) -> Result<bool> {
    Ok(child.try_wait()?.is_some())
}

/// Kills whatever the exited worker left running in its group. Returns
/// whether a signal went out.
#[cfg(any(target_os = "linux", target_os = "android"))]
fn kill_rest_of_group(pgid: u32) -> bool {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
        Ok(()) => true,
        Err(e) => {
            debug!(pgid, "killpg after exit failed: {e}");
            false
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn kill_rest_of_group(_pgid: u32) -> bool {
    false
}

#[cfg(unix)]
const GROUP_EXIT_LIMIT: Duration = Duration::from_secs(1);

/// Waits out a killed group, warning about members that would not die.
#[cfg(unix)]
fn settle_group(pgid: u32) {
    if !wait_for_group_exit(pgid, GROUP_EXIT_LIMIT) {
        warn!(pgid, "killed worker group still has live members");
    }
}

/// Polls until no member of a killed process group is left, for at most
/// `limit`. Returns false if some member outlived it.
///
/// Members other than the direct child are reaped by init, so this can only
/// poll.
#[cfg(unix)]
fn wait_for_group_exit(pgid: u32, limit: Duration) -> bool {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let deadline = Instant::now() + limit;
    loop {
        if killpg(Pid::from_raw(pgid as i32), None).is_err() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(POLL_INTERVAL);
    }
}
