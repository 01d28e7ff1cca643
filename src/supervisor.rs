//! Process lifecycle supervision.
//!
//! This module contains the `Supervisor`, which owns one guarded state cell
//! per registered service and orchestrates starts and stops: it validates the
//! artifact, spawns the platform runtime, wires the output-capture tasks, and
//! applies the stop grace period with forced-kill escalation. All state
//! mutation goes through the per-service mutexes so action tasks, reader
//! tasks and the monitor never race on the same fields.

use std::process::{ExitStatus, Stdio};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::errors::{StartError, StopError};
use crate::events::SupervisorEvent;
use crate::registry::{ServiceDef, ServiceRegistry};
use crate::state::{ServiceSnapshot, ServiceState};

/// How often the stop path re-checks the child while waiting it out.
const STOP_POLL: Duration = Duration::from_millis(50);
/// How long a forced kill is awaited before reaping is left to the monitor.
const KILL_WAIT: Duration = Duration::from_secs(1);

/// One service's guarded runtime state.
///
/// The `op` mutex serializes start/stop requests for the service; the `state`
/// mutex guards the fields themselves and is never held across an await.
pub struct ServiceCell {
    pub def: ServiceDef,
    pub(crate) op: tokio::sync::Mutex<()>,
    pub(crate) state: Mutex<ServiceState>,
}

struct Inner {
    cells: Vec<ServiceCell>,
    settings: Settings,
    event_tx: mpsc::Sender<SupervisorEvent>,
    sequencing: AtomicBool,
}

/// The process supervision engine. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(
        registry: ServiceRegistry,
        settings: Settings,
        event_tx: mpsc::Sender<SupervisorEvent>,
    ) -> Self {
        let cells = registry
            .into_services()
            .into_iter()
            .map(|def| {
                let state = ServiceState::new(
                    def.artifact.clone(),
                    settings.max_log_bytes,
                    settings.trim_chunk_bytes,
                );
                ServiceCell {
                    def,
                    op: tokio::sync::Mutex::new(()),
                    state: Mutex::new(state),
                }
            })
            .collect();
        Self {
            inner: Arc::new(Inner {
                cells,
                settings,
                event_tx,
                sequencing: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn cells(&self) -> &[ServiceCell] {
        &self.inner.cells
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn event_tx(&self) -> &mpsc::Sender<SupervisorEvent> {
        &self.inner.event_tx
    }

    pub(crate) fn sequencing(&self) -> &AtomicBool {
        &self.inner.sequencing
    }

    pub fn len(&self) -> usize {
        self.inner.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.cells.is_empty()
    }

    /// Resolves a display name to a service id.
    pub fn find_service(&self, name: &str) -> Option<usize> {
        self.inner
            .cells
            .iter()
            .position(|c| c.def.name.eq_ignore_ascii_case(name))
    }

    /// Whether the service currently holds a live handle.
    pub fn is_running(&self, id: usize) -> bool {
        self.inner
            .cells
            .get(id)
            .map(|c| c.state.lock().is_running())
            .unwrap_or(false)
    }

    /// A point-in-time view of every service, in registration order.
    pub fn snapshot(&self) -> Vec<ServiceSnapshot> {
        (0..self.inner.cells.len())
            .filter_map(|id| self.snapshot_one(id))
            .collect()
    }

    pub fn snapshot_one(&self, id: usize) -> Option<ServiceSnapshot> {
        let cell = self.inner.cells.get(id)?;
        let st = cell.state.lock();
        Some(ServiceSnapshot {
            id,
            name: cell.def.name.clone(),
            status: st.status(),
            pid: if st.is_running() { st.pid } else { None },
            exit_code: st.exit_code,
            artifact: st.artifact.clone(),
        })
    }

    /// The entire retained log text for one service.
    pub fn full_log(&self, id: usize) -> Option<String> {
        let cell = self.inner.cells.get(id)?;
        Some(cell.state.lock().log.full().to_string())
    }

    /// The last `n` non-empty log lines, for inline display.
    pub fn tail_log(&self, id: usize, n: usize) -> Option<String> {
        let cell = self.inner.cells.get(id)?;
        Some(cell.state.lock().log.tail(n))
    }

    /// Rewrites the artifact path; takes effect on the next start only.
    pub fn set_artifact_path(&self, id: usize, artifact: String) -> bool {
        let Some(cell) = self.inner.cells.get(id) else {
            return false;
        };
        info!(service = %cell.def.name, artifact = %artifact, "artifact path updated");
        cell.state.lock().artifact = artifact;
        true
    }

    /// Starts one service.
    ///
    /// Clears the error flag and the log, validates the artifact, spawns the
    /// runtime with the root as working directory, and wires capture tasks
    /// for both output streams into the service's log. Every failure is
    /// recorded in the log and surfaces as an `Error` status; none is fatal
    /// to the supervisor.
    pub async fn start(&self, id: usize) -> Result<(), StartError> {
        let cell = self
            .inner
            .cells
            .get(id)
            .ok_or(StartError::UnknownService(id))?;
        let _op = cell.op.lock().await;

        let artifact = {
            let mut st = cell.state.lock();
            if let Some(child) = st.child.as_mut() {
                // An exited-but-unreaped child does not count as running.
                if let Ok(Some(status)) = child.try_wait() {
                    reap(&mut st, status);
                }
            }
            if st.is_running() {
                return Err(StartError::AlreadyRunning);
            }
            st.error_detected = false;
            st.manual_stop = false;
            st.confirmed_running = false;
            st.exit_code = None;
            st.log.clear();
            st.artifact.clone()
        };

        let settings = &self.inner.settings;
        let resolved = settings.root.join(&artifact);
        if !resolved.exists() {
            let mut st = cell.state.lock();
            st.log
                .append_line(&format!("artifact not found: {}", resolved.display()));
            st.error_detected = true;
            warn!(service = %cell.def.name, path = %resolved.display(), "artifact not found");
            return Err(StartError::ArtifactNotFound(resolved));
        }
        let path = resolved.canonicalize().unwrap_or(resolved);

        let mut command = Command::new(&settings.runtime[0]);
        command.args(&settings.runtime[1..]);
        command.arg(&path);
        command.current_dir(&settings.root);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command.kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                let mut st = cell.state.lock();
                st.log.append_line(&format!("failed to spawn process: {err}"));
                st.error_detected = true;
                warn!(service = %cell.def.name, error = %err, "spawn failed");
                return Err(StartError::Spawn(err));
            }
        };

        let pid = child.id();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(capture_stream(self.clone(), id, stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(capture_stream(self.clone(), id, stderr));
        }

        {
            let mut st = cell.state.lock();
            st.child = Some(child);
            st.pid = pid;
        }
        info!(service = %cell.def.name, pid, "started");
        Ok(())
    }

    /// Stops one service: graceful termination first, forced kill after the
    /// grace period. Bounded latency regardless of the child's behavior.
    pub async fn stop(&self, id: usize) -> Result<(), StopError> {
        let cell = self
            .inner
            .cells
            .get(id)
            .ok_or(StopError::UnknownService(id))?;
        let _op = cell.op.lock().await;

        let pid = {
            let mut st = cell.state.lock();
            if let Some(child) = st.child.as_mut() {
                if let Ok(Some(status)) = child.try_wait() {
                    reap(&mut st, status);
                }
            }
            if !st.is_running() {
                return Err(StopError::NotRunning);
            }
            // Must be set before the termination request so the exit is
            // never classified as a crash.
            st.manual_stop = true;
            st.pid
        };

        info!(service = %cell.def.name, pid, "stopping");
        request_graceful(cell, pid);

        let deadline = tokio::time::Instant::now() + self.inner.settings.grace;
        loop {
            if try_reap(cell) {
                debug!(service = %cell.def.name, "exited within grace period");
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(STOP_POLL).await;
        }

        warn!(service = %cell.def.name, "grace period elapsed, killing");
        {
            let mut st = cell.state.lock();
            if let Some(child) = st.child.as_mut() {
                let _ = child.start_kill();
            }
        }
        let deadline = tokio::time::Instant::now() + KILL_WAIT;
        loop {
            if try_reap(cell) {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(STOP_POLL).await;
        }
        // Kill was issued; final reaping falls to the monitor rather than
        // blocking the caller further.
        Ok(())
    }
}

/// Records an observed exit in the state: captures the code, classifies a
/// crash unless the exit was clean/expected or a manual stop was in flight,
/// and releases the handle so the service can start again.
pub(crate) fn reap(st: &mut ServiceState, status: ExitStatus) {
    st.exit_code = status.code();
    if !st.manual_stop && !is_expected_exit(&status) {
        st.error_detected = true;
        st.log.append_line(&format!(
            "process exited unexpectedly ({})",
            describe_exit(&status)
        ));
    }
    st.child = None;
    st.pid = None;
    st.manual_stop = false;
    st.confirmed_running = false;
}

/// Reaps the child if it has exited. Returns true once no live handle
/// remains.
pub(crate) fn try_reap(cell: &ServiceCell) -> bool {
    let mut st = cell.state.lock();
    match st.child.as_mut() {
        Some(child) => match child.try_wait() {
            Ok(Some(status)) => {
                reap(&mut st, status);
                true
            }
            Ok(None) => false,
            Err(_) => false,
        },
        None => true,
    }
}

/// Clean exit, or the outcome the stop signal conventionally produces.
fn is_expected_exit(status: &ExitStatus) -> bool {
    if status.success() {
        return true;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if status.signal() == Some(libc::SIGTERM) {
            return true;
        }
        // JVM-style shells report SIGTERM as 128 + 15.
        if status.code() == Some(128 + libc::SIGTERM) {
            return true;
        }
    }
    false
}

fn describe_exit(status: &ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

#[cfg(unix)]
fn request_graceful(_cell: &ServiceCell, pid: Option<u32>) {
    if let Some(pid) = pid {
        unsafe {
            let _ = libc::kill(pid as i32, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn request_graceful(cell: &ServiceCell, _pid: Option<u32>) {
    // No portable soft-termination signal; issue the kill up front and let
    // the grace loop reap it.
    let mut st = cell.state.lock();
    if let Some(child) = st.child.as_mut() {
        let _ = child.start_kill();
    }
}

/// Reads one output stream line by line into the service's log for the
/// process's lifetime, flagging the failure marker as soon as it appears. A
/// read error is recorded as a log line and ends the task; the process keeps
/// running and stays monitored for liveness.
async fn capture_stream<R>(sup: Supervisor, id: usize, reader: R)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let cell = &sup.inner.cells[id];
                let mut st = cell.state.lock();
                if !st.error_detected && sup.inner.settings.failure_marker.is_match(&line) {
                    st.error_detected = true;
                    warn!(service = %cell.def.name, "failure marker matched in output");
                }
                st.log.append_line(&line);
            }
            Ok(None) => break,
            Err(err) => {
                let cell = &sup.inner.cells[id];
                let mut st = cell.state.lock();
                st.log
                    .append_line(&format!("error reading output stream: {err}"));
                break;
            }
        }
    }
}

#[cfg(all(test, unix))]
pub(crate) mod tests {
    use super::*;
    use crate::registry::ServiceDef;
    use crate::state::Status;
    use regex::Regex;
    use std::path::Path;
    use tempfile::TempDir;

    pub(crate) fn test_settings(root: &Path) -> Settings {
        Settings {
            root: root.to_path_buf(),
            runtime: vec!["sh".into()],
            warmup: Duration::from_millis(200),
            stagger: Duration::from_millis(50),
            grace: Duration::from_millis(400),
            poll: Duration::from_millis(50),
            max_log_bytes: 64 * 1024,
            trim_chunk_bytes: 1024,
            failure_marker: Regex::new("FATAL BOOT FAILURE").unwrap(),
        }
    }

    pub(crate) fn test_supervisor(
        root: &Path,
        scripts: &[(&str, &str)],
    ) -> (Supervisor, mpsc::Receiver<SupervisorEvent>) {
        let defs = scripts
            .iter()
            .map(|(name, _)| ServiceDef {
                name: (*name).to_string(),
                artifact: format!("{name}.sh"),
            })
            .collect();
        for (name, body) in scripts {
            std::fs::write(root.join(format!("{name}.sh")), body).unwrap();
        }
        let (tx, rx) = mpsc::channel(256);
        let sup = Supervisor::new(
            ServiceRegistry::new(defs),
            test_settings(root),
            tx,
        );
        (sup, rx)
    }

    pub(crate) async fn wait_until<F>(mut cond: F, timeout: Duration) -> bool
    where
        F: FnMut() -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        cond()
    }

    #[tokio::test]
    async fn missing_artifact_sets_error_without_spawning() {
        let dir = TempDir::new().unwrap();
        let (sup, _rx) = test_supervisor(dir.path(), &[("api", "sleep 5\n")]);
        std::fs::remove_file(dir.path().join("api.sh")).unwrap();

        let err = sup.start(0).await.unwrap_err();
        assert!(matches!(err, StartError::ArtifactNotFound(_)));

        let snap = sup.snapshot_one(0).unwrap();
        assert_eq!(snap.status, Status::Error);
        assert_eq!(snap.pid, None);
        assert!(sup.full_log(0).unwrap().contains("artifact not found"));
        assert!(!sup.is_running(0));
    }

    #[tokio::test]
    async fn second_start_is_rejected_while_running() {
        let dir = TempDir::new().unwrap();
        let (sup, _rx) = test_supervisor(dir.path(), &[("api", "sleep 5\n")]);

        sup.start(0).await.unwrap();
        let err = sup.start(0).await.unwrap_err();
        assert!(matches!(err, StartError::AlreadyRunning));

        sup.stop(0).await.unwrap();
    }

    #[tokio::test]
    async fn stop_never_classifies_as_crash() {
        let dir = TempDir::new().unwrap();
        let (sup, _rx) = test_supervisor(dir.path(), &[("api", "sleep 30\n")]);

        sup.start(0).await.unwrap();
        assert!(sup.is_running(0));
        sup.stop(0).await.unwrap();

        let snap = sup.snapshot_one(0).unwrap();
        assert_eq!(snap.status, Status::Stopped);
        assert_eq!(snap.pid, None);
        assert!(!sup.is_running(0));
    }

    #[tokio::test]
    async fn stop_escalates_to_kill_within_bound() {
        let dir = TempDir::new().unwrap();
        // Ignore SIGTERM so only the forced kill can end it.
        let (sup, _rx) = test_supervisor(
            dir.path(),
            &[("stubborn", "trap '' TERM\nwhile true; do sleep 1; done\n")],
        );

        sup.start(0).await.unwrap();
        let started = tokio::time::Instant::now();
        sup.stop(0).await.unwrap();
        let elapsed = started.elapsed();

        assert!(!sup.is_running(0));
        // grace (400ms) + kill wait (1s) plus scheduling slack
        assert!(elapsed < Duration::from_secs(3));
        assert_eq!(sup.snapshot_one(0).unwrap().status, Status::Stopped);
    }

    #[tokio::test]
    async fn captures_both_streams_into_one_log() {
        let dir = TempDir::new().unwrap();
        let (sup, _rx) = test_supervisor(
            dir.path(),
            &[("chatty", "echo out-line\necho err-line 1>&2\nsleep 2\n")],
        );

        sup.start(0).await.unwrap();
        let ok = wait_until(
            || {
                let log = sup.full_log(0).unwrap();
                log.contains("out-line") && log.contains("err-line")
            },
            Duration::from_secs(5),
        )
        .await;
        assert!(ok, "log was: {:?}", sup.full_log(0));

        sup.stop(0).await.unwrap();
    }

    #[tokio::test]
    async fn failure_marker_flags_error_while_still_running() {
        let dir = TempDir::new().unwrap();
        let (sup, _rx) = test_supervisor(
            dir.path(),
            &[("doomed", "echo 'xx FATAL BOOT FAILURE xx'\nsleep 10\n")],
        );

        sup.start(0).await.unwrap();
        let ok = wait_until(
            || sup.snapshot_one(0).unwrap().status == Status::Error,
            Duration::from_secs(5),
        )
        .await;
        assert!(ok);
        // The process itself is still alive; only the classification changed.
        assert!(sup.is_running(0));

        sup.stop(0).await.unwrap();
    }

    #[tokio::test]
    async fn restart_after_error_clears_flag_and_log() {
        let dir = TempDir::new().unwrap();
        let (sup, _rx) = test_supervisor(dir.path(), &[("api", "sleep 5\n")]);
        std::fs::remove_file(dir.path().join("api.sh")).unwrap();
        assert!(sup.start(0).await.is_err());
        assert_eq!(sup.snapshot_one(0).unwrap().status, Status::Error);

        std::fs::write(dir.path().join("api.sh"), "sleep 5\n").unwrap();
        sup.start(0).await.unwrap();
        let snap = sup.snapshot_one(0).unwrap();
        assert_ne!(snap.status, Status::Error);
        assert!(!sup.full_log(0).unwrap().contains("artifact not found"));

        sup.stop(0).await.unwrap();
    }

    #[tokio::test]
    async fn artifact_path_edit_applies_to_next_start() {
        let dir = TempDir::new().unwrap();
        let (sup, _rx) = test_supervisor(dir.path(), &[("api", "echo old\nsleep 5\n")]);
        std::fs::write(dir.path().join("api-v2.sh"), "echo new\nsleep 5\n").unwrap();

        sup.start(0).await.unwrap();
        assert!(sup.set_artifact_path(0, "api-v2.sh".into()));
        // Still the old process until restarted.
        assert!(sup.is_running(0));
        sup.stop(0).await.unwrap();

        sup.start(0).await.unwrap();
        let ok = wait_until(
            || sup.full_log(0).unwrap().contains("new"),
            Duration::from_secs(5),
        )
        .await;
        assert!(ok);
        sup.stop(0).await.unwrap();
    }
}
