//! Supervision of one long-running external program.
//!
//! A [`Supervisor`] spawns the program with piped stdio and wires up four
//! tasks: two line readers (stdout, stderr), one aggregator that is the sole
//! writer of the shared log archive and the publisher of the live channel,
//! and one waiter that owns the child and closes the completion signal.
//! The aggregator closes the live channel exactly once when both pipes
//! reach EOF; the waiter closes the completion watch exactly once when the
//! child exits.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::command::CommandSpec;

/// Capacity of the live log channel. Slow subscribers lag and lose lines
/// rather than backpressuring the readers; the archive keeps everything.
const LIVE_CHANNEL_CAPACITY: usize = 256;

/// Errors raised by the supervisor.
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// The program could not be spawned.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    /// A stdio pipe could not be captured after spawn.
    #[error("cannot capture {0} of child process")]
    Pipe(&'static str),

    /// The supervisor already has a live process.
    #[error("process '{0}' is already running")]
    AlreadyRunning(String),
}

/// Which stream a log line arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogStream {
    Stdout,
    Stderr,
}

/// Handle to one supervised process and its log streams.
///
/// Cloning is cheap; all clones observe the same process.
#[derive(Clone)]
pub struct ProcessHandle {
    name: String,
    args: Vec<String>,
    pid: Option<u32>,
    running: Arc<AtomicBool>,
    done: watch::Receiver<bool>,
    archive: Arc<Mutex<Vec<String>>>,
    live: Arc<Mutex<Option<broadcast::Sender<String>>>>,
    stop: CancellationToken,
}

impl ProcessHandle {
    /// OS process id, if the child reported one at spawn.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Argument vector the process was started with.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Whether the process is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask the process to terminate. Does not wait for the log readers to
    /// drain; observe [`ProcessHandle::wait`] for completion.
    pub fn stop(&self) {
        debug!(process = %self.name, "Termination requested");
        self.stop.cancel();
    }

    /// Wait until the process has exited.
    pub async fn wait(&self) {
        let mut done = self.done.clone();
        while !*done.borrow() {
            // A closed sender means the waiter task is gone, which only
            // happens after it recorded the exit.
            if done.changed().await.is_err() {
                break;
            }
        }
    }

    /// Snapshot of every log line observed so far, in arrival order.
    /// Re-readable any number of times.
    ///
    /// # Panics
    /// Panics if a log task panicked while holding the archive lock.
    #[must_use]
    pub fn archive(&self) -> Vec<String> {
        self.archive.lock().expect("log archive lock poisoned").clone()
    }

    /// Subscribe to log lines from this point on. Returns `None` once the
    /// process has exited and the live channel is closed.
    ///
    /// # Panics
    /// Panics if a log task panicked while holding the channel lock.
    #[must_use]
    pub fn subscribe(&self) -> Option<broadcast::Receiver<String>> {
        self.live
            .lock()
            .expect("live channel lock poisoned")
            .as_ref()
            .map(broadcast::Sender::subscribe)
    }
}

/// Supervisor for one external program.
///
/// Holds at most one live process at a time; the control-plane maps one
/// supervisor to each managed engine.
pub struct Supervisor {
    name: String,
    handle: Mutex<Option<ProcessHandle>>,
}

impl Supervisor {
    /// Create a supervisor. `name` labels log output and errors.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handle: Mutex::new(None),
        }
    }

    /// Spawn the program described by `spec`.
    ///
    /// The returned handle streams logs and reports exit; the same handle is
    /// retained by the supervisor for [`Supervisor::stop`] and the log
    /// accessors. Cancelling `token` terminates the child.
    ///
    /// # Errors
    /// Returns [`SupervisorError`] if a process is already live or the spawn
    /// fails.
    ///
    /// # Panics
    /// Panics if the internal handle lock was poisoned.
    pub fn start(
        &self,
        spec: CommandSpec,
        token: &CancellationToken,
    ) -> Result<ProcessHandle, SupervisorError> {
        let mut slot = self.handle.lock().expect("handle lock poisoned");
        if slot.as_ref().is_some_and(ProcessHandle::is_running) {
            return Err(SupervisorError::AlreadyRunning(self.name.clone()));
        }

        info!(
            name = %self.name,
            command = %spec.display(),
            "Starting process"
        );

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.env.iter().cloned())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|source| SupervisorError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or(SupervisorError::Pipe("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(SupervisorError::Pipe("stderr"))?;

        let pid = child.id();
        let running = Arc::new(AtomicBool::new(true));
        let (done_tx, done_rx) = watch::channel(false);
        let archive = Arc::new(Mutex::new(Vec::new()));
        let (live_tx, _) = broadcast::channel(LIVE_CHANNEL_CAPACITY);
        let live = Arc::new(Mutex::new(Some(live_tx)));
        let stop = token.child_token();

        let (line_tx, line_rx) = mpsc::unbounded_channel();
        tokio::spawn(forward_lines(stdout, LogStream::Stdout, line_tx.clone()));
        tokio::spawn(forward_lines(stderr, LogStream::Stderr, line_tx));
        tokio::spawn(aggregate_lines(
            self.name.clone(),
            line_rx,
            Arc::clone(&archive),
            Arc::clone(&live),
        ));
        tokio::spawn(supervise_exit(
            self.name.clone(),
            child,
            Arc::clone(&running),
            done_tx,
            stop.clone(),
        ));

        let handle = ProcessHandle {
            name: self.name.clone(),
            args: spec.args,
            pid,
            running,
            done: done_rx,
            archive,
            live,
            stop,
        };

        *slot = Some(handle.clone());
        Ok(handle)
    }

    /// Ask the current process, if any, to terminate. Stopping when nothing
    /// was started is benign.
    ///
    /// # Panics
    /// Panics if the internal handle lock was poisoned.
    pub fn stop(&self) {
        let slot = self.handle.lock().expect("handle lock poisoned");
        match slot.as_ref() {
            Some(handle) => {
                info!(name = %self.name, pid = ?handle.pid(), "Stopping process");
                handle.stop();
            }
            None => debug!(name = %self.name, "Stop requested but nothing is running"),
        }
    }

    /// Handle to the most recently started process, if any.
    ///
    /// # Panics
    /// Panics if the internal handle lock was poisoned.
    #[must_use]
    pub fn handle(&self) -> Option<ProcessHandle> {
        self.handle.lock().expect("handle lock poisoned").clone()
    }

    /// Whether a supervised process is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle().is_some_and(|h| h.is_running())
    }

    /// Archived log lines of the current process, empty when none started.
    #[must_use]
    pub fn archive(&self) -> Vec<String> {
        self.handle().map(|h| h.archive()).unwrap_or_default()
    }

    /// Live log subscription for the current process, if it is still
    /// running.
    #[must_use]
    pub fn subscribe(&self) -> Option<broadcast::Receiver<String>> {
        self.handle().and_then(|h| h.subscribe())
    }
}

/// Read lines from one stdio pipe and forward them to the aggregator.
/// Dropping the sender at EOF is what lets the aggregator observe that the
/// stream is finished.
async fn forward_lines(
    reader: impl AsyncRead + Unpin,
    stream: LogStream,
    tx: mpsc::UnboundedSender<(LogStream, String)>,
) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.send((stream, line)).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(error) => {
                warn!(%error, ?stream, "Failed to read from child pipe");
                break;
            }
        }
    }
}

/// Sole writer of the archive and publisher of the live channel. Lines keep
/// their per-stream order; interleaving across streams is whatever arrival
/// order the channel saw.
async fn aggregate_lines(
    name: String,
    mut rx: mpsc::UnboundedReceiver<(LogStream, String)>,
    archive: Arc<Mutex<Vec<String>>>,
    live: Arc<Mutex<Option<broadcast::Sender<String>>>>,
) {
    while let Some((stream, line)) = rx.recv().await {
        archive
            .lock()
            .expect("log archive lock poisoned")
            .push(line.clone());

        if let Some(tx) = live.lock().expect("live channel lock poisoned").as_ref() {
            // Best effort: no subscriber is not an error, and a full
            // subscriber lags rather than blocking us.
            let _ = tx.send(line.clone());
        }

        match stream {
            LogStream::Stdout => info!(process = %name, "{line}"),
            LogStream::Stderr => warn!(process = %name, "{line}"),
        }
    }

    // Both pipes are at EOF: the process is gone. Dropping the sender closes
    // every subscriber; taking it out of the slot makes the close observable
    // and one-shot.
    live.lock().expect("live channel lock poisoned").take();
}

/// Owns the child: waits for exit, kills it on a stop or cancellation
/// signal, then closes the completion watch. Sole owner of the sender, so
/// the signal closes exactly once.
async fn supervise_exit(
    name: String,
    mut child: Child,
    running: Arc<AtomicBool>,
    done_tx: watch::Sender<bool>,
    stop: CancellationToken,
) {
    let exited = tokio::select! {
        status = child.wait() => Some(status),
        () = stop.cancelled() => None,
    };

    let status = match exited {
        Some(status) => status,
        None => {
            if let Err(error) = child.start_kill() {
                warn!(process = %name, %error, "Failed to signal child");
            }
            child.wait().await
        }
    };

    match status {
        Ok(status) => info!(process = %name, code = ?status.code(), "Process exited"),
        Err(error) => warn!(process = %name, %error, "Failed to reap child"),
    }

    running.store(false, Ordering::SeqCst);
    let _ = done_tx.send(true);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    fn shell(script: &str) -> CommandSpec {
        CommandSpec::new("/bin/sh").args(["-c", script])
    }

    #[tokio::test]
    async fn captures_stdout_and_stderr_in_archive() {
        let supervisor = Supervisor::new("test");
        let handle = supervisor
            .start(shell("echo out; echo err 1>&2"), &CancellationToken::new())
            .unwrap();

        timeout(Duration::from_secs(5), handle.wait()).await.unwrap();
        // Readers may still be flushing right after exit; the archive is
        // complete once the live channel has closed.
        while handle.subscribe().is_some() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let archive = handle.archive();
        assert!(archive.contains(&"out".to_string()));
        assert!(archive.contains(&"err".to_string()));
        // Restartable: a second read sees the same lines.
        assert_eq!(handle.archive(), archive);
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn live_channel_closes_exactly_once_on_exit() {
        let supervisor = Supervisor::new("test");
        // The leading sleep keeps the process alive long enough for the
        // subscription below to land before any line is published.
        let handle = supervisor
            .start(shell("sleep 1; echo one; echo two"), &CancellationToken::new())
            .unwrap();

        let mut rx = handle.subscribe().expect("process just started");
        let mut seen = Vec::new();
        loop {
            match rx.recv().await {
                Ok(line) => seen.push(line),
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }

        assert_eq!(seen, vec!["one".to_string(), "two".to_string()]);
        // After close, new subscriptions are refused rather than re-closed.
        assert!(handle.subscribe().is_none());
    }

    #[tokio::test]
    async fn stop_terminates_a_long_running_child() {
        let supervisor = Supervisor::new("test");
        let handle = supervisor
            .start(shell("sleep 30"), &CancellationToken::new())
            .unwrap();
        assert!(handle.is_running());

        supervisor.stop();
        timeout(Duration::from_secs(5), handle.wait()).await.unwrap();
        assert!(!handle.is_running());

        // A second stop must be benign, not a double-close panic.
        supervisor.stop();
        handle.wait().await;
    }

    #[tokio::test]
    async fn stop_without_start_is_benign() {
        let supervisor = Supervisor::new("test");
        supervisor.stop();
        assert!(!supervisor.is_running());
        assert!(supervisor.archive().is_empty());
    }

    #[tokio::test]
    async fn external_cancellation_kills_the_child() {
        let supervisor = Supervisor::new("test");
        let token = CancellationToken::new();
        let handle = supervisor.start(shell("sleep 30"), &token).unwrap();

        token.cancel();
        timeout(Duration::from_secs(5), handle.wait()).await.unwrap();
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn rejects_a_second_start_while_running() {
        let supervisor = Supervisor::new("test");
        let handle = supervisor
            .start(shell("sleep 30"), &CancellationToken::new())
            .unwrap();

        let second = supervisor.start(shell("echo nope"), &CancellationToken::new());
        assert!(matches!(second, Err(SupervisorError::AlreadyRunning(_))));

        handle.stop();
        timeout(Duration::from_secs(5), handle.wait()).await.unwrap();
    }

    #[tokio::test]
    async fn spawn_failure_surfaces_the_program() {
        let supervisor = Supervisor::new("test");
        let result = supervisor.start(
            CommandSpec::new("/nonexistent/program"),
            &CancellationToken::new(),
        );
        assert!(matches!(result, Err(SupervisorError::Spawn { .. })));
        assert!(!supervisor.is_running());
    }
}
