//! Process manager for concurrently running mlx-openai-server instances.
//!
//! Every instance runs on its own pseudo-terminal. Two OS threads serve it
//! for as long as it lives: an output pump that copies PTY output into the
//! instance's [`LogBuffer`] and an exit waiter that reports when the process
//! goes away. Both feed one bounded update channel, so a consumer that stops
//! draining it eventually stalls the pumps instead of losing events.

use std::collections::HashMap;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant, SystemTime};

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::{ModelType, ServerConfig};
use crate::error::ServerError;
use crate::output::LogBuffer;
use crate::settings::ManagerConfig;

const READ_CHUNK_SIZE: usize = 4 * 1024;
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const PTY_ROWS: u16 = 24;
const PTY_COLS: u16 = 160;

/// What happened to a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateKind {
    Started,
    Stopped,
    NewOutput,
    Error,
}

impl UpdateKind {
    pub fn as_str(self) -> &'static str {
        match self {
            UpdateKind::Started => "started",
            UpdateKind::Stopped => "stopped",
            UpdateKind::NewOutput => "output",
            UpdateKind::Error => "error",
        }
    }
}

/// One lifecycle or output event for the server on `port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerUpdate {
    pub port: u16,
    pub kind: UpdateKind,
    pub data: Option<String>,
}

impl ServerUpdate {
    fn new(port: u16, kind: UpdateKind, data: Option<String>) -> Self {
        Self { port, kind, data }
    }
}

/// Receiving half of the shared update channel.
pub type UpdateReceiver = mpsc::Receiver<ServerUpdate>;

/// OS handles for a spawned process. Dropping `master` closes the PTY.
struct ProcessHandles {
    killer: Box<dyn ChildKiller + Send + Sync>,
    master: Option<Box<dyn MasterPty + Send>>,
}

/// A server process registered with a [`ServerManager`].
pub struct ServerInstance {
    model: String,
    model_type: ModelType,
    port: u16,
    host: String,
    binary: PathBuf,
    args: Vec<String>,
    pid: Option<u32>,
    output: LogBuffer,
    started_at: SystemTime,
    started: Instant,
    /// Reported state. Cleared by the exit waiter or by `stop`.
    running: AtomicBool,
    /// Set only once the exit waiter has reaped the process.
    exited: AtomicBool,
    process: Mutex<ProcessHandles>,
}

impl std::fmt::Debug for ServerInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerInstance")
            .field("model", &self.model)
            .field("model_type", &self.model_type)
            .field("port", &self.port)
            .field("host", &self.host)
            .field("pid", &self.pid)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl ServerInstance {
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn model_type(&self) -> ModelType {
        self.model_type
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Captured output of this instance.
    pub fn output(&self) -> &LogBuffer {
        &self.output
    }

    /// Wall-clock time the process was spawned.
    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn has_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    /// The full launch command as a single line.
    pub fn command_string(&self) -> String {
        let mut command = self.binary.display().to_string();
        for arg in &self.args {
            command.push(' ');
            command.push_str(arg);
        }
        command
    }

    fn handles(&self) -> MutexGuard<'_, ProcessHandles> {
        self.process.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask the process to exit and release the PTY.
    ///
    /// Escalates to a forceful kill only when SIGTERM cannot be delivered.
    /// The PTY master is closed on every path. The output pump holds a
    /// duplicate of the master, so closing ours does not hang up the
    /// session; the hangup is sent to the process group explicitly.
    fn terminate(&self) {
        let mut handles = self.handles();
        handles.master.take();
        if !self.has_exited() {
            if let Err(e) = self.signal_terminate() {
                warn!(
                    "SIGTERM to server on port {} failed ({}), killing",
                    self.port, e
                );
                self.force_kill(&mut handles);
            }
            self.hang_up();
        }
        self.running.store(false, Ordering::SeqCst);
    }

    #[cfg(unix)]
    fn signal(&self, signal: libc::c_int, group: bool) -> std::io::Result<()> {
        let pid = self
            .pid
            .ok_or_else(|| std::io::Error::new(ErrorKind::NotFound, "process id unknown"))?;
        let target = if group {
            -(pid as libc::pid_t)
        } else {
            pid as libc::pid_t
        };
        // SAFETY: kill(2) has no memory-safety preconditions.
        if unsafe { libc::kill(target, signal) } == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }

    #[cfg(unix)]
    fn signal_terminate(&self) -> std::io::Result<()> {
        self.signal(libc::SIGTERM, false)
    }

    #[cfg(not(unix))]
    fn signal_terminate(&self) -> std::io::Result<()> {
        Err(std::io::Error::new(
            ErrorKind::Unsupported,
            "graceful termination is not supported on this platform",
        ))
    }

    /// The child is a session leader on its PTY, so its pid is also the
    /// process group id.
    #[cfg(unix)]
    fn hang_up(&self) {
        if let Err(e) = self.signal(libc::SIGHUP, true) {
            debug!("SIGHUP to server on port {} failed: {}", self.port, e);
        }
    }

    #[cfg(not(unix))]
    fn hang_up(&self) {}

    fn force_kill(&self, handles: &mut ProcessHandles) {
        #[cfg(unix)]
        if self.signal(libc::SIGKILL, true).is_ok() || self.signal(libc::SIGKILL, false).is_ok() {
            return;
        }
        if let Err(e) = handles.killer.kill() {
            warn!("Failed to kill server on port {}: {}", self.port, e);
        }
    }

    /// Wait up to `grace` for the process to exit, then kill it.
    async fn wait_or_kill(&self, grace: Duration) {
        let deadline = Instant::now() + grace;
        while !self.has_exited() && Instant::now() < deadline {
            sleep(EXIT_POLL_INTERVAL).await;
        }
        if !self.has_exited() {
            warn!(
                "Server on port {} still running after {:?}, killing",
                self.port, grace
            );
            let mut handles = self.handles();
            self.force_kill(&mut handles);
        }
    }
}

/// Registry of running servers keyed by port.
#[derive(Clone)]
pub struct ServerManager {
    instances: Arc<RwLock<HashMap<u16, Arc<ServerInstance>>>>,
    updates: mpsc::Sender<ServerUpdate>,
    config: Arc<ManagerConfig>,
}

impl ServerManager {
    /// Create a manager and the receiving end of its update channel.
    pub fn new(config: ManagerConfig) -> (Self, UpdateReceiver) {
        let (updates, receiver) = mpsc::channel(config.update_capacity.max(1));
        let manager = Self {
            instances: Arc::new(RwLock::new(HashMap::new())),
            updates,
            config: Arc::new(config),
        };
        (manager, receiver)
    }

    /// Create a manager with default configuration.
    pub fn with_defaults() -> (Self, UpdateReceiver) {
        Self::new(ManagerConfig::default())
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    // Registry mutations are single inserts/removes, so a poisoned lock
    // still guards a consistent map.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<u16, Arc<ServerInstance>>> {
        self.instances.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<u16, Arc<ServerInstance>>> {
        self.instances.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Launch a server for `config`.
    ///
    /// Fails if another registered instance holds the port or the binary
    /// cannot be spawned; the registry is untouched in both cases. On success
    /// a `Started` update is queued before any output of the new instance.
    pub async fn start(&self, config: &ServerConfig) -> Result<Arc<ServerInstance>, ServerError> {
        let port = config.port;
        let (instance, spawned) = {
            let mut instances = self.write();
            if instances.contains_key(&port) {
                return Err(ServerError::PortInUse(port));
            }

            let args = config.build_args();
            let spawned = spawn_on_pty(&self.config.binary, &args)?;
            let instance = Arc::new(ServerInstance {
                model: config.model.clone(),
                model_type: config.model_type,
                port,
                host: config.host.clone(),
                binary: self.config.binary.clone(),
                args,
                pid: spawned.child.process_id(),
                output: LogBuffer::new(self.config.log_lines),
                started_at: SystemTime::now(),
                started: Instant::now(),
                running: AtomicBool::new(true),
                exited: AtomicBool::new(false),
                process: Mutex::new(ProcessHandles {
                    killer: spawned.child.clone_killer(),
                    master: Some(spawned.master),
                }),
            });
            instances.insert(port, Arc::clone(&instance));
            (instance, (spawned.reader, spawned.child))
        };

        info!(
            "Started {} on port {} (PID: {:?})",
            instance.model, port, instance.pid
        );

        let _ = self
            .updates
            .send(ServerUpdate::new(port, UpdateKind::Started, None))
            .await;

        let (reader, child) = spawned;
        spawn_output_pump(Arc::clone(&instance), reader, self.updates.clone());
        spawn_exit_waiter(Arc::clone(&instance), child, self.updates.clone());

        Ok(instance)
    }

    /// Stop the server on `port` and remove it from the registry.
    ///
    /// The exit waiter reports `Stopped` once the process is gone.
    pub async fn stop(&self, port: u16) -> Result<(), ServerError> {
        let instance = {
            let mut instances = self.write();
            let instance = instances
                .get(&port)
                .cloned()
                .ok_or(ServerError::NoServer(port))?;
            instance.terminate();
            instances.remove(&port);
            instance
        };
        info!("Stopping server on port {}", port);

        if let Some(grace) = self.config.stop_grace {
            instance.wait_or_kill(grace).await;
        }
        Ok(())
    }

    /// Stop every registered server. Per-port failures are logged and skipped.
    pub async fn stop_all(&self) -> Result<(), ServerError> {
        let ports: Vec<u16> = self.read().keys().copied().collect();
        for port in ports {
            if let Err(e) = self.stop(port).await {
                warn!("Failed to stop server on port {}: {}", port, e);
            }
        }
        Ok(())
    }

    pub fn get(&self, port: u16) -> Option<Arc<ServerInstance>> {
        self.read().get(&port).cloned()
    }

    /// Registered instances sorted by port.
    pub fn list(&self) -> Vec<Arc<ServerInstance>> {
        let mut list: Vec<_> = self.read().values().cloned().collect();
        list.sort_by_key(|instance| instance.port);
        list
    }

    pub fn count(&self) -> usize {
        self.read().len()
    }

    /// Whether a registered instance holds `port`. Does not probe the OS.
    pub fn is_port_in_use(&self, port: u16) -> bool {
        self.read().contains_key(&port)
    }

    /// Smallest port `>= start` that no registered instance holds.
    pub fn next_available_port(&self, start: u16) -> Option<u16> {
        let instances = self.read();
        (start..=u16::MAX).find(|port| !instances.contains_key(port))
    }

    /// Snapshot of an instance's output, empty if there is no such instance.
    pub fn get_logs(&self, port: u16) -> String {
        self.get(port)
            .map(|instance| instance.output.to_string())
            .unwrap_or_default()
    }

    /// Clear the captured output of the instance on `port`.
    pub fn clear_logs(&self, port: u16) -> Result<(), ServerError> {
        let instance = self.get(port).ok_or(ServerError::NoServer(port))?;
        instance.output.clear();
        Ok(())
    }
}

struct SpawnedServer {
    master: Box<dyn MasterPty + Send>,
    reader: Box<dyn Read + Send>,
    child: Box<dyn Child + Send + Sync>,
}

fn pty_error(error: impl std::fmt::Display) -> ServerError {
    ServerError::Pty(error.to_string())
}

fn spawn_on_pty(binary: &Path, args: &[String]) -> Result<SpawnedServer, ServerError> {
    let pair = native_pty_system()
        .openpty(PtySize {
            rows: PTY_ROWS,
            cols: PTY_COLS,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(pty_error)?;

    let mut command = CommandBuilder::new(binary);
    command.args(args);
    if let Ok(cwd) = std::env::current_dir() {
        command.cwd(cwd);
    }

    let mut child = pair
        .slave
        .spawn_command(command)
        .map_err(|e| ServerError::Spawn(format!("{}: {}", binary.display(), e)))?;
    drop(pair.slave);

    let reader = match pair.master.try_clone_reader() {
        Ok(reader) => reader,
        Err(e) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(pty_error(e));
        }
    };

    debug!(
        "Spawned {} with PID {:?}",
        binary.display(),
        child.process_id()
    );

    Ok(SpawnedServer {
        master: pair.master,
        reader,
        child,
    })
}

/// EIO from the master side means the slave side is gone.
fn is_pty_eof(error: &std::io::Error) -> bool {
    #[cfg(unix)]
    if error.raw_os_error() == Some(libc::EIO) {
        return true;
    }
    error.kind() == ErrorKind::UnexpectedEof
}

/// Text a terminal would leave visible for one line: carriage returns
/// rewind, so only the last non-empty segment survives.
fn visible_text(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    text.rsplit('\r')
        .find(|segment| !segment.is_empty())
        .unwrap_or_default()
        .to_string()
}

fn spawn_output_pump(
    instance: Arc<ServerInstance>,
    mut reader: Box<dyn Read + Send>,
    updates: mpsc::Sender<ServerUpdate>,
) {
    std::thread::spawn(move || {
        let port = instance.port;
        let emit = |raw: &[u8]| {
            let line = visible_text(raw);
            if line.is_empty() {
                return;
            }
            instance.output.write(line.clone());
            // Blocks while the channel is full; fails only once the
            // receiver is gone, in which case the buffer still fills.
            let _ = updates.blocking_send(ServerUpdate::new(port, UpdateKind::NewOutput, Some(line)));
        };

        let mut buf = [0u8; READ_CHUNK_SIZE];
        let mut pending: Vec<u8> = Vec::new();
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    pending.extend_from_slice(&buf[..n]);
                    while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = pending.drain(..=pos).collect();
                        emit(&line[..pos]);
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if is_pty_eof(&e) => break,
                Err(e) => {
                    if !pending.is_empty() {
                        emit(&std::mem::take(&mut pending));
                    }
                    let message = format!("Error reading output: {}", e);
                    warn!("Server on port {}: {}", port, message);
                    instance.output.write(message.clone());
                    let _ = updates.blocking_send(ServerUpdate::new(
                        port,
                        UpdateKind::Error,
                        Some(message),
                    ));
                    return;
                }
            }
        }
        if !pending.is_empty() {
            emit(&pending);
        }
        debug!("Output pump for port {} finished", port);
    });
}

fn spawn_exit_waiter(
    instance: Arc<ServerInstance>,
    mut child: Box<dyn Child + Send + Sync>,
    updates: mpsc::Sender<ServerUpdate>,
) {
    std::thread::spawn(move || {
        let port = instance.port;
        let detail = match child.wait() {
            Ok(status) => {
                info!(
                    "Server on port {} exited with code {}",
                    port,
                    status.exit_code()
                );
                format!("exit code {}", status.exit_code())
            }
            Err(e) => {
                warn!("Waiting for server on port {} failed: {}", port, e);
                format!("wait failed: {}", e)
            }
        };
        {
            let _handles = instance.handles();
            instance.exited.store(true, Ordering::SeqCst);
            instance.running.store(false, Ordering::SeqCst);
        }
        let _ = updates.blocking_send(ServerUpdate::new(port, UpdateKind::Stopped, Some(detail)));
    });
}
