//! The subprocess engine: owns the child interpreter process, wires the
//! writer queue, I/O pump and tracker together, runs the deadline
//! scanner, and exposes the public `submit`/`execute`/`execute_async`
//! façade plus lifecycle control.

use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use shellmux_protocol::{ErrorKind, InterpreterAdapter, PacketBuilder};

use crate::config::EngineConfig;
use crate::pump::Pump;
use crate::queue::WriterQueue;
use crate::record::{Callback, CommandHandle, CommandResult};
use crate::tracker::Tracker;

struct RunningState {
    child: Child,
    queue: Arc<WriterQueue>,
    tracker: Arc<Tracker>,
    pump: Pump,
    scanner_stop: Arc<AtomicBool>,
    scanner: std::thread::JoinHandle<()>,
}

/// The embedded-interpreter host. Construct via [`Engine::start`], which
/// returns an `Arc<Engine>` because the deadline scanner and any
/// in-flight auto-restart hold a weak reference back to it.
pub struct Engine {
    config: EngineConfig,
    adapter: Box<dyn InterpreterAdapter + Send + Sync>,
    state: Mutex<Option<RunningState>>,
    /// Set while an auto-restart is in flight so concurrent `submit`
    /// calls fail fast with `Restarting` instead of racing the respawn.
    restarting: AtomicBool,
}

impl Engine {
    /// Spawn the interpreter and bring the engine fully up: pumps
    /// running, startup commands executed, ready to accept `submit`.
    pub fn start(config: EngineConfig, adapter: Box<dyn InterpreterAdapter + Send + Sync>) -> anyhow::Result<Arc<Self>> {
        let engine = Arc::new(Self {
            config,
            adapter,
            state: Mutex::new(None),
            restarting: AtomicBool::new(false),
        });
        engine.spawn_running_state()?;
        engine.run_startup_commands();
        Ok(engine)
    }

    fn spawn_child(&self) -> anyhow::Result<Child> {
        let mut cmd = Command::new(&self.config.interpreter_path);
        cmd.args(&self.config.interpreter_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }
        for (k, v) in &self.config.env {
            cmd.env(k, v);
        }
        cmd.spawn()
            .map_err(|err| anyhow::anyhow!(ErrorKind::SystemError(err.to_string())))
    }

    fn spawn_running_state(self: &Arc<Self>) -> anyhow::Result<()> {
        let mut child = self.spawn_child()?;
        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        let queue = Arc::new(WriterQueue::new());
        let tracker = Arc::new(Tracker::new());
        let pump = Pump::spawn(stdin, stdout, stderr, queue.clone(), tracker.clone(), self.config.reader_buffer_size);

        let scanner_stop = Arc::new(AtomicBool::new(false));
        let scanner = self.spawn_scanner_thread(tracker.clone(), scanner_stop.clone());

        *self.state.lock().unwrap() = Some(RunningState {
            child,
            queue,
            tracker,
            pump,
            scanner_stop,
            scanner,
        });
        Ok(())
    }

    /// Deadline-scanner thread. Ticks `scanner_tick`, sweeping expired
    /// commands out of the tracker. When `auto_restart` is enabled and a
    /// sweep finds an expired command, it hands off to a detached thread
    /// that calls `Engine::restart` and exits — it must not call
    /// `restart` (and therefore `stop`) itself, since `stop` joins this
    /// very thread.
    fn spawn_scanner_thread(self: &Arc<Self>, tracker: Arc<Tracker>, stop: Arc<AtomicBool>) -> std::thread::JoinHandle<()> {
        let tick = self.config.scanner_tick;
        let auto_restart = self.config.auto_restart;
        let weak = Arc::downgrade(self);
        std::thread::Builder::new()
            .name("shellmux-scanner".into())
            .spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    std::thread::sleep(tick);
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    let expired = tracker.scan_deadlines();
                    if expired && auto_restart {
                        if let Some(engine) = weak.upgrade() {
                            tracing::warn!("command timed out; restarting interpreter");
                            std::thread::spawn(move || {
                                if let Err(err) = engine.restart() {
                                    tracing::error!(%err, "auto-restart failed");
                                }
                            });
                        }
                        break;
                    }
                }
            })
            .expect("failed to spawn scanner thread")
    }

    fn run_startup_commands(self: &Arc<Self>) {
        if let (Some(script), Some(snapshot)) = (&self.config.restore_script, &self.config.restore_snapshot_path) {
            let command = script.replace("{snapshot}", &snapshot.to_string_lossy());
            match self.execute(&command, self.config.default_timeout) {
                Ok(result) if result.success => {}
                Ok(result) => tracing::warn!(exit_code = result.exit_code, "session restore failed"),
                Err(err) => tracing::warn!(%err, "session restore errored"),
            }
        }
        for cmd in self.config.startup_commands.clone() {
            match self.execute(&cmd, self.config.default_timeout) {
                Ok(result) if result.success => {}
                Ok(result) => tracing::warn!(exit_code = result.exit_code, "startup command failed"),
                Err(err) => tracing::warn!(%err, "startup command errored"),
            }
        }
        if let Some(warmup) = self.config.warmup_command.clone() {
            if let Err(err) = self.execute(&warmup, self.config.default_timeout) {
                tracing::warn!(%err, "warmup command errored");
            }
        }
    }

    /// Whether the child process is still alive. Best-effort: a
    /// concurrent `wait` elsewhere could race this, as with any
    /// `try_wait`-based liveness check.
    pub fn is_alive(&self) -> bool {
        let mut guard = self.state.lock().unwrap();
        match guard.as_mut() {
            None => false,
            Some(running) => matches!(running.child.try_wait(), Ok(None)),
        }
    }

    /// Submit a command body for asynchronous execution. Returns a
    /// handle resolved by the tracker once the interpreter's output is
    /// fully framed, or immediately with a terminal error if the engine
    /// cannot currently accept work.
    pub fn submit(
        &self,
        body: &str,
        timeout: Option<Duration>,
        callback: Option<Callback>,
    ) -> Result<CommandHandle, ErrorKind> {
        if self.restarting.load(Ordering::SeqCst) {
            return Err(ErrorKind::Restarting);
        }
        let guard = self.state.lock().unwrap();
        let running = guard.as_ref().ok_or(ErrorKind::NotRunning)?;

        let id = running.tracker.alloc_id();
        let effective_timeout = timeout.or(self.config.default_timeout);
        let handle = running.tracker.register(id, effective_timeout, callback);

        let packet = PacketBuilder::new(self.adapter.as_ref()).build(id, body);
        running.queue.push(packet);
        Ok(handle)
    }

    /// Submit and block for the result.
    pub fn execute(&self, body: &str, timeout: Option<Duration>) -> Result<CommandResult, ErrorKind> {
        let handle = self.submit(body, timeout, None)?;
        Ok(handle.wait())
    }

    /// Submit with a completion callback, fire-and-forget from the
    /// caller's perspective.
    pub fn execute_async(&self, body: &str, timeout: Option<Duration>, callback: Callback) -> Result<(), ErrorKind> {
        self.submit(body, timeout, Some(callback))?;
        Ok(())
    }

    /// Stop the interpreter. Attempts cooperative shutdown first: queues
    /// a literal `exit\n` packet, then stops the writer queue so it
    /// drains that packet and drops its `ChildStdin`, sending the child
    /// EOF. Waits up to `stop_grace_period` for the child to exit on its
    /// own; only then, and only if `force`, kills it. Idempotent:
    /// calling `stop` on an already-stopped engine is a no-op.
    pub fn stop(&self, force: bool) {
        let running = self.state.lock().unwrap().take();
        let Some(mut running) = running else { return };

        running.queue.push(b"exit\n".to_vec());
        running.scanner_stop.store(true, Ordering::Relaxed);
        running.queue.stop();
        running.tracker.abort_all();

        let deadline = std::time::Instant::now() + self.config.stop_grace_period;
        loop {
            match running.child.try_wait() {
                Ok(Some(_)) => break,
                Ok(None) if std::time::Instant::now() >= deadline => break,
                Ok(None) => std::thread::sleep(Duration::from_millis(10)),
                Err(_) => break,
            }
        }
        if force && matches!(running.child.try_wait(), Ok(None)) {
            let _ = running.child.kill();
        }
        let _ = running.child.wait();

        // Dropping stdin (already moved into the pump) and killing the
        // child unblocks the reader threads with EOF; the writer thread
        // already observed `stopped`.
        running.pump.join();
        let _ = running.scanner.join();
    }

    /// Force-restart the interpreter: abort in-flight commands, kill the
    /// old process, spawn a fresh one and replay `startup_commands`.
    /// Guarded by the lifecycle gate so concurrent `submit` calls fail
    /// with `Restarting` rather than being silently dropped.
    pub fn restart(self: &Arc<Self>) -> anyhow::Result<()> {
        self.restarting.store(true, Ordering::SeqCst);
        let result = (|| {
            self.stop(true);
            self.spawn_running_state()?;
            self.run_startup_commands();
            Ok(())
        })();
        self.restarting.store(false, Ordering::SeqCst);
        result
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop(true);
    }
}
