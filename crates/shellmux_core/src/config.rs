//! Engine configuration.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration accepted by [`crate::Engine::start`]. Plain data with a
/// `Default` impl.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path to the interpreter executable.
    pub interpreter_path: PathBuf,
    /// Arguments passed to the interpreter on spawn.
    pub interpreter_args: Vec<String>,
    /// Working directory for the child process; `None` inherits the
    /// parent's.
    pub working_dir: Option<PathBuf>,
    /// Environment variables merged into the child's environment.
    pub env: HashMap<String, String>,
    /// Commands executed immediately after spawn, in order, each
    /// swallowing its own failure (logged, non-fatal).
    pub startup_commands: Vec<String>,
    /// Optional warm-up no-op command run once after `startup_commands`.
    pub warmup_command: Option<String>,
    /// Optional session-restore script executed against `restore_snapshot_path`.
    pub restore_script: Option<String>,
    pub restore_snapshot_path: Option<PathBuf>,
    /// Default per-command timeout when `submit`/`execute` don't specify
    /// one. `None` means no timeout (infinite deadline).
    pub default_timeout: Option<Duration>,
    /// Size of each reader thread's fixed stack buffer.
    pub reader_buffer_size: usize,
    /// Deadline-scanner poll tick.
    pub scanner_tick: Duration,
    /// Grace period `stop` waits for cooperative child exit before a
    /// forced kill.
    pub stop_grace_period: Duration,
    /// Restart the subprocess automatically after a command times out.
    pub auto_restart: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interpreter_path: PathBuf::new(),
            interpreter_args: Vec::new(),
            working_dir: None,
            env: HashMap::new(),
            startup_commands: Vec::new(),
            warmup_command: None,
            restore_script: None,
            restore_snapshot_path: None,
            default_timeout: Some(Duration::from_secs(30)),
            reader_buffer_size: 32 * 1024,
            scanner_tick: Duration::from_millis(10),
            stop_grace_period: Duration::from_secs(5),
            auto_restart: false,
        }
    }
}
