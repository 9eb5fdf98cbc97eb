#![allow(clippy::result_large_err)]
#![allow(clippy::new_without_default)]

pub mod config;
pub mod engine;
pub mod pump;
pub mod queue;
pub mod record;
pub mod tracker;

pub use config::EngineConfig;
pub use engine::Engine;
pub use record::{Callback, CommandHandle, CommandResult, CommandState};
pub use shellmux_protocol::{CommandId, ErrorKind, InterpreterAdapter};

#[cfg(test)]
mod integration_tests {
    use super::*;
    use std::time::Duration;

    /// `/bin/sh` itself, fed commands over stdin — a POSIX shell is
    /// already the REPL-style foreign interpreter the multiplexer is
    /// designed to embed, so no wrapper script is needed. Good enough to
    /// exercise framing, ordering and timeouts without depending on any
    /// scripting runtime beyond what a POSIX system already provides.
    fn echo_config() -> EngineConfig {
        EngineConfig {
            interpreter_path: "/bin/sh".into(),
            interpreter_args: Vec::new(),
            default_timeout: Some(Duration::from_secs(2)),
            ..Default::default()
        }
    }

    struct ShellAdapter;
    impl InterpreterAdapter for ShellAdapter {
        fn print_literal(&self, literal: &str) -> String {
            format!("echo '{}'\n", literal.replace('\'', "'\\''"))
        }
    }

    #[test]
    fn execute_returns_expected_output() {
        let engine = Engine::start(echo_config(), Box::new(ShellAdapter)).expect("engine starts");
        let result = engine.execute("echo hello", None).expect("submit accepted");
        assert!(result.success);
        assert_eq!(String::from_utf8_lossy(&result.stdout).trim(), "hello");
        engine.stop(false);
    }

    #[test]
    fn order_is_preserved_across_concurrent_submits() {
        let engine = Engine::start(echo_config(), Box::new(ShellAdapter)).expect("engine starts");
        let handles: Vec<_> = (0..5)
            .map(|i| engine.submit(&format!("echo line-{i}"), None, None).expect("submit accepted"))
            .collect();
        for (i, handle) in handles.into_iter().enumerate() {
            let result = handle.wait();
            assert_eq!(String::from_utf8_lossy(&result.stdout).trim(), format!("line-{i}"));
        }
        engine.stop(false);
    }

    #[test]
    fn timeout_resolves_with_timed_out_error() {
        let config = EngineConfig {
            interpreter_path: "/bin/sh".into(),
            interpreter_args: vec!["-c".into(), "sleep 5".into()],
            default_timeout: Some(Duration::from_secs(2)),
            ..Default::default()
        };
        let engine = Engine::start(config, Box::new(ShellAdapter)).expect("engine starts");
        let result = engine.execute("irrelevant", Some(Duration::from_millis(50))).expect("submit accepted");
        assert!(!result.success);
        assert_eq!(result.error, Some(ErrorKind::TimedOut));
        engine.stop(true);
    }

    #[test]
    fn stop_is_idempotent() {
        let engine = Engine::start(echo_config(), Box::new(ShellAdapter)).expect("engine starts");
        engine.stop(false);
        engine.stop(false);
        assert!(!engine.is_alive());
    }

    #[test]
    fn submit_after_stop_fails_not_running() {
        let engine = Engine::start(echo_config(), Box::new(ShellAdapter)).expect("engine starts");
        engine.stop(false);
        let err = engine.submit("hello", None, None).unwrap_err();
        assert_eq!(err, ErrorKind::NotRunning);
    }
}
