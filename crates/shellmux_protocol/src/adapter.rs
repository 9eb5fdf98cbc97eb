//! The one piece of interpreter-specific knowledge the multiplexer needs:
//! how to make the interpreter print a literal string to stdout, and how
//! it terminates a command.
//!
//! Everything else — file discovery, path quoting, the actual command
//! syntax a caller submits — is the caller's problem, not the
//! multiplexer's. An adapter only has to answer two questions.

/// Adapts the marker protocol to a specific foreign interpreter.
///
/// Implementations must be cheap to call repeatedly (one call per
/// in-flight command) and must not block.
pub trait InterpreterAdapter: Send + Sync {
    /// Return interpreter source that, when executed, prints `literal`
    /// verbatim to standard output followed by a newline. The returned
    /// string must itself end in a newline so it can be written directly
    /// to the child's stdin.
    fn print_literal(&self, literal: &str) -> String;

    /// Return `true` if `body` already ends in the interpreter's
    /// statement terminator (so the packet builder does not need to add
    /// one). Most line-oriented interpreters terminate statements with a
    /// trailing newline, so the default just checks for that.
    fn ends_terminated(&self, body: &str) -> bool {
        body.ends_with('\n')
    }

    /// The terminator to append when `ends_terminated` returns `false`.
    fn terminator(&self) -> &str {
        "\n"
    }
}

/// A line-oriented adapter for interpreters whose "print a literal"
/// primitive is `echo <literal>` (POSIX shells, and close enough for any
/// REPL that treats a bare string followed by a newline as an echo).
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoAdapter;

impl InterpreterAdapter for EchoAdapter {
    fn print_literal(&self, literal: &str) -> String {
        format!("echo '{literal}'\n")
    }
}

/// A Python-flavored adapter: `print("literal")`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PythonAdapter;

impl InterpreterAdapter for PythonAdapter {
    fn print_literal(&self, literal: &str) -> String {
        format!("print({literal:?})\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_adapter_wraps_literal() {
        let adapter = EchoAdapter;
        assert_eq!(adapter.print_literal("<<<X>>>"), "echo '<<<X>>>'\n");
    }

    #[test]
    fn python_adapter_quotes_literal() {
        let adapter = PythonAdapter;
        assert_eq!(adapter.print_literal("<<<X>>>"), "print(\"<<<X>>>\")\n");
    }

    #[test]
    fn ends_terminated_default() {
        let adapter = EchoAdapter;
        assert!(adapter.ends_terminated("echo hi\n"));
        assert!(!adapter.ends_terminated("echo hi"));
    }
}
