//! Begin/end marker strings and the three-line packet format written to
//! the interpreter's stdin.

use crate::adapter::InterpreterAdapter;
use crate::CommandId;

/// The literal begin marker for a command, e.g. `<<<SS_BEG_42>>>`.
pub fn begin_marker(id: CommandId) -> String {
    format!("<<<SS_BEG_{id}>>>")
}

/// The literal end marker for a command, e.g. `<<<SS_END_42>>>`.
pub fn end_marker(id: CommandId) -> String {
    format!("<<<SS_END_{id}>>>")
}

/// Builds the three-line packet for a command: a line that prints the
/// begin marker, the command body (newline-terminated), and a line that
/// prints the end marker.
pub struct PacketBuilder<'a> {
    adapter: &'a dyn InterpreterAdapter,
}

impl<'a> PacketBuilder<'a> {
    pub fn new(adapter: &'a dyn InterpreterAdapter) -> Self {
        Self { adapter }
    }

    /// Build the full packet bytes for command `id` with body `body`.
    pub fn build(&self, id: CommandId, body: &str) -> Vec<u8> {
        let mut packet = String::new();
        packet.push_str(&self.adapter.print_literal(&begin_marker(id)));
        packet.push_str(body);
        if !self.adapter.ends_terminated(body) {
            packet.push_str(self.adapter.terminator());
        }
        packet.push_str(&self.adapter.print_literal(&end_marker(id)));
        packet.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::EchoAdapter;

    #[test]
    fn markers_are_unique_per_id() {
        assert_eq!(begin_marker(1), "<<<SS_BEG_1>>>");
        assert_eq!(end_marker(1), "<<<SS_END_1>>>");
        assert_ne!(begin_marker(1), begin_marker(2));
    }

    #[test]
    fn packet_has_three_lines() {
        let adapter = EchoAdapter;
        let builder = PacketBuilder::new(&adapter);
        let packet = builder.build(7, "do_thing\n");
        let text = String::from_utf8(packet).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("<<<SS_BEG_7>>>"));
        assert_eq!(lines[1], "do_thing");
        assert!(lines[2].contains("<<<SS_END_7>>>"));
    }

    #[test]
    fn packet_adds_missing_newline() {
        let adapter = EchoAdapter;
        let builder = PacketBuilder::new(&adapter);
        let packet = builder.build(1, "do_thing");
        let text = String::from_utf8(packet).unwrap();
        assert_eq!(text.lines().count(), 3);
    }
}
