//! Command formatting
//!
//! Commands are ASCII, upper case, and end with a carriage return. Several
//! commands may share one write, separated by spaces; [`CommandBatch`] keeps
//! track of how many of them produce a reply.

/// Terminate and upper-case a command for the wire.
///
/// A command already ending in CR or LF gets no extra terminator.
pub fn format_command(command: &str) -> String {
    let mut wire = command.to_ascii_uppercase();
    if !(wire.ends_with('\r') || wire.ends_with('\n')) {
        wire.push('\r');
    }
    wire
}

/// Several commands sent in one write
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandBatch {
    parts: Vec<String>,
    expected_replies: usize,
}

impl CommandBatch {
    /// An empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a command the device answers with one reply
    pub fn query(mut self, command: impl Into<String>) -> Self {
        self.parts.push(command.into());
        self.expected_replies += 1;
        self
    }

    /// Add a command the device executes silently
    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.parts.push(command.into());
        self
    }

    /// Number of replies the batch will produce
    pub fn expected_replies(&self) -> usize {
        self.expected_replies
    }

    /// True if no command was added
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Space-joined command text, not yet terminated
    pub fn text(&self) -> String {
        self.parts.join(" ")
    }
}
