//! Debug command scripts.
//!
//! UTF-8 text, one command per line: `step`, `step N` (N a positive
//! decimal), `continue`. Blank lines and `#` comments are ignored; unknown
//! commands are kept so the consumer can report them with a `[DEBUG]`
//! diagnostic and skip them.

/// One scripted debugger action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugCmd {
    /// Execute N instructions, then halt again
    Step(u64),
    /// Resume, ignoring breakpoints
    Continue,
    /// Anything unrecognized; reported and skipped
    Unknown(String),
}

/// Parse a command script
pub fn parse_script(text: &str) -> Vec<DebugCmd> {
    let mut cmds = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut words = line.split_whitespace();
        match (words.next(), words.next(), words.next()) {
            (Some("step"), None, None) => cmds.push(DebugCmd::Step(1)),
            (Some("step"), Some(n), None) => match n.parse::<u64>() {
                Ok(n) if n > 0 => cmds.push(DebugCmd::Step(n)),
                _ => cmds.push(DebugCmd::Unknown(line.to_string())),
            },
            (Some("continue"), None, None) => cmds.push(DebugCmd::Continue),
            _ => cmds.push(DebugCmd::Unknown(line.to_string())),
        }
    }
    cmds
}
