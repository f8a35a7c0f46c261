//! Shell integration escape sequences (OSC 633)
//!
//! Task terminals mark prompt, command line and exit code so the terminal
//! can decorate the task's command like an interactively typed one.

use std::path::Path;

/// OSC 633 parameter codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OscCode {
    PromptStart,
    CommandStart,
    CommandExecuted,
    CommandFinished,
    CommandLine,
    Property,
}

impl OscCode {
    fn as_str(&self) -> &'static str {
        match self {
            OscCode::PromptStart => "A",
            OscCode::CommandStart => "B",
            OscCode::CommandExecuted => "C",
            OscCode::CommandFinished => "D",
            OscCode::CommandLine => "E",
            OscCode::Property => "P",
        }
    }
}

pub fn sequence(code: OscCode, data: Option<&str>) -> String {
    match data {
        Some(data) => format!("\x1b]633;{};{}\x07", code.as_str(), data),
        None => format!("\x1b]633;{}\x07", code.as_str()),
    }
}

/// Escape `\`, `;` and control characters so the payload survives OSC parsing
pub fn serialize_message(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    for ch in message.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            c if c == ';' || (c as u32) < 0x20 => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

/// Prompt start + task property + optional cwd + command start
pub fn start_sequence(cwd: Option<&Path>) -> String {
    let mut out = sequence(OscCode::Property, Some("HasRichCommandDetection=True"));
    out.push_str(&sequence(OscCode::PromptStart, None));
    out.push_str(&sequence(OscCode::Property, Some("Task=True")));
    if let Some(cwd) = cwd {
        out.push_str(&sequence(OscCode::Property, Some(&format!("Cwd={}", cwd.display()))));
    }
    out.push_str(&sequence(OscCode::CommandStart, None));
    out
}

/// Command line (with nonce) + command executed
pub fn output_sequence(command_line: Option<(&str, &str)>) -> String {
    let mut out = String::new();
    if let Some((line, nonce)) = command_line {
        out.push_str(&sequence(
            OscCode::CommandLine,
            Some(&format!("{};{}", serialize_message(line), nonce)),
        ));
    }
    out.push_str(&sequence(OscCode::CommandExecuted, None));
    out
}

pub fn wait_on_exit_text(message: &str, exit_code: i32) -> String {
    format!(
        "{}{}",
        sequence(OscCode::CommandFinished, Some(&exit_code.to_string())),
        message
    )
}

/// Inverse banner used for "Executing task: ..." lines
pub fn format_message_for_terminal(message: &str, exclude_leading_newline: bool) -> String {
    let leading = if exclude_leading_newline { "" } else { "\r\n" };
    format!("{}\x1b[0m\x1b[7m * \x1b[0m {} \r\n", leading, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_message() {
        assert_eq!(serialize_message("echo a;b"), "echo a\\x3bb");
        assert_eq!(serialize_message("c:\\dir"), "c:\\\\dir");
        assert_eq!(serialize_message("a\nb"), "a\\x0ab");
    }

    #[test]
    fn test_output_sequence_with_nonce() {
        let seq = output_sequence(Some(("make all", "n0nce")));
        assert_eq!(seq, "\x1b]633;E;make all;n0nce\x07\x1b]633;C\x07");
        assert_eq!(output_sequence(None), "\x1b]633;C\x07");
    }

    #[test]
    fn test_start_sequence_includes_cwd() {
        let seq = start_sequence(Some(Path::new("/work")));
        assert!(seq.contains("Cwd=/work"));
        assert!(seq.ends_with("\x1b]633;B\x07"));
        assert!(!start_sequence(None).contains("Cwd="));
    }
}
