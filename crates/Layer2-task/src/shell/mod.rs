//! Shell command lines
//!
//! [`ShellCommandLineBuilder`] turns a command plus arguments into the single
//! line handed to a shell, quoting each token by the rules of that shell.
//! [`shell_command_flags`] picks the flag that makes the shell run it.

mod quoting;

pub use quoting::ShellQuotingTable;

use crate::task::{CommandString, EscapeOptions, ShellQuoting, ShellQuotingOptions};
use std::collections::HashSet;
use termtask_foundation::Platform;

/// Lowercased file name of a shell executable, extension included.
///
/// Both separators are honored so Windows paths work on any host.
pub fn shell_basename(executable: &str) -> String {
    executable
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(executable)
        .to_lowercase()
}

fn strip_extension(basename: &str) -> &str {
    match basename.rfind('.') {
        Some(pos) if pos > 0 => &basename[..pos],
        _ => basename,
    }
}

// ============================================================================
// ShellCommandLineBuilder
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct ShellCommandLineBuilder {
    table: ShellQuotingTable,
}

impl ShellCommandLineBuilder {
    pub fn new(table: ShellQuotingTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &ShellQuotingTable {
        &self.table
    }

    /// Quoting in effect: the task's own override, else the table entry
    pub fn quoting_options(
        &self,
        shell_basename: &str,
        task_quoting: Option<&ShellQuotingOptions>,
        platform: Platform,
    ) -> ShellQuotingOptions {
        match task_quoting {
            Some(options) => options.clone(),
            None => self.table.get(strip_extension(shell_basename), platform),
        }
    }

    /// Build the line `shell_basename` will execute.
    ///
    /// `original_command` is the command before variable resolution; a plain
    /// command without args that resolution left untouched is passed through
    /// verbatim.
    pub fn build(
        &self,
        platform: Platform,
        shell_basename: &str,
        task_quoting: Option<&ShellQuotingOptions>,
        command: &CommandString,
        original_command: Option<&CommandString>,
        args: &[CommandString],
    ) -> String {
        let shell = strip_extension(shell_basename).to_lowercase();
        let options = self.quoting_options(&shell, task_quoting, platform);
        let quoter = Quoter { options: &options };

        if args.is_empty() {
            if let CommandString::Plain(command) = command {
                let passthrough = match original_command {
                    Some(original) => {
                        original.value() == command.as_str() || quoter.needs_quotes(original.value())
                    }
                    None => true,
                };
                if passthrough {
                    return command.clone();
                }
            }
        }

        let mut parts = Vec::with_capacity(args.len() + 1);
        let (value, command_quoted) = quoter.quote_if_necessary(command);
        parts.push(value);
        let mut arg_quoted = false;
        for arg in args {
            let (value, quoted) = quoter.quote_if_necessary(arg);
            parts.push(value);
            arg_quoted |= quoted;
        }

        let line = parts.join(" ");
        if platform.is_windows() {
            if shell == "cmd" && command_quoted && arg_quoted {
                return format!("\"{}\"", line);
            }
            if (shell == "powershell" || shell == "pwsh") && command_quoted {
                return format!("& {}", line);
            }
        }
        line
    }
}

struct Quoter<'a> {
    options: &'a ShellQuotingOptions,
}

impl Quoter<'_> {
    fn is_quote(&self, ch: char) -> bool {
        Some(ch) == self.options.strong || Some(ch) == self.options.weak
    }

    /// An unguarded space means the token must be quoted
    fn needs_quotes(&self, value: &str) -> bool {
        let chars: Vec<char> = value.chars().collect();
        if chars.len() >= 2 {
            let first = chars[0];
            if self.is_quote(first) && chars[chars.len() - 1] == first {
                return false;
            }
        }

        let escape = self.options.escape.as_ref().map(EscapeOptions::escape_char);
        let mut quote: Option<char> = None;
        let mut i = 0;
        while i < chars.len() {
            let ch = chars[i];
            if Some(ch) == quote {
                quote = None;
            } else if quote.is_some() {
                // inside a quoted run
            } else if Some(ch) == escape {
                i += 1;
            } else if self.is_quote(ch) {
                quote = Some(ch);
            } else if ch == ' ' {
                return true;
            }
            i += 1;
        }
        false
    }

    fn quote(&self, value: &str, kind: ShellQuoting) -> (String, bool) {
        match (kind, &self.options.strong, &self.options.weak, &self.options.escape) {
            (ShellQuoting::Strong, Some(strong), _, _) => (format!("{strong}{value}{strong}"), true),
            (ShellQuoting::Weak, _, Some(weak), _) => (format!("{weak}{value}{weak}"), true),
            (ShellQuoting::Escape, _, _, Some(EscapeOptions::Char(escape))) => {
                (value.replace(' ', &format!("{escape} ")), true)
            }
            (
                ShellQuoting::Escape,
                _,
                _,
                Some(EscapeOptions::Table {
                    escape_char,
                    chars_to_escape,
                }),
            ) => {
                let mut out = String::with_capacity(value.len());
                for ch in value.chars() {
                    if chars_to_escape.contains(ch) {
                        out.push(*escape_char);
                    }
                    out.push(ch);
                }
                (out, true)
            }
            _ => (value.to_string(), false),
        }
    }

    fn quote_if_necessary(&self, value: &CommandString) -> (String, bool) {
        match value {
            CommandString::Plain(value) if self.needs_quotes(value) => self.quote(value, ShellQuoting::Strong),
            CommandString::Plain(value) => (value.clone(), false),
            CommandString::Quoted { value, quoting } => self.quote(value, *quoting),
        }
    }
}

// ============================================================================
// Shell flags
// ============================================================================

/// Flags that make a shell execute the command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellCommandFlags {
    pub flags: Vec<String>,
    /// Pass all shell args as one joined string (Windows shells)
    pub join_args: bool,
}

/// `-Command` for powershell/pwsh, `-c` for bash/zsh/nu and every
/// non-Windows shell, `-e` for wsl, `/d /c` for everything else on Windows.
/// No flag is added when the user configured the shell themselves.
pub fn shell_command_flags(platform: Platform, basename: &str, shell_specified: bool) -> ShellCommandFlags {
    let (flags, join_args): (&[&str], bool) = if platform.is_windows() {
        match basename {
            "powershell.exe" | "pwsh.exe" => (&["-Command"], true),
            "bash.exe" | "zsh.exe" => (&["-c"], false),
            "wsl.exe" => (&["-e"], true),
            "nu.exe" => (&["-c"], true),
            _ => (&["/d", "/c"], true),
        }
    } else {
        (&["-c"], false)
    };
    ShellCommandFlags {
        flags: if shell_specified {
            Vec::new()
        } else {
            flags.iter().map(|f| f.to_string()).collect()
        },
        join_args,
    }
}

/// Append each flag unless the configured args already carry it.
///
/// A configured flag followed by a non-flag argument is consumed by that
/// argument, so the flag is appended again.
pub fn add_all_argument(flags: &[String], configured: &[String]) -> Vec<String> {
    let mut combined = configured.to_vec();
    for flag in flags {
        let should_add = configured.iter().enumerate().all(|(index, arg)| {
            if arg.to_lowercase() == *flag && configured.len() > index + 1 {
                !configured[index + 1..].iter().all(|next| next.starts_with('-'))
            } else {
                arg.to_lowercase() != *flag
            }
        });
        if should_add {
            combined.push(flag.clone());
        }
    }
    combined
}

// ============================================================================
// Well-known commands
// ============================================================================

/// Command names reported as-is in telemetry-style summaries; anything else
/// is reported as `other`
#[derive(Debug, Clone)]
pub struct WellKnownCommands {
    names: HashSet<String>,
}

impl WellKnownCommands {
    pub fn builtin() -> Self {
        Self::new([
            "ant", "cmake", "eslint", "gradle", "grunt", "gulp", "jake", "jenkins", "jshint", "make", "maven",
            "msbuild", "msc", "nmake", "npm", "rake", "tsc", "xbuild",
        ])
    }

    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn sanitized(&self, command: &str) -> String {
        let command = command.to_lowercase();
        let name = command.rsplit(['/', '\\']).next().unwrap_or(&command);
        if self.names.contains(name) {
            name.to_string()
        } else {
            "other".to_string()
        }
    }
}

impl Default for WellKnownCommands {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> ShellCommandLineBuilder {
        ShellCommandLineBuilder::default()
    }

    fn plain(s: &str) -> CommandString {
        CommandString::Plain(s.to_string())
    }

    #[test]
    fn test_bash_quotes_arg_with_space() {
        let line = builder().build(Platform::Linux, "bash", None, &plain("echo"), Some(&plain("echo")), &[plain("a b")]);
        assert_eq!(line, "echo 'a b'");
    }

    #[test]
    fn test_cmd_outer_quotes_only_when_both_quoted() {
        let b = builder();
        let both = b.build(
            Platform::Windows,
            "cmd.exe",
            None,
            &plain("my tool"),
            Some(&plain("my tool")),
            &[plain("a b")],
        );
        assert_eq!(both, "\"\"my tool\" \"a b\"\"");

        let arg_only = b.build(Platform::Windows, "cmd.exe", None, &plain("echo"), Some(&plain("echo")), &[plain("a b")]);
        assert_eq!(arg_only, "echo \"a b\"");
    }

    #[test]
    fn test_powershell_call_operator() {
        let line = builder().build(
            Platform::Windows,
            "pwsh.exe",
            None,
            &plain("C:\\Program Files\\tool.exe"),
            None,
            &[plain("x")],
        );
        assert_eq!(line, "& 'C:\\Program Files\\tool.exe' x");
    }

    #[test]
    fn test_verbatim_when_no_args() {
        let b = builder();
        let cmd = plain("npm run build && echo done");
        assert_eq!(b.build(Platform::Linux, "bash", None, &cmd, Some(&cmd), &[]), "npm run build && echo done");

        // resolution changed a command that did not need quoting
        let resolved = plain("/my dir/run");
        let line = b.build(Platform::Linux, "bash", None, &resolved, Some(&plain("${workspaceFolder}/run")), &[]);
        assert_eq!(line, "'/my dir/run'");
    }

    #[test]
    fn test_explicit_quoting_kinds() {
        let b = builder();
        let args = [
            CommandString::quoted("a b", ShellQuoting::Weak),
            CommandString::quoted("c d", ShellQuoting::Escape),
            CommandString::quoted("plain", ShellQuoting::Strong),
        ];
        let line = b.build(Platform::Linux, "zsh", None, &plain("run"), None, &args);
        assert_eq!(line, "run \"a b\" c\\ d 'plain'");
    }

    #[test]
    fn test_needs_quotes_honors_guards() {
        let options = ShellQuotingTable::builtin().get("bash", Platform::Linux);
        let quoter = Quoter { options: &options };
        assert!(quoter.needs_quotes("a b"));
        assert!(!quoter.needs_quotes("'a b'"));
        assert!(!quoter.needs_quotes("x='a b'"));
        assert!(!quoter.needs_quotes("a\\ b"));
        assert!(!quoter.needs_quotes("ab"));
    }

    #[test]
    fn test_task_quoting_override() {
        let custom = ShellQuotingOptions {
            strong: Some('"'),
            ..Default::default()
        };
        let line = builder().build(Platform::Linux, "bash", Some(&custom), &plain("echo"), None, &[plain("a b")]);
        assert_eq!(line, "echo \"a b\"");
    }

    #[test]
    fn test_shell_flags() {
        assert_eq!(shell_command_flags(Platform::Linux, "bash", false).flags, vec!["-c"]);
        assert!(shell_command_flags(Platform::Linux, "bash", true).flags.is_empty());
        let cmd = shell_command_flags(Platform::Windows, "cmd.exe", false);
        assert_eq!(cmd.flags, vec!["/d", "/c"]);
        assert!(cmd.join_args);
        let bash = shell_command_flags(Platform::Windows, "bash.exe", false);
        assert!(!bash.join_args);
        assert_eq!(shell_command_flags(Platform::Windows, "powershell.exe", false).flags, vec!["-Command"]);
        assert_eq!(shell_command_flags(Platform::Windows, "wsl.exe", false).flags, vec!["-e"]);
    }

    #[test]
    fn test_add_all_argument() {
        let c = vec!["-c".to_string()];
        assert_eq!(add_all_argument(&c, &["-l".to_string()]), vec!["-l", "-c"]);
        // configured, but its argument is already there
        assert_eq!(add_all_argument(&c, &["-c".to_string(), "x".to_string()]), vec!["-c", "x", "-c"]);
        // configured and only followed by flags
        assert_eq!(add_all_argument(&c, &["-C".to_string(), "-l".to_string()]), vec!["-C", "-l"]);
        assert_eq!(add_all_argument(&c, &["-c".to_string()]), vec!["-c"]);
    }

    #[test]
    fn test_basename_and_sanitized() {
        assert_eq!(shell_basename("C:\\Windows\\System32\\CMD.EXE"), "cmd.exe");
        assert_eq!(shell_basename("/bin/bash"), "bash");
        let known = WellKnownCommands::builtin();
        assert_eq!(known.sanitized("/usr/bin/Make"), "make");
        assert_eq!(known.sanitized("C:\\tools\\tsc"), "tsc");
        assert_eq!(known.sanitized("./build.sh"), "other");
    }
}
