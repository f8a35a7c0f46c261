//! Per-shell quoting rules

use crate::task::{EscapeOptions, ShellQuotingOptions};
use std::collections::HashMap;
use termtask_foundation::Platform;

fn escape_table(escape_char: char, chars_to_escape: &str) -> Option<EscapeOptions> {
    Some(EscapeOptions::Table {
        escape_char,
        chars_to_escape: chars_to_escape.to_string(),
    })
}

/// Quoting options by shell name (`bash`, `cmd`, ...) with per-OS fallbacks
#[derive(Debug, Clone)]
pub struct ShellQuotingTable {
    shells: HashMap<String, ShellQuotingOptions>,
    os_defaults: HashMap<Platform, ShellQuotingOptions>,
}

impl ShellQuotingTable {
    pub fn empty() -> Self {
        Self {
            shells: HashMap::new(),
            os_defaults: HashMap::new(),
        }
    }

    /// cmd, powershell, bash and zsh; bash rules on Linux/Mac, powershell
    /// rules on Windows
    pub fn builtin() -> Self {
        let cmd = ShellQuotingOptions {
            strong: Some('"'),
            ..Default::default()
        };
        let powershell = ShellQuotingOptions {
            strong: Some('\''),
            weak: Some('"'),
            escape: escape_table('`', " \"'()"),
        };
        let bash = ShellQuotingOptions {
            strong: Some('\''),
            weak: Some('"'),
            escape: escape_table('\\', " \"'"),
        };

        let mut table = Self::empty();
        table.register("cmd", cmd);
        table.register("powershell", powershell.clone());
        table.register("bash", bash.clone());
        table.register("zsh", bash.clone());
        table.register_os_default(Platform::Linux, bash.clone());
        table.register_os_default(Platform::Mac, bash);
        table.register_os_default(Platform::Windows, powershell);
        table
    }

    pub fn register(&mut self, shell: impl Into<String>, options: ShellQuotingOptions) {
        self.shells.insert(shell.into(), options);
    }

    pub fn register_os_default(&mut self, platform: Platform, options: ShellQuotingOptions) {
        self.os_defaults.insert(platform, options);
    }

    /// Options for `shell` (basename without extension); the OS default when
    /// the shell is unknown, no quoting at all when neither exists
    pub fn get(&self, shell: &str, platform: Platform) -> ShellQuotingOptions {
        self.shells
            .get(shell)
            .or_else(|| self.os_defaults.get(&platform))
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for ShellQuotingTable {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_and_fallback() {
        let table = ShellQuotingTable::builtin();
        assert_eq!(table.get("cmd", Platform::Windows).strong, Some('"'));
        assert_eq!(table.get("cmd", Platform::Windows).weak, None);
        assert_eq!(table.get("fish", Platform::Linux), table.get("bash", Platform::Linux));
        assert_eq!(table.get("nu", Platform::Windows), table.get("powershell", Platform::Windows));
        assert_eq!(ShellQuotingTable::empty().get("bash", Platform::Linux), ShellQuotingOptions::default());
    }
}
