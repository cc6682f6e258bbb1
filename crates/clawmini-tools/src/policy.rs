//! Shell command denylist.

use anyhow::{Context, Result};
use clawmini_protocol::CoreError;
use regex::Regex;
use tracing::warn;

/// Patterns blocked by [`CommandPolicy::standard`].
pub const DANGEROUS_COMMANDS: &[&str] = &[
    r"\brm\b.*\s-[a-zA-Z]*[rR]",
    r"\bmv\b.*(^|\s)/",
    r"\bsudo\b",
    r"\bchown\b",
    r"\bchmod\b\s+777",
    r"\bhalt\b",
    r"\breboot\b",
    r"\bpoweroff\b",
    r"\binit\b",
];

#[derive(Debug, Clone)]
pub struct CommandPolicy {
    denied: Vec<Regex>,
}

impl CommandPolicy {
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let denied = patterns
            .into_iter()
            .map(|pattern| {
                let pattern = pattern.as_ref();
                Regex::new(pattern).with_context(|| format!("invalid command pattern {pattern}"))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { denied })
    }

    pub fn standard() -> Result<Self> {
        Self::new(DANGEROUS_COMMANDS)
    }

    /// Allows everything; for trusted local runs.
    pub fn permissive() -> Self {
        Self { denied: Vec::new() }
    }

    pub fn check(&self, command: &str) -> Result<(), CoreError> {
        match self.denied.iter().find(|pattern| pattern.is_match(command)) {
            Some(pattern) => {
                warn!(%command, pattern = pattern.as_str(), "command blocked");
                Err(CoreError::ToolDenied(format!(
                    "command '{command}' matches dangerous pattern and was blocked"
                )))
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_policy_blocks_destructive_commands() -> Result<()> {
        let policy = CommandPolicy::standard()?;
        for command in [
            "rm -rf /tmp/x",
            "rm -r build",
            "cd / && rm -fR .",
            "mv notes.txt /etc/",
            "sudo ls",
            "chown root file",
            "chmod 777 script.sh",
            "halt",
            "systemctl reboot",
            "poweroff",
            "git init",
        ] {
            assert!(
                matches!(policy.check(command), Err(CoreError::ToolDenied(_))),
                "{command} should be blocked"
            );
        }
        Ok(())
    }

    #[test]
    fn ordinary_commands_pass() -> Result<()> {
        let policy = CommandPolicy::standard()?;
        for command in [
            "ls -la",
            "rm notes.txt",
            "mv a.txt b.txt",
            "chmod 644 notes.txt",
            "echo initial",
            "cat README.md | grep rust",
        ] {
            assert!(policy.check(command).is_ok(), "{command} should pass");
        }
        Ok(())
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        assert!(CommandPolicy::new(["(unclosed"]).is_err());
        assert!(CommandPolicy::permissive().check("sudo reboot").is_ok());
    }
}
