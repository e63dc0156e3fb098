//! Command Validation Module
//!
//! Gates every execution request against the security policy before any
//! process or session work starts. Validation is pure: no I/O, no state.

use crate::config::{SecurityConfig, ShellConfig};
use crate::error::{ExecError, Result};
use std::path::{Component, Path, PathBuf};

/// Command separators blocked for every shell profile
const LINE_BREAKS: [&str; 2] = ["\n", "\r"];

/// Command validator that enforces the security policy
///
/// Checks, in order:
///
/// 1. **Length**: command text no longer than `max_command_length`
/// 2. **Operators**: no blocked operator for the shell, unless allow-listed
/// 3. **Command name**: leading executable not on the blocklist
/// 4. **Arguments**: no blocked argument token
#[derive(Debug, Clone)]
pub struct CommandValidator {
    max_command_length: usize,
    blocked_commands: Vec<String>,
    blocked_arguments: Vec<String>,
    allowed_operators: Vec<String>,
}

impl CommandValidator {
    /// Build a validator from the security policy
    pub fn new(policy: &SecurityConfig) -> Self {
        Self {
            max_command_length: policy.max_command_length,
            blocked_commands: policy
                .blocked_commands
                .iter()
                .map(|c| c.to_lowercase())
                .collect(),
            blocked_arguments: policy
                .blocked_arguments
                .iter()
                .map(|a| a.to_lowercase())
                .collect(),
            allowed_operators: policy.allowed_operators.clone(),
        }
    }

    /// Validate command text for a shell profile
    ///
    /// # Example
    ///
    /// ```
    /// use shellward::config::Config;
    /// use shellward::tools::CommandValidator;
    ///
    /// let config = Config::default();
    /// let validator = CommandValidator::new(&config.security);
    /// assert!(validator.validate("del file.txt", &config.shells.cmd).is_err());
    /// assert!(validator.validate("dir", &config.shells.cmd).is_ok());
    /// ```
    pub fn validate(&self, command: &str, shell: &ShellConfig) -> Result<()> {
        let command = command.trim();
        if command.is_empty() {
            return Err(ExecError::InvalidArguments(
                "command must not be empty".to_string(),
            ));
        }

        let length = command.chars().count();
        if length > self.max_command_length {
            return Err(ExecError::PolicyViolation(format!(
                "Command exceeds maximum length of {} characters ({})",
                self.max_command_length, length
            )));
        }

        self.check_operators(command, &shell.blocked_operators)?;

        let mut tokens = command.split_whitespace();
        if let Some(first) = tokens.next() {
            self.check_command_name(first)?;
        }
        for token in tokens {
            self.check_argument(token)?;
        }

        Ok(())
    }

    /// Reject blocked operators that are not explicitly allowed
    ///
    /// Allowed operators are masked out before scanning, so allowing `&&`
    /// does not trip a blocked `&`. Line breaks separate commands in every
    /// supported shell and are blocked whatever the profile lists.
    fn check_operators(&self, command: &str, blocked: &[String]) -> Result<()> {
        let mut masked = command.to_string();
        for allowed in self.allowed_operators.iter().filter(|op| !op.is_empty()) {
            masked = masked.replace(allowed.as_str(), " ");
        }

        let always = LINE_BREAKS.iter().copied();
        for op in always.chain(blocked.iter().map(String::as_str)) {
            if op.is_empty() || self.allowed_operators.iter().any(|a| a == op) {
                continue;
            }
            if masked.contains(op) {
                return Err(ExecError::PolicyViolation(format!(
                    "Command contains blocked operator: {}",
                    op.escape_debug()
                )));
            }
        }
        Ok(())
    }

    fn check_command_name(&self, token: &str) -> Result<()> {
        let name = executable_name(token);
        for blocked in &self.blocked_commands {
            if name_matches(&name, blocked) {
                return Err(ExecError::PolicyViolation(format!(
                    "Command is blocked: \"{}\"",
                    blocked
                )));
            }
        }
        Ok(())
    }

    fn check_argument(&self, token: &str) -> Result<()> {
        let arg = token.trim_matches(|c| c == '"' || c == '\'').to_lowercase();
        if self.blocked_arguments.contains(&arg) {
            return Err(ExecError::PolicyViolation(format!(
                "Argument is blocked: \"{}\"",
                token
            )));
        }
        Ok(())
    }
}

/// Reduce a leading token to a lowercase file name
///
/// Both separators are honored regardless of host, so
/// `C:\Windows\System32\format.com` yields `format.com` everywhere.
fn executable_name(token: &str) -> String {
    let unquoted = token.trim_matches(|c| c == '"' || c == '\'');
    unquoted
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(unquoted)
        .to_lowercase()
}

// `format` matches `format` and `format.exe`, never `formatter`.
fn name_matches(name: &str, blocked: &str) -> bool {
    name == blocked
        || (name.len() > blocked.len()
            && name.starts_with(blocked)
            && name[blocked.len()..].starts_with('.'))
}

/// Resolve a requested working directory and enforce containment
///
/// `None` resolves to the process's current directory, relative paths are
/// joined onto it, and `.`/`..` components are folded lexically. When
/// `restrict_working_directory` is set the resolved path must start with one
/// of `allowed_paths` (plain string prefix; case-insensitive on Windows).
pub fn resolve_working_directory(
    requested: Option<&str>,
    policy: &SecurityConfig,
) -> Result<PathBuf> {
    let cwd = std::env::current_dir()
        .map_err(|e| ExecError::Process(format!("Cannot determine current directory: {}", e)))?;

    let resolved = match requested.map(str::trim).filter(|s| !s.is_empty()) {
        Some(dir) => normalize(&cwd.join(dir)),
        None => normalize(&cwd),
    };

    if policy.restrict_working_directory {
        let resolved_str = resolved.to_string_lossy();
        let allowed = policy
            .allowed_paths
            .iter()
            .any(|prefix| has_path_prefix(&resolved_str, prefix));
        if !allowed {
            return Err(ExecError::PolicyViolation(format!(
                "Working directory ({}) outside allowed paths",
                resolved.display()
            )));
        }
    }

    Ok(resolved)
}

#[cfg(windows)]
fn has_path_prefix(path: &str, prefix: &str) -> bool {
    path.to_lowercase().starts_with(&prefix.to_lowercase())
}

#[cfg(not(windows))]
fn has_path_prefix(path: &str, prefix: &str) -> bool {
    path.starts_with(prefix)
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
