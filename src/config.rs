// Configuration File Support
//
// This module provides configuration file parsing for shellward.
// Supports TOML format with environment variable overrides.
// Configuration files are loaded from XDG config directory: ~/.config/shellward/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Security policy applied to every execution request
    pub security: SecurityConfig,

    /// Local shell profiles
    pub shells: ShellsConfig,

    /// Remote (SSH) targets
    pub ssh: SshConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Log file path (if log_to_file is true)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
            log_to_file: false,
            log_file: None,
        }
    }
}

/// Security policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SecurityConfig {
    /// Maximum command length in characters
    pub max_command_length: usize,

    /// Executable names that may never lead a command
    pub blocked_commands: Vec<String>,

    /// Tokens that may not appear anywhere in a command
    pub blocked_arguments: Vec<String>,

    /// Operators permitted regardless of a shell's blocked operators
    pub allowed_operators: Vec<String>,

    /// Working directory prefixes permitted when restriction is on
    pub allowed_paths: Vec<String>,

    /// Whether working directories must fall under `allowed_paths`
    pub restrict_working_directory: bool,

    /// Whether executed commands are recorded in the history ledger
    pub log_commands: bool,

    /// Ledger capacity
    pub max_history_size: usize,

    /// Command timeout in seconds
    pub command_timeout: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_command_length: 2000,
            blocked_commands: [
                "format", "shutdown", "restart", "reg", "regedit", "net", "netsh", "takeown",
                "icacls", "rm", "del", "rmdir", "mkfs", "dd",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            blocked_arguments: [
                "--exec",
                "-e",
                "/c",
                "-enc",
                "-encodedcommand",
                "-command",
                "--interactive",
                "-i",
                "--login",
                "--system",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            allowed_operators: Vec::new(),
            allowed_paths: default_allowed_paths(),
            restrict_working_directory: true,
            log_commands: true,
            max_history_size: 1000,
            command_timeout: 30,
        }
    }
}

fn default_allowed_paths() -> Vec<String> {
    let mut paths = Vec::new();
    if let Some(dirs) = directories::BaseDirs::new() {
        paths.push(dirs.home_dir().to_string_lossy().to_string());
    }
    if let Ok(cwd) = std::env::current_dir() {
        let cwd = cwd.to_string_lossy().to_string();
        if !paths.contains(&cwd) {
            paths.push(cwd);
        }
    }
    paths
}

/// Supported local shell kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShellKind {
    /// PowerShell
    PowerShell,
    /// Windows command prompt
    Cmd,
    /// Git Bash on Windows
    GitBash,
    /// POSIX shell
    Sh,
}

impl ShellKind {
    /// All shell kinds, in tool-listing order
    pub const ALL: [ShellKind; 4] = [
        ShellKind::PowerShell,
        ShellKind::Cmd,
        ShellKind::GitBash,
        ShellKind::Sh,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ShellKind::PowerShell => "powershell",
            ShellKind::Cmd => "cmd",
            ShellKind::GitBash => "gitbash",
            ShellKind::Sh => "sh",
        }
    }
}

impl fmt::Display for ShellKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShellKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "powershell" => Ok(ShellKind::PowerShell),
            "cmd" => Ok(ShellKind::Cmd),
            "gitbash" => Ok(ShellKind::GitBash),
            "sh" => Ok(ShellKind::Sh),
            other => anyhow::bail!("Unknown shell: {}", other),
        }
    }
}

/// How to invoke one local command interpreter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ShellConfig {
    /// Whether the shell may be used
    #[serde(default)]
    pub enabled: bool,

    /// Interpreter executable
    pub command: String,

    /// Fixed arguments placed before the command text
    #[serde(default)]
    pub args: Vec<String>,

    /// Operators rejected in command text for this shell
    #[serde(default)]
    pub blocked_operators: Vec<String>,
}

impl ShellConfig {
    fn new(enabled: bool, command: &str, args: &[&str], blocked_operators: &[&str]) -> Self {
        Self {
            enabled,
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            blocked_operators: blocked_operators.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Shell profiles, one per kind
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ShellsConfig {
    pub powershell: ShellConfig,
    pub cmd: ShellConfig,
    pub gitbash: ShellConfig,
    pub sh: ShellConfig,
}

impl Default for ShellsConfig {
    fn default() -> Self {
        let windows = cfg!(windows);
        Self {
            powershell: ShellConfig::new(
                windows,
                "powershell.exe",
                &["-NoProfile", "-NonInteractive", "-Command"],
                &["&", "|", ";", "`"],
            ),
            cmd: ShellConfig::new(windows, "cmd.exe", &["/c"], &["&", "|", ";", "`"]),
            gitbash: ShellConfig::new(
                windows,
                "C:\\Program Files\\Git\\bin\\bash.exe",
                &["-c"],
                &["&", "|", ";", "`"],
            ),
            sh: ShellConfig::new(!windows, "/bin/sh", &["-c"], &["&", "|", ";", "`", "$("]),
        }
    }
}

impl ShellsConfig {
    /// Profile for a shell kind
    pub fn get(&self, kind: ShellKind) -> &ShellConfig {
        match kind {
            ShellKind::PowerShell => &self.powershell,
            ShellKind::Cmd => &self.cmd,
            ShellKind::GitBash => &self.gitbash,
            ShellKind::Sh => &self.sh,
        }
    }

    /// Shell kinds with `enabled = true`
    pub fn enabled_kinds(&self) -> Vec<ShellKind> {
        ShellKind::ALL
            .iter()
            .copied()
            .filter(|kind| self.get(*kind).enabled)
            .collect()
    }
}

/// SSH configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SshConfig {
    /// Whether remote execution is available
    pub enabled: bool,

    /// Connect + handshake budget in seconds
    pub ready_timeout: u64,

    /// Keepalive interval in seconds
    pub keepalive_interval: u64,

    /// Remote targets keyed by connection id
    pub connections: HashMap<String, SshConnectionConfig>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ready_timeout: 20,
            keepalive_interval: 10,
            connections: HashMap::new(),
        }
    }
}

/// One remote target
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SshConnectionConfig {
    pub host: String,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    pub username: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
}

fn default_ssh_port() -> u16 {
    22
}

/// Authentication material for a remote target
#[derive(Clone, PartialEq, Eq)]
pub enum SshCredential {
    Password(String),
    PrivateKey {
        path: PathBuf,
        passphrase: Option<String>,
    },
}

impl SshConnectionConfig {
    /// Resolve the configured credential
    ///
    /// Returns `None` unless exactly one of password / private key is set.
    pub fn credential(&self) -> Option<SshCredential> {
        match (&self.password, &self.private_key_path) {
            (Some(password), None) => Some(SshCredential::Password(password.clone())),
            (None, Some(path)) => Some(SshCredential::PrivateKey {
                path: PathBuf::from(path),
                passphrase: self.passphrase.clone(),
            }),
            _ => None,
        }
    }
}

// Credentials never reach log output.
impl fmt::Debug for SshConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("private_key_path", &self.private_key_path)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl fmt::Debug for SshCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SshCredential::Password(_) => f.write_str("Password(<redacted>)"),
            SshCredential::PrivateKey { path, .. } => {
                f.debug_struct("PrivateKey").field("path", path).finish()
            }
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsConfig {
    /// Whether to serve the metrics endpoint
    pub enabled: bool,

    /// Port for metrics server
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
        }
    }
}

impl Config {
    /// Load configuration from the default XDG config directory
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    /// If the config file does not exist, returns default configuration.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed or
    /// fails validation. A missing file yields the default configuration.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            let config = Self::default().apply_env_overrides();
            config.validate()?;
            return Ok(config);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file from {:?}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file from {:?}", path))?;

        let config = config.apply_env_overrides();
        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/shellward/config.toml` on Linux
    pub fn config_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("com", "shellward", "Shellward") {
            proj_dirs.config_dir().join("config.toml")
        } else {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home)
                .join(".config")
                .join("shellward")
                .join("config.toml")
        }
    }

    /// Write the default configuration to `path`
    ///
    /// Parent directories are created. An existing file is never overwritten.
    pub fn write_default<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        if path.exists() {
            anyhow::bail!("Refusing to overwrite existing file {:?}", path);
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory {:?}", parent))?;
            }
        }
        let content = toml::to_string_pretty(&Self::default())
            .context("Failed to serialize default configuration")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config file to {:?}", path))?;
        Ok(())
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - SHELLWARD_LOG_LEVEL
    /// - SHELLWARD_LOG_FORMAT
    /// - SHELLWARD_COMMAND_TIMEOUT
    /// - SHELLWARD_MAX_HISTORY_SIZE
    /// - SHELLWARD_SSH_ENABLED
    /// - SHELLWARD_METRICS_ENABLED
    /// - SHELLWARD_METRICS_PORT
    fn apply_env_overrides(self) -> Self {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    fn apply_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("SHELLWARD_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("SHELLWARD_LOG_FORMAT") {
            self.logging.format = format;
        }

        if let Some(timeout) = lookup("SHELLWARD_COMMAND_TIMEOUT") {
            if let Ok(timeout) = timeout.parse::<u64>() {
                if timeout > 0 {
                    self.security.command_timeout = timeout;
                }
            }
        }
        if let Some(size) = lookup("SHELLWARD_MAX_HISTORY_SIZE") {
            if let Ok(size) = size.parse::<usize>() {
                if size > 0 {
                    self.security.max_history_size = size;
                }
            }
        }

        if let Some(enabled) = lookup("SHELLWARD_SSH_ENABLED") {
            self.ssh.enabled = enabled.parse().unwrap_or(self.ssh.enabled);
        }

        if let Some(enabled) = lookup("SHELLWARD_METRICS_ENABLED") {
            self.metrics.enabled = enabled.parse().unwrap_or(self.metrics.enabled);
        }
        if let Some(port) = lookup("SHELLWARD_METRICS_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.metrics.port = port;
            }
        }

        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            ),
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!(
                "Invalid log format: {}. Must be one of: json, pretty, compact",
                self.logging.format
            ),
        }
        if self.logging.log_to_file && self.logging.log_file.is_none() {
            anyhow::bail!("log_to_file is set but no log_file is configured");
        }

        let security = &self.security;
        if security.command_timeout == 0 {
            anyhow::bail!("Command timeout must be at least 1 second");
        }
        if security.max_history_size == 0 {
            anyhow::bail!("Max history size must be > 0");
        }
        if security.max_command_length == 0 {
            anyhow::bail!("Max command length must be > 0");
        }
        if security.restrict_working_directory {
            for allowed in &security.allowed_paths {
                if !Path::new(allowed).is_absolute() {
                    anyhow::bail!("Allowed path '{}' must be absolute", allowed);
                }
            }
        }

        for kind in ShellKind::ALL {
            let shell = self.shells.get(kind);
            if shell.enabled && shell.command.trim().is_empty() {
                anyhow::bail!("Shell '{}' is enabled but has an empty command", kind);
            }
        }

        for (id, conn) in &self.ssh.connections {
            if conn.host.trim().is_empty() {
                anyhow::bail!("SSH connection '{}' has an empty host", id);
            }
            if conn.username.trim().is_empty() {
                anyhow::bail!("SSH connection '{}' has an empty username", id);
            }
            if conn.port == 0 {
                anyhow::bail!("SSH connection '{}' has port 0", id);
            }
            if conn.credential().is_none() {
                anyhow::bail!(
                    "SSH connection '{}' must set exactly one of password or private_key_path",
                    id
                );
            }
        }
        if self.ssh.ready_timeout == 0 {
            anyhow::bail!("SSH ready timeout must be at least 1 second");
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            anyhow::bail!("Metrics port must be > 0");
        }

        Ok(())
    }

    /// Convert log level string to tracing::Level
    pub fn log_level(&self) -> Result<tracing::Level> {
        self.logging
            .level
            .to_lowercase()
            .parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))
    }
}
