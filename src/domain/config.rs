use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Environment variable that overrides the configured execution mode.
pub const EXEC_MODE_ENV: &str = "REPLBOARD_EXEC_MODE";

/// ReplBoard configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplBoardConfig {
    /// Global configuration
    #[serde(default)]
    pub global: GlobalConfig,
    /// Board configurations
    #[serde(default)]
    pub boards: Vec<BoardConfig>,
}

/// Global configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Default log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// How program files are run on the board
    #[serde(default)]
    pub exec_mode: ExecMode,
    /// Deadline for fixed protocol waits (prompts, acknowledgements)
    #[serde(default = "default_protocol_timeout")]
    pub protocol_timeout_ms: u64,
}

/// Board configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardConfig {
    /// Board name
    pub name: String,
    /// Board description
    #[serde(default)]
    pub description: String,
    /// Serial device path
    pub device: String,
    /// Baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Seconds to keep retrying while the device node is absent
    #[serde(default)]
    pub connect_wait_secs: u32,
    /// Serial timeout and default call timeout in milliseconds
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
    /// Write pacing and polling
    #[serde(default)]
    pub transport: TransportConfig,
    /// Device reset timing
    #[serde(default)]
    pub reset: ResetConfig,
}

/// Transport pacing; tuned per interpreter input buffer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransportConfig {
    #[serde(default = "default_write_chunk_size")]
    pub write_chunk_size: usize,
    #[serde(default = "default_write_pacing")]
    pub write_pacing_ms: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

/// Reset timing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResetConfig {
    /// Pause after closing and again after reopening
    #[serde(default = "default_reset_delay")]
    pub delay_ms: u64,
    /// Seconds to wait for the device node to come back
    #[serde(default = "default_reset_wait")]
    pub wait_secs: u32,
}

/// Program execution mode
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecMode {
    /// Send source text over the REPL
    #[default]
    Direct,
    /// Copy the program to the device filesystem, then soft-reboot
    Staged,
}

/// Bounded retry for opening the device node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_protocol_timeout() -> u64 {
    10_000
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_timeout() -> u64 {
    10_000
}

fn default_write_chunk_size() -> usize {
    32
}

fn default_write_pacing() -> u64 {
    10
}

fn default_poll_interval() -> u64 {
    10
}

fn default_reset_delay() -> u64 {
    5_000
}

fn default_reset_wait() -> u32 {
    10
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            exec_mode: ExecMode::default(),
            protocol_timeout_ms: default_protocol_timeout(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            write_chunk_size: default_write_chunk_size(),
            write_pacing_ms: default_write_pacing(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl Default for ResetConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_reset_delay(),
            wait_secs: default_reset_wait(),
        }
    }
}

impl GlobalConfig {
    pub fn protocol_timeout(&self) -> Duration {
        Duration::from_millis(self.protocol_timeout_ms)
    }

    /// Configured mode, unless `REPLBOARD_EXEC_MODE` says otherwise.
    pub fn effective_exec_mode(&self) -> ExecMode {
        ExecMode::from_env().unwrap_or(self.exec_mode)
    }
}

impl BoardConfig {
    /// Board with default settings for the given device node.
    pub fn new(device: impl Into<String>) -> Self {
        let device = device.into();
        Self {
            name: device.clone(),
            description: String::new(),
            device,
            baud_rate: default_baud_rate(),
            connect_wait_secs: 0,
            timeout_ms: default_timeout(),
            transport: TransportConfig::default(),
            reset: ResetConfig::default(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_wait(self.connect_wait_secs)
    }
}

impl TransportConfig {
    pub fn write_pacing(&self) -> Duration {
        Duration::from_millis(self.write_pacing_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl ResetConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// One attempt per second of wait, plus the first.
    pub fn from_wait(wait_secs: u32) -> Self {
        Self::new(wait_secs.saturating_add(1), Duration::from_secs(1))
    }
}

impl ExecMode {
    pub fn from_env() -> Option<Self> {
        std::env::var(EXEC_MODE_ENV).ok()?.parse().ok()
    }
}

impl FromStr for ExecMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(ExecMode::Direct),
            "staged" | "disk" => Ok(ExecMode::Staged),
            other => Err(format!("unknown exec mode: {}", other)),
        }
    }
}

impl std::fmt::Display for ExecMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecMode::Direct => write!(f, "direct"),
            ExecMode::Staged => write!(f, "staged"),
        }
    }
}
