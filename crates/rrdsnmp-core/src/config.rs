//! Agent configuration, validated before any socket is opened.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::collector::RetryPolicy;
use crate::storage::ArchiveDescriptor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Polling interval is zero.
    NonPositiveInterval,
    EmptyHost,
    EmptyCommunity,
    ZeroPort,
    ZeroTimeout,
    /// Interface indexes start at 1.
    ZeroIfIndex,
    /// `overwrite` and `resume` both requested.
    ConflictingArchiveMode,
    EmptyGraphWindow,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NonPositiveInterval => write!(f, "interval must be greater than zero"),
            ConfigError::EmptyHost => write!(f, "host must not be empty"),
            ConfigError::EmptyCommunity => write!(f, "community must not be empty"),
            ConfigError::ZeroPort => write!(f, "port must not be 0"),
            ConfigError::ZeroTimeout => write!(f, "timeout must be greater than zero"),
            ConfigError::ZeroIfIndex => write!(f, "interface index must be at least 1"),
            ConfigError::ConflictingArchiveMode => {
                write!(f, "--overwrite and --resume are mutually exclusive")
            }
            ConfigError::EmptyGraphWindow => write!(f, "graph window must be greater than zero"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// How the archive file is obtained at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveMode {
    /// Create; fail if the file exists.
    Create,
    /// Create, discarding any existing file.
    Overwrite,
    /// Reopen an existing file.
    Resume,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub host: String,
    pub port: u16,
    pub community: String,
    pub interval: Duration,
    pub archive_path: PathBuf,
    pub if_index: u32,
    pub timeout: Duration,
    pub retries: u32,
    pub overwrite: bool,
    pub resume: bool,
    /// 64-bit domain for the outbound octet counter.
    pub wide_counters: bool,
    pub graph_path: PathBuf,
    pub graph_window: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 161,
            community: "public".to_string(),
            interval: Duration::from_secs(5),
            archive_path: PathBuf::from("test.rrd"),
            if_index: 2,
            timeout: Duration::from_secs(2),
            retries: 3,
            overwrite: false,
            resume: false,
            wide_counters: false,
            graph_path: PathBuf::from("graph.svg"),
            graph_window: Duration::from_secs(300),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::NonPositiveInterval);
        }
        if self.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.community.is_empty() {
            return Err(ConfigError::EmptyCommunity);
        }
        if self.port == 0 {
            return Err(ConfigError::ZeroPort);
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.if_index == 0 {
            return Err(ConfigError::ZeroIfIndex);
        }
        if self.overwrite && self.resume {
            return Err(ConfigError::ConflictingArchiveMode);
        }
        if self.graph_window.is_zero() {
            return Err(ConfigError::EmptyGraphWindow);
        }
        Ok(())
    }

    pub fn archive_mode(&self) -> ArchiveMode {
        if self.resume {
            ArchiveMode::Resume
        } else if self.overwrite {
            ArchiveMode::Overwrite
        } else {
            ArchiveMode::Create
        }
    }

    /// Archive step: the interval rounded up to whole seconds.
    pub fn step_secs(&self) -> u64 {
        let secs = self.interval.as_secs();
        let secs = if self.interval.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        };
        secs.max(1)
    }

    pub fn descriptor(&self) -> ArchiveDescriptor {
        ArchiveDescriptor::network(&self.archive_path, self.step_secs(), self.wide_counters)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retries,
            ..RetryPolicy::default()
        }
    }
}
