//! Configuration file
//!
//! Everything has a default, so a missing file or a missing section runs the
//! daemon against the standard system logs with `logwarden.db` in the working
//! directory.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use logwarden_backends::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use logwarden_logs::DEFAULT_ERROR_KEYWORDS;

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub tail: TailConfig,
    pub queue: QueueConfig,
    pub storage: StorageConfig,
    pub llm: LlmConfig,
    pub worker: WorkerConfig,
    pub live: LiveConfig,
    pub mail: MailConfig,
    pub reports: ReportsConfig,
}

impl Config {
    /// Load from `path`. A missing file gives the defaults; an unreadable or
    /// malformed one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file; using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", path.display()));
            }
        };
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TailConfig {
    pub sources: Vec<PathBuf>,
    pub keywords: Vec<String>,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            sources: [
                "/var/log/syslog",
                "/var/log/syslog.1",
                "/var/log/kern.log",
                "/var/log/auth.log",
                "/var/log/cups/error_log",
                "/var/log/dpkg.log",
                "/var/log/apport.log",
            ]
            .into_iter()
            .map(PathBuf::from)
            .collect(),
            keywords: DEFAULT_ERROR_KEYWORDS.iter().map(|k| k.to_string()).collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    pub name: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "logs".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file shared by the daemon and the CLI subcommands
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("logwarden.db"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key_env: "GROQ_API_KEY".to_string(),
            timeout_secs: 30,
            temperature: 0.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LiveConfig {
    pub bind: SocketAddr,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 5001)),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MailTransportKind {
    #[default]
    Sendmail,
    Spool,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MailConfig {
    pub transport: MailTransportKind,
    pub from: String,
    pub sendmail_path: PathBuf,
    pub spool_dir: PathBuf,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            transport: MailTransportKind::Sendmail,
            from: "logwarden@localhost".to_string(),
            sendmail_path: PathBuf::from("/usr/sbin/sendmail"),
            spool_dir: PathBuf::from("outbox"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReportsConfig {
    pub dir: PathBuf,
    /// Send ledger; `<dir>/last_sent_records.json` when unset
    pub ledger: Option<PathBuf>,
    pub watchdog_secs: u64,
}

impl ReportsConfig {
    pub fn ledger_path(&self) -> PathBuf {
        self.ledger
            .clone()
            .unwrap_or_else(|| self.dir.join("last_sent_records.json"))
    }
}

impl Default for ReportsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("reports"),
            ledger: None,
            watchdog_secs: 60,
        }
    }
}
