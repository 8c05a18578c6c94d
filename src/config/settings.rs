//! Application settings, paths, and named port lists.
//!
//! Settings live in an XDG-compliant config directory as JSON. A missing
//! file means built-in defaults; a broken one is a configuration error.

use crate::config::DetectionTier;
use crate::error::{ConfigError, ConfigResult};
use crate::types::Port;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Application directory paths following the XDG Base Directory Specification.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Configuration directory (~/.config/scan-ports)
    pub config_dir: PathBuf,
}

impl Paths {
    /// Locate the configuration directory for the current user.
    pub fn discover() -> ConfigResult<Self> {
        let project =
            ProjectDirs::from("dev", "intermcli", "scan-ports")
                .ok_or(ConfigError::DirectoryNotFound)?;

        Ok(Self {
            config_dir: project.config_dir().to_path_buf(),
        })
    }

    /// Path to the settings file.
    pub fn settings_file(&self) -> PathBuf {
        self.config_dir.join("settings.json")
    }
}

/// A named group of ports with the service each is expected to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortList {
    #[serde(default)]
    pub description: String,
    pub ports: BTreeMap<Port, String>,
}

impl PortList {
    fn from_entries(description: &str, entries: &[(u16, &str)]) -> Self {
        Self {
            description: description.to_string(),
            ports: entries
                .iter()
                .filter_map(|&(p, name)| Port::new(p).map(|port| (port, name.to_string())))
                .collect(),
        }
    }
}

/// Application-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Default concurrency level.
    pub default_concurrency: usize,
    /// Default connect timeout in milliseconds.
    pub default_timeout_ms: u64,
    /// Preferred detection tier.
    pub default_tier: DetectionTier,
    /// Run service detection on open ports.
    pub detect_services: bool,
    /// Extra named port lists; entries replace built-ins of the same name.
    pub port_lists: BTreeMap<String, PortList>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            default_concurrency: 50,
            default_timeout_ms: 3000,
            default_tier: DetectionTier::Enhanced,
            detect_services: true,
            port_lists: BTreeMap::new(),
        }
    }
}

impl AppSettings {
    /// Load settings from the default location.
    pub fn load() -> ConfigResult<Self> {
        let file = Paths::discover()?.settings_file();
        if !file.exists() {
            debug!(path = %file.display(), "no settings file, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&file)
    }

    /// Load settings from a specific file.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        debug!(path = %path.display(), "loaded settings");
        serde_json::from_str(&content).map_err(|e| ConfigError::InvalidFormat(e.to_string()))
    }

    /// Built-in port lists merged with the user's, user entries winning.
    pub fn port_lists(&self) -> BTreeMap<String, PortList> {
        let mut lists = builtin_port_lists();
        for (name, list) in &self.port_lists {
            lists.insert(name.to_lowercase(), list.clone());
        }
        lists
    }
}

/// Port lists shipped with the tool.
pub fn builtin_port_lists() -> BTreeMap<String, PortList> {
    let mut lists = BTreeMap::new();

    lists.insert(
        "common".to_string(),
        PortList::from_entries(
            "Basic common ports",
            &[
                (22, "SSH"),
                (80, "HTTP"),
                (443, "HTTPS"),
                (3000, "Node.js Dev"),
                (5432, "PostgreSQL"),
            ],
        ),
    );
    lists.insert(
        "web".to_string(),
        PortList::from_entries(
            "Web servers and application frameworks",
            &[
                (80, "HTTP"),
                (443, "HTTPS"),
                (3000, "Node.js/React"),
                (4000, "Dev Server"),
                (5000, "Flask"),
                (8000, "Django/Python"),
                (8080, "HTTP-Alt"),
                (8443, "HTTPS-Alt"),
                (8888, "Jupyter"),
                (9000, "SonarQube"),
            ],
        ),
    );
    lists.insert(
        "database".to_string(),
        PortList::from_entries(
            "Databases and data stores",
            &[
                (1433, "MSSQL"),
                (1521, "Oracle"),
                (3306, "MySQL"),
                (5432, "PostgreSQL"),
                (5984, "CouchDB"),
                (6379, "Redis"),
                (8086, "InfluxDB"),
                (9042, "Cassandra"),
                (9200, "Elasticsearch"),
                (11211, "Memcached"),
                (27017, "MongoDB"),
            ],
        ),
    );
    lists.insert(
        "dev".to_string(),
        PortList::from_entries(
            "Local development servers",
            &[
                (3000, "Node.js/React"),
                (3001, "Node.js Alt"),
                (4200, "Angular"),
                (5173, "Vite"),
                (8000, "Django/Python"),
                (8080, "HTTP-Alt"),
                (9229, "Node Inspector"),
            ],
        ),
    );
    lists.insert(
        "remote".to_string(),
        PortList::from_entries(
            "Remote access",
            &[(22, "SSH"), (23, "Telnet"), (3389, "RDP"), (5900, "VNC")],
        ),
    );
    lists.insert(
        "mail".to_string(),
        PortList::from_entries(
            "Mail transport and retrieval",
            &[
                (25, "SMTP"),
                (110, "POP3"),
                (143, "IMAP"),
                (465, "SMTPS"),
                (587, "Submission"),
                (993, "IMAPS"),
                (995, "POP3S"),
            ],
        ),
    );
    lists.insert(
        "infra".to_string(),
        PortList::from_entries(
            "Infrastructure and orchestration",
            &[
                (53, "DNS"),
                (2375, "Docker"),
                (2376, "Docker TLS"),
                (5672, "AMQP"),
                (6443, "Kubernetes API"),
                (9090, "Prometheus"),
                (9092, "Kafka"),
                (15672, "RabbitMQ Mgmt"),
            ],
        ),
    );

    lists
}
