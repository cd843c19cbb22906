//! handoff.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::types::ListenSpec;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffConfig {
    pub listen: ListenConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    pub logging: Option<LoggingConfig>,
}

/// Either `address` + `port`, or a Unix socket `path`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    pub address: Option<String>,
    pub port: Option<u16>,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    pub count: u32,
    /// Banner written by each demo worker; `{id}` is replaced with the worker id.
    pub banner: Option<String>,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            count: 4,
            banner: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive, e.g. `info,handoff=debug`.
    pub filter: Option<String>,
    pub json: Option<bool>,
}

impl HandoffConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: HandoffConfig = toml::from_str(content)?;
        config.listen_spec()?;
        if config.workers.count == 0 {
            anyhow::bail!("[workers] count must be at least 1");
        }
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Resolve `[listen]` into the listen spec shared by every worker.
    pub fn listen_spec(&self) -> anyhow::Result<ListenSpec> {
        match (&self.listen.path, &self.listen.address, self.listen.port) {
            (Some(path), None, None) => Ok(ListenSpec::pipe(path.clone())),
            (None, address, Some(port)) => Ok(ListenSpec::tcp(
                address.clone().unwrap_or_else(|| "0.0.0.0".to_string()),
                port,
            )),
            (Some(_), _, _) => anyhow::bail!("[listen] path cannot be combined with address/port"),
            (None, _, None) => anyhow::bail!("[listen] needs either port or path"),
        }
    }

    /// A config that listens on `port` with `workers` workers.
    pub fn scaffold(port: u16, workers: u32) -> Self {
        HandoffConfig {
            listen: ListenConfig {
                address: Some("0.0.0.0".to_string()),
                port: Some(port),
                path: None,
            },
            workers: WorkersConfig {
                count: workers,
                banner: None,
            },
            logging: Some(LoggingConfig {
                filter: Some("info".to_string()),
                json: Some(false),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AddressKind;

    #[test]
    fn test_parse_tcp() {
        let config = HandoffConfig::from_toml(
            r#"
[listen]
address = "127.0.0.1"
port = 8080

[workers]
count = 2
"#,
        )
        .unwrap();
        let spec = config.listen_spec().unwrap();
        assert_eq!(spec.kind, AddressKind::Tcp4);
        assert_eq!(spec.port, 8080);
        assert_eq!(config.workers.count, 2);
    }

    #[test]
    fn test_parse_pipe_with_default_workers() {
        let config = HandoffConfig::from_toml(
            r#"
[listen]
path = "/tmp/handoff.sock"
"#,
        )
        .unwrap();
        assert_eq!(config.listen_spec().unwrap().kind, AddressKind::Pipe);
        assert_eq!(config.workers.count, 4);
    }

    #[test]
    fn test_rejects_ambiguous_listen() {
        let err = HandoffConfig::from_toml(
            r#"
[listen]
path = "/tmp/x.sock"
port = 80
"#,
        );
        assert!(err.is_err());

        assert!(HandoffConfig::from_toml("[listen]\n").is_err());
    }

    #[test]
    fn test_rejects_zero_workers() {
        let err = HandoffConfig::from_toml(
            r#"
[listen]
port = 80

[workers]
count = 0
"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_scaffold_round_trips() {
        let config = HandoffConfig::scaffold(9000, 3);
        let toml_str = config.to_toml_string().unwrap();
        let parsed = HandoffConfig::from_toml(&toml_str).unwrap();
        assert_eq!(parsed.listen.port, Some(9000));
        assert_eq!(parsed.workers.count, 3);
    }
}
