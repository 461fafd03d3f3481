use std::path::{Path, PathBuf};

use serde::Deserialize;

const fn default_smtp_port() -> u16 {
    25
}

const fn default_smtp_timeout() -> u64 {
    30
}

fn default_host() -> String {
    String::from("localhost")
}

/// Where drained messages go
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum TransportConfig {
    /// Relay through an SMTP server
    Smtp {
        #[serde(default = "default_host")]
        host: String,
        #[serde(default = "default_smtp_port")]
        port: u16,
        /// Name announced in EHLO/HELO
        #[serde(default = "default_host")]
        helo: String,
        /// Bound on connecting and on every command (in seconds)
        #[serde(default = "default_smtp_timeout")]
        timeout_secs: u64,
    },

    /// Drop `.eml` files into a pickup directory
    Directory { path: PathBuf },
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::Smtp {
            host: default_host(),
            port: default_smtp_port(),
            helo: default_host(),
            timeout_secs: default_smtp_timeout(),
        }
    }
}

pub const CONFIG_ENV: &str = "MAILQ_CONFIG";

/// Find the configuration file using the following precedence:
/// 1. `MAILQ_CONFIG` environment variable
/// 2. ./mailq.config.ron (current working directory)
/// 3. /etc/mailq/mailq.config.ron (system-wide config)
pub fn find_config_file() -> anyhow::Result<PathBuf> {
    find_config_file_in(
        std::env::var_os(CONFIG_ENV).map(PathBuf::from),
        &[
            PathBuf::from("./mailq.config.ron"),
            PathBuf::from("/etc/mailq/mailq.config.ron"),
        ],
    )
}

fn find_config_file_in(from_env: Option<PathBuf>, default_paths: &[PathBuf]) -> anyhow::Result<PathBuf> {
    if let Some(path) = from_env {
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "{CONFIG_ENV} points to non-existent file: {}",
            path.display()
        );
    }

    if let Some(path) = default_paths.iter().find(|path| path.exists()) {
        return Ok(path.clone());
    }

    let paths_tried = default_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
    )
}

/// Read and parse a configuration file
pub fn load<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        anyhow::anyhow!("Failed to read config from {}: {e}", path.display())
    })?;

    ron::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse config {}: {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn transport_defaults() {
        let transport: TransportConfig = ron::from_str("Smtp()").expect("parse");
        assert_eq!(transport, TransportConfig::default());

        let transport: TransportConfig =
            ron::from_str(r#"Directory(path: "/srv/pickup")"#).expect("parse");
        assert_eq!(
            transport,
            TransportConfig::Directory {
                path: PathBuf::from("/srv/pickup")
            }
        );
    }

    #[test]
    fn env_path_wins() {
        let dir = tempfile::tempdir().expect("tempdir");
        let env_path = dir.path().join("env.ron");
        let local = dir.path().join("local.ron");
        std::fs::write(&env_path, "()").expect("write");
        std::fs::write(&local, "()").expect("write");

        let found = find_config_file_in(Some(env_path.clone()), &[local.clone()]).expect("found");
        assert_eq!(found, env_path);

        let found = find_config_file_in(None, &[dir.path().join("missing.ron"), local.clone()])
            .expect("found");
        assert_eq!(found, local);
    }

    #[test]
    fn missing_env_path_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = find_config_file_in(Some(dir.path().join("nope.ron")), &[])
            .expect_err("missing file");
        assert!(err.to_string().contains("MAILQ_CONFIG points to non-existent file"));
    }

    #[test]
    fn nothing_found_lists_paths() {
        let err = find_config_file_in(None, &[PathBuf::from("/definitely/not/here.ron")])
            .expect_err("nothing found");
        assert!(err.to_string().contains("/definitely/not/here.ron"));
    }
}
