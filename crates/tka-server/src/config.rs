//! Layered settings (spec.md §6 "CLI"): CLI flag > environment variable >
//! config file > built-in default, frozen once at startup into an immutable
//! [`Settings`]. Generalizes the teacher's `dotenvy`-then-env-var startup
//! sequence (`api-server/src/main.rs`) into a proper three-source merge,
//! since this system additionally needs a config file (spec.md §10).

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// `tka serve` / `tka version` (spec.md §6 "CLI").
#[derive(Parser, Debug)]
#[command(name = "tka", about = "Temporary Kubernetes credential broker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the overlay connection, reconciler, gossip client, and HTTP surface.
    Serve(ServeArgs),
    /// Print the version and exit.
    Version,
}

/// Every flag is `Option`-typed and carries no `default_value`: whether it
/// was supplied by the user (flag or env var, clap checks the flag first)
/// has to stay distinguishable from "unset", so [`Settings::merge`] can fall
/// through to the config file and then the built-in default.
#[derive(Parser, Debug, Clone, Default)]
pub struct ServeArgs {
    /// Path to a config file (YAML), keys lower-snake, dotted for nesting.
    #[arg(short = 'c', long, env = "TKA_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "TKA_DEBUG")]
    pub debug: bool,

    /// Overlay hostname.
    #[arg(short = 's', long = "server", env = "TKA_SERVER")]
    pub server: Option<String>,

    /// Overlay service port.
    #[arg(short = 'p', long = "port", env = "TKA_PORT")]
    pub port: Option<u16>,

    /// Overlay state directory.
    #[arg(short = 'd', long = "dir", env = "TKA_DIR")]
    pub dir: Option<PathBuf>,

    /// Capability annotation/tag name to decode rules from.
    #[arg(short = 'n', long = "cap-name", env = "TKA_CAP_NAME")]
    pub cap_name: Option<String>,

    #[arg(long = "health-port", env = "TKA_HEALTH_PORT")]
    pub health_port: Option<u16>,

    /// Managed cluster's API server URL.
    #[arg(long = "api-endpoint", env = "TKA_API_ENDPOINT")]
    pub api_endpoint: Option<String>,

    /// Base64 PEM certificate-authority bundle for the managed cluster.
    #[arg(long = "ca-data", env = "TKA_CA_DATA")]
    pub ca_data: Option<String>,

    #[arg(long = "insecure-skip-tls-verify", env = "TKA_INSECURE_SKIP_TLS_VERIFY")]
    pub insecure_skip_tls_verify: bool,

    /// `key=value,...` labels attached to the cluster info document.
    #[arg(long = "labels", env = "TKA_LABELS")]
    pub labels: Option<String>,
}

/// Mirrors [`ServeArgs`], deserialized from the config file (spec.md §6:
/// "lower-snake dotted keys").
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
struct ConfigFile {
    debug: Option<bool>,
    server: Option<String>,
    port: Option<u16>,
    dir: Option<PathBuf>,
    cap_name: Option<String>,
    health_port: Option<u16>,
    api_endpoint: Option<String>,
    ca_data: Option<String>,
    insecure_skip_tls_verify: Option<bool>,
    labels: Option<BTreeMap<String, String>>,
    /// Not part of the CLI flag table; only ever set via config file
    /// (spec.md §4.F: "a configurable integer seconds").
    retry_after_secs: Option<u64>,
}

pub const DEFAULT_OVERLAY_PORT: u16 = 443;
pub const DEFAULT_CAP_NAME: &str = "specht-labs.de/cap/tka";
pub const DEFAULT_HEALTH_PORT: u16 = 8080;
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// The frozen, fully-resolved configuration every other component borrows
/// from. Built once in `tka-cli`'s `serve` entrypoint and handed down as an
/// `Arc<Settings>`.
#[derive(Debug, Clone)]
pub struct Settings {
    pub debug: bool,
    pub overlay_hostname: String,
    pub overlay_port: u16,
    pub overlay_state_dir: PathBuf,
    pub cap_name: String,
    pub health_port: u16,
    pub api_endpoint: String,
    pub ca_data: String,
    pub insecure_skip_tls_verify: bool,
    pub labels: BTreeMap<String, String>,
    pub retry_after_secs: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read config file {0:?}: {1}")]
    ReadConfig(PathBuf, std::io::Error),
    #[error("failed to parse config file {0:?}: {1}")]
    ParseConfig(PathBuf, serde_yaml::Error),
    #[error("invalid --labels entry {0:?}: expected key=value")]
    InvalidLabel(String),
}

impl Settings {
    /// Performs the three-source merge described in spec.md §6: CLI flag
    /// (clap's `env` attribute already makes this "flag-or-env") wins,
    /// then config file, then built-in default.
    pub fn load(args: &ServeArgs) -> Result<Self, SettingsError> {
        let file = match &args.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .map_err(|err| SettingsError::ReadConfig(path.clone(), err))?;
                serde_yaml::from_str::<ConfigFile>(&raw)
                    .map_err(|err| SettingsError::ParseConfig(path.clone(), err))?
            }
            None => ConfigFile::default(),
        };

        let labels = match &args.labels {
            Some(raw) => parse_labels(raw)?,
            None => file.labels.unwrap_or_default(),
        };

        Ok(Settings {
            debug: args.debug || file.debug.unwrap_or(false),
            overlay_hostname: args.server.clone().or(file.server).unwrap_or_default(),
            overlay_port: args.port.or(file.port).unwrap_or(DEFAULT_OVERLAY_PORT),
            overlay_state_dir: args.dir.clone().or(file.dir).unwrap_or_default(),
            cap_name: args
                .cap_name
                .clone()
                .or(file.cap_name)
                .unwrap_or_else(|| DEFAULT_CAP_NAME.to_string()),
            health_port: args.health_port.or(file.health_port).unwrap_or(DEFAULT_HEALTH_PORT),
            api_endpoint: args.api_endpoint.clone().or(file.api_endpoint).unwrap_or_default(),
            ca_data: args.ca_data.clone().or(file.ca_data).unwrap_or_default(),
            insecure_skip_tls_verify: args.insecure_skip_tls_verify
                || file.insecure_skip_tls_verify.unwrap_or(false),
            labels,
            retry_after_secs: file.retry_after_secs.unwrap_or(DEFAULT_RETRY_AFTER_SECS),
        })
    }
}

fn parse_labels(raw: &str) -> Result<BTreeMap<String, String>, SettingsError> {
    raw.split(',')
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .ok_or_else(|| SettingsError::InvalidLabel(entry.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flag_wins_over_config_file_default() {
        let args = ServeArgs {
            port: Some(8443),
            ..Default::default()
        };
        let settings = Settings::load(&args).unwrap();
        assert_eq!(settings.overlay_port, 8443);
    }

    #[test]
    fn unset_flags_fall_back_to_defaults() {
        let settings = Settings::load(&ServeArgs::default()).unwrap();
        assert_eq!(settings.overlay_port, DEFAULT_OVERLAY_PORT);
        assert_eq!(settings.cap_name, DEFAULT_CAP_NAME);
        assert_eq!(settings.health_port, DEFAULT_HEALTH_PORT);
        assert_eq!(settings.retry_after_secs, DEFAULT_RETRY_AFTER_SECS);
    }

    #[test]
    fn labels_parse_as_comma_separated_pairs() {
        let args = ServeArgs {
            labels: Some("region=us-west,tier=prod".to_string()),
            ..Default::default()
        };
        let settings = Settings::load(&args).unwrap();
        assert_eq!(settings.labels.get("region").map(String::as_str), Some("us-west"));
        assert_eq!(settings.labels.get("tier").map(String::as_str), Some("prod"));
    }

    #[test]
    fn malformed_label_entry_is_rejected() {
        let args = ServeArgs {
            labels: Some("not-a-pair".to_string()),
            ..Default::default()
        };
        assert!(Settings::load(&args).is_err());
    }
}
