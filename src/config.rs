//! Structured startup configuration, loaded from a config file (TOML, YAML,
//! or JSON, inferred from extension) with environment overrides.

use std::collections::HashSet;
use std::path::Path;

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{FirewallError, Result};

fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}
fn default_listen_port() -> u16 {
    502
}
fn default_plc_host() -> String {
    "127.0.0.1".to_string()
}
fn default_plc_port() -> u16 {
    5020
}
fn default_connection_timeout_s() -> u64 {
    5
}
fn default_client_idle_timeout_s() -> u64 {
    60
}
fn default_upstream_read_timeout_s() -> u64 {
    5
}
fn default_allowed_function_codes() -> HashSet<u8> {
    [0x01, 0x02, 0x03, 0x04].into_iter().collect()
}
fn default_blocked_function_codes() -> HashSet<u8> {
    [0x05, 0x06, 0x0F, 0x10].into_iter().collect()
}
fn default_rate_limit_rps() -> u32 {
    100
}
fn default_log_file_path() -> String {
    "modbus_firewall.log.csv".to_string()
}
fn default_log_rotate_bytes() -> u64 {
    10 * 1024 * 1024
}
fn default_log_backup_count() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallConfig {
    #[serde(default = "default_listen_host")]
    pub listen_host: String,

    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    #[serde(default = "default_plc_host")]
    pub plc_host: String,

    #[serde(default = "default_plc_port")]
    pub plc_port: u16,

    #[serde(default = "default_connection_timeout_s")]
    pub connection_timeout_s: u64,

    #[serde(default = "default_client_idle_timeout_s")]
    pub client_idle_timeout_s: u64,

    #[serde(default = "default_upstream_read_timeout_s")]
    pub upstream_read_timeout_s: u64,

    #[serde(default = "default_allowed_function_codes")]
    pub allowed_function_codes: HashSet<u8>,

    #[serde(default = "default_blocked_function_codes")]
    pub blocked_function_codes: HashSet<u8>,

    #[serde(default)]
    pub write_allowed_ips: HashSet<String>,

    #[serde(default = "default_rate_limit_rps")]
    pub rate_limit_rps: u32,

    #[serde(default = "default_log_file_path")]
    pub log_file_path: String,

    #[serde(default = "default_log_rotate_bytes")]
    pub log_rotate_bytes: u64,

    #[serde(default = "default_log_backup_count")]
    pub log_backup_count: u32,
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            listen_host: default_listen_host(),
            listen_port: default_listen_port(),
            plc_host: default_plc_host(),
            plc_port: default_plc_port(),
            connection_timeout_s: default_connection_timeout_s(),
            client_idle_timeout_s: default_client_idle_timeout_s(),
            upstream_read_timeout_s: default_upstream_read_timeout_s(),
            allowed_function_codes: default_allowed_function_codes(),
            blocked_function_codes: default_blocked_function_codes(),
            write_allowed_ips: HashSet::new(),
            rate_limit_rps: default_rate_limit_rps(),
            log_file_path: default_log_file_path(),
            log_rotate_bytes: default_log_rotate_bytes(),
            log_backup_count: default_log_backup_count(),
        }
    }
}

impl FirewallConfig {
    /// Load configuration with priority: file (if present) > `FIREWALL_*`
    /// environment variables > built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(FirewallConfig::default()));

        if let Some(path) = path {
            if !path.exists() {
                return Err(FirewallError::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            figment = match path.extension().and_then(|e| e.to_str()) {
                Some("yaml") | Some("yml") => figment.merge(Yaml::file(path)),
                Some("json") => figment.merge(Json::file(path)),
                _ => figment.merge(Toml::file(path)),
            };
        }

        figment
            .merge(Env::prefixed("FIREWALL_"))
            .extract()
            .map_err(|e| FirewallError::Config(e.to_string()))
    }

    pub fn to_security_policy(&self) -> crate::policy::SecurityPolicy {
        crate::policy::SecurityPolicy {
            allowed_function_codes: self.allowed_function_codes.clone(),
            blocked_function_codes: self.blocked_function_codes.clone(),
            write_allowed_ips: self.write_allowed_ips.clone(),
            rate_limit_rps: self.rate_limit_rps,
        }
    }
}
