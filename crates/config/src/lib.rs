use anyhow::{Context, Result};
use do_ecf_core::ServiceEnv;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const APP_NAME: &str = "do-ecf-tracker";
const KEYCHAIN_SERVICE: &str = "do.ecf.credentials";
const ACCESS_TOKEN_KEY: &str = "ecf_api_token";
const ACCESS_TOKEN_ENV: &str = "ECF_API_TOKEN";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub company: CompanyConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayKind {
    #[default]
    Mock,
    Http,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub kind: GatewayKind,
    pub api_url: Option<String>,
    pub result_api_url: Option<String>,
    #[serde(default)]
    pub service_env: ServiceEnv,
    /// Unset keeps the transport default.
    pub request_timeout_secs: Option<u64>,
}

impl GatewayConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Names the first missing setting the HTTP gateway needs.
    pub fn missing_setting(&self) -> Option<&'static str> {
        let blank = |v: &Option<String>| v.as_deref().map_or(true, |s| s.trim().is_empty());
        match self.kind {
            GatewayKind::Mock => None,
            GatewayKind::Http if blank(&self.api_url) => Some("gateway.api_url"),
            GatewayKind::Http if blank(&self.result_api_url) => Some("gateway.result_api_url"),
            GatewayKind::Http => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

fn default_storage_path() -> PathBuf {
    PathBuf::from(".ecf_documents")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_audit_path")]
    pub path: PathBuf,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            path: default_audit_path(),
        }
    }
}

fn default_audit_path() -> PathBuf {
    PathBuf::from("audit.jsonl")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyConfig {
    /// Flags every payload with `IndicadorEnvioDiferido`.
    #[serde(default)]
    pub deferred_submissions: bool,
    /// Immediate-terms documents wait for their payment before being sent.
    #[serde(default = "default_true")]
    pub send_on_payment: bool,
}

impl Default for CompanyConfig {
    fn default() -> Self {
        Self {
            deferred_submissions: false,
            send_on_payment: true,
        }
    }
}

fn default_true() -> bool {
    true
}

pub fn load() -> Result<AppConfig> {
    let cfg: AppConfig = confy::load(APP_NAME, None).context("Failed to load app config")?;
    Ok(cfg)
}

pub fn store(cfg: &AppConfig) -> Result<()> {
    confy::store(APP_NAME, None, cfg).context("Failed to store app config")?;
    Ok(())
}

pub fn config_path() -> Result<PathBuf> {
    confy::get_configuration_file_path(APP_NAME, None).context("Failed to resolve config path")
}

/// Store a secret in the OS keychain
pub fn store_secret(key: &str, value: &str) -> Result<()> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, key)?;
    entry.set_password(value)?;
    Ok(())
}

/// Retrieve a secret from the OS keychain
pub fn get_secret(key: &str) -> Result<String> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, key)?;
    let password = entry.get_password()?;
    Ok(password)
}

/// Gateway access token from `ECF_API_TOKEN`, falling back to the keychain.
pub fn access_token() -> Option<String> {
    std::env::var(ACCESS_TOKEN_ENV)
        .or_else(|_| get_secret(ACCESS_TOKEN_KEY))
        .ok()
        .filter(|t| !t.trim().is_empty())
}

pub fn store_access_token(token: &str) -> Result<()> {
    store_secret(ACCESS_TOKEN_KEY, token).context("Failed to store access token in keychain")
}
