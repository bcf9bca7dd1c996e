use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

const APP_NAME: &str = "invoice-processor";
const KEYCHAIN_SERVICE: &str = "invoice-processor.credentials";

pub const CONFIG_PATH_ENV: &str = "INVPROC_CONFIG";
pub const BIND_ADDR_ENV: &str = "INVPROC_BIND_ADDR";

pub const KLEARSTACK_PASSWORD: &str = "KLEARSTACK_PASSWORD";
pub const GST_API_KEY: &str = "GST_API_KEY";
pub const QR_API_TOKEN: &str = "QR_API_TOKEN";
pub const STORAGE_SIGNING_SECRET: &str = "STORAGE_SIGNING_SECRET";
pub const EVENTS_TOKEN: &str = "EVENTS_TOKEN";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub gst: GstConfig,
    #[serde(default)]
    pub qr: QrConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    #[serde(default = "default_ocr_kind")]
    pub kind: String, // "mock" | "klearstack"
    pub base_url: Option<String>,
    pub username: Option<String>,
    pub company_id: Option<String>,
    #[serde(default = "default_document_type")]
    pub document_type: String,
    #[serde(default = "default_preference")]
    pub preference: String,
    /// Status polls the mock provider answers `processing` before completing.
    #[serde(default = "default_mock_polls")]
    pub mock_polls_before_complete: u32,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            kind: default_ocr_kind(),
            base_url: None,
            username: None,
            company_id: None,
            document_type: default_document_type(),
            preference: default_preference(),
            mock_polls_before_complete: default_mock_polls(),
        }
    }
}

fn default_ocr_kind() -> String {
    "mock".to_string()
}

fn default_document_type() -> String {
    "invoice".to_string()
}

fn default_preference() -> String {
    "accuracy".to_string()
}

fn default_mock_polls() -> u32 {
    1
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GstConfig {
    pub base_url: Option<String>,
    pub api_key_header: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QrConfig {
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for QrConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub root: String,
    pub bucket: String,
    pub public_base_url: String,
    pub signed_url_ttl_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: "data/objects".to_string(),
            bucket: "invoices".to_string(),
            public_base_url: "http://127.0.0.1:8080".to_string(),
            signed_url_ttl_secs: 3_600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub sled_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sled_path: "data/invproc.sled".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    pub interval_ms: u64,
    pub max_duration_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            max_duration_ms: 300_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventsConfig {
    pub url: Option<String>,
}

/// Loads from `INVPROC_CONFIG` when set, otherwise the per-user location.
/// A missing file is created with defaults.
pub fn load() -> Result<AppConfig> {
    let mut cfg = match std::env::var(CONFIG_PATH_ENV) {
        Ok(path) if !path.trim().is_empty() => load_from(Path::new(&path))?,
        _ => confy::load(APP_NAME, None).context("Failed to load app config")?,
    };
    if let Ok(addr) = std::env::var(BIND_ADDR_ENV) {
        if !addr.trim().is_empty() {
            cfg.server.bind_addr = addr;
        }
    }
    Ok(cfg)
}

pub fn load_from(path: &Path) -> Result<AppConfig> {
    confy::load_path(path).with_context(|| format!("Failed to load config from {}", path.display()))
}

/// Reads `key` from the OS keychain entry for this service.
fn keychain_secret(key: &str) -> Result<String> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, key)?;
    let password = entry.get_password()?;
    Ok(password)
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Environment first, then the OS keychain. `None` when neither has it.
pub fn resolve_secret(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .and_then(non_empty)
        .or_else(|| keychain_secret(key).ok().and_then(non_empty))
}

pub fn require_secret(key: &str) -> Result<String> {
    resolve_secret(key).ok_or_else(|| anyhow!("{key} is not set in the environment or keychain"))
}
