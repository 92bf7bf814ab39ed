//! Application configuration for sitesort.
//!
//! User config lives at `~/.sitesort/sitesort.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SitesortError};
use crate::types::{ExtractionMethod, ProcessingConfig};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "sitesort.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".sitesort";

// ---------------------------------------------------------------------------
// Config structs (matching sitesort.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Per-batch processing defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Stage timeouts and event buffering.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Result database location.
    #[serde(default)]
    pub storage: StorageConfig,

    /// AI provider settings.
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// OCR engine settings.
    #[serde(default)]
    pub ocr: OcrConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Extraction method: "HTML", "OCR" or "BOTH".
    #[serde(default)]
    pub method: ExtractionMethod,

    /// Number of concurrent workers.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Run the browser without a visible window.
    #[serde(default = "default_true")]
    pub headless: bool,

    /// Send browser-like request headers.
    #[serde(default)]
    pub anti_detection: bool,

    /// Reprocess domains that already have a stored result.
    #[serde(default)]
    pub overwrite: bool,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            method: ExtractionMethod::Html,
            workers: default_workers(),
            headless: true,
            anti_detection: false,
            overwrite: false,
        }
    }
}

fn default_workers() -> usize {
    4
}
fn default_true() -> bool {
    true
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Fetch timeout used when anti-detection is on (slower, more realistic requests).
    #[serde(default = "default_anti_detection_fetch_timeout")]
    pub anti_detection_fetch_timeout_secs: u64,

    /// Deadline for text extraction, OCR included.
    #[serde(default = "default_extract_timeout")]
    pub extract_timeout_secs: u64,

    #[serde(default = "default_classify_timeout")]
    pub classify_timeout_secs: u64,

    /// Capacity of the progress event channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: default_fetch_timeout(),
            anti_detection_fetch_timeout_secs: default_anti_detection_fetch_timeout(),
            extract_timeout_secs: default_extract_timeout(),
            classify_timeout_secs: default_classify_timeout(),
            event_buffer: default_event_buffer(),
        }
    }
}

fn default_fetch_timeout() -> u64 {
    30
}
fn default_anti_detection_fetch_timeout() -> u64 {
    45
}
fn default_extract_timeout() -> u64 {
    60
}
fn default_classify_timeout() -> u64 {
    60
}
fn default_event_buffer() -> usize {
    256
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the libSQL database file (relative paths resolve against the working directory).
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "classification_results.db".into()
}

/// Which AI provider to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Azure when fully configured, otherwise OpenAI.
    #[default]
    Auto,
    #[serde(rename = "openai")]
    OpenAi,
    Azure,
}

/// `[classifier]` section. Secrets are never stored here, only env var names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default)]
    pub provider: ProviderKind,

    #[serde(default = "default_openai_key_env")]
    pub openai_api_key_env: String,

    #[serde(default = "default_openai_model")]
    pub openai_model: String,

    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,

    #[serde(default = "default_azure_key_env")]
    pub azure_api_key_env: String,

    #[serde(default = "default_azure_endpoint_env")]
    pub azure_endpoint_env: String,

    #[serde(default = "default_azure_deployment_env")]
    pub azure_deployment_env: String,

    #[serde(default = "default_azure_api_version")]
    pub azure_api_version: String,

    /// Maximum characters of extracted text sent to the model.
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Auto,
            openai_api_key_env: default_openai_key_env(),
            openai_model: default_openai_model(),
            openai_base_url: default_openai_base_url(),
            azure_api_key_env: default_azure_key_env(),
            azure_endpoint_env: default_azure_endpoint_env(),
            azure_deployment_env: default_azure_deployment_env(),
            azure_api_version: default_azure_api_version(),
            max_input_chars: default_max_input_chars(),
        }
    }
}

fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_openai_model() -> String {
    "gpt-4.1-nano".into()
}
fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_azure_key_env() -> String {
    "AZURE_OPENAI_API_KEY".into()
}
fn default_azure_endpoint_env() -> String {
    "AZURE_OPENAI_ENDPOINT".into()
}
fn default_azure_deployment_env() -> String {
    "AZURE_OPENAI_DEPLOYMENT_NAME".into()
}
fn default_azure_api_version() -> String {
    "2024-02-15-preview".into()
}
fn default_max_input_chars() -> usize {
    2800
}

/// `[ocr]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    /// Tesseract executable (name on PATH or absolute path).
    #[serde(default = "default_tesseract_cmd")]
    pub tesseract_cmd: String,

    #[serde(default = "default_ocr_language")]
    pub language: String,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            tesseract_cmd: default_tesseract_cmd(),
            language: default_ocr_language(),
        }
    }
}

fn default_tesseract_cmd() -> String {
    "tesseract".into()
}
fn default_ocr_language() -> String {
    "eng".into()
}

// ---------------------------------------------------------------------------
// Runtime config (merged from config + CLI flags)
// ---------------------------------------------------------------------------

impl From<&AppConfig> for ProcessingConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            method: config.defaults.method,
            headless: config.defaults.headless,
            anti_detection: config.defaults.anti_detection,
            workers: config.defaults.workers,
            overwrite: config.defaults.overwrite,
        }
    }
}

/// Runtime pipeline settings that are not part of a batch's processing config.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub fetch_timeout: Duration,
    pub anti_detection_fetch_timeout: Duration,
    pub extract_timeout: Duration,
    pub classify_timeout: Duration,
    pub event_buffer: usize,
}

impl PipelineSettings {
    /// Fetch deadline for a batch with the given anti-detection setting.
    pub fn fetch_timeout_for(&self, anti_detection: bool) -> Duration {
        if anti_detection {
            self.anti_detection_fetch_timeout
        } else {
            self.fetch_timeout
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for PipelineSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            fetch_timeout: Duration::from_secs(config.pipeline.fetch_timeout_secs),
            anti_detection_fetch_timeout: Duration::from_secs(
                config.pipeline.anti_detection_fetch_timeout_secs,
            ),
            extract_timeout: Duration::from_secs(config.pipeline.extract_timeout_secs),
            classify_timeout: Duration::from_secs(config.pipeline.classify_timeout_secs),
            event_buffer: config.pipeline.event_buffer.max(1),
        }
    }
}

// ---------------------------------------------------------------------------
// Provider resolution
// ---------------------------------------------------------------------------

/// Fully resolved AI provider settings, including secrets.
#[derive(Clone, PartialEq, Eq)]
pub enum ProviderConfig {
    OpenAi {
        api_key: String,
        model: String,
        base_url: String,
    },
    Azure {
        api_key: String,
        endpoint: String,
        deployment: String,
        api_version: String,
    },
}

impl ProviderConfig {
    /// Short provider name for logs and diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::OpenAi { .. } => "openai",
            Self::Azure { .. } => "azure",
        }
    }

    /// Model or deployment name used for requests.
    pub fn model(&self) -> &str {
        match self {
            Self::OpenAi { model, .. } => model,
            Self::Azure { deployment, .. } => deployment,
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAi { model, base_url, .. } => f
                .debug_struct("OpenAi")
                .field("model", model)
                .field("base_url", base_url)
                .finish_non_exhaustive(),
            Self::Azure {
                endpoint,
                deployment,
                api_version,
                ..
            } => f
                .debug_struct("Azure")
                .field("endpoint", endpoint)
                .field("deployment", deployment)
                .field("api_version", api_version)
                .finish_non_exhaustive(),
        }
    }
}

/// Resolve the provider from process environment variables.
pub fn resolve_provider(config: &ClassifierConfig) -> Result<ProviderConfig> {
    resolve_provider_with(config, |name| std::env::var(name).ok())
}

/// Resolve the provider using a custom variable lookup.
pub fn resolve_provider_with(
    config: &ClassifierConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ProviderConfig> {
    let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    let azure = || -> Option<ProviderConfig> {
        Some(ProviderConfig::Azure {
            api_key: var(&config.azure_api_key_env)?,
            endpoint: var(&config.azure_endpoint_env)?
                .trim_end_matches('/')
                .to_string(),
            deployment: var(&config.azure_deployment_env)?,
            api_version: config.azure_api_version.clone(),
        })
    };
    let openai = || -> Option<ProviderConfig> {
        Some(ProviderConfig::OpenAi {
            api_key: var(&config.openai_api_key_env)?,
            model: config.openai_model.clone(),
            base_url: config.openai_base_url.trim_end_matches('/').to_string(),
        })
    };

    let resolved = match config.provider {
        ProviderKind::Azure => azure(),
        ProviderKind::OpenAi => openai(),
        ProviderKind::Auto => azure().or_else(openai),
    };

    resolved.ok_or_else(|| {
        SitesortError::config(format!(
            "no AI provider configured. Set {} for OpenAI, or {}, {} and {} for Azure OpenAI.",
            config.openai_api_key_env,
            config.azure_api_key_env,
            config.azure_endpoint_env,
            config.azure_deployment_env,
        ))
    })
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.sitesort/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| SitesortError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.sitesort/sitesort.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| SitesortError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| SitesortError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| SitesortError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| SitesortError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| SitesortError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
