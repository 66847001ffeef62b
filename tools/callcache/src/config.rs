use crate::errors::CacheError;
use crate::logging::{DEFAULT_DISK_BUDGET_BYTES, DEFAULT_MAX_PAYLOAD_BYTES};
use crate::runtime::FileSystem;
use crate::types::BackendKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379/0";
pub const DEFAULT_SQLITE_PATH: &str = ".cache/callcache/store.sqlite";

#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub backend: Option<BackendKind>,
    pub redis_url: Option<String>,
    pub sqlite_path: Option<PathBuf>,
    pub log_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreConfig {
    pub backend: BackendKind,
    pub redis_url: String,
    pub sqlite_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    pub path: Option<PathBuf>,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig {
                backend: BackendKind::Memory,
                redis_url: DEFAULT_REDIS_URL.to_string(),
                sqlite_path: PathBuf::from(DEFAULT_SQLITE_PATH),
            },
            logging: LoggingConfig {
                path: None,
                max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
                budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialAppConfig {
    store: Option<PartialStoreConfig>,
    logging: Option<PartialLoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialStoreConfig {
    backend: Option<BackendKind>,
    redis_url: Option<String>,
    sqlite_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialLoggingConfig {
    path: Option<PathBuf>,
    max_payload_bytes: Option<usize>,
    budget_bytes: Option<u64>,
}

/// Defaults, then the config file, then CLI overrides. Relative paths are
/// resolved against `process_cwd`.
pub fn load_config(
    overrides: &CliOverrides,
    process_cwd: &Path,
    fs: &dyn FileSystem,
) -> Result<AppConfig, CacheError> {
    let mut cfg = AppConfig::default();

    if let Some(path) = &overrides.config_path {
        let file_contents = fs.read_to_string(path)?;
        let partial: PartialAppConfig = toml::from_str(&file_contents)
            .map_err(|e| CacheError::ConfigParse(e.to_string()))?;
        merge_partial_config(&mut cfg, partial);
    }

    apply_cli_overrides(&mut cfg, overrides);
    validate_config(&cfg)?;
    resolve_paths(&mut cfg, process_cwd);
    Ok(cfg)
}

fn merge_partial_config(cfg: &mut AppConfig, partial: PartialAppConfig) {
    if let Some(store) = partial.store {
        if let Some(backend) = store.backend {
            cfg.store.backend = backend;
        }
        if let Some(redis_url) = store.redis_url {
            cfg.store.redis_url = redis_url;
        }
        if let Some(sqlite_path) = store.sqlite_path {
            cfg.store.sqlite_path = sqlite_path;
        }
    }

    if let Some(logging) = partial.logging {
        if let Some(path) = logging.path {
            cfg.logging.path = Some(path);
        }
        if let Some(value) = logging.max_payload_bytes {
            cfg.logging.max_payload_bytes = value;
        }
        if let Some(value) = logging.budget_bytes {
            cfg.logging.budget_bytes = value;
        }
    }
}

fn apply_cli_overrides(cfg: &mut AppConfig, overrides: &CliOverrides) {
    if let Some(backend) = overrides.backend {
        cfg.store.backend = backend;
    }
    if let Some(redis_url) = &overrides.redis_url {
        cfg.store.redis_url = redis_url.clone();
    }
    if let Some(sqlite_path) = &overrides.sqlite_path {
        cfg.store.sqlite_path = sqlite_path.clone();
    }
    if let Some(log_path) = &overrides.log_path {
        cfg.logging.path = Some(log_path.clone());
    }
}

fn resolve_paths(cfg: &mut AppConfig, process_cwd: &Path) {
    cfg.store.sqlite_path = absolutize_path(process_cwd, &cfg.store.sqlite_path);
    if let Some(path) = &cfg.logging.path {
        cfg.logging.path = Some(absolutize_path(process_cwd, path));
    }
}

fn absolutize_path(base: &Path, value: &Path) -> PathBuf {
    if value.is_absolute() {
        value.to_path_buf()
    } else {
        base.join(value)
    }
}

fn validate_config(cfg: &AppConfig) -> Result<(), CacheError> {
    match cfg.store.backend {
        BackendKind::Memory => {}
        BackendKind::Sqlite => {
            if cfg.store.sqlite_path.as_os_str().is_empty() {
                return Err(CacheError::InvalidConfig(
                    "store.sqlite_path must not be empty".to_string(),
                ));
            }
        }
        BackendKind::Redis => {
            let url = cfg.store.redis_url.trim();
            let known_scheme = ["redis://", "rediss://", "unix://", "redis+unix://"]
                .iter()
                .any(|scheme| url.starts_with(scheme));
            if !known_scheme {
                return Err(CacheError::InvalidConfig(format!(
                    "store.redis_url must be a redis:// url, got {url:?}"
                )));
            }
        }
    }

    if cfg.logging.max_payload_bytes == 0 {
        return Err(CacheError::InvalidConfig(
            "logging.max_payload_bytes must be greater than zero".to_string(),
        ));
    }

    Ok(())
}
