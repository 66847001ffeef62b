pub mod cache;
pub mod config;
pub mod convert;
pub mod errors;
pub mod key;
pub mod log_retention;
pub mod logging;
pub mod recorder;
pub mod replay;
pub mod runtime;
pub mod store;
pub mod types;
pub mod value;

use cache::{Cache, STORE_OPERATION};
use clap::{error::ErrorKind, CommandFactory, Parser, ValueEnum};
use config::{load_config, AppConfig, CliOverrides};
use errors::CacheError;
use key::Key;
use logging::{append_run_log, clear_run_logger, init_run_logger, JsonlLogger};
use replay::replay;
use runtime::ProductionRuntime;
use serde_json::json;
use store::open_store;
use types::BackendKind;
use value::StoredValue;

const DEFAULT_SAMPLES: [&str; 3] = ["foo", "bar", "42"];

#[derive(Debug, Clone, Parser)]
#[command(name = "callcache")]
#[command(about = "Store values under random keys and replay the recorded store calls")]
pub struct Cli {
    #[arg(long)]
    pub config: Option<std::path::PathBuf>,
    #[arg(long, value_enum)]
    pub backend: Option<CliBackend>,
    #[arg(long)]
    pub redis_url: Option<String>,
    #[arg(long)]
    pub sqlite_path: Option<std::path::PathBuf>,
    #[arg(long)]
    pub log_path: Option<std::path::PathBuf>,
    /// Sample value to store; integers and floats are detected, anything
    /// else is stored as text. Repeatable.
    #[arg(long = "value", allow_negative_numbers = true)]
    pub values: Vec<String>,
    /// Print the call log of an existing store without clearing it.
    #[arg(long, default_value_t = false)]
    pub replay_only: bool,
    #[arg(long, default_value = STORE_OPERATION)]
    pub operation: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CliBackend {
    Memory,
    Sqlite,
    Redis,
}

impl From<CliBackend> for BackendKind {
    fn from(value: CliBackend) -> Self {
        match value {
            CliBackend::Memory => BackendKind::Memory,
            CliBackend::Sqlite => BackendKind::Sqlite,
            CliBackend::Redis => BackendKind::Redis,
        }
    }
}

pub fn run() -> Result<i32, CacheError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let cwd = std::env::current_dir().map_err(|e| CacheError::Io(e.to_string()))?;
    let runtime = ProductionRuntime::new();
    run_with_runtime(&args, &cwd, &runtime)
}

pub fn run_with_runtime(
    args: &[std::ffi::OsString],
    cwd: &std::path::Path,
    runtime: &ProductionRuntime,
) -> Result<i32, CacheError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{error}");
                return Ok(0);
            }
            _ => return Err(CacheError::Cli(error.to_string())),
        },
    };

    if cli.operation.trim().is_empty() {
        return Err(CacheError::Cli("--operation must not be empty".to_string()));
    }

    let overrides = CliOverrides {
        config_path: cli.config.clone(),
        backend: cli.backend.map(Into::into),
        redis_url: cli.redis_url.clone(),
        sqlite_path: cli.sqlite_path.clone(),
        log_path: cli.log_path.clone(),
    };
    let cfg = load_config(&overrides, cwd, runtime.file_system.as_ref())?;
    let _run_logger = start_run_logger(&cfg, runtime)?;

    let store = open_store(&cfg.store)?;

    if cli.replay_only {
        let history = replay(store.as_ref(), &cli.operation, runtime.terminal.as_ref())?;
        append_run_log(
            "info",
            "cli.replay_only.complete",
            json!({ "operation": cli.operation, "calls": history.call_count() }),
        );
        return Ok(0);
    }

    let raw_samples = if cli.values.is_empty() {
        DEFAULT_SAMPLES.to_vec()
    } else {
        cli.values.iter().map(String::as_str).collect()
    };

    let cache = Cache::new(store)?;
    for sample in raw_samples.into_iter().map(StoredValue::parse_sample) {
        let key = cache.store(sample.clone())?;
        let line = match read_back(&cache, &key, &sample)? {
            Some(value) => format!("{key} -> {value}"),
            None => format!("{key} -> (absent)"),
        };
        runtime.terminal.write_line(&line)?;
    }

    let history = replay(
        cache.backing_store(),
        &cli.operation,
        runtime.terminal.as_ref(),
    )?;
    append_run_log(
        "info",
        "cli.demo.complete",
        json!({
            "backend": cfg.store.backend.as_str(),
            "operation": cli.operation,
            "calls": history.call_count(),
        }),
    );

    Ok(0)
}

/// Reads `key` back with the conversion that matches how `sample` was stored.
fn read_back(
    cache: &Cache,
    key: &Key,
    sample: &StoredValue,
) -> Result<Option<StoredValue>, CacheError> {
    Ok(match sample {
        StoredValue::Text(_) => cache.get_str(key)?.map(StoredValue::Text),
        StoredValue::Bytes(_) => cache.get_raw(key)?.map(StoredValue::Bytes),
        StoredValue::Int(_) => cache.get_int(key)?.map(StoredValue::Int),
        StoredValue::Float(_) => cache.get_float(key)?.map(StoredValue::Float),
    })
}

/// Uninstalls the run logger when a run returns, on success or error.
struct RunLoggerGuard;

impl Drop for RunLoggerGuard {
    fn drop(&mut self) {
        clear_run_logger();
    }
}

fn start_run_logger(
    cfg: &AppConfig,
    runtime: &ProductionRuntime,
) -> Result<Option<RunLoggerGuard>, CacheError> {
    let Some(path) = &cfg.logging.path else {
        return Ok(None);
    };
    if let Some(parent) = path.parent() {
        runtime.file_system.create_dir_all(parent)?;
    }
    let mut logger = JsonlLogger::new(path);
    logger.max_payload_bytes = cfg.logging.max_payload_bytes;
    logger.budget_bytes = cfg.logging.budget_bytes;
    init_run_logger(logger);
    append_run_log(
        "info",
        "cli.start",
        json!({ "backend": cfg.store.backend.as_str() }),
    );
    Ok(Some(RunLoggerGuard))
}

pub fn render_help() -> Result<String, CacheError> {
    let mut cmd = Cli::command();
    let mut buffer = Vec::new();
    cmd.write_long_help(&mut buffer)
        .map_err(|e| CacheError::Io(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| CacheError::Io(e.to_string()))
}
