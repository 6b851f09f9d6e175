#![forbid(unsafe_code)]

//! Runtime configuration for the backend.
//!
//! Values resolve in the same order everywhere: explicit override, then the
//! process environment, then the `.env` file, then the built-in default. Only
//! the two roots are mandatory; host and port fall back to local defaults.

use anyhow::{Context, Result, anyhow};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_ITUBE_PORT: u16 = 8080;
pub const DEFAULT_ITUBE_HOST: &str = "127.0.0.1";

/// Fully resolved configuration the backend starts from.
///
/// * `data_root` holds the playlist DB and the session file.
/// * `www_root` is the static frontend served behind the API routes.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    pub data_root: PathBuf,
    pub www_root: PathBuf,
    pub itube_port: u16,
    pub itube_host: String,
}

/// Values that take precedence over the environment, e.g. CLI flags.
#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub data_root: Option<PathBuf>,
    pub www_root: Option<PathBuf>,
    pub itube_port: Option<u16>,
    pub itube_host: Option<String>,
    pub env_path: Option<PathBuf>,
}

pub fn load_runtime_paths() -> Result<RuntimePaths> {
    resolve_runtime_paths(RuntimeOverrides::default())
}

pub fn resolve_runtime_paths(overrides: RuntimeOverrides) -> Result<RuntimePaths> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    resolve_with(&file_vars, env_var_string, overrides)
}

fn resolve_with(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> Result<RuntimePaths> {
    let lookup = |key: &str| env_lookup(key).or_else(|| file_vars.get(key).cloned());

    let data_root = overrides
        .data_root
        .map(|path| path.to_string_lossy().into_owned())
        .or_else(|| lookup("ITUBE_DATA_ROOT"))
        .ok_or_else(|| anyhow!("ITUBE_DATA_ROOT not set"))?;
    let www_root = overrides
        .www_root
        .map(|path| path.to_string_lossy().into_owned())
        .or_else(|| lookup("ITUBE_WWW_ROOT"))
        .ok_or_else(|| anyhow!("ITUBE_WWW_ROOT not set"))?;
    let itube_port = overrides
        .itube_port
        .or_else(|| lookup("ITUBE_PORT").and_then(|value| value.parse::<u16>().ok()))
        .unwrap_or(DEFAULT_ITUBE_PORT);
    let itube_host = overrides
        .itube_host
        .into_iter()
        .chain(lookup("ITUBE_HOST"))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_ITUBE_HOST.to_string());

    Ok(RuntimePaths {
        data_root: PathBuf::from(data_root),
        www_root: PathBuf::from(www_root),
        itube_port,
        itube_host,
    })
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Parses a `.env`-style file: `KEY=value` lines, optional `export` prefix,
/// optional single or double quotes, `#` comments. Missing file is fine.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
