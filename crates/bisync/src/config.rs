//! JSON configuration for the `bisync` binary.

use bisync_core::{DEFAULT_HASH_CONCURRENCY, Endpoint, FailurePolicy};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

/// Environment variable naming the config file when `--config` is absent.
pub const CONFIG_ENV: &str = "BISYNC_CONFIG";

/// Name of the state directory created inside the local root by default.
pub const DEFAULT_STATE_DIR: &str = ".bisync";


#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No config file given: pass --config or set BISYNC_CONFIG")]
    MissingConfig,

    #[error("Failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Unknown endpoint: {0}")]
    UnknownEndpoint(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    /// A directory used as an object store.
    Folder,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    pub name: String,
    pub kind: EndpointKind,
    pub path: PathBuf,
    pub prefix: String,
}

impl EndpointConfig {
    /// Path of this endpoint's sync baseline, relative to the state directory.
    pub fn baseline_file(&self) -> String {
        Endpoint::sync_baseline_file(&self.name)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub local_root: PathBuf,
    pub state_dir: PathBuf,
    pub failure_policy: FailurePolicy,
    pub hash_concurrency: usize,
    /// Top-level names skipped in the local tree (the state directory included).
    pub ignore: Vec<String>,
    pub endpoints: Vec<EndpointConfig>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawConfig {
    local_root: String,
    #[serde(default)]
    state_dir: Option<String>,
    #[serde(default)]
    failure_policy: FailurePolicy,
    #[serde(default = "default_hash_concurrency")]
    hash_concurrency: usize,
    #[serde(default)]
    ignore: Vec<String>,
    endpoints: Vec<RawEndpoint>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawEndpoint {
    name: String,
    kind: EndpointKind,
    path: String,
    #[serde(default)]
    prefix: String,
}

fn default_hash_concurrency() -> usize {
    DEFAULT_HASH_CONCURRENCY
}

impl Config {
    /// Load from `--config`, falling back to `BISYNC_CONFIG`.
    pub fn load(cli_path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = resolve_config_path(cli_path, std::env::var(CONFIG_ENV).ok())?;
        Self::from_file(&path)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: RawConfig = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_raw(raw, base_dir)
    }

    /// Parse config text; relative paths resolve against `base_dir`.
    pub fn from_json(text: &str, base_dir: &Path) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        Self::from_raw(raw, base_dir)
    }

    fn from_raw(raw: RawConfig, base_dir: &Path) -> Result<Self, ConfigError> {
        let local_root = resolve_path(&raw.local_root, base_dir);
        let state_dir = match &raw.state_dir {
            Some(dir) => resolve_path(dir, base_dir),
            None => local_root.join(DEFAULT_STATE_DIR),
        };

        if raw.hash_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "hashConcurrency must be at least 1".into(),
            ));
        }

        let mut ignore = raw.ignore;
        if let Some(name) = state_dir_entry(&local_root, &state_dir)? {
            if !ignore.contains(&name) {
                ignore.push(name);
            }
        }

        let mut seen = HashSet::new();
        let mut endpoints = Vec::with_capacity(raw.endpoints.len());
        for endpoint in raw.endpoints {
            validate_endpoint_name(&endpoint.name)?;
            if !seen.insert(endpoint.name.clone()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate endpoint name '{}'",
                    endpoint.name
                )));
            }
            endpoints.push(EndpointConfig {
                name: endpoint.name,
                kind: endpoint.kind,
                path: resolve_path(&endpoint.path, base_dir),
                prefix: endpoint.prefix,
            });
        }
        if endpoints.is_empty() {
            return Err(ConfigError::Invalid("at least one endpoint is required".into()));
        }

        Ok(Self {
            local_root,
            state_dir,
            failure_policy: raw.failure_policy,
            hash_concurrency: raw.hash_concurrency,
            ignore,
            endpoints,
        })
    }
}

/// `--config` wins over the environment.
pub fn resolve_config_path(
    cli_path: Option<&Path>,
    env_value: Option<String>,
) -> Result<PathBuf, ConfigError> {
    if let Some(path) = cli_path {
        return Ok(path.to_path_buf());
    }
    match env_value {
        Some(value) if !value.trim().is_empty() => Ok(expand_tilde(value.trim())),
        _ => Err(ConfigError::MissingConfig),
    }
}

fn resolve_path(value: &str, base_dir: &Path) -> PathBuf {
    let path = expand_tilde(value);
    if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    }
}

/// Expand ~ or ~/ prefix to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"))
    } else if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path))
    } else {
        PathBuf::from(path)
    }
}

/// Top-level name to hide from the local listing when the state directory
/// lives inside the local root.
fn state_dir_entry(local_root: &Path, state_dir: &Path) -> Result<Option<String>, ConfigError> {
    let Ok(relative) = state_dir.strip_prefix(local_root) else {
        return Ok(None);
    };
    let components: Vec<Component> = relative.components().collect();
    match components.as_slice() {
        [] => Err(ConfigError::Invalid(
            "stateDir must not be the local root itself".into(),
        )),
        [Component::Normal(name)] => Ok(Some(name.to_string_lossy().to_string())),
        _ => Err(ConfigError::Invalid(
            "stateDir inside localRoot must be a direct child of it".into(),
        )),
    }
}

fn validate_endpoint_name(name: &str) -> Result<(), ConfigError> {
    if name.trim().is_empty() {
        return Err(ConfigError::Invalid("endpoint name must not be empty".into()));
    }
    if name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(ConfigError::Invalid(format!(
            "endpoint name '{}' must be usable as a file name",
            name
        )));
    }
    // "x.local" would share a file with the local baseline of "x"
    if name.ends_with(".local") {
        return Err(ConfigError::Invalid(format!(
            "endpoint name '{}' must not end in '.local'",
            name
        )));
    }
    Ok(())
}
