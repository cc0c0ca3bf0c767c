//! Configuration loading and validation.
//!
//! A single TOML file lists the templates to keep in sync. Shared settings go
//! in an optional `[defaults]` table that every `[[template]]` entry inherits
//! and may override:
//!
//! ```text
//! confetch.toml
//! ├── interval                 # seconds between passes in `watch` mode
//! ├── [defaults]               # applied under every template
//! └── [[template]]             # one per rendered file (overrides defaults)
//! ```
//!
//! ## Configuration Options
//!
//! ```toml
//! interval = 30
//!
//! [defaults]
//! timeout = 5
//! bearer_token = "/run/secrets/discovery-token"
//!
//! [[template]]
//! name = "haproxy"
//! urls = ["http://discovery-a/backends", "http://discovery-b/backends"]
//! src = "/etc/confetch/haproxy.cfg.j2"
//! dest = "/etc/haproxy/haproxy.cfg"
//! check_cmd = "haproxy -c -f /etc/haproxy/haproxy.cfg"
//! reload_cmd = "systemctl reload haproxy"
//!
//! [template.headers]
//! Host = "discovery.internal"
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Top-level configuration, built by [`parse_config`] after defaults are applied.
#[derive(Debug, Clone)]
pub struct Config {
    /// Seconds between passes in `watch` mode.
    pub interval: u64,
    pub templates: Vec<TemplateConfig>,
}

/// One template to fetch, render and commit.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateConfig {
    /// Label used in logs and output. Defaults to the destination file name.
    #[serde(default)]
    pub name: Option<String>,
    /// Endpoints tried in order until one answers 200 with a body.
    pub urls: Vec<String>,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Template source file.
    pub src: PathBuf,
    /// Rendered output file.
    pub dest: PathBuf,
    /// Runs after a change, before `reload_cmd`. A failure skips the reload.
    #[serde(default)]
    pub check_cmd: Option<String>,
    #[serde(default)]
    pub reload_cmd: Option<String>,
    /// Sent as the `Content-Encoding` request header. Only `gzip` is accepted.
    #[serde(default)]
    pub content_encoding: Option<String>,
    /// Extra request headers. `Host` overrides the request host.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// HTTP basic auth credentials.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// File holding a bearer token, re-read on every request.
    #[serde(default)]
    pub bearer_token: Option<PathBuf>,
}

fn default_interval() -> u64 {
    30
}

fn default_timeout() -> u64 {
    5
}

impl TemplateConfig {
    /// Display label: `name`, else the destination file name.
    pub fn label(&self) -> String {
        match (&self.name, self.dest.file_name()) {
            (Some(name), _) => name.clone(),
            (None, Some(file)) => file.to_string_lossy().into_owned(),
            (None, None) => self.dest.display().to_string(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let label = self.label();
        if self.urls.is_empty() {
            return Err(ConfigError::Validation(format!(
                "template {label}: urls must not be empty"
            )));
        }
        if self.src.as_os_str().is_empty() || self.dest.as_os_str().is_empty() {
            return Err(ConfigError::Validation(format!(
                "template {label}: src and dest must be set"
            )));
        }
        if self.timeout == 0 {
            return Err(ConfigError::Validation(format!(
                "template {label}: timeout must be positive"
            )));
        }
        if let Some(encoding) = &self.content_encoding
            && !encoding.is_empty()
            && encoding != "gzip"
        {
            return Err(ConfigError::Validation(format!(
                "template {label}: unsupported content_encoding {encoding:?} (only \"gzip\")"
            )));
        }
        Ok(())
    }
}

impl Config {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval == 0 {
            return Err(ConfigError::Validation("interval must be positive".into()));
        }
        if self.templates.is_empty() {
            return Err(ConfigError::Validation(
                "at least one [[template]] is required".into(),
            ));
        }
        for template in &self.templates {
            template.validate()?;
        }
        Ok(())
    }
}

/// File layout before defaults are applied.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default = "default_interval")]
    interval: u64,
    #[serde(default)]
    defaults: Option<toml::Value>,
    #[serde(default)]
    template: Vec<toml::Value>,
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Parse config text: apply `[defaults]` under each template, then validate.
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let raw: RawConfig = toml::from_str(content)?;
    let defaults = raw
        .defaults
        .unwrap_or_else(|| toml::Value::Table(toml::Table::new()));
    let templates = raw
        .template
        .into_iter()
        .map(|entry| {
            let merged = merge_toml(defaults.clone(), entry);
            merged.try_into::<TemplateConfig>()
        })
        .collect::<Result<Vec<_>, _>>()?;
    let config = Config {
        interval: raw.interval,
        templates,
    };
    config.validate()?;
    Ok(config)
}

/// Load and validate the config file at `path`.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Returns a fully-commented sample `confetch.toml`.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# confetch configuration
# =====================
# Each [[template]] fetches JSON from the first reachable URL, renders `src`
# against it and writes `dest` only when the output changed. Unknown keys
# cause an error.

# Seconds between passes in `confetch watch`.
interval = 30

# ---------------------------------------------------------------------------
# Defaults applied to every [[template]] (each template may override them)
# ---------------------------------------------------------------------------
[defaults]
# Per-request timeout in seconds.
timeout = 5

# Extra request headers. A Host header overrides the request host.
# [defaults.headers]
# X-Env = "prod"

# ---------------------------------------------------------------------------
# Templates
# ---------------------------------------------------------------------------
[[template]]
# Label used in logs; defaults to the destination file name.
name = "haproxy"

# Tried in order until one answers 200.
urls = ["http://127.0.0.1:8500/v1/backends"]

# MiniJinja template and the file it renders to.
src = "/etc/confetch/haproxy.cfg.j2"
dest = "/etc/haproxy/haproxy.cfg"

# Run after the destination changed. A failing check skips the reload.
# check_cmd = "haproxy -c -f /etc/haproxy/haproxy.cfg"
# reload_cmd = "systemctl reload haproxy"

# Sent as the Content-Encoding request header ("gzip" only).
# content_encoding = "gzip"

# HTTP basic auth.
# username = "confetch"
# password = "secret"

# File holding a bearer token (trailing newlines are trimmed).
# bearer_token = "/run/secrets/discovery-token"
"##
}
