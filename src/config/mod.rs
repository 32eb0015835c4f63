//! Configuration model: validated, immutable settings loaded from the
//! process environment, a Docker-secrets style directory, and `.env`
//! files.
//!
//! Load order (lowest to highest precedence): secrets directory, `.env`/
//! `.env.prod`, real process environment. `.env*` files are loaded into
//! the process environment before any variable is read and never
//! overwrite a variable already set there, so real env vars always win;
//! the secrets directory is consulted only once both of those have had
//! their say, matching the original settings loader's `env_file`
//! fallback.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use derive_more::{Display, Error};
use regex::Regex;

mod zone;
pub use zone::ZoneSpec;

/// Default directory Docker/Podman mount secrets into (one file per key,
/// filename lowercased).
const DEFAULT_SECRETS_DIR: &str = "/var/run";
const ENV_FILES: &[&str] = &[".env", ".env.prod"];

#[derive(Debug, Display, Error)]
pub enum ConfigError {
    #[display(fmt = "missing required setting {}", _0)]
    Missing(#[error(not(source))] String),
    #[display(fmt = "setting {} has invalid value {:?}: {}", field, value, reason)]
    Invalid {
        field: String,
        value: String,
        reason: String,
    },
    #[display(fmt = "at least one zone must be configured (DOMAINS__0__NAME etc.)")]
    NoZones,
    #[display(fmt = "zone {:?}: {}", name, reason)]
    InvalidZone { name: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Verbose,
    Notice,
    Info,
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "VERBOSE" => Ok(LogLevel::Verbose),
            "NOTICE" => Ok(LogLevel::Notice),
            "INFO" => Ok(LogLevel::Info),
            other => Err(ConfigError::Invalid {
                field: "LOG_LEVEL".into(),
                value: other.into(),
                reason: "expected DEBUG, VERBOSE, NOTICE or INFO".into(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogType {
    Console,
    File,
    Both,
}

impl FromStr for LogType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "CONSOLE" => Ok(LogType::Console),
            "FILE" => Ok(LogType::File),
            "BOTH" => Ok(LogType::Both),
            other => Err(ConfigError::Invalid {
                field: "LOG_TYPE".into(),
                value: other.into(),
                reason: "expected CONSOLE, FILE or BOTH".into(),
            }),
        }
    }
}

/// Validated, immutable settings. Constructed once via [`Settings::load`]
/// and shared read-only by every component (see spec §5 "Process-wide
/// state").
#[derive(Debug, Clone)]
pub struct Settings {
    pub dry_run: bool,
    pub log_file: String,
    pub log_level: LogLevel,
    pub log_type: LogType,

    pub enable_docker_poll: bool,
    pub docker_poll_seconds: u64,

    pub enable_traefik_poll: bool,
    pub traefik_poll_url: Option<String>,
    pub traefik_poll_seconds: u64,
    pub traefik_timeout_seconds: u64,
    pub traefik_filter_label: Regex,
    pub traefik_filter_value: Regex,
    pub traefik_included_hosts: Vec<Regex>,
    pub traefik_excluded_hosts: Vec<Regex>,

    pub refresh_entries: bool,
    pub max_retries: u32,

    pub cf_token: String,
    pub cf_email: Option<String>,
    pub target_domain: String,
    pub default_ttl: u32,
    pub rc_type: String,

    pub zones: Vec<ZoneSpec>,
}

/// Minimal key/value lookup layered over `std::env::var` so the same
/// resolution logic can be exercised in tests without touching real
/// process environment.
pub struct EnvLayer {
    secrets: BTreeMap<String, String>,
}

impl EnvLayer {
    fn load(secrets_dir: &Path) -> Self {
        for candidate in ENV_FILES {
            let path = PathBuf::from(candidate);
            if path.exists() {
                if let Err(e) = dotenvy::from_filename(&path) {
                    tracing::warn!(file = %candidate, error = %e, "failed to load env file");
                } else {
                    tracing::debug!(file = %candidate, "loaded env file");
                }
            }
        }

        let mut secrets = BTreeMap::new();
        if let Ok(entries) = fs::read_dir(secrets_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if let Ok(contents) = fs::read_to_string(&path) {
                    secrets.insert(name.to_uppercase(), contents.trim().to_string());
                }
            }
        }

        EnvLayer { secrets }
    }

    /// Looks up `key`, preferring a real process environment variable
    /// over a secrets-directory file, over nothing.
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key)
            .ok()
            .or_else(|| self.secrets.get(&key.to_uppercase()).cloned())
    }

    pub(crate) fn all_keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = std::env::vars()
            .map(|(k, _)| k)
            .filter(|k| k.starts_with(prefix))
            .collect();
        keys.extend(
            self.secrets
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned(),
        );
        keys.sort();
        keys.dedup();
        keys
    }
}

impl Settings {
    /// Loads and validates settings from the environment, `.env`/
    /// `.env.prod` files, and `/var/run` secrets files.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Path::new(DEFAULT_SECRETS_DIR))
    }

    pub fn load_from(secrets_dir: &Path) -> Result<Self, ConfigError> {
        let env = EnvLayer::load(secrets_dir);
        Self::build(&env)
    }

    fn build(env: &EnvLayer) -> Result<Self, ConfigError> {
        let dry_run = parse_bool(env, "DRY_RUN", false)?;
        let log_file = env
            .get("LOG_FILE")
            .unwrap_or_else(|| "/logs/zonesync.log".to_string());
        let log_level = parse_opt(env, "LOG_LEVEL")?.unwrap_or(LogLevel::Info);
        let log_type = parse_opt(env, "LOG_TYPE")?.unwrap_or(LogType::Both);

        let enable_docker_poll = parse_bool(env, "ENABLE_DOCKER_POLL", true)?;
        let docker_poll_seconds = parse_num(env, "DOCKER_POLL_SECONDS", 5)?;

        let enable_traefik_poll = parse_bool(env, "ENABLE_TRAEFIK_POLL", false)?;
        let traefik_poll_url = env.get("TRAEFIK_POLL_URL");
        let traefik_poll_seconds = parse_num(env, "TRAEFIK_POLL_SECONDS", 5)?;
        let traefik_timeout_seconds = parse_num(env, "TRAEFIK_TIMEOUT_SECONDS", 10)?;

        let traefik_filter_label = parse_regex(
            env,
            "TRAEFIK_FILTER_LABEL",
            r"traefik\.constraint",
        )?;
        let traefik_filter_value = parse_regex(env, "TRAEFIK_FILTER_VALUE", ".*")?;
        let mut traefik_included_hosts = parse_regex_list(env, "TRAEFIK_INCLUDED_HOSTS")?;
        let traefik_excluded_hosts = parse_regex_list(env, "TRAEFIK_EXCLUDED_HOSTS")?;
        if traefik_included_hosts.is_empty() {
            traefik_included_hosts.push(Regex::new(".*").expect("static regex"));
        }

        let refresh_entries = parse_bool(env, "REFRESH_ENTRIES", false)?;
        let max_retries = parse_num(env, "MAX_RETRIES", 5)?;

        let cf_token = env
            .get("CF_TOKEN")
            .ok_or_else(|| ConfigError::Missing("CF_TOKEN".into()))?;
        let cf_email = env.get("CF_EMAIL").filter(|s| !s.is_empty());
        let target_domain = env
            .get("TARGET_DOMAIN")
            .ok_or_else(|| ConfigError::Missing("TARGET_DOMAIN".into()))?;
        let default_ttl = parse_num(env, "DEFAULT_TTL", 1)?;
        let rc_type = env.get("RC_TYPE").unwrap_or_else(|| "CNAME".to_string());

        if enable_traefik_poll && traefik_poll_url.as_deref().unwrap_or("").is_empty() {
            return Err(ConfigError::Invalid {
                field: "TRAEFIK_POLL_URL".into(),
                value: String::new(),
                reason: "traefik polling is enabled but no URL is set".into(),
            });
        }

        let zones = zone::load_zones(env, default_ttl, &target_domain)?;
        if zones.is_empty() {
            return Err(ConfigError::NoZones);
        }
        for z in &zones {
            z.validate()
                .map_err(|reason| ConfigError::InvalidZone {
                    name: z.name.clone(),
                    reason,
                })?;
        }

        Ok(Settings {
            dry_run,
            log_file,
            log_level,
            log_type,
            enable_docker_poll,
            docker_poll_seconds,
            enable_traefik_poll,
            traefik_poll_url,
            traefik_poll_seconds,
            traefik_timeout_seconds,
            traefik_filter_label,
            traefik_filter_value,
            traefik_included_hosts,
            traefik_excluded_hosts,
            refresh_entries,
            max_retries,
            cf_token,
            cf_email,
            target_domain,
            default_ttl,
            rc_type,
            zones,
        })
    }
}

fn parse_bool(env: &EnvLayer, key: &str, default: bool) -> Result<bool, ConfigError> {
    match env.get(key) {
        None => Ok(default),
        Some(v) => match v.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(ConfigError::Invalid {
                field: key.into(),
                value: other.into(),
                reason: "expected a boolean".into(),
            }),
        },
    }
}

fn parse_num<T>(env: &EnvLayer, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env.get(key) {
        None => Ok(default),
        Some(v) => v.parse::<T>().map_err(|e| ConfigError::Invalid {
            field: key.into(),
            value: v,
            reason: e.to_string(),
        }),
    }
}

fn parse_opt<T>(env: &EnvLayer, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr<Err = ConfigError>,
{
    match env.get(key) {
        None => Ok(None),
        Some(v) => T::from_str(&v).map(Some),
    }
}

fn parse_regex(env: &EnvLayer, key: &str, default: &str) -> Result<Regex, ConfigError> {
    let pattern = env.get(key).unwrap_or_else(|| default.to_string());
    Regex::new(&pattern).map_err(|e| ConfigError::Invalid {
        field: key.into(),
        value: pattern,
        reason: e.to_string(),
    })
}

/// Parses a list-of-regex setting. Accepts either a JSON array of
/// strings (`["a.example.com", "b.example.com"]`) or a comma-separated
/// list, mirroring the two shapes operators commonly reach for when
/// hand-writing an env var for a list-typed setting.
fn parse_regex_list(env: &EnvLayer, key: &str) -> Result<Vec<Regex>, ConfigError> {
    let Some(raw) = env.get(key) else {
        return Ok(Vec::new());
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Vec::new());
    }

    let patterns: Vec<String> = if raw.starts_with('[') {
        serde_json::from_str(raw).map_err(|e| ConfigError::Invalid {
            field: key.into(),
            value: raw.into(),
            reason: format!("invalid JSON list: {}", e),
        })?
    } else {
        raw.split(',').map(|s| s.trim().to_string()).collect()
    };

    patterns
        .into_iter()
        .map(|p| {
            Regex::new(&p).map_err(|e| ConfigError::Invalid {
                field: key.into(),
                value: p,
                reason: e.to_string(),
            })
        })
        .collect()
}
