use super::models::{Config, FetchConfig};
use crate::handlers::{is_truthy, parse_literal};
use config::{ConfigError, Environment, File};
use serde_json::Value;
use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "IPX_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/ipx.toml";
const ENV_PREFIX: &str = "IPX";
const ENV_SEPARATOR: &str = "__";

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. Layered environment variables (`IPX__SECTION__KEY`)
/// 5. Flat environment names (`IPX_DIR`, `IPX_DOMAINS`, …), highest priority
pub fn load() -> Result<Config, ConfigError> {
    // Load .env file if it exists (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    let config_path = env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    let mut config = load_from_sources(config_path)?;

    apply_flat_env(&mut config);

    Ok(config)
}

/// Load configuration from a specific path and environment
/// Useful for testing with custom config files
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::debug!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // IPX__SOURCES__MAX_AGE -> sources.max_age
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize()
}

/// Applies the flat single-underscore environment names. Values are
/// permissive-literal-parsed, so `IPX_DIR=false` disables the filesystem
/// supplier while `IPX_DIR=images` points it at a directory.
pub fn apply_flat_env(config: &mut Config) {
    if let Some(value) = env_literal("IPX_DIR") {
        config.sources.dir = match value {
            Value::String(s) if !s.is_empty() => Some(PathBuf::from(s)),
            _ => None,
        };
    }

    if let Some(value) = env_literal("IPX_DOMAINS") {
        config.sources.domains = parse_domains(value);
    }

    if let Some(value) = env_literal("IPX_ALIAS") {
        if let Value::Object(map) = value {
            config.sources.alias = map
                .into_iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k, v.to_string())))
                .collect::<BTreeMap<_, _>>();
        }
    }

    if let Some(value) = env_literal("IPX_FETCH_OPTIONS") {
        if value.is_object() {
            if let Ok(fetch) = serde_json::from_value::<FetchConfig>(value) {
                config.sources.fetch = fetch;
            }
        }
    }

    if let Some(value) = env_literal("IPX_MAX_AGE") {
        if let Some(n) = value.as_u64() {
            config.sources.max_age = n;
        }
    }

    if let Some(value) = env_literal("IPX_CACHE_ENABLED") {
        config.cache.enabled = is_truthy(&value);
    }
}

fn env_literal(name: &str) -> Option<Value> {
    env::var(name).ok().map(|raw| parse_literal(&raw))
}

fn parse_domains(value: Value) -> Option<Vec<String>> {
    match value {
        Value::Bool(false) | Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(
            s.split(',')
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty())
                .collect(),
        ),
        Value::Array(items) => Some(
            items
                .into_iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
        ),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_defaults_only() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.toml");

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.sources.max_age, 300);
        assert_eq!(config.sources.dir, Some(PathBuf::from(".")));
        assert!(!config.cache.enabled);
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[server]
bind_addr = "127.0.0.1:9000"

[sources]
dir = "public/images"
domains = ["cdn.example.com", "images.example.org"]
max_age = 3600

[sources.alias]
"/img" = "https://cdn.example.com"

[sources.fetch]
request_timeout_secs = 20
max_response_bytes = "10MB"

[cache]
enabled = true
backend = "memory"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "127.0.0.1:9000");
        assert_eq!(config.sources.dir, Some(PathBuf::from("public/images")));
        assert_eq!(
            config.sources.domains.as_deref(),
            Some(&["cdn.example.com".to_string(), "images.example.org".to_string()][..])
        );
        assert_eq!(config.sources.max_age, 3600);
        assert_eq!(
            config.sources.alias.get("/img").map(String::as_str),
            Some("https://cdn.example.com")
        );
        assert_eq!(config.sources.fetch.request_timeout_secs, 20);
        assert_eq!(config.sources.fetch.max_response_bytes, 10 * 1024 * 1024);
        assert!(config.cache.enabled);
    }

    // Note: flat env overrides are applied through apply_flat_env, tested
    // directly to avoid unsafe env::set_var in parallel test runs.

    #[test]
    fn test_parse_domains_shapes() {
        assert_eq!(
            parse_domains(Value::String("a.com, b.com".into())),
            Some(vec!["a.com".to_string(), "b.com".to_string()])
        );
        assert_eq!(
            parse_domains(serde_json::json!(["a.com", "b.com"])),
            Some(vec!["a.com".to_string(), "b.com".to_string()])
        );
        assert_eq!(parse_domains(Value::Bool(false)), None);
        assert_eq!(parse_domains(Value::Null), None);
    }

    #[test]
    fn test_truthiness() {
        assert!(is_truthy(&Value::Bool(true)));
        assert!(is_truthy(&Value::String("yes".into())));
        assert!(!is_truthy(&Value::Bool(false)));
        assert!(!is_truthy(&Value::Null));
        assert!(!is_truthy(&serde_json::json!(0)));
    }
}
