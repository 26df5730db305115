use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    "0.0.0.0:8080".parse().unwrap()
}

/// Source layer configuration: where image ids resolve to.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourcesConfig {
    /// Filesystem root. `None` disables the filesystem supplier.
    #[serde(default = "default_dir")]
    pub dir: Option<PathBuf>,
    /// Remote origin allow-list. `None` disables the HTTP supplier;
    /// an empty list keeps it enabled but rejects every host.
    #[serde(default = "default_domains")]
    pub domains: Option<Vec<String>>,
    /// Prefix rewrite map, applied once per id in deterministic
    /// (lexicographic) order of the base prefixes.
    #[serde(default)]
    pub alias: BTreeMap<String, String>,
    /// Default cache-control seconds for responses.
    #[serde(default = "default_max_age")]
    pub max_age: u64,
    #[serde(default)]
    pub fetch: FetchConfig,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            domains: default_domains(),
            alias: BTreeMap::new(),
            max_age: default_max_age(),
            fetch: FetchConfig::default(),
        }
    }
}

fn default_dir() -> Option<PathBuf> {
    Some(PathBuf::from("."))
}

fn default_domains() -> Option<Vec<String>> {
    Some(Vec::new())
}

fn default_max_age() -> u64 {
    300
}

/// Options for the origin HTTP client.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetchConfig {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Cap on a fully-buffered origin response body, in bytes. Accepts a
    /// plain count or a suffixed string (`"50MB"`).
    #[serde(
        default = "default_max_response_bytes",
        deserialize_with = "deserialize_size"
    )]
    pub max_response_bytes: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            max_redirects: default_max_redirects(),
            user_agent: default_user_agent(),
            max_response_bytes: default_max_response_bytes(),
        }
    }
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_max_redirects() -> usize {
    10
}

fn default_user_agent() -> String {
    format!("ipx/{}", env!("CARGO_PKG_VERSION"))
}

fn default_max_response_bytes() -> u64 {
    50 * 1024 * 1024 // 50 MB
}

/// Parses `"512KB"` / `"50MB"` / `"2GB"` (binary units) or a bare count.
fn parse_size(value: &str) -> Result<u64, String> {
    let text = value.trim().to_ascii_uppercase();
    let (number, shift) = if let Some(rest) = text.strip_suffix("GB") {
        (rest, 30u32)
    } else if let Some(rest) = text.strip_suffix("MB") {
        (rest, 20)
    } else if let Some(rest) = text.strip_suffix("KB") {
        (rest, 10)
    } else if let Some(rest) = text.strip_suffix('G') {
        (rest, 30)
    } else if let Some(rest) = text.strip_suffix('M') {
        (rest, 20)
    } else if let Some(rest) = text.strip_suffix('K') {
        (rest, 10)
    } else if let Some(rest) = text.strip_suffix('B') {
        (rest, 0)
    } else {
        (text.as_str(), 0)
    };

    let number: u64 = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid byte size: {value}"))?;
    number
        .checked_mul(1 << shift)
        .ok_or_else(|| format!("byte size overflows: {value}"))
}

fn deserialize_size<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct SizeVisitor;

    impl serde::de::Visitor<'_> for SizeVisitor {
        type Value = u64;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a byte count or a string like \"50MB\"")
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(v)
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            u64::try_from(v).map_err(|_| serde::de::Error::custom("negative byte size"))
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_size(v).map_err(serde::de::Error::custom)
        }
    }

    deserializer.deserialize_any(SizeVisitor)
}

/// Cache backend discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
}

/// Optional derivative cache configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub backend: CacheBackend,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size_suffixes() {
        assert_eq!(parse_size("1024"), Ok(1024));
        assert_eq!(parse_size("1024B"), Ok(1024));
        assert_eq!(parse_size("512K"), Ok(512 * 1024));
        assert_eq!(parse_size("512KB"), Ok(512 * 1024));
        assert_eq!(parse_size("50MB"), Ok(50 * 1024 * 1024));
        assert_eq!(parse_size("2gb"), Ok(2 * 1024 * 1024 * 1024));
        assert_eq!(parse_size(" 10 MB "), Ok(10 * 1024 * 1024));
    }

    #[test]
    fn test_parse_size_rejects_garbage() {
        assert!(parse_size("").is_err());
        assert!(parse_size("MB").is_err());
        assert!(parse_size("5XB").is_err());
        assert!(parse_size("-5MB").is_err());
    }

    #[test]
    fn test_fetch_config_size_from_string_and_number() {
        let fetch: FetchConfig =
            serde_json::from_value(serde_json::json!({"max_response_bytes": "10MB"}))
                .unwrap();
        assert_eq!(fetch.max_response_bytes, 10 * 1024 * 1024);

        let fetch: FetchConfig =
            serde_json::from_value(serde_json::json!({"max_response_bytes": 2048}))
                .unwrap();
        assert_eq!(fetch.max_response_bytes, 2048);
        // Unset fields keep their defaults.
        assert_eq!(fetch.request_timeout_secs, 60);
    }
}
