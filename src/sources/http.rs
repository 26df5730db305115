//! HTTP(S) supplier: fetches ids from remote origins under a host
//! allow-list, reusing keep-alive connection pools across requests.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{CACHE_CONTROL, LAST_MODIFIED};
use reqwest::{Client, redirect};
use tracing::debug;
use url::Url;

use super::{RequestOptions, Source, SourceDescriptor};
use crate::config::FetchConfig;
use crate::error::IpxError;

/// Fetches source bytes from allow-listed origins.
///
/// One pooled client serves both schemes; reqwest keeps per-host
/// keep-alive pools so TLS and TCP handshakes amortize across requests.
#[derive(Debug)]
pub struct HttpSource {
    client: Client,
    allowed_hosts: Vec<String>,
    max_age: u64,
    max_response_bytes: u64,
}

impl HttpSource {
    pub fn new(
        domains: &[String],
        max_age: u64,
        fetch: &FetchConfig,
    ) -> Result<Self, IpxError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(fetch.connect_timeout_secs))
            .timeout(Duration::from_secs(fetch.request_timeout_secs))
            .user_agent(&fetch.user_agent)
            .redirect(redirect::Policy::limited(fetch.max_redirects))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|err| IpxError::internal(format!("Failed to build HTTP client: {err}")))?;

        Ok(Self {
            client,
            allowed_hosts: parse_allowed_hosts(domains),
            max_age,
            max_response_bytes: fetch.max_response_bytes,
        })
    }
}

#[async_trait]
impl Source for HttpSource {
    async fn resolve(
        &self,
        id: &str,
        options: &RequestOptions,
    ) -> Result<SourceDescriptor, IpxError> {
        let url = Url::parse(id)
            .map_err(|_| IpxError::bad_request(format!("Invalid URL: {id}")))?;

        let host = match url.host_str() {
            Some(host) if !host.is_empty() => host.to_ascii_lowercase(),
            _ => return Err(IpxError::forbidden("Hostname is missing")),
        };

        if !options.bypass_domain && !self.allowed_hosts.contains(&host) {
            return Err(IpxError::forbidden("Forbidden host"));
        }

        debug!(%url, "Fetching remote source");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| IpxError::internal(format!("Origin request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IpxError::upstream(
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown"),
            ));
        }

        let max_age = parse_max_age(
            response
                .headers()
                .get(CACHE_CONTROL)
                .and_then(|value| value.to_str().ok()),
        )
        .unwrap_or(self.max_age);

        let mtime = response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_http_date);

        if let Some(length) = response.content_length() {
            if length > self.max_response_bytes {
                return Err(IpxError::bad_request("Source is too large"));
            }
        }

        let limit = self.max_response_bytes;
        Ok(SourceDescriptor::new(mtime, Some(max_age), async move {
            let bytes = response.bytes().await.map_err(|err| {
                IpxError::internal(format!("Failed to read origin body: {err}"))
            })?;
            if bytes.len() as u64 > limit {
                return Err(IpxError::bad_request("Source is too large"));
            }
            Ok(bytes)
        }))
    }
}

/// Allow-list entries may be bare hostnames; scheme-less entries gain
/// `http://` so the URL parser yields their host.
fn parse_allowed_hosts(domains: &[String]) -> Vec<String> {
    domains
        .iter()
        .filter_map(|entry| {
            let entry = entry.trim();
            if entry.is_empty() {
                return None;
            }
            let candidate = if entry.contains("://") {
                entry.to_string()
            } else {
                format!("http://{entry}")
            };
            Url::parse(&candidate)
                .ok()
                .and_then(|url| url.host_str().map(|h| h.to_ascii_lowercase()))
        })
        .collect()
}

fn parse_max_age(cache_control: Option<&str>) -> Option<u64> {
    cache_control?
        .split(',')
        .map(str::trim)
        .find_map(|directive| directive.strip_prefix("max-age="))
        .and_then(|value| value.parse().ok())
}

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http_source(domains: &[&str]) -> HttpSource {
        let domains: Vec<String> = domains.iter().map(|d| d.to_string()).collect();
        HttpSource::new(&domains, 300, &FetchConfig::default()).unwrap()
    }

    #[test]
    fn test_allow_list_parsing() {
        let source = http_source(&[
            "cdn.example.com",
            "https://images.example.org/basepath",
            "HTTP://MIXED.example.net",
        ]);
        assert_eq!(
            source.allowed_hosts,
            vec!["cdn.example.com", "images.example.org", "mixed.example.net"]
        );
    }

    #[tokio::test]
    async fn test_disallowed_host_rejected_before_any_request() {
        let source = http_source(&["cdn.example.com"]);
        let err = source
            .resolve(
                "https://blocked.example/x.png",
                &RequestOptions::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err, IpxError::forbidden("Forbidden host"));
    }

    #[tokio::test]
    async fn test_empty_allow_list_rejects_everything() {
        let source = http_source(&[]);
        let err = source
            .resolve("https://any.example/x.png", &RequestOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, IpxError::forbidden("Forbidden host"));
    }

    #[tokio::test]
    async fn test_hostname_missing() {
        let source = http_source(&[]);
        let err = source
            .resolve("file:///etc/passwd", &RequestOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, IpxError::forbidden("Hostname is missing"));
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let source = http_source(&[]);
        let err = source
            .resolve("http://exa mple.com/x", &RequestOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, IpxError::BadRequest(_)));
    }

    #[test]
    fn test_parse_max_age() {
        assert_eq!(parse_max_age(Some("max-age=600")), Some(600));
        assert_eq!(
            parse_max_age(Some("public, max-age=120, immutable")),
            Some(120)
        );
        assert_eq!(parse_max_age(Some("no-store")), None);
        assert_eq!(parse_max_age(None), None);
    }

    #[test]
    fn test_parse_http_date() {
        let parsed = parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT").unwrap();
        assert_eq!(parsed.timestamp(), 784_111_777);
        assert!(parse_http_date("not a date").is_none());
    }
}
