// File: http.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressState, ProgressStyle};
use log::trace;
use rand::seq::SliceRandom;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::fmt::Write;
use std::time::Duration;
use url::Url;

use crate::config::ConfigParameter;
use crate::errors::{ScanError, ScanResult};
use crate::httpinner::HttpInner;

const CHROME_VERSIONS: &[&str] = &["122.0.6261.112", "121.0.6167.184", "120.0.6099.130"];
const LANGUAGES: &[&str] = &[
    "en-US,en;q=0.9",
    "en-GB,en;q=0.9",
    "en-US,en;q=0.9,es;q=0.8",
    "en-US,en;q=0.9,fr;q=0.8",
];

/// The network seam used by the reflection probe.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, url: &Url) -> ScanResult<HttpInner>;
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &ConfigParameter) -> ScanResult<Self> {
        let mut headers = default_headers();
        for (name, value) in config.headers() {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ScanError::Configuration(format!("header '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ScanError::Configuration(format!("header value: {}", e)))?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout()))
            .pool_max_idle_per_host(config.max_connections())
            .danger_accept_invalid_certs(true)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &Url) -> ScanResult<HttpInner> {
        trace!("GET {}", url);
        let response = self.client.get(url.clone()).send().await?;
        let final_url = response.url().to_string();
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ScanError::Network(format!("Failed to read body: {}", e)))?;
        Ok(HttpInner::new(&final_url, status, body))
    }
}

/// Browser-like request headers with a randomized Chrome fingerprint.
pub fn default_headers() -> HeaderMap {
    let mut rng = rand::thread_rng();
    let chrome = CHROME_VERSIONS.choose(&mut rng).copied().unwrap_or(CHROME_VERSIONS[0]);
    let language = LANGUAGES.choose(&mut rng).copied().unwrap_or(LANGUAGES[0]);
    let fetch_site = ["none", "same-origin", "same-site"]
        .choose(&mut rng)
        .copied()
        .unwrap_or("none");

    let pairs = [
        (
            "user-agent",
            format!(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{} Safari/537.36",
                chrome
            ),
        ),
        (
            "accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8".to_string(),
        ),
        ("accept-language", language.to_string()),
        ("cache-control", "no-cache".to_string()),
        ("pragma", "no-cache".to_string()),
        (
            "sec-ch-ua",
            format!(
                "\"Chromium\";v=\"{0}\", \"Google Chrome\";v=\"{0}\", \"Not(A:Brand\";v=\"24\"",
                chrome
            ),
        ),
        ("sec-ch-ua-mobile", "?0".to_string()),
        ("sec-ch-ua-platform", "\"Windows\"".to_string()),
        ("sec-fetch-site", fetch_site.to_string()),
        ("sec-fetch-mode", "navigate".to_string()),
        ("sec-fetch-user", "?1".to_string()),
        ("sec-fetch-dest", "document".to_string()),
        ("upgrade-insecure-requests", "1".to_string()),
        ("dnt", "1".to_string()),
    ];

    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    }
    headers
}

pub fn job_progress_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    let style = ProgressStyle::with_template(
        "[{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} parameters ({eta})",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .with_key("eta", |state: &ProgressState, w: &mut dyn Write| {
        let _ = write!(w, "{:.1}s", state.eta().as_secs_f64());
    })
    .progress_chars("█▉▊▋▌▍▎▏  ");
    pb.set_style(style);
    pb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_headers_look_like_chrome() {
        let headers = default_headers();
        let ua = headers.get("user-agent").unwrap().to_str().unwrap();
        assert!(ua.contains("Chrome/"));
        assert!(headers.contains_key("accept-language"));
        assert!(!headers.contains_key("accept-encoding"));
    }

    #[test]
    fn test_invalid_custom_header_is_configuration_error() {
        let mut config = ConfigParameter::new();
        config.add_header("Bad Header", "x");
        assert!(matches!(
            HttpFetcher::new(&config),
            Err(ScanError::Configuration(_))
        ));
    }

    #[test]
    fn test_progress_bar_length() {
        let pb = job_progress_bar(7);
        assert_eq!(pb.length(), Some(7));
    }

    #[test]
    fn test_fetcher_builds_with_custom_headers() {
        let mut config = ConfigParameter::new();
        config.add_header("Cookie", "session=1");
        assert!(HttpFetcher::new(&config).is_ok());
    }
}
