// File: probe.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use log::{debug, trace};
use rand::Rng;
use serde::Serialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::sync::Semaphore;
use url::{form_urlencoded, Url};

use crate::catalog::Candidate;
use crate::config::ConfigParameter;
use crate::encoding::{detect_encoding, EncodingKind};
use crate::errors::{ScanError, ScanResult};
use crate::getstate::GetState;
use crate::http::Fetch;
use crate::httpinner::HttpInner;
use crate::orchestrator::Shutdown;
use crate::targets::{query_segments, segment_name};

pub const MIN_PROBE_LENGTH: usize = 10;
pub const MAX_PROBE_LENGTH: usize = 5000;

/// Script-context sequences; any verbatim reflection passes the check.
pub const SCRIPT_CHECKS: &[&str] = &[
    "<script>",
    "<SCRIPT>",
    "<ScRiPt>",
    "<%73cript>",
    "<scr<script>ipt>",
    "<svg/script>",
    "<<script>>",
    "</script>",
    "<script/>",
    "\\x3Cscript\\x3E",
    "&lt;script&gt;",
    "&#x3C;script&#x3E;",
    "<img src=x onerror=",
    "<svg onload=",
    "<iframe onload=",
    "<video onloadstart=",
];

pub const EVENT_CHECKS: &[&str] = &[
    "onmouseover=",
    "onclick=",
    "onerror=",
    "onload=",
    "onmouseenter=",
    "onmouseleave=",
    "onfocus=",
    "onblur=",
    "onkeyup=",
    "onkeydown=",
    "ondblclick=",
    "oncontextmenu=",
    "ondrag=",
    "ondragend=",
    "onkeypress=",
    "onchange=",
    "onsubmit=",
];

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    Allowed,
    Blocked,
    EntityEncoded,
    PercentEncoded,
    DoubleEncoded,
    NonReflective,
    NetworkError,
}

impl ProbeStatus {
    pub fn is_encoded(&self) -> bool {
        matches!(
            self,
            Self::EntityEncoded | Self::PercentEncoded | Self::DoubleEncoded
        )
    }

    /// Statuses that make a literal unusable as-is.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Blocked | Self::NetworkError)
    }
}

impl From<EncodingKind> for ProbeStatus {
    fn from(kind: EncodingKind) -> Self {
        match kind {
            EncodingKind::Entity => Self::EntityEncoded,
            EncodingKind::Percent => Self::PercentEncoded,
            EncodingKind::Double => Self::DoubleEncoded,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub url: String,
    pub parameter: String,
    pub candidate: Candidate,
    pub status: ProbeStatus,
    /// Text observed between the markers, kept for encoded statuses.
    pub rendering: Option<String>,
}

/// Issues collision-resistant probe markers.
#[derive(Debug, Clone)]
pub struct MarkerGenerator {
    prefix: String,
}

impl MarkerGenerator {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }

    pub fn next_marker(&self) -> String {
        let token: u64 = rand::thread_rng().gen();
        format!("{}{:016x}", self.prefix, token)
    }
}

/// Returns `url` with every occurrence of `parameter` set to `value`. Other
/// query segments are kept untouched; a missing parameter is appended.
pub fn build_probe_url(url: &Url, parameter: &str, value: &str) -> Url {
    let encoded: String = form_urlencoded::byte_serialize(value.as_bytes()).collect();
    let mut segments = Vec::new();
    let mut replaced = false;

    for segment in query_segments(url.query().unwrap_or("")) {
        if segment_name(segment) == parameter {
            let raw_name = segment.split('=').next().unwrap_or(segment);
            segments.push(format!("{}={}", raw_name, encoded));
            replaced = true;
        } else {
            segments.push(segment.to_string());
        }
    }
    if !replaced {
        let name: String = form_urlencoded::byte_serialize(parameter.as_bytes()).collect();
        segments.push(format!("{}={}", name, encoded));
    }

    let mut target = url.clone();
    target.set_query(Some(&segments.join("&")));
    target
}

/// Classifies how `candidate` survived between the first pair of markers.
pub fn classify_reflection(
    body: &str,
    marker: &str,
    candidate: &str,
) -> (ProbeStatus, Option<String>) {
    let Some(start) = body.find(marker) else {
        return (ProbeStatus::NonReflective, None);
    };
    let inner_start = start + marker.len();
    let Some(inner_len) = body[inner_start..].find(marker) else {
        return (ProbeStatus::Blocked, None);
    };
    let observed = &body[inner_start..inner_start + inner_len];

    if observed == candidate {
        return (ProbeStatus::Allowed, None);
    }
    if observed.is_empty() {
        return (ProbeStatus::Blocked, None);
    }
    match detect_encoding(candidate, observed) {
        Some(kind) => (kind.into(), Some(observed.to_string())),
        None => (ProbeStatus::Blocked, None),
    }
}

/// Sends marker-bracketed candidates through the shared connection budget.
#[derive(Clone)]
pub struct ReflectionProbe {
    fetcher: Arc<dyn Fetch>,
    budget: Arc<Semaphore>,
    rate_limiter: Option<Arc<DirectLimiter>>,
    markers: MarkerGenerator,
    state: Arc<GetState>,
    config: Arc<ConfigParameter>,
    shutdown: Shutdown,
}

impl ReflectionProbe {
    pub fn new(
        config: Arc<ConfigParameter>,
        fetcher: Arc<dyn Fetch>,
        state: Arc<GetState>,
        shutdown: Shutdown,
    ) -> Self {
        let rate_limiter = NonZeroU32::new(config.rate_limit())
            .map(|rate| Arc::new(RateLimiter::direct(Quota::per_second(rate))));
        Self {
            fetcher,
            budget: Arc::new(Semaphore::new(config.max_connections())),
            rate_limiter,
            markers: MarkerGenerator::new(config.marker_prefix()),
            state,
            config,
            shutdown,
        }
    }

    pub fn config(&self) -> &ConfigParameter {
        &self.config
    }

    /// Probes a single candidate. Returns `None` when shutdown prevented the
    /// probe from being admitted.
    pub async fn probe(&self, url: &Url, parameter: &str, candidate: &Candidate) -> Option<ProbeResult> {
        let marker = self.markers.next_marker();
        let value = format!("{}{}{}", marker, candidate.value, marker);
        let target = build_probe_url(url, parameter, &value);

        let (status, rendering) = match self.fetch_with_retry(&target).await? {
            Ok(response) => classify_reflection(response.body(), &marker, &candidate.value),
            Err(e) => {
                debug!(
                    "Candidate {:?} on {}#{} gave up: {}",
                    candidate.value, url, parameter, e
                );
                self.state.add_network_error();
                (ProbeStatus::NetworkError, None)
            }
        };
        trace!("{}#{} {:?} -> {:?}", url, parameter, candidate.value, status);

        Some(ProbeResult {
            url: url.to_string(),
            parameter: parameter.to_string(),
            candidate: candidate.clone(),
            status,
            rendering,
        })
    }

    /// Binary-searches the longest run of `A`s reflected verbatim.
    pub async fn probe_length(&self, url: &Url, parameter: &str) -> Option<usize> {
        let (mut low, mut high) = (MIN_PROBE_LENGTH, MAX_PROBE_LENGTH);
        let mut longest = None;

        while low <= high {
            let mid = low + (high - low) / 2;
            if self.reflects_verbatim(url, parameter, mid).await? {
                longest = Some(mid);
                low = mid + 1;
            } else {
                high = mid - 1;
            }
        }
        debug!("{}#{} reflects up to {:?} chars", url, parameter, longest);
        longest
    }

    /// Tries `sequences` in order and stops at the first one reflected
    /// verbatim. `None` when shutdown cut the check short.
    pub async fn reflects_any(&self, url: &Url, parameter: &str, sequences: &[&str]) -> Option<bool> {
        for sequence in sequences {
            let result = self
                .probe(url, parameter, &Candidate::new(sequence, "quick_check"))
                .await?;
            if result.status == ProbeStatus::Allowed {
                trace!("{}#{} reflects {:?}", url, parameter, sequence);
                return Some(true);
            }
        }
        Some(false)
    }

    async fn reflects_verbatim(&self, url: &Url, parameter: &str, length: usize) -> Option<bool> {
        let marker = self.markers.next_marker();
        let filler = "A".repeat(length);
        let value = format!("{}{}{}", marker, filler, marker);
        let target = build_probe_url(url, parameter, &value);

        match self.fetch_with_retry(&target).await? {
            Ok(response) => {
                let (status, _) = classify_reflection(response.body(), &marker, &filler);
                Some(status == ProbeStatus::Allowed)
            }
            Err(_) => Some(false),
        }
    }

    async fn fetch_with_retry(&self, target: &Url) -> Option<ScanResult<HttpInner>> {
        let mut last_error = None;

        for attempt in 0..=self.config.retries() {
            if attempt > 0 {
                self.state.add_retry();
                tokio::select! {
                    _ = tokio::time::sleep(self.config.retry_backoff() * attempt) => {}
                    _ = self.shutdown.triggered() => return last_error.map(Err),
                }
            }
            if self.shutdown.is_triggered() {
                return last_error.map(Err);
            }
            if let Some(limiter) = &self.rate_limiter {
                limiter.until_ready().await;
            }

            let outcome = {
                let _permit = self.budget.acquire().await.ok()?;
                // Queued probes are dropped without starting once the run is
                // interrupted.
                if self.shutdown.is_triggered() {
                    return last_error.map(Err);
                }
                self.state.add_request();
                self.fetcher.fetch(target).await
            };

            match outcome {
                Ok(response) if response.is_inspectable() => {
                    self.state.add_success();
                    return Some(Ok(response));
                }
                Ok(response) => {
                    self.state.add_failure();
                    debug!("{} answered HTTP {} without a body", response.url(), response.status());
                    last_error = Some(ScanError::Network(format!(
                        "HTTP {} without a body",
                        response.status()
                    )));
                }
                Err(e) => {
                    self.state.add_failure();
                    last_error = Some(e);
                }
            }
        }
        last_error.map(Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const MARKER: &str = "xdg0011223344556677";

    struct EchoFetcher {
        max_reflected: usize,
    }

    #[async_trait]
    impl Fetch for EchoFetcher {
        async fn fetch(&self, url: &Url) -> ScanResult<HttpInner> {
            let value = url
                .query_pairs()
                .find(|(k, _)| k == "q")
                .map(|(_, v)| v.into_owned())
                .unwrap_or_default();
            let shown: String = value.chars().take(self.max_reflected).collect();
            Ok(HttpInner::new(url.as_str(), 200, format!("<p>{}</p>", shown)))
        }
    }

    struct FlakyFetcher {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Fetch for FlakyFetcher {
        async fn fetch(&self, url: &Url) -> ScanResult<HttpInner> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(ScanError::Network("connection reset".to_string()));
            }
            let value = url
                .query_pairs()
                .find(|(k, _)| k == "q")
                .map(|(_, v)| v.into_owned())
                .unwrap_or_default();
            Ok(HttpInner::new(url.as_str(), 200, value))
        }
    }

    /// Flips the shutdown flag while the first request is in flight.
    struct TrippingFetcher {
        shutdown: Shutdown,
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Fetch for TrippingFetcher {
        async fn fetch(&self, url: &Url) -> ScanResult<HttpInner> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            self.shutdown.trigger();
            if self.fail {
                return Err(ScanError::Network("connection reset".to_string()));
            }
            Ok(HttpInner::new(url.as_str(), 200, url.as_str().to_string()))
        }
    }

    fn quick_config() -> Arc<ConfigParameter> {
        let mut config = ConfigParameter::new();
        config.set_retries(2);
        config.set_retry_backoff_ms(1);
        Arc::new(config)
    }

    fn probe_with(fetcher: Arc<dyn Fetch>) -> (ReflectionProbe, Arc<GetState>, Shutdown) {
        let state = Arc::new(GetState::new());
        let shutdown = Shutdown::new();
        let probe = ReflectionProbe::new(quick_config(), fetcher, Arc::clone(&state), shutdown.clone());
        (probe, state, shutdown)
    }

    fn wrap(inner: &str) -> String {
        format!("<div>{}{}{}</div>", MARKER, inner, MARKER)
    }

    #[rstest]
    #[case("<", "<", ProbeStatus::Allowed)]
    #[case("<", "", ProbeStatus::Blocked)]
    #[case("<", "&lt;", ProbeStatus::EntityEncoded)]
    #[case("'", "&#39;", ProbeStatus::EntityEncoded)]
    #[case("<", "%3C", ProbeStatus::PercentEncoded)]
    #[case("<", "%253C", ProbeStatus::DoubleEncoded)]
    #[case("<", "&amp;lt;", ProbeStatus::DoubleEncoded)]
    #[case("<", "[removed]", ProbeStatus::Blocked)]
    #[case("script", "script", ProbeStatus::Allowed)]
    fn test_classify_reflection(#[case] candidate: &str, #[case] inner: &str, #[case] expected: ProbeStatus) {
        let (status, _) = classify_reflection(&wrap(inner), MARKER, candidate);
        assert_eq!(status, expected);
    }

    #[test]
    fn test_classify_keeps_encoded_rendering() {
        let (status, rendering) = classify_reflection(&wrap("&quot;"), MARKER, "\"");
        assert_eq!(status, ProbeStatus::EntityEncoded);
        assert_eq!(rendering.as_deref(), Some("&quot;"));
    }

    #[test]
    fn test_classify_missing_markers() {
        let (status, _) = classify_reflection("<html>nothing</html>", MARKER, "<");
        assert_eq!(status, ProbeStatus::NonReflective);

        let single = format!("<p>{}&lt;</p>", MARKER);
        let (status, _) = classify_reflection(&single, MARKER, "<");
        assert_eq!(status, ProbeStatus::Blocked);
    }

    #[test]
    fn test_first_marker_pair_decides() {
        let body = format!("{}{}", wrap("&lt;"), wrap("<"));
        let (status, _) = classify_reflection(&body, MARKER, "<");
        assert_eq!(status, ProbeStatus::EntityEncoded);
    }

    #[test]
    fn test_markers_are_unique_and_prefixed() {
        let markers = MarkerGenerator::new("xdg");
        let a = markers.next_marker();
        let b = markers.next_marker();
        assert_ne!(a, b);
        assert!(a.starts_with("xdg"));
        assert_eq!(a.len(), 19);
    }

    #[test]
    fn test_build_probe_url_replaces_only_target() {
        let url = Url::parse("https://example.com/search?q=old&page=2;flag").unwrap();
        let target = build_probe_url(&url, "q", "<a b>");
        assert_eq!(target.query(), Some("q=%3Ca+b%3E&page=2&flag"));

        let pairs: Vec<(String, String)> = target.query_pairs().into_owned().collect();
        assert_eq!(pairs[0], ("q".to_string(), "<a b>".to_string()));
    }

    #[test]
    fn test_build_probe_url_appends_missing_parameter() {
        let url = Url::parse("https://example.com/?a=1").unwrap();
        let target = build_probe_url(&url, "b", "x");
        assert_eq!(target.query(), Some("a=1&b=x"));
    }

    #[tokio::test]
    async fn test_probe_allowed_candidate() {
        let (probe, state, _) = probe_with(Arc::new(EchoFetcher { max_reflected: usize::MAX }));
        let url = Url::parse("http://target.test/?q=1").unwrap();
        let result = probe
            .probe(&url, "q", &Candidate::new("<", "special"))
            .await
            .unwrap();
        assert_eq!(result.status, ProbeStatus::Allowed);
        assert_eq!(state.requests(), 1);
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let fetcher = Arc::new(FlakyFetcher {
            failures: 2,
            calls: AtomicUsize::new(0),
        });
        let (probe, state, _) = probe_with(fetcher);
        let url = Url::parse("http://target.test/?q=1").unwrap();
        let result = probe.probe(&url, "q", &Candidate::new("a", "basic")).await.unwrap();
        assert_eq!(result.status, ProbeStatus::Allowed);
        assert_eq!(state.requests(), 3);
        assert_eq!(state.retries(), 2);
        assert_eq!(state.network_errors(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_retries_become_network_error() {
        let fetcher = Arc::new(FlakyFetcher {
            failures: usize::MAX,
            calls: AtomicUsize::new(0),
        });
        let (probe, state, _) = probe_with(fetcher);
        let url = Url::parse("http://target.test/?q=1").unwrap();
        let result = probe.probe(&url, "q", &Candidate::new("a", "basic")).await.unwrap();
        assert_eq!(result.status, ProbeStatus::NetworkError);
        assert!(result.status.is_blocking());
        assert_eq!(state.requests(), 3);
        assert_eq!(state.network_errors(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_prevents_admission() {
        let (probe, state, shutdown) = probe_with(Arc::new(EchoFetcher { max_reflected: usize::MAX }));
        shutdown.trigger();
        let url = Url::parse("http://target.test/?q=1").unwrap();
        assert!(probe.probe(&url, "q", &Candidate::new("a", "basic")).await.is_none());
        assert_eq!(state.requests(), 0);
    }

    #[tokio::test]
    async fn test_waiting_for_a_connection_does_not_outlive_shutdown() {
        let shutdown = Shutdown::new();
        let fetcher = Arc::new(TrippingFetcher {
            shutdown: shutdown.clone(),
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let mut config = (*quick_config()).clone();
        config.set_max_connections(1);
        let state = Arc::new(GetState::new());
        let probe = ReflectionProbe::new(Arc::new(config), fetcher.clone(), Arc::clone(&state), shutdown);

        let url = Url::parse("http://target.test/?q=1").unwrap();
        let first = Candidate::new("<", "special");
        let second = Candidate::new(">", "special");
        let (a, b) = tokio::join!(probe.probe(&url, "q", &first), probe.probe(&url, "q", &second));

        assert!(a.is_some());
        assert!(b.is_none());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(state.requests(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_cuts_retry_backoff_short() {
        let shutdown = Shutdown::new();
        let fetcher = Arc::new(TrippingFetcher {
            shutdown: shutdown.clone(),
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let mut config = ConfigParameter::new();
        config.set_retries(3);
        config.set_retry_backoff_ms(60_000);
        let state = Arc::new(GetState::new());
        let probe = ReflectionProbe::new(Arc::new(config), fetcher.clone(), Arc::clone(&state), shutdown);

        let url = Url::parse("http://target.test/?q=1").unwrap();
        let result = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            probe.probe(&url, "q", &Candidate::new("a", "basic")),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(result.status, ProbeStatus::NetworkError);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(state.retries(), 1);
    }

    #[tokio::test]
    async fn test_reflects_any_stops_at_first_hit() {
        let (probe, state, _) = probe_with(Arc::new(EchoFetcher { max_reflected: usize::MAX }));
        let url = Url::parse("http://target.test/?q=1").unwrap();
        assert_eq!(probe.reflects_any(&url, "q", SCRIPT_CHECKS).await, Some(true));
        assert_eq!(state.requests(), 1);
    }

    #[tokio::test]
    async fn test_reflects_any_tries_every_sequence() {
        // Too short for the closing marker, so nothing counts as reflected.
        let (probe, state, _) = probe_with(Arc::new(EchoFetcher { max_reflected: 20 }));
        let url = Url::parse("http://target.test/?q=1").unwrap();
        assert_eq!(probe.reflects_any(&url, "q", EVENT_CHECKS).await, Some(false));
        assert_eq!(state.requests(), EVENT_CHECKS.len() as u64);
    }

    #[tokio::test]
    async fn test_reflects_any_after_shutdown_is_unknown() {
        let (probe, state, shutdown) = probe_with(Arc::new(EchoFetcher { max_reflected: usize::MAX }));
        shutdown.trigger();
        let url = Url::parse("http://target.test/?q=1").unwrap();
        assert_eq!(probe.reflects_any(&url, "q", SCRIPT_CHECKS).await, None);
        assert_eq!(state.requests(), 0);
    }

    #[tokio::test]
    async fn test_length_probe_finds_truncation_point() {
        // Two 19-char markers plus the filler must fit.
        let (probe, _, _) = probe_with(Arc::new(EchoFetcher { max_reflected: 138 }));
        let url = Url::parse("http://target.test/?q=1").unwrap();
        assert_eq!(probe.probe_length(&url, "q").await, Some(100));
    }

    #[tokio::test]
    async fn test_length_probe_none_when_shortest_fails() {
        let (probe, _, _) = probe_with(Arc::new(EchoFetcher { max_reflected: 20 }));
        let url = Url::parse("http://target.test/?q=1").unwrap();
        assert_eq!(probe.probe_length(&url, "q").await, None);
    }
}
