// File: config.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use std::time::Duration;

use crate::errors::{ScanError, ScanResult};

pub const DEFAULT_MAX_CONNECTIONS: usize = 40;
pub const DEFAULT_BATCH_SIZE: usize = 10;

#[derive(Debug, Clone)]
pub struct ConfigParameter {
    max_connections: usize,
    batch_size: usize,
    timeout: u64,
    retries: u32,
    retry_backoff_ms: u64,
    rate_limit: u32,
    probe_length: bool,
    quick_checks: bool,
    headers: Vec<(String, String)>,
    marker_prefix: String,
}

impl Default for ConfigParameter {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigParameter {
    pub fn new() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            batch_size: DEFAULT_BATCH_SIZE,
            timeout: 5,
            retries: 3,
            retry_backoff_ms: 1000,
            rate_limit: 0,
            probe_length: true,
            quick_checks: true,
            headers: Vec::new(),
            marker_prefix: "xdg".to_string(),
        }
    }

    pub fn validate(&self) -> ScanResult<()> {
        if self.max_connections == 0 {
            return Err(ScanError::Configuration(
                "max connections must be at least 1".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ScanError::Configuration(
                "batch size must be at least 1".to_string(),
            ));
        }
        if self.marker_prefix.is_empty() || self.marker_prefix.len() > 16 {
            return Err(ScanError::Configuration(
                "invalid marker prefix length".to_string(),
            ));
        }
        if !self.marker_prefix.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ScanError::Configuration(
                "marker prefix must be alphabetic".to_string(),
            ));
        }
        Ok(())
    }

    pub fn set_max_connections(&mut self, max_connections: usize) {
        self.max_connections = max_connections;
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn set_batch_size(&mut self, batch_size: usize) {
        self.batch_size = batch_size;
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn set_timeout(&mut self, timeout: u64) {
        self.timeout = timeout;
    }

    pub fn timeout(&self) -> u64 {
        self.timeout
    }

    pub fn set_retries(&mut self, retries: u32) {
        self.retries = retries;
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn set_retry_backoff_ms(&mut self, retry_backoff_ms: u64) {
        self.retry_backoff_ms = retry_backoff_ms;
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn set_rate_limit(&mut self, rate_limit: u32) {
        self.rate_limit = rate_limit;
    }

    pub fn rate_limit(&self) -> u32 {
        self.rate_limit
    }

    pub fn set_probe_length(&mut self, probe_length: bool) {
        self.probe_length = probe_length;
    }

    pub fn probe_length(&self) -> bool {
        self.probe_length
    }

    pub fn set_quick_checks(&mut self, quick_checks: bool) {
        self.quick_checks = quick_checks;
    }

    /// Whether the script and event pre-checks run before synthesis.
    pub fn quick_checks(&self) -> bool {
        self.quick_checks
    }

    pub fn add_header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn set_marker_prefix(&mut self, marker_prefix: &str) {
        self.marker_prefix = marker_prefix.to_string();
    }

    pub fn marker_prefix(&self) -> &str {
        &self.marker_prefix
    }
}

/// Splits a `Name: Value` header flag.
pub fn parse_header(raw: &str) -> ScanResult<(String, String)> {
    let (name, value) = raw.split_once(':').ok_or_else(|| {
        ScanError::Configuration(format!(
            "Invalid header format: {}. Use 'Header: Value' format.",
            raw
        ))
    })?;
    let name = name.trim();
    if name.is_empty() {
        return Err(ScanError::Configuration(format!(
            "Invalid header format: {}. Header name is empty.",
            raw
        )));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
