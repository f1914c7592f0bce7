// File: httpinner.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

/// A fetched response, reduced to what reflection analysis needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpInner {
    body: String,
    status: u16,
    url: String,
}

impl HttpInner {
    pub fn new(url: &str, status: u16, body: String) -> Self {
        HttpInner {
            body,
            status,
            url: url.to_string(),
        }
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Non-2xx responses without a body carry nothing to inspect.
    pub fn is_inspectable(&self) -> bool {
        self.success() || !self.body.is_empty()
    }
}
