// File: common/mod.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

#![allow(dead_code)]

use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};
use xssdynagen::catalog::{CharacterCatalog, CharacterGroup};
use xssdynagen::config::ConfigParameter;

/// Echoes every query value into the page after a configurable filter.
pub struct ReflectingResponder {
    strip: Vec<char>,
    entities: Vec<(char, &'static str)>,
}

impl ReflectingResponder {
    pub fn verbatim() -> Self {
        Self {
            strip: Vec::new(),
            entities: Vec::new(),
        }
    }

    /// Strips angle brackets and entity-encodes quotes.
    pub fn angle_stripping() -> Self {
        Self {
            strip: vec!['<', '>'],
            entities: vec![('"', "&quot;"), ('\'', "&#39;")],
        }
    }

    fn filter(&self, value: &str) -> String {
        let mut out = String::with_capacity(value.len());
        for c in value.chars() {
            if self.strip.contains(&c) {
                continue;
            }
            match self.entities.iter().find(|(raw, _)| *raw == c) {
                Some((_, entity)) => out.push_str(entity),
                None => out.push(c),
            }
        }
        out
    }
}

impl Respond for ReflectingResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let mut body = String::from("<!DOCTYPE html><html><body><h1>Search</h1>");
        for (name, value) in request.url.query_pairs() {
            body.push_str(&format!("<p>{}: {}</p>", self.filter(&name), self.filter(&value)));
        }
        body.push_str("</body></html>");
        ResponseTemplate::new(200)
            .set_body_string(body)
            .append_header("content-type", "text/html")
    }
}

pub async fn setup_mock_server() -> MockServer {
    MockServer::start().await
}

pub async fn mount_reflecting(server: &MockServer, route: &str, responder: ReflectingResponder) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(responder)
        .mount(server)
        .await;
}

pub async fn mount_static(server: &MockServer, route: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html><body>Nothing to see here</body></html>"),
        )
        .mount(server)
        .await;
}

pub fn scenario_catalog() -> CharacterCatalog {
    CharacterCatalog::from_groups(vec![
        CharacterGroup::from_chars("special", "<>\"'()/"),
        CharacterGroup::from_chars("attribute", "="),
        CharacterGroup::from_chars("spaces", " "),
        CharacterGroup::from_tokens("tags", &["script"]),
        CharacterGroup::from_tokens("event_handlers", &["onerror"]),
        CharacterGroup::from_tokens("js_functions", &["alert"]),
        CharacterGroup::from_chars("basic", "a1"),
    ])
}

pub fn quick_config() -> Arc<ConfigParameter> {
    let mut config = ConfigParameter::new();
    config.set_max_connections(8);
    config.set_batch_size(4);
    config.set_timeout(5);
    config.set_retries(1);
    config.set_retry_backoff_ms(5);
    Arc::new(config)
}
