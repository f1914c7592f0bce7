// File: synthesizer.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

use crate::catalog::{lookalikes_for, CharacterCatalog};
use crate::classifier::ParameterProfile;
use crate::probe::ProbeStatus;
use crate::templates::{generate_templates, PayloadTemplate, TemplateFamily, TEMPLATES};

static RAW_SCRIPT_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<\s*script").unwrap());
static RAW_EVENT_HANDLER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bon[a-z]+\s*=").unwrap());

/// Evasion strength, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Technique {
    Literal,
    EntityEncoded,
    PercentEncoded,
    DoubleEncoded,
    UnicodeObfuscated,
}

impl Technique {
    pub fn from_status(status: ProbeStatus) -> Option<Self> {
        match status {
            ProbeStatus::EntityEncoded => Some(Self::EntityEncoded),
            ProbeStatus::PercentEncoded => Some(Self::PercentEncoded),
            ProbeStatus::DoubleEncoded => Some(Self::DoubleEncoded),
            _ => None,
        }
    }
}

impl fmt::Display for Technique {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Literal => "literal",
            Self::EntityEncoded => "entity-encoded",
            Self::PercentEncoded => "percent-encoded",
            Self::DoubleEncoded => "double-encoded",
            Self::UnicodeObfuscated => "unicode-obfuscated",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Substitution {
    pub literal: String,
    pub replacement: String,
    pub technique: Technique,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Payload {
    pub template_id: String,
    pub family: TemplateFamily,
    pub rendered: String,
    pub technique: Technique,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub substitutions: Vec<Substitution>,
}

pub struct PayloadSynthesizer {
    templates: Vec<PayloadTemplate>,
}

impl Default for PayloadSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl PayloadSynthesizer {
    pub fn new() -> Self {
        Self::with_templates(TEMPLATES.clone())
    }

    /// Built-in templates followed by the ones generated from `catalog`.
    pub fn for_catalog(catalog: &CharacterCatalog) -> Self {
        let mut synthesizer = Self::new();
        synthesizer.templates.extend(generate_templates(catalog));
        synthesizer
    }

    pub fn with_templates(templates: Vec<PayloadTemplate>) -> Self {
        Self { templates }
    }

    pub fn templates(&self) -> &[PayloadTemplate] {
        &self.templates
    }

    /// Renders every template the profile can satisfy, weakest technique
    /// first and in declaration order within a technique.
    pub fn synthesize(&self, profile: &ParameterProfile) -> Vec<Payload> {
        let mut payloads: Vec<Payload> = self
            .templates
            .iter()
            .filter_map(|template| render(template, profile))
            .filter(|payload| match profile.max_length() {
                Some(max) => payload.rendered.chars().count() <= max,
                None => true,
            })
            .filter(|payload| passes_quick_checks(payload, profile))
            .collect();

        payloads.sort_by_key(|p| p.technique);
        debug!(
            "{}#{}: {} of {} templates satisfiable",
            profile.url(),
            profile.parameter(),
            payloads.len(),
            self.templates.len()
        );
        payloads
    }
}

fn render(template: &PayloadTemplate, profile: &ParameterProfile) -> Option<Payload> {
    let mut resolved: HashMap<&str, (String, Technique)> = HashMap::new();
    let mut substitutions: Vec<Substitution> = Vec::new();

    for literal in template.required_literals() {
        let (replacement, technique) = resolve(literal, profile)?;
        if technique != Technique::Literal {
            substitutions.push(Substitution {
                literal: literal.to_string(),
                replacement: replacement.clone(),
                technique,
            });
        }
        resolved.insert(literal, (replacement, technique));
    }

    let mut rendered = String::with_capacity(template.fragment.len());
    for token in &template.tokens {
        if let Some((replacement, _)) = resolved.get(token.as_str()) {
            rendered.push_str(replacement);
        }
    }

    let technique = substitutions
        .iter()
        .map(|s| s.technique)
        .max()
        .unwrap_or(Technique::Literal);

    Some(Payload {
        template_id: template.id.clone(),
        family: template.family,
        rendered,
        technique,
        substitutions,
    })
}

/// A failed quick check means the target filters the whole sequence even if
/// each character passes on its own.
fn passes_quick_checks(payload: &Payload, profile: &ParameterProfile) -> bool {
    let checks = profile.quick_checks();
    if checks.scripts == Some(false) && RAW_SCRIPT_TAG.is_match(&payload.rendered) {
        return false;
    }
    if checks.events == Some(false) && RAW_EVENT_HANDLER.is_match(&payload.rendered) {
        return false;
    }
    true
}

/// How a single literal can be written into a payload, if at all.
fn resolve(literal: &str, profile: &ParameterProfile) -> Option<(String, Technique)> {
    let entry = profile.entry(literal)?;
    if entry.status == ProbeStatus::Allowed {
        return Some((literal.to_string(), Technique::Literal));
    }
    if !entry.candidate.is_encoded_form() {
        if let Some(equivalent) = profile.equivalent_of(literal) {
            return Some((equivalent.rendering, equivalent.technique));
        }
    }

    let mut chars = literal.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if let Some(lookalike) = lookalikes_for(c).into_iter().find(|l| profile.is_allowed(l)) {
            return Some((lookalike.to_string(), Technique::UnicodeObfuscated));
        }
    }
    None
}
