// File: classifier.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use serde::Serialize;
use std::collections::HashSet;

use crate::catalog::Candidate;
use crate::errors::{ScanError, ScanResult};
use crate::probe::{ProbeResult, ProbeStatus};
use crate::synthesizer::Technique;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileEntry {
    pub candidate: Candidate,
    pub status: ProbeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rendering: Option<String>,
}

/// A usable encoded rendering recorded for a literal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Equivalent {
    pub technique: Technique,
    pub rendering: String,
}

/// Whether any script-tag or event-handler sequence was reflected verbatim.
/// `None` when the check did not run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QuickChecks {
    pub scripts: Option<bool>,
    pub events: Option<bool>,
}

/// Frozen per-parameter classification of every submitted candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParameterProfile {
    url: String,
    parameter: String,
    entries: Vec<ProfileEntry>,
    max_length: Option<usize>,
    quick_checks: QuickChecks,
}

impl ParameterProfile {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn parameter(&self) -> &str {
        &self.parameter
    }

    pub fn entries(&self) -> &[ProfileEntry] {
        &self.entries
    }

    pub fn max_length(&self) -> Option<usize> {
        self.max_length
    }

    pub fn with_max_length(mut self, max_length: Option<usize>) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn quick_checks(&self) -> QuickChecks {
        self.quick_checks
    }

    pub fn with_quick_checks(mut self, quick_checks: QuickChecks) -> Self {
        self.quick_checks = quick_checks;
        self
    }

    pub fn entry(&self, value: &str) -> Option<&ProfileEntry> {
        self.entries.iter().find(|e| e.candidate.value == value)
    }

    pub fn status_of(&self, value: &str) -> Option<ProbeStatus> {
        self.entry(value).map(|e| e.status)
    }

    pub fn is_allowed(&self, value: &str) -> bool {
        self.status_of(value) == Some(ProbeStatus::Allowed)
    }

    pub fn allowed_literals(&self) -> Vec<&Candidate> {
        self.entries
            .iter()
            .filter(|e| e.status == ProbeStatus::Allowed)
            .map(|e| &e.candidate)
            .collect()
    }

    pub fn encoded_equivalents(&self) -> Vec<(&Candidate, Equivalent)> {
        self.entries
            .iter()
            .filter_map(|e| equivalent(e).map(|eq| (&e.candidate, eq)))
            .collect()
    }

    pub fn equivalent_of(&self, value: &str) -> Option<Equivalent> {
        self.entry(value).and_then(equivalent)
    }

    /// Blocked and network-failed candidates alike.
    pub fn blocked(&self) -> Vec<&Candidate> {
        self.entries
            .iter()
            .filter(|e| e.status.is_blocking())
            .map(|e| &e.candidate)
            .collect()
    }

    /// Allowed, encoded and blocked cover every entry exactly once.
    pub fn partition_is_complete(&self) -> bool {
        let allowed = self.allowed_literals().len();
        let encoded = self.encoded_equivalents().len();
        let blocked = self.blocked().len();
        let distinct: HashSet<&str> = self
            .entries
            .iter()
            .map(|e| e.candidate.value.as_str())
            .collect();
        allowed + encoded + blocked == self.entries.len() && distinct.len() == self.entries.len()
    }
}

fn equivalent(entry: &ProfileEntry) -> Option<Equivalent> {
    let technique = Technique::from_status(entry.status)?;
    let rendering = entry.rendering.clone()?;
    Some(Equivalent {
        technique,
        rendering,
    })
}

pub struct AllowanceClassifier;

impl AllowanceClassifier {
    /// Freezes the results of one parameter into a profile. Entry order follows
    /// `results`, which the orchestrator keeps in submission order.
    pub fn classify(
        url: &str,
        parameter: &str,
        results: Vec<ProbeResult>,
    ) -> ScanResult<ParameterProfile> {
        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(results.len());

        for result in results {
            if result.status == ProbeStatus::NonReflective {
                return Err(ScanError::NonReflectiveParameter {
                    url: url.to_string(),
                    parameter: parameter.to_string(),
                });
            }
            if !seen.insert(result.candidate.value.clone()) {
                return Err(ScanError::DuplicateCandidate {
                    parameter: parameter.to_string(),
                    value: result.candidate.value,
                });
            }
            // An encoded status without its rendering cannot be substituted.
            let status = if result.status.is_encoded() && result.rendering.is_none() {
                ProbeStatus::Blocked
            } else {
                result.status
            };
            entries.push(ProfileEntry {
                candidate: result.candidate,
                status,
                rendering: result.rendering,
            });
        }

        Ok(ParameterProfile {
            url: url.to_string(),
            parameter: parameter.to_string(),
            entries,
            max_length: None,
            quick_checks: QuickChecks::default(),
        })
    }
}
