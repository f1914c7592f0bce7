// File: errors.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use std::fmt;

use crate::orchestrator::JobState;

#[derive(Debug)]
pub enum ScanError {
    Network(String),
    NonReflectiveParameter { url: String, parameter: String },
    MalformedCatalog { line: usize, reason: String },
    DuplicateCandidate { parameter: String, value: String },
    InterruptedRun,
    Configuration(String),
    InvalidTarget(String),
    InvalidState { from: JobState, to: JobState },
    Io(std::io::Error),
    Serialization(serde_json::Error),
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(e) => write!(f, "Network error: {}", e),
            Self::NonReflectiveParameter { url, parameter } => {
                write!(f, "Parameter '{}' is not reflected by {}", parameter, url)
            }
            Self::MalformedCatalog { line, reason } => {
                write!(f, "Malformed character catalog (line {}): {}", line, reason)
            }
            Self::DuplicateCandidate { parameter, value } => {
                write!(f, "Candidate {:?} probed twice for '{}'", value, parameter)
            }
            Self::InterruptedRun => write!(f, "Run interrupted before completion"),
            Self::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            Self::InvalidTarget(msg) => write!(f, "Invalid target: {}", msg),
            Self::InvalidState { from, to } => {
                write!(f, "Invalid job transition: {:?} -> {:?}", from, to)
            }
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Serialization(e) => write!(f, "Serialization error: {}", e),
        }
    }
}

impl std::error::Error for ScanError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ScanError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error)
    }
}

impl From<serde_json::Error> for ScanError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error)
    }
}

impl From<reqwest::Error> for ScanError {
    fn from(error: reqwest::Error) -> Self {
        Self::Network(error.to_string())
    }
}

impl From<url::ParseError> for ScanError {
    fn from(error: url::ParseError) -> Self {
        Self::InvalidTarget(error.to_string())
    }
}

impl ScanError {
    /// Errors that abort the whole run before any probing starts.
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(
            self,
            Self::MalformedCatalog { .. } | Self::Configuration(_) | Self::InvalidTarget(_)
        )
    }
}

pub type ScanResult<T> = Result<T, ScanError>;
