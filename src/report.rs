// File: report.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::classifier::QuickChecks;
use crate::errors::ScanResult;
use crate::orchestrator::{RunSummary, ScanJob};
use crate::synthesizer::{Payload, Technique};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncodedEntry {
    pub candidate: String,
    pub technique: Technique,
    pub rendering: String,
}

/// Allowance summary and payloads of one parameter.
#[derive(Debug, Clone, Serialize)]
pub struct ReportEntry {
    pub url: String,
    pub parameter: String,
    pub allowed: Vec<String>,
    pub encoded: Vec<EncodedEntry>,
    pub blocked: Vec<String>,
    pub max_length: Option<usize>,
    pub quick_checks: QuickChecks,
    pub payloads: Vec<Payload>,
}

impl ReportEntry {
    /// `None` for jobs that never reached classification.
    pub fn from_job(job: &ScanJob) -> Option<Self> {
        let profile = job.profile()?;
        Some(Self {
            url: job.url().to_string(),
            parameter: job.parameter().to_string(),
            allowed: profile
                .allowed_literals()
                .into_iter()
                .map(|c| c.value.clone())
                .collect(),
            encoded: profile
                .encoded_equivalents()
                .into_iter()
                .map(|(c, eq)| EncodedEntry {
                    candidate: c.value.clone(),
                    technique: eq.technique,
                    rendering: eq.rendering,
                })
                .collect(),
            blocked: profile
                .blocked()
                .into_iter()
                .map(|c| c.value.clone())
                .collect(),
            max_length: profile.max_length(),
            quick_checks: profile.quick_checks(),
            payloads: job.payloads().to_vec(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub tool: String,
    pub version: String,
    pub generated_at: DateTime<Utc>,
    pub summary: RunSummary,
    pub parameters: Vec<ReportEntry>,
}

impl Report {
    pub fn new(summary: RunSummary, jobs: &[ScanJob]) -> Self {
        let mut ordered: Vec<&ScanJob> = jobs.iter().collect();
        ordered.sort_by_key(|job| job.id());
        Self {
            tool: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            generated_at: Utc::now(),
            summary,
            parameters: ordered.into_iter().filter_map(ReportEntry::from_job).collect(),
        }
    }

    /// Unique payload strings, sorted, with line breaks stripped.
    pub fn unique_payloads(&self) -> Vec<String> {
        self.parameters
            .iter()
            .flat_map(|entry| entry.payloads.iter())
            .map(|p| p.rendered.replace('\r', "").replace('\n', ""))
            .filter(|p| !p.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    Json,
}

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Text => "txt",
            Self::Json => "json",
        }
    }
}

/// Report and payload-list paths for a run started at `started`.
pub fn report_paths(
    output_dir: &Path,
    name: &str,
    format: ReportFormat,
    started: DateTime<Local>,
) -> (PathBuf, PathBuf) {
    let stamp = started.format("%Y%m%d_%H%M%S");
    (
        output_dir.join(format!("{}_{}.{}", name, stamp, format.extension())),
        output_dir.join(format!("{}_{}_payloads.txt", name, stamp)),
    )
}

pub struct ReportGenerator;

impl ReportGenerator {
    pub fn generate_report(report: &Report, output_path: &Path, format: ReportFormat) -> ScanResult<()> {
        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent)?;
        }
        match format {
            ReportFormat::Text => Self::generate_text_report(report, output_path),
            ReportFormat::Json => Self::generate_json_report(report, output_path),
        }
    }

    pub fn generate_text_report(report: &Report, output_path: &Path) -> ScanResult<()> {
        let mut file = File::create(output_path)?;
        file.write_all(Self::render_text(report).as_bytes())?;
        Ok(())
    }

    pub fn generate_json_report(report: &Report, output_path: &Path) -> ScanResult<()> {
        let json = serde_json::to_string_pretty(report)?;
        let mut file = File::create(output_path)?;
        writeln!(file, "{}", json)?;
        Ok(())
    }

    /// Writes one payload per line and returns how many were written.
    pub fn write_payload_list(report: &Report, output_path: &Path) -> ScanResult<usize> {
        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let payloads = report.unique_payloads();
        let mut file = File::create(output_path)?;
        for payload in &payloads {
            writeln!(file, "{}", payload)?;
        }
        Ok(payloads.len())
    }

    pub fn render_text(report: &Report) -> String {
        let mut out = String::new();
        let summary = &report.summary;
        let _ = writeln!(out, "{} Report", report.tool);
        let _ = writeln!(out, "Date: {}", report.generated_at.format("%Y-%m-%d %H:%M:%S UTC"));
        let _ = writeln!(
            out,
            "Parameters: {} total, {} completed, {} failed, {} abandoned",
            summary.total, summary.completed, summary.failed, summary.abandoned
        );
        let _ = writeln!(out, "Payloads generated: {}", summary.payload_count);
        let _ = writeln!(
            out,
            "Requests: {} ({} succeeded, {} failed, {} retries)",
            summary.requests, summary.successful_requests, summary.failed_requests, summary.retries
        );
        if summary.interrupted {
            let _ = writeln!(out, "Run was interrupted; results are partial.");
        }

        for entry in &report.parameters {
            let _ = writeln!(out);
            let _ = writeln!(out, "URL: {}", entry.url);
            let _ = writeln!(out, "Parameter: {}", entry.parameter);
            let _ = writeln!(out, "Allowed: {}", join_escaped(entry.allowed.iter()));
            let encoded: Vec<String> = entry
                .encoded
                .iter()
                .map(|e| format!("{} -> {} ({})", e.candidate.escape_debug(), e.rendering, e.technique))
                .collect();
            let _ = writeln!(out, "Encoded: {}", encoded.join(", "));
            let _ = writeln!(out, "Blocked: {}", join_escaped(entry.blocked.iter()));
            if let Some(max) = entry.max_length {
                let _ = writeln!(out, "Max reflected length: {}", max);
            }
            let _ = writeln!(
                out,
                "Quick checks: scripts {}, events {}",
                check_label(entry.quick_checks.scripts),
                check_label(entry.quick_checks.events)
            );
            let _ = writeln!(out, "Payloads ({}):", entry.payloads.len());
            for payload in &entry.payloads {
                let _ = writeln!(out, "  [{}] {}", payload.technique, payload.rendered.escape_debug());
            }
        }

        if !summary.failures.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Failed parameters:");
            for failure in &summary.failures {
                let _ = writeln!(out, "  {} [{}]: {}", failure.url, failure.parameter, failure.reason);
            }
        }
        out
    }
}

fn check_label(outcome: Option<bool>) -> &'static str {
    match outcome {
        Some(true) => "reflected",
        Some(false) => "filtered",
        None => "not run",
    }
}

fn join_escaped<'a>(values: impl Iterator<Item = &'a String>) -> String {
    values
        .map(|v| v.escape_debug().to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
#[path = "report_tests.rs"]
mod tests;
