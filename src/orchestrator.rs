// File: orchestrator.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use indicatif::ProgressBar;
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use url::Url;

use crate::catalog::{Candidate, CharacterCatalog};
use crate::classifier::{AllowanceClassifier, ParameterProfile, QuickChecks};
use crate::config::ConfigParameter;
use crate::errors::{ScanError, ScanResult};
use crate::getstate::GetState;
use crate::http::Fetch;
use crate::probe::{ProbeResult, ProbeStatus, ReflectionProbe, EVENT_CHECKS, SCRIPT_CHECKS};
use crate::synthesizer::{Payload, PayloadSynthesizer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Probing,
    Classified,
    Failed,
    PayloadGenerated,
    Done,
    Abandoned,
}

impl JobState {
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending, Probing)
                | (Pending, Abandoned)
                | (Probing, Classified)
                | (Probing, Failed)
                | (Probing, Abandoned)
                | (Classified, PayloadGenerated)
                | (PayloadGenerated, Done)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Abandoned)
    }
}

/// One (url, parameter) pair and everything learned about it.
#[derive(Debug, Clone)]
pub struct ScanJob {
    id: usize,
    url: Url,
    parameter: String,
    state: JobState,
    profile: Option<ParameterProfile>,
    payloads: Vec<Payload>,
    failure: Option<String>,
}

impl ScanJob {
    pub fn new(id: usize, url: Url, parameter: &str) -> Self {
        Self {
            id,
            url,
            parameter: parameter.to_string(),
            state: JobState::Pending,
            profile: None,
            payloads: Vec::new(),
            failure: None,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn parameter(&self) -> &str {
        &self.parameter
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn profile(&self) -> Option<&ParameterProfile> {
        self.profile.as_ref()
    }

    pub fn payloads(&self) -> &[Payload] {
        &self.payloads
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn advance(&mut self, next: JobState) -> ScanResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(ScanError::InvalidState {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    fn classified(&mut self, profile: ParameterProfile) -> ScanResult<()> {
        self.advance(JobState::Classified)?;
        self.profile = Some(profile);
        Ok(())
    }

    fn generated(&mut self, payloads: Vec<Payload>) -> ScanResult<()> {
        self.advance(JobState::PayloadGenerated)?;
        self.payloads = payloads;
        Ok(())
    }

    fn fail(&mut self, error: &ScanError) -> ScanResult<()> {
        self.advance(JobState::Failed)?;
        self.failure = Some(error.to_string());
        Ok(())
    }

    fn abandon(&mut self) -> ScanResult<()> {
        self.advance(JobState::Abandoned)?;
        self.failure = Some(ScanError::InterruptedRun.to_string());
        Ok(())
    }
}

/// Receives each finished job exactly once.
pub trait ResultSink {
    fn emit(&mut self, job: ScanJob);
}

impl ResultSink for Vec<ScanJob> {
    fn emit(&mut self, job: ScanJob) {
        self.push(job);
    }
}

/// Run-wide cancellation flag, checked at every admission point.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `trigger` has been called.
    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobFailure {
    pub url: String,
    pub parameter: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub abandoned: usize,
    pub payload_count: usize,
    pub interrupted: bool,
    pub failures: Vec<JobFailure>,
    pub requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub retries: u64,
    pub network_errors: u64,
    pub elapsed_ms: u64,
}

enum ProbeOutcome {
    Complete(Vec<ProbeResult>),
    NonReflective,
    Interrupted,
}

pub struct BatchOrchestrator {
    probe: ReflectionProbe,
    candidates: Arc<Vec<Candidate>>,
    synthesizer: Arc<PayloadSynthesizer>,
    state: Arc<GetState>,
    shutdown: Shutdown,
    progress: Option<ProgressBar>,
}

impl BatchOrchestrator {
    pub fn new(
        config: Arc<ConfigParameter>,
        catalog: &CharacterCatalog,
        fetcher: Arc<dyn Fetch>,
        state: Arc<GetState>,
        shutdown: Shutdown,
    ) -> Self {
        let probe = ReflectionProbe::new(config, fetcher, Arc::clone(&state), shutdown.clone());
        Self {
            probe,
            candidates: Arc::new(catalog.candidates()),
            synthesizer: Arc::new(PayloadSynthesizer::for_catalog(catalog)),
            state,
            shutdown,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    pub async fn run<S: ResultSink>(&self, jobs: Vec<ScanJob>, sink: &mut S) -> RunSummary {
        let mut summary = RunSummary {
            total: jobs.len(),
            ..RunSummary::default()
        };
        info!(
            "Scanning {} parameter(s) with {} candidate(s) each, {} payload template(s)",
            jobs.len(),
            self.candidates.len(),
            self.synthesizer.templates().len()
        );

        let mut running: FuturesUnordered<_> = jobs.into_iter().map(|job| self.drive(job)).collect();

        while let Some(job) = running.next().await {
            if let Some(pb) = &self.progress {
                pb.inc(1);
            }
            match job.state() {
                JobState::Done => {
                    summary.completed += 1;
                    summary.payload_count += job.payloads().len();
                    sink.emit(job);
                }
                JobState::Failed => {
                    summary.failed += 1;
                    summary.failures.push(JobFailure {
                        url: job.url().to_string(),
                        parameter: job.parameter().to_string(),
                        reason: job.failure().unwrap_or("unknown").to_string(),
                    });
                }
                state => {
                    if !state.is_terminal() {
                        warn!("Job {} stopped in state {:?}", job.id(), state);
                    }
                    summary.abandoned += 1;
                }
            }
        }
        if let Some(pb) = &self.progress {
            pb.finish_and_clear();
        }

        summary.interrupted = self.shutdown.is_triggered();
        summary.requests = self.state.requests();
        summary.successful_requests = self.state.successful_requests();
        summary.failed_requests = self.state.failed_requests();
        summary.retries = self.state.retries();
        summary.network_errors = self.state.network_errors();
        summary.elapsed_ms = self.state.elapsed_ms();
        summary
    }

    async fn drive(&self, mut job: ScanJob) -> ScanJob {
        if let Err(e) = self.execute(&mut job).await {
            warn!("{}#{}: {}", job.url(), job.parameter(), e);
            if job.state() == JobState::Probing {
                let _ = job.fail(&e);
            }
        }
        job
    }

    async fn execute(&self, job: &mut ScanJob) -> ScanResult<()> {
        if self.shutdown.is_triggered() {
            return job.abandon();
        }
        job.advance(JobState::Probing)?;

        let results = match self.probe_all(job.url(), job.parameter()).await {
            ProbeOutcome::Complete(results) => results,
            ProbeOutcome::NonReflective => {
                let error = ScanError::NonReflectiveParameter {
                    url: job.url().to_string(),
                    parameter: job.parameter().to_string(),
                };
                debug!("{}", error);
                return job.fail(&error);
            }
            ProbeOutcome::Interrupted => return job.abandon(),
        };

        // The candidate barrier has passed; interrupted follow-up checks only
        // leave their results unknown.
        let quick_checks = if self.probe.config().quick_checks() && !self.shutdown.is_triggered() {
            self.quick_checks(job.url(), job.parameter()).await
        } else {
            QuickChecks::default()
        };
        let max_length = if self.probe.config().probe_length() && !self.shutdown.is_triggered() {
            self.probe.probe_length(job.url(), job.parameter()).await
        } else {
            None
        };

        let profile = AllowanceClassifier::classify(job.url().as_str(), job.parameter(), results)?
            .with_max_length(max_length)
            .with_quick_checks(quick_checks);
        let payloads = self.synthesizer.synthesize(&profile);
        job.classified(profile)?;
        job.generated(payloads)?;
        job.advance(JobState::Done)
    }

    async fn quick_checks(&self, url: &Url, parameter: &str) -> QuickChecks {
        let scripts = self.probe.reflects_any(url, parameter, SCRIPT_CHECKS).await;
        let events = self.probe.reflects_any(url, parameter, EVENT_CHECKS).await;
        debug!("{}#{} quick checks: scripts={:?} events={:?}", url, parameter, scripts, events);
        QuickChecks { scripts, events }
    }

    async fn probe_all(&self, url: &Url, parameter: &str) -> ProbeOutcome {
        let Some((first, rest)) = self.candidates.split_first() else {
            return ProbeOutcome::Complete(Vec::new());
        };

        // Reflection check before committing the full candidate set.
        let Some(first_result) = self.probe.probe(url, parameter, first).await else {
            return ProbeOutcome::Interrupted;
        };
        if first_result.status == ProbeStatus::NonReflective {
            return ProbeOutcome::NonReflective;
        }

        let mut results = Vec::with_capacity(self.candidates.len());
        results.push(first_result);

        for round in rest.chunks(self.probe.config().batch_size()) {
            if self.shutdown.is_triggered() {
                return ProbeOutcome::Interrupted;
            }
            let outcomes = join_all(
                round
                    .iter()
                    .map(|candidate| self.probe.probe(url, parameter, candidate)),
            )
            .await;

            for outcome in outcomes {
                match outcome {
                    None => return ProbeOutcome::Interrupted,
                    Some(result) if result.status == ProbeStatus::NonReflective => {
                        return ProbeOutcome::NonReflective
                    }
                    Some(result) => results.push(result),
                }
            }
        }
        ProbeOutcome::Complete(results)
    }
}
