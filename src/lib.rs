// File: lib.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

#![allow(clippy::uninlined_format_args)]
#![allow(clippy::module_inception)]
#![allow(clippy::bool_assert_comparison)]
#![allow(clippy::new_without_default)]
#![allow(clippy::useless_vec)]

pub mod catalog;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod encoding;
pub mod errors;
pub mod getstate;
pub mod http;
pub mod httpinner;
pub mod orchestrator;
pub mod probe;
pub mod report;
pub mod synthesizer;
pub mod targets;
pub mod templates;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_imports() {
        let _ = config::ConfigParameter::default();
        let _ = getstate::GetState::new();
        let _ = catalog::CharacterCatalog::builtin();
        let _ = synthesizer::PayloadSynthesizer::new();
        let _ = orchestrator::Shutdown::new();
        assert!(!templates::TEMPLATES.is_empty());
    }
}
