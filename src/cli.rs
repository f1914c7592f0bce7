// File: cli.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::config::{parse_header, ConfigParameter, DEFAULT_BATCH_SIZE, DEFAULT_MAX_CONNECTIONS};
use crate::errors::ScanResult;
use crate::report::ReportFormat;

#[derive(Parser, Debug)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
    about = env!("CARGO_PKG_DESCRIPTION"),
)]
pub struct Cli {
    #[arg(
        short = 'd',
        long = "domain",
        required_unless_present_any = ["url_list", "update"],
        conflicts_with = "url_list",
        help = "Single URL with parameters, e.g. https://example.com/?q=1"
    )]
    pub domain: Option<String>,

    #[arg(short = 'l', long = "url-list", help = "File with one URL per line")]
    pub url_list: Option<PathBuf>,

    #[arg(short = 'o', long = "output", default_value = "xss_payloads_gen")]
    pub output: String,

    #[arg(long = "output-dir", default_value = "payloads")]
    pub output_dir: PathBuf,

    #[arg(short = 'c', long = "connections", default_value_t = DEFAULT_MAX_CONNECTIONS)]
    pub connections: usize,

    #[arg(short = 'b', long = "batch-size", default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    #[arg(
        short = 'H',
        long = "header",
        help = "Custom header as 'Name: Value' (repeatable)"
    )]
    pub headers: Vec<String>,

    #[arg(short = 'f', long = "char-file", help = "Custom character group file")]
    pub char_file: Option<PathBuf>,

    #[arg(short = 'u', long = "update", help = "Show how to update the tool")]
    pub update: bool,

    #[arg(
        short = 't',
        long = "timeout",
        default_value_t = 5,
        help = "HTTP request timeout in seconds"
    )]
    pub timeout: u64,

    #[arg(long = "retries", default_value_t = 3)]
    pub retries: u32,

    #[arg(long = "retry-backoff-ms", default_value_t = 1000)]
    pub retry_backoff_ms: u64,

    #[arg(
        short = 'r',
        long = "rate-limit",
        default_value_t = 0,
        help = "Requests per second, 0 for unlimited"
    )]
    pub rate_limit: u32,

    #[arg(long = "no-length-probe", help = "Skip the reflected length probe")]
    pub no_length_probe: bool,

    #[arg(
        long = "no-quick-checks",
        help = "Skip the script and event handler pre-checks"
    )]
    pub no_quick_checks: bool,

    #[arg(long = "format", value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    #[arg(long = "log-level", default_value = "warn")]
    pub log_level: String,

    #[arg(long = "no-color", help = "Disable colored output")]
    pub no_color: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Text,
}

impl From<OutputFormat> for ReportFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Json => ReportFormat::Json,
            OutputFormat::Text => ReportFormat::Text,
        }
    }
}

impl Cli {
    /// Builds and validates the run configuration from the parsed flags.
    pub fn to_config(&self) -> ScanResult<ConfigParameter> {
        let mut config = ConfigParameter::new();
        config.set_max_connections(self.connections);
        config.set_batch_size(self.batch_size);
        config.set_timeout(self.timeout);
        config.set_retries(self.retries);
        config.set_retry_backoff_ms(self.retry_backoff_ms);
        config.set_rate_limit(self.rate_limit);
        config.set_probe_length(!self.no_length_probe);
        config.set_quick_checks(!self.no_quick_checks);
        for raw in &self.headers {
            let (name, value) = parse_header(raw)?;
            config.add_header(&name, &value);
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ScanError;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["xssdynagen", "-d", "https://example.com/?q=1"]).unwrap();
        assert_eq!(cli.output, "xss_payloads_gen");
        assert_eq!(cli.output_dir, PathBuf::from("payloads"));
        assert_eq!(cli.connections, 40);
        assert_eq!(cli.batch_size, 10);
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.log_level, "warn");
        assert!(!cli.no_length_probe);

        let config = cli.to_config().unwrap();
        assert_eq!(config.timeout(), 5);
        assert!(config.probe_length());
        assert!(config.quick_checks());
    }

    #[test]
    fn test_repeatable_headers() {
        let cli = Cli::try_parse_from([
            "xssdynagen",
            "-l",
            "urls.txt",
            "-H",
            "Cookie: a=1",
            "--header",
            "X-Test: yes",
            "-c",
            "5",
            "--no-length-probe",
            "--no-quick-checks",
        ])
        .unwrap();
        let config = cli.to_config().unwrap();
        assert_eq!(config.headers().len(), 2);
        assert_eq!(config.headers()[1], ("X-Test".to_string(), "yes".to_string()));
        assert_eq!(config.max_connections(), 5);
        assert!(!config.probe_length());
        assert!(!config.quick_checks());
    }

    #[test]
    fn test_target_is_required_and_exclusive() {
        assert!(Cli::try_parse_from(["xssdynagen"]).is_err());
        assert!(Cli::try_parse_from(["xssdynagen", "-d", "https://a/?q", "-l", "urls.txt"]).is_err());
    }

    #[test]
    fn test_update_stands_alone() {
        let cli = Cli::try_parse_from(["xssdynagen", "-u"]).unwrap();
        assert!(cli.update);
    }

    #[test]
    fn test_bad_header_and_zero_connections() {
        let cli = Cli::try_parse_from(["xssdynagen", "-d", "https://a/?q=1", "-H", "broken"]).unwrap();
        assert!(matches!(cli.to_config(), Err(ScanError::Configuration(_))));

        let cli = Cli::try_parse_from(["xssdynagen", "-d", "https://a/?q=1", "-c", "0"]).unwrap();
        assert!(matches!(cli.to_config(), Err(ScanError::Configuration(_))));
    }
}
