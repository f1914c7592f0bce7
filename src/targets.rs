// File: targets.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::Path;
use url::{form_urlencoded, Position, Url};

use crate::errors::{ScanError, ScanResult};
use crate::orchestrator::ScanJob;

static HTTP_SCHEME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^https?://").unwrap());
static SPECIAL_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\-./&?=%]").unwrap());

const MAX_SPECIAL_RATIO: f64 = 0.5;

/// URLs that survived filtering, plus what was thrown away.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TargetList {
    pub urls: Vec<Url>,
    pub skipped_without_query: usize,
    pub dropped: usize,
}

/// Non-empty query segments; both `&` and `;` separate pairs.
pub fn query_segments<'a>(query: &'a str) -> impl Iterator<Item = &'a str> {
    query.split(|c| c == '&' || c == ';').filter(|segment| !segment.is_empty())
}

/// Name of one query segment, form-decoded the way servers read it
/// (`+` is a space).
pub fn segment_name(segment: &str) -> String {
    let raw_name = segment.split('=').next().unwrap_or(segment);
    form_urlencoded::parse(raw_name.as_bytes())
        .next()
        .map(|(name, _)| name.into_owned())
        .unwrap_or_default()
}

/// Parameter names in query order, decoded and de-duplicated. Names
/// without `=` count.
pub fn extract_parameters(url: &Url) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for segment in query_segments(url.query().unwrap_or("")) {
        let name = segment_name(segment);
        if !name.is_empty() && !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

fn special_ratio(line: &str) -> f64 {
    let total = line.chars().count();
    if total == 0 {
        return 0.0;
    }
    SPECIAL_CHARS.find_iter(line).count() as f64 / total as f64
}

/// Cleans a raw URL list: keeps http(s) lines with a query, drops noisy lines
/// and repeats of an already seen (base URL, parameter set) pattern.
pub fn filter_urls<I, S>(lines: I) -> TargetList
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut list = TargetList::default();
    let mut seen: HashSet<(String, BTreeSet<String>)> = HashSet::new();

    for line in lines {
        let line = line.as_ref().trim();
        if line.is_empty() || !HTTP_SCHEME.is_match(line) {
            continue;
        }
        if special_ratio(line) > MAX_SPECIAL_RATIO {
            debug!("Dropping noisy URL {}", line);
            list.dropped += 1;
            continue;
        }
        let url = match Url::parse(line) {
            Ok(url) => url,
            Err(e) => {
                debug!("Dropping unparsable URL {}: {}", line, e);
                list.dropped += 1;
                continue;
            }
        };
        let parameters = extract_parameters(&url);
        if parameters.is_empty() {
            list.skipped_without_query += 1;
            continue;
        }

        let pattern = (
            url[..Position::AfterPath].to_string(),
            parameters.into_iter().collect::<BTreeSet<_>>(),
        );
        if seen.insert(pattern) {
            list.urls.push(url);
        }
    }
    list
}

pub fn load_url_list(path: &Path) -> ScanResult<TargetList> {
    let text = fs::read_to_string(path)?;
    let list = filter_urls(text.lines());
    info!(
        "Loaded {} URL(s) from {} ({} without parameters, {} dropped)",
        list.urls.len(),
        path.display(),
        list.skipped_without_query,
        list.dropped
    );
    if list.urls.is_empty() {
        return Err(ScanError::InvalidTarget(format!(
            "no usable URLs with parameters in {}",
            path.display()
        )));
    }
    Ok(list)
}

/// Validates a single `-d` target.
pub fn validate_domain_url(raw: &str) -> ScanResult<Url> {
    let raw = raw.trim();
    if !HTTP_SCHEME.is_match(raw) {
        return Err(ScanError::InvalidTarget(format!(
            "{} must start with http:// or https://",
            raw
        )));
    }
    let url = Url::parse(raw)?;
    if extract_parameters(&url).is_empty() {
        return Err(ScanError::InvalidTarget(format!(
            "{} must contain at least one query parameter",
            raw
        )));
    }
    Ok(url)
}

/// One job per (url, parameter), numbered in order.
pub fn build_jobs(urls: &[Url]) -> Vec<ScanJob> {
    urls.iter()
        .flat_map(|url| {
            extract_parameters(url)
                .into_iter()
                .map(move |parameter| (url.clone(), parameter))
        })
        .enumerate()
        .map(|(id, (url, parameter))| ScanJob::new(id, url, &parameter))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::JobState;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn test_extract_parameters_splits_and_decodes() {
        let url = Url::parse("https://example.com/p?a=1&b%5B%5D=2;flag&a=3&&empty=").unwrap();
        assert_eq!(extract_parameters(&url), vec!["a", "b[]", "flag", "empty"]);
    }

    #[test]
    fn test_plus_in_name_decodes_like_the_probe_url() {
        let url = Url::parse("https://example.com/p?a+b=1&c%2Bd=2").unwrap();
        let names = extract_parameters(&url);
        assert_eq!(names, vec!["a b", "c+d"]);

        let target = crate::probe::build_probe_url(&url, &names[0], "MARK");
        assert_eq!(target.query(), Some("a+b=MARK&c%2Bd=2"));
        let pairs: Vec<(String, String)> = target.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("a b".to_string(), "MARK".to_string()),
                ("c+d".to_string(), "2".to_string())
            ]
        );
    }

    #[test]
    fn test_extract_parameters_without_query() {
        let url = Url::parse("https://example.com/p").unwrap();
        assert!(extract_parameters(&url).is_empty());
    }

    #[test]
    fn test_filter_urls() {
        let lines = vec![
            "",
            "ftp://example.com/?a=1",
            "not a url",
            "https://example.com/search?q=1",
            "https://example.com/search?q=2",
            "https://example.com/search?q=1&page=2",
            "https://example.com/about",
            "http://other.test/x?id=7   ",
            "https://x.io/?a=<<<<>>>>{{{{}}}}''''\"\"\"\"",
        ];
        let list = filter_urls(lines);

        let kept: Vec<&str> = list.urls.iter().map(|u| u.as_str()).collect();
        assert_eq!(
            kept,
            vec![
                "https://example.com/search?q=1",
                "https://example.com/search?q=1&page=2",
                "http://other.test/x?id=7",
            ]
        );
        assert_eq!(list.skipped_without_query, 1);
        assert_eq!(list.dropped, 1);
    }

    #[rstest]
    #[case("https://example.com/?q=1")]
    #[case("http://example.com/path?flag")]
    fn test_valid_domain_url(#[case] raw: &str) {
        assert!(validate_domain_url(raw).is_ok());
    }

    #[rstest]
    #[case("example.com/?q=1")]
    #[case("https://example.com/")]
    #[case("https://example.com/?")]
    #[case("https://exa mple.com/?q=1")]
    fn test_invalid_domain_url(#[case] raw: &str) {
        assert!(matches!(
            validate_domain_url(raw),
            Err(ScanError::InvalidTarget(_))
        ));
    }

    #[test]
    fn test_build_jobs_one_per_parameter() {
        let urls = vec![
            Url::parse("https://a.test/?x=1&y=2").unwrap(),
            Url::parse("https://b.test/?z").unwrap(),
        ];
        let jobs = build_jobs(&urls);
        let pairs: Vec<(usize, &str, &str)> = jobs
            .iter()
            .map(|j| (j.id(), j.url().host_str().unwrap(), j.parameter()))
            .collect();
        assert_eq!(
            pairs,
            vec![(0, "a.test", "x"), (1, "a.test", "y"), (2, "b.test", "z")]
        );
        assert!(jobs.iter().all(|j| j.state() == JobState::Pending));
    }

    #[test]
    fn test_load_url_list_rejects_empty_result() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"https://example.com/no-query\n").unwrap();
        assert!(matches!(
            load_url_list(file.path()),
            Err(ScanError::InvalidTarget(_))
        ));
    }
}
