// File: catalog.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use log::{debug, info, warn};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use crate::errors::{ScanError, ScanResult};

/// Groups whose members are already an encoded rendering of something else.
pub const ENCODED_GROUPS: &[&str] = &["encoded", "html_entities", "double_encoding"];

static BUILTIN_GROUPS: Lazy<Vec<CharacterGroup>> = Lazy::new(|| {
    let basic: Vec<String> = ('a'..='z')
        .chain('A'..='Z')
        .chain('0'..='9')
        .map(String::from)
        .collect();

    vec![
        CharacterGroup::new("basic", basic),
        CharacterGroup::from_chars("special", "<>()'\"`{}[];/@\\*&^%$#!"),
        CharacterGroup::from_chars("attribute", "=:,.-_+?|~"),
        CharacterGroup::from_chars("spaces", " \t\n\r"),
        CharacterGroup::from_tokens(
            "encoded",
            &["%20", "%0A", "%0D", "%3C", "%3E", "%22", "%27", "%3B", "%28", "%29"],
        ),
        CharacterGroup::from_tokens(
            "unicode",
            &["＜", "＞", "＂", "＇", "（", "）", "＝", "／", "‹", "›", "˂", "˃", "ʺ", "ʹ"],
        ),
        CharacterGroup::from_tokens("null_bytes", &["\u{0}", "\u{b}", "\u{c}"]),
        CharacterGroup::from_tokens(
            "alternating_case",
            &["ScRiPt", "ImG", "SvG", "OnLoad", "OnError", "JaVaScRiPt:"],
        ),
        CharacterGroup::from_tokens("double_encoding", &["%253C", "%253E", "%2522", "%2527"]),
        CharacterGroup::from_tokens(
            "html_entities",
            &["&lt;", "&gt;", "&quot;", "&apos;", "&#x3C;", "&#x3E;"],
        ),
        CharacterGroup::from_tokens("comments", &["<!--", "-->", "/*", "*/", "//"]),
        CharacterGroup::from_tokens("protocol_handlers", &["javascript:", "data:", "vbscript:"]),
        CharacterGroup::from_tokens(
            "event_handlers",
            &[
                "onmouseover",
                "onload",
                "onerror",
                "onfocus",
                "onclick",
                "onmouseenter",
                "onanimationend",
                "ontoggle",
            ],
        ),
        CharacterGroup::from_tokens(
            "tags",
            &["script", "img", "svg", "iframe", "body", "video", "details", "style"],
        ),
        CharacterGroup::from_tokens("attribute_names", &["src", "href", "autofocus", "open"]),
        CharacterGroup::from_tokens("js_functions", &["alert", "prompt", "confirm", "eval", "atob"]),
    ]
});

static LOOKALIKES: Lazy<HashMap<&'static str, char>> = Lazy::new(|| {
    HashMap::from([
        ("＜", '<'),
        ("‹", '<'),
        ("˂", '<'),
        ("＞", '>'),
        ("›", '>'),
        ("˃", '>'),
        ("＂", '"'),
        ("ʺ", '"'),
        ("＇", '\''),
        ("ʹ", '\''),
        ("（", '('),
        ("）", ')'),
        ("＝", '='),
        ("／", '/'),
    ])
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterGroup {
    pub name: String,
    pub members: Vec<String>,
}

impl CharacterGroup {
    pub fn new(name: &str, members: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            members,
        }
    }

    pub fn from_chars(name: &str, chars: &str) -> Self {
        let mut group = Self::new(name, Vec::new());
        for c in chars.chars() {
            group.push_unique(c.to_string());
        }
        group
    }

    pub fn from_tokens(name: &str, tokens: &[&str]) -> Self {
        Self::new(name, tokens.iter().map(|t| t.to_string()).collect())
    }

    fn push_unique(&mut self, member: String) {
        if !self.members.contains(&member) {
            self.members.push(member);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Candidate {
    pub value: String,
    pub group: String,
}

impl Candidate {
    pub fn new(value: &str, group: &str) -> Self {
        Self {
            value: value.to_string(),
            group: group.to_string(),
        }
    }

    /// True when the candidate is itself an encoded rendering and must never be
    /// substituted further.
    pub fn is_encoded_form(&self) -> bool {
        ENCODED_GROUPS.contains(&self.group.as_str())
    }
}

/// All look-alike spellings of an ASCII character, in a stable order.
pub fn lookalikes_for(c: char) -> Vec<&'static str> {
    let mut found: Vec<&'static str> = LOOKALIKES
        .iter()
        .filter(|(_, target)| **target == c)
        .map(|(value, _)| *value)
        .collect();
    found.sort_unstable();
    found
}

#[derive(Debug, Clone)]
pub struct CharacterCatalog {
    groups: Vec<CharacterGroup>,
}

impl CharacterCatalog {
    pub fn builtin() -> Self {
        Self {
            groups: BUILTIN_GROUPS.clone(),
        }
    }

    /// Built-in groups, optionally merged with a user group file.
    pub fn load(user_file: Option<&Path>) -> ScanResult<Self> {
        let mut catalog = Self::builtin();
        if let Some(path) = user_file {
            let text = fs::read_to_string(path)?;
            let user_groups = parse_groups(&text)?;
            info!(
                "Loaded {} custom character group(s) from {}",
                user_groups.len(),
                path.display()
            );
            catalog.merge(user_groups);
        }
        Ok(catalog)
    }

    pub fn from_groups(groups: Vec<CharacterGroup>) -> Self {
        Self { groups }
    }

    /// Same-named groups replace the existing one in place; new ones are appended.
    /// Returns the multi-character tokens no group provides any more; templates
    /// built on them can no longer be satisfied.
    pub fn merge(&mut self, user_groups: Vec<CharacterGroup>) -> Vec<String> {
        let before = self.multi_char_members();
        for group in user_groups {
            match self.groups.iter_mut().find(|g| g.name == group.name) {
                Some(existing) => {
                    debug!("Custom group '{}' overrides built-in", group.name);
                    *existing = group;
                }
                None => self.groups.push(group),
            }
        }

        let after = self.multi_char_members();
        let lost: Vec<String> = before.into_iter().filter(|token| !after.contains(token)).collect();
        if !lost.is_empty() {
            warn!(
                "Custom groups drop {} token(s) used by payload templates: {}",
                lost.len(),
                lost.join(", ")
            );
        }
        lost
    }

    fn multi_char_members(&self) -> Vec<String> {
        let mut members: Vec<String> = Vec::new();
        for group in &self.groups {
            for member in &group.members {
                if member.chars().count() > 1 && !members.contains(member) {
                    members.push(member.clone());
                }
            }
        }
        members
    }

    pub fn groups(&self) -> &[CharacterGroup] {
        &self.groups
    }

    pub fn group(&self, name: &str) -> Option<&CharacterGroup> {
        self.groups.iter().find(|g| g.name == name)
    }

    /// Flattened candidates in declaration order. A value listed in several
    /// groups keeps the provenance of its first occurrence.
    pub fn candidates(&self) -> Vec<Candidate> {
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for group in &self.groups {
            for member in &group.members {
                if seen.insert(member.as_str()) {
                    candidates.push(Candidate::new(member, &group.name));
                }
            }
        }
        candidates
    }
}

/// Parses the bracketed group file format.
pub fn parse_groups(text: &str) -> ScanResult<Vec<CharacterGroup>> {
    let mut groups: Vec<CharacterGroup> = Vec::new();
    let mut header_lines: Vec<usize> = Vec::new();

    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if line.starts_with('[') {
            if !line.ends_with(']') {
                return Err(malformed(line_no, "group header is missing ']'"));
            }
            let name = line[1..line.len() - 1].trim().to_lowercase();
            if name.is_empty() {
                return Err(malformed(line_no, "empty group name"));
            }
            if groups.iter().any(|g| g.name == name) {
                return Err(malformed(
                    line_no,
                    &format!("group '{}' declared twice", name),
                ));
            }
            close_group(&groups, &header_lines)?;
            groups.push(CharacterGroup::new(&name, Vec::new()));
            header_lines.push(line_no);
            continue;
        }

        let current = groups
            .last_mut()
            .ok_or_else(|| malformed(line_no, "members found before any [group] header"))?;
        for c in line.chars() {
            current.push_unique(c.to_string());
        }
    }

    close_group(&groups, &header_lines)?;
    Ok(groups)
}

fn close_group(groups: &[CharacterGroup], header_lines: &[usize]) -> ScanResult<()> {
    if let (Some(group), Some(line)) = (groups.last(), header_lines.last()) {
        if group.members.is_empty() {
            return Err(malformed(
                *line,
                &format!("group '{}' has no members", group.name),
            ));
        }
    }
    Ok(())
}

fn malformed(line: usize, reason: &str) -> ScanError {
    ScanError::MalformedCatalog {
        line,
        reason: reason.to_string(),
    }
}
