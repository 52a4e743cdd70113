//! Turns one strategy's findings into the fixed response shape.

use url::Url;

use crate::extract::Findings;
use crate::models::ExtractionResult;
use crate::normalize::{is_web_url, OrderedSet};

/// Deduplicate every category (first-seen order) and fill anything the
/// strategy did not populate with an empty value.
pub fn assemble(findings: Findings) -> ExtractionResult {
    ExtractionResult {
        images: web_urls(findings.images),
        videos: web_urls(findings.videos),
        fonts: dedup(findings.fonts),
        colors: dedup(findings.colors),
        links: web_urls(findings.links.unwrap_or_default()),
        scripts: web_urls(findings.scripts.unwrap_or_default()),
        title: trimmed(findings.title),
        description: trimmed(findings.description),
    }
}

fn dedup(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .filter(|v| !v.is_empty())
        .collect::<OrderedSet>()
        .into_vec()
}

fn web_urls(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .filter(|v| Url::parse(v).is_ok_and(|u| is_web_url(&u)))
        .collect::<OrderedSet>()
        .into_vec()
}

fn trimmed(value: Option<String>) -> String {
    value.map(|v| v.trim().to_string()).unwrap_or_default()
}
