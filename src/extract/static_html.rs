//! Static-HTML strategy: one plain GET and structural pattern matching over
//! the returned markup. No script runs, so only what the server sent is seen.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tokio::time::Instant;
use url::Url;

use super::chromium::BROWSER_USER_AGENT;
use super::Findings;
use crate::config::Config;
use crate::error::ExtractionError;
use crate::normalize::{absolutize, canonical_color, colors_in_value, css_urls, is_web_url};

// ── Constants ────────────────────────────────────────────────────────────────

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_REDIRECTS: usize = 10;

// ── Lazy statics ─────────────────────────────────────────────────────────────

static FONT_FACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)@font-face\s*\{([^}]*)\}").unwrap());

static BASE_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("base[href]").unwrap());
static IMG_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("img[src]").unwrap());
static STYLED_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("[style]").unwrap());
static VIDEO_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("video[src], video source[src], iframe[src]").unwrap());
static STYLE_BLOCK_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("style").unwrap());
static TITLE_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());
static META_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("meta[content]").unwrap());
static LINK_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());
static SCRIPT_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("script[src]").unwrap());

// ── Public API ───────────────────────────────────────────────────────────────

pub struct FetchedPage {
    /// Final URL after redirects.
    pub url: Url,
    pub body: String,
}

pub async fn extract(
    target: &Url,
    deadline: Instant,
    config: &Config,
) -> Result<Findings, ExtractionError> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(ExtractionError::PageLoadTimeout(
            "No time left to fetch the page".to_string(),
        ));
    }
    let page = fetch_html(target, remaining, config.insecure_ssl, config.max_body_bytes).await?;
    Ok(extract_from_html(&page.body, &page.url, config.collect_metadata))
}

// ── HTTP fetch ───────────────────────────────────────────────────────────────

pub async fn fetch_html(
    url: &Url,
    timeout: Duration,
    insecure: bool,
    max_body_bytes: usize,
) -> Result<FetchedPage, ExtractionError> {
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(
        reqwest::header::ACCEPT,
        reqwest::header::HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        ),
    );
    headers.insert(
        reqwest::header::ACCEPT_LANGUAGE,
        reqwest::header::HeaderValue::from_static("en-US,en;q=0.9"),
    );

    let mut builder = reqwest::ClientBuilder::new()
        .connect_timeout(CONNECT_TIMEOUT.min(timeout))
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .user_agent(BROWSER_USER_AGENT)
        .default_headers(headers);

    if insecure {
        builder = builder.danger_accept_invalid_certs(true);
    }

    let client = builder
        .build()
        .map_err(|e| ExtractionError::Internal(format!("HTTP client setup failed: {}", e)))?;

    let mut response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| request_error(e, timeout))?;

    let status = response.status();
    if !status.is_success() {
        return Err(ExtractionError::FetchFailed(format!(
            "Upstream returned HTTP {}",
            status.as_u16()
        )));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_lowercase();
    if !content_type.is_empty() && !content_type.contains("html") {
        return Err(ExtractionError::FetchFailed(format!(
            "URL did not return HTML ({})",
            content_type
        )));
    }

    let too_large = || {
        ExtractionError::FetchFailed(format!("Page is larger than {} bytes", max_body_bytes))
    };
    if response
        .content_length()
        .is_some_and(|length| length > max_body_bytes as u64)
    {
        return Err(too_large());
    }

    let final_url = response.url().clone();
    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| request_error(e, timeout))?
    {
        if body.len() + chunk.len() > max_body_bytes {
            return Err(too_large());
        }
        body.extend_from_slice(&chunk);
    }

    Ok(FetchedPage {
        url: final_url,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

fn request_error(e: reqwest::Error, timeout: Duration) -> ExtractionError {
    if e.is_timeout() {
        ExtractionError::PageLoadTimeout(format!(
            "Page did not respond within {} ms",
            timeout.as_millis()
        ))
    } else if e.is_connect() {
        ExtractionError::FetchFailed(format!("ConnectError: {}", e))
    } else if e.is_redirect() {
        ExtractionError::FetchFailed(format!("RedirectError: {}", e))
    } else {
        ExtractionError::FetchFailed(format!("RequestError: {}", e))
    }
}

// ── Markup extraction ────────────────────────────────────────────────────────

/// Derive the asset categories from raw markup. `page_url` is the URL the
/// markup was served from; a `<base href>` in the document overrides it.
pub fn extract_from_html(html: &str, page_url: &Url, collect_metadata: bool) -> Findings {
    let document = Html::parse_document(html);
    let base = document_base(&document, page_url);

    let mut images: Vec<String> = document
        .select(&IMG_SEL)
        .filter_map(|el| el.value().attr("src"))
        .filter_map(|src| absolutize(&base, src))
        .collect();

    let mut colors = Vec::new();
    for el in document.select(&STYLED_SEL) {
        let Some(style) = el.value().attr("style") else {
            continue;
        };
        for (property, value) in declarations(style) {
            match property.as_str() {
                "color" | "background-color" => colors.extend(canonical_color(value)),
                "background" => {
                    colors.extend(colors_in_value(value));
                    images.extend(css_urls(value).iter().filter_map(|u| absolutize(&base, u)));
                }
                "background-image" => {
                    images.extend(css_urls(value).iter().filter_map(|u| absolutize(&base, u)));
                }
                _ => {}
            }
        }
    }

    let videos = document
        .select(&VIDEO_SEL)
        .filter_map(|el| el.value().attr("src"))
        .filter_map(|src| absolutize(&base, src))
        .collect();

    let fonts = document
        .select(&STYLE_BLOCK_SEL)
        .flat_map(|el| {
            let css = el.text().collect::<String>();
            FONT_FACE_RE
                .captures_iter(&css)
                .flat_map(|cap| css_urls(&cap[1]))
                .collect::<Vec<_>>()
        })
        .filter_map(|src| absolutize(&base, &src))
        .collect();

    let mut findings = Findings {
        images,
        videos,
        fonts,
        colors,
        ..Default::default()
    };

    if collect_metadata {
        findings.title = document
            .select(&TITLE_SEL)
            .next()
            .map(|el| normalize_text(el.text().collect()))
            .filter(|s| !s.is_empty());
        findings.description = meta_description(&document);
        findings.links = Some(
            document
                .select(&LINK_SEL)
                .filter_map(|el| el.value().attr("href"))
                .filter_map(|href| absolutize(&base, href))
                .collect(),
        );
        findings.scripts = Some(
            document
                .select(&SCRIPT_SEL)
                .filter_map(|el| el.value().attr("src"))
                .filter_map(|src| absolutize(&base, src))
                .collect(),
        );
    }

    findings
}

fn document_base(document: &Html, page_url: &Url) -> Url {
    document
        .select(&BASE_SEL)
        .next()
        .and_then(|el| el.value().attr("href"))
        .and_then(|href| page_url.join(href.trim()).ok())
        .filter(is_web_url)
        .unwrap_or_else(|| page_url.clone())
}

fn meta_description(document: &Html) -> Option<String> {
    let find = |attr: &str, value: &str| {
        document
            .select(&META_SEL)
            .find(|el| {
                el.value()
                    .attr(attr)
                    .is_some_and(|v| v.trim().eq_ignore_ascii_case(value))
            })
            .and_then(|el| el.value().attr("content"))
            .map(|content| normalize_text(content.to_string()))
            .filter(|s| !s.is_empty())
    };
    find("name", "description").or_else(|| find("property", "og:description"))
}

/// Split an inline `style` attribute into lowercase property names and
/// values. A `;` inside parentheses or quotes does not end a declaration,
/// and only a trailing `!important` is removed.
fn declarations(style: &str) -> Vec<(String, &str)> {
    split_top_level(style, ';')
        .into_iter()
        .filter_map(|decl| {
            let (property, value) = decl.split_once(':')?;
            let value = strip_important(value.trim());
            if value.is_empty() {
                return None;
            }
            Some((property.trim().to_ascii_lowercase(), value))
        })
        .collect()
}

fn split_top_level(text: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '"' | '\'' => quote = Some(c),
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                _ if c == separator && depth == 0 => {
                    parts.push(&text[start..i]);
                    start = i + c.len_utf8();
                }
                _ => {}
            },
        }
    }
    parts.push(&text[start..]);
    parts
}

fn strip_important(value: &str) -> &str {
    match value.rfind('!') {
        Some(i) if value[i + 1..].trim().eq_ignore_ascii_case("important") => {
            value[..i].trim_end()
        }
        _ => value,
    }
}

/// Collapse whitespace and trim.
fn normalize_text(text: String) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
